use rust_decimal::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Money is kept with two decimal places, half away from zero.
const MONEY_DP: u32 = 2;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FinanceError {
    #[error("{0} must be a number")]
    InvalidAmount(String),
    #[error("{0} must not be negative")]
    NegativeAmount(String),
    #[error("{0} must not exceed 1000000000000")]
    AmountTooLarge(String),
    #[error("amount overflow")]
    Overflow,
    #[error("unknown category: {0}")]
    UnknownCategory(String),
    #[error("unknown class category: {0}")]
    UnknownClassCategory(String),
    #[error("unknown transaction kind: {0}")]
    UnknownKind(String),
    #[error("invalid payment: {0}")]
    InvalidPayment(String),
    #[error("split payment needs at least one part")]
    EmptySplit,
    #[error("split payment parts must be greater than zero")]
    NonPositivePart,
    #[error("split payment parts cannot be on account")]
    DeferredSplitPart,
    #[error("split payments sum to {sum} but the total is {total}")]
    SplitMismatch { total: Decimal, sum: Decimal },
}

impl FinanceError {
    pub fn code(&self) -> &'static str {
        match self {
            FinanceError::SplitMismatch { .. } => "split_mismatch",
            FinanceError::Overflow => "amount_overflow",
            _ => "bad_params",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            FinanceError::SplitMismatch { total, sum } => Some(json!({
                "total": total,
                "sum": sum,
                "difference": (*total - *sum).abs(),
            })),
            _ => None,
        }
    }
}

pub fn round_money(v: Decimal) -> Decimal {
    v.round_dp_with_strategy(MONEY_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Amounts are stored as REAL; arithmetic never happens on the f64 side.
pub fn from_db(v: f64) -> Decimal {
    Decimal::from_f64(v).map(round_money).unwrap_or_default()
}

pub fn to_db(v: Decimal) -> f64 {
    round_money(v).to_f64().unwrap_or_default()
}

pub fn default_split_tolerance() -> Decimal {
    Decimal::new(5, 2)
}

/// Largest amount a single value may carry.
pub fn money_ceiling() -> Decimal {
    Decimal::new(1_000_000_000_000, 0)
}

pub fn checked_sum<I>(amounts: I) -> Result<Decimal, FinanceError>
where
    I: IntoIterator<Item = Decimal>,
{
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(v))
        .ok_or(FinanceError::Overflow)
}

/// Accepts a JSON number or a numeric string ("49.90", "49,90").
pub fn parse_money(v: &serde_json::Value, field: &str) -> Result<Decimal, FinanceError> {
    let parsed = if let Some(i) = v.as_i64() {
        Some(Decimal::from(i))
    } else if let Some(f) = v.as_f64() {
        Decimal::from_f64(f)
    } else if let Some(s) = v.as_str() {
        Decimal::from_str(&s.trim().replace(',', ".")).ok()
    } else {
        None
    };
    let amount = parsed
        .map(round_money)
        .ok_or_else(|| FinanceError::InvalidAmount(field.to_string()))?;
    if amount.abs() > money_ceiling() {
        return Err(FinanceError::AmountTooLarge(field.to_string()));
    }
    Ok(amount)
}

pub fn parse_non_negative_money(
    v: &serde_json::Value,
    field: &str,
) -> Result<Decimal, FinanceError> {
    let amount = parse_money(v, field)?;
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(FinanceError::NegativeAmount(field.to_string()));
    }
    Ok(amount)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionKind {
    Income,
    Expense,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Income => "income",
            TransactionKind::Expense => "expense",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = FinanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "income" => Ok(TransactionKind::Income),
            "expense" => Ok(TransactionKind::Expense),
            other => Err(FinanceError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClassCategory {
    Adult,
    Teen,
    Kids,
}

impl ClassCategory {
    pub const ALL: [ClassCategory; 3] = [
        ClassCategory::Adult,
        ClassCategory::Teen,
        ClassCategory::Kids,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ClassCategory::Adult => "adult",
            ClassCategory::Teen => "teen",
            ClassCategory::Kids => "kids",
        }
    }
}

impl FromStr for ClassCategory {
    type Err = FinanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ClassCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| FinanceError::UnknownClassCategory(s.to_string()))
    }
}

/// Revenue category. Parsing is exact: "Adult" or "adulto" are rejected rather
/// than stored as a bucket no commission config can ever match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Class(ClassCategory),
    Store,
    Other,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Class(c) => c.as_str(),
            Category::Store => "store",
            Category::Other => "other",
        }
    }
}

impl From<ClassCategory> for Category {
    fn from(c: ClassCategory) -> Self {
        Category::Class(c)
    }
}

impl FromStr for Category {
    type Err = FinanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "store" => Ok(Category::Store),
            "other" => Ok(Category::Other),
            _ => ClassCategory::from_str(s)
                .map(Category::Class)
                .map_err(|_| FinanceError::UnknownCategory(s.to_string())),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Category::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymentMethod {
    Cash,
    Instant,
    Card,
    OnAccount,
    Other,
}

impl PaymentMethod {
    pub fn label(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Instant => "instant",
            PaymentMethod::Card => "card",
            PaymentMethod::OnAccount => "on account",
            PaymentMethod::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CardType {
    Credit,
    Debit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitPart {
    pub method: PaymentMethod,
    pub amount: Decimal,
}

/// How a record's amount was paid. The `kind` tag is always present on the
/// wire, so readers match on it instead of probing optional fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PaymentBreakdown {
    Split {
        parts: Vec<SplitPart>,
    },
    #[serde(rename_all = "camelCase")]
    Single {
        method: PaymentMethod,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        card_type: Option<CardType>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        installments: Option<u32>,
    },
    #[default]
    #[serde(rename = "none")]
    NotInformed,
}

impl PaymentBreakdown {
    pub fn is_deferred(&self) -> bool {
        matches!(
            self,
            PaymentBreakdown::Single {
                method: PaymentMethod::OnAccount,
                ..
            }
        )
    }
}

/// Missing or null means "not informed".
pub fn parse_payment(v: Option<&serde_json::Value>) -> Result<PaymentBreakdown, FinanceError> {
    let Some(v) = v.filter(|v| !v.is_null()) else {
        return Ok(PaymentBreakdown::NotInformed);
    };
    let mut parsed: PaymentBreakdown = serde_json::from_value(v.clone())
        .map_err(|e| FinanceError::InvalidPayment(e.to_string()))?;
    if let PaymentBreakdown::Split { parts } = &mut parsed {
        for part in parts.iter_mut() {
            part.amount = round_money(part.amount);
        }
    }
    Ok(parsed)
}

/// Rejects a breakdown that cannot describe `total`. A split whose sum is off
/// by at most `tolerance` is accepted as is.
pub fn validate_payment(
    total: Decimal,
    payment: &PaymentBreakdown,
    tolerance: Decimal,
) -> Result<(), FinanceError> {
    match payment {
        PaymentBreakdown::Split { parts } => {
            if parts.is_empty() {
                return Err(FinanceError::EmptySplit);
            }
            if parts.iter().any(|p| p.amount <= Decimal::ZERO) {
                return Err(FinanceError::NonPositivePart);
            }
            if parts.iter().any(|p| p.amount > money_ceiling()) {
                return Err(FinanceError::AmountTooLarge("payment part".to_string()));
            }
            // Only a single on-account payment can be settled later.
            if parts.iter().any(|p| p.method == PaymentMethod::OnAccount) {
                return Err(FinanceError::DeferredSplitPart);
            }
            let sum = checked_sum(parts.iter().map(|p| p.amount))?;
            if (sum - total).abs() > tolerance {
                return Err(FinanceError::SplitMismatch { total, sum });
            }
            Ok(())
        }
        PaymentBreakdown::Single {
            method,
            card_type,
            installments,
        } => {
            if card_type.is_some() && *method != PaymentMethod::Card {
                return Err(FinanceError::InvalidPayment(
                    "cardType only applies to card payments".to_string(),
                ));
            }
            if matches!(installments, Some(0)) {
                return Err(FinanceError::InvalidPayment(
                    "installments must be at least 1".to_string(),
                ));
            }
            Ok(())
        }
        PaymentBreakdown::NotInformed => Ok(()),
    }
}

pub fn breakdown_label(payment: &PaymentBreakdown) -> String {
    match payment {
        PaymentBreakdown::Split { parts } => parts
            .iter()
            .map(|p| format!("{} {:.2}", p.method.label(), p.amount))
            .collect::<Vec<_>>()
            .join(" + "),
        PaymentBreakdown::Single {
            method: PaymentMethod::Card,
            card_type,
            installments,
        } => {
            let mut extra: Vec<String> = Vec::new();
            match card_type {
                Some(CardType::Credit) => extra.push("credit".to_string()),
                Some(CardType::Debit) => extra.push("debit".to_string()),
                None => {}
            }
            if let Some(n) = installments.filter(|n| *n > 1) {
                extra.push(format!("{}x", n));
            }
            if extra.is_empty() {
                "card".to_string()
            } else {
                format!("card ({})", extra.join(", "))
            }
        }
        PaymentBreakdown::Single { method, .. } => method.label().to_string(),
        PaymentBreakdown::NotInformed => "not informed".to_string(),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueRecord {
    pub id: String,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub category: Category,
    pub date: String,
    pub description: Option<String>,
    pub lesson_type_id: Option<String>,
    pub student_id: Option<String>,
    pub payment: PaymentBreakdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentBucket {
    Cash,
    Instant,
    Credit,
    Debit,
    Deferred,
    Other,
}

/// Split parts never distinguish debit: every card part counts as credit.
fn split_bucket(method: PaymentMethod) -> PaymentBucket {
    match method {
        PaymentMethod::Cash => PaymentBucket::Cash,
        PaymentMethod::Instant => PaymentBucket::Instant,
        PaymentMethod::Card => PaymentBucket::Credit,
        PaymentMethod::OnAccount => PaymentBucket::Deferred,
        PaymentMethod::Other => PaymentBucket::Other,
    }
}

fn single_bucket(method: PaymentMethod, card_type: Option<CardType>) -> PaymentBucket {
    match (method, card_type) {
        (PaymentMethod::Card, Some(CardType::Debit)) => PaymentBucket::Debit,
        (PaymentMethod::Card, _) => PaymentBucket::Credit,
        (other, _) => split_bucket(other),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinanceTotals {
    pub cash: Decimal,
    pub instant: Decimal,
    pub credit: Decimal,
    pub debit: Decimal,
    pub deferred: Decimal,
    pub other: Decimal,
    pub income_total: Decimal,
    pub expense_total: Decimal,
    pub balance: Decimal,
}

impl FinanceTotals {
    fn add(&mut self, bucket: PaymentBucket, amount: Decimal) -> Result<(), FinanceError> {
        let slot = match bucket {
            PaymentBucket::Cash => &mut self.cash,
            PaymentBucket::Instant => &mut self.instant,
            PaymentBucket::Credit => &mut self.credit,
            PaymentBucket::Debit => &mut self.debit,
            PaymentBucket::Deferred => &mut self.deferred,
            PaymentBucket::Other => &mut self.other,
        };
        *slot = slot.checked_add(amount).ok_or(FinanceError::Overflow)?;
        Ok(())
    }

    pub fn bucket_sum(&self) -> Result<Decimal, FinanceError> {
        checked_sum([
            self.cash,
            self.instant,
            self.credit,
            self.debit,
            self.deferred,
            self.other,
        ])
    }
}

/// Single pass over the records; each income record lands in the buckets
/// exactly once, so the bucket sum always equals `income_total`.
pub fn reconcile<'a, I>(records: I) -> Result<FinanceTotals, FinanceError>
where
    I: IntoIterator<Item = &'a RevenueRecord>,
{
    let mut totals = FinanceTotals::default();
    for r in records {
        if r.kind == TransactionKind::Expense {
            totals.expense_total = checked_sum([totals.expense_total, r.amount])?;
            continue;
        }
        totals.income_total = checked_sum([totals.income_total, r.amount])?;
        match &r.payment {
            PaymentBreakdown::Split { parts } if !parts.is_empty() => {
                let mut routed = Decimal::ZERO;
                let last = parts.len() - 1;
                for (i, part) in parts.iter().enumerate() {
                    // The last part absorbs whatever residual the tolerance let through.
                    let amount = if i == last {
                        r.amount.checked_sub(routed).ok_or(FinanceError::Overflow)?
                    } else {
                        part.amount
                    };
                    routed = checked_sum([routed, amount])?;
                    totals.add(split_bucket(part.method), amount)?;
                }
            }
            PaymentBreakdown::Single {
                method, card_type, ..
            } => totals.add(single_bucket(*method, *card_type), r.amount)?,
            _ => totals.add(PaymentBucket::Other, r.amount)?,
        }
    }
    totals.balance = totals
        .income_total
        .checked_sub(totals.expense_total)
        .ok_or(FinanceError::Overflow)?;
    Ok(totals)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTotal {
    pub category: Category,
    pub income: Decimal,
    pub expense: Decimal,
}

pub fn totals_by_category<'a, I>(records: I) -> Result<Vec<CategoryTotal>, FinanceError>
where
    I: IntoIterator<Item = &'a RevenueRecord>,
{
    let mut out: Vec<CategoryTotal> = Vec::new();
    for r in records {
        let idx = match out.iter().position(|c| c.category == r.category) {
            Some(i) => i,
            None => {
                out.push(CategoryTotal {
                    category: r.category,
                    income: Decimal::ZERO,
                    expense: Decimal::ZERO,
                });
                out.len() - 1
            }
        };
        let slot = match r.kind {
            TransactionKind::Income => &mut out[idx].income,
            TransactionKind::Expense => &mut out[idx].expense,
        };
        *slot = checked_sum([*slot, r.amount])?;
    }
    out.sort_by(|a, b| a.category.as_str().cmp(b.category.as_str()));
    Ok(out)
}
