use crate::finance::{
    checked_sum, round_money, Category, ClassCategory, FinanceError, RevenueRecord,
    TransactionKind,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionConfig {
    pub id: String,
    pub name: String,
    pub category: ClassCategory,
    pub percentage: Decimal,
    pub phone: Option<String>,
}

/// Receipt frozen when a month is marked paid. It is never recomputed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAck {
    pub id: String,
    pub instructor_id: String,
    pub ref_month: String,
    pub amount: Decimal,
    pub paid_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionLine {
    pub instructor_id: String,
    pub name: String,
    pub category: ClassCategory,
    pub percentage: Decimal,
    pub matched_revenue: Decimal,
    pub live_commission: Decimal,
    pub paid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<String>,
    pub amount_due: Decimal,
}

pub fn commission(
    matched_revenue: Decimal,
    percentage: Decimal,
) -> Result<Decimal, FinanceError> {
    let share = matched_revenue
        .checked_mul(percentage)
        .ok_or(FinanceError::Overflow)?;
    Ok(round_money(share / Decimal::ONE_HUNDRED))
}

/// Income only; the caller has already narrowed `records` to the month.
pub fn matched_revenue<'a, I>(
    records: I,
    category: ClassCategory,
) -> Result<Decimal, FinanceError>
where
    I: IntoIterator<Item = &'a RevenueRecord>,
{
    checked_sum(
        records
            .into_iter()
            .filter(|r| r.kind == TransactionKind::Income)
            .filter(|r| r.category == Category::Class(category))
            .map(|r| r.amount),
    )
}

/// `acks` is keyed by instructor id and holds the receipts for one month.
pub fn commission_lines(
    configs: &[CommissionConfig],
    records: &[RevenueRecord],
    acks: &HashMap<String, PaymentAck>,
) -> Result<Vec<CommissionLine>, FinanceError> {
    let mut by_category: HashMap<ClassCategory, Decimal> = HashMap::new();
    configs
        .iter()
        .map(|c| {
            let matched = match by_category.get(&c.category) {
                Some(m) => *m,
                None => {
                    let m = matched_revenue(records, c.category)?;
                    by_category.insert(c.category, m);
                    m
                }
            };
            let live = commission(matched, c.percentage)?;
            let ack = acks.get(&c.id);
            Ok(CommissionLine {
                instructor_id: c.id.clone(),
                name: c.name.clone(),
                category: c.category,
                percentage: c.percentage,
                matched_revenue: matched,
                live_commission: live,
                paid: ack.is_some(),
                paid_amount: ack.map(|a| a.amount),
                paid_at: ack.map(|a| a.paid_at.clone()),
                amount_due: ack.map(|a| a.amount).unwrap_or(live),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finance::{PaymentBreakdown, PaymentMethod, SplitPart};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).expect("decimal literal")
    }

    fn record(amount: &str, category: Category, kind: TransactionKind) -> RevenueRecord {
        RevenueRecord {
            id: format!("r-{}", amount),
            kind,
            amount: dec(amount),
            category,
            date: "2025-03-05".to_string(),
            description: None,
            lesson_type_id: None,
            student_id: None,
            payment: PaymentBreakdown::Split {
                parts: vec![
                    SplitPart {
                        method: PaymentMethod::Cash,
                        amount: dec(amount),
                    },
                ],
            },
        }
    }

    fn config(id: &str, category: ClassCategory, pct: &str) -> CommissionConfig {
        CommissionConfig {
            id: id.to_string(),
            name: format!("Instructor {}", id),
            category,
            percentage: dec(pct),
            phone: None,
        }
    }

    #[test]
    fn half_of_one_hundred_is_fifty() {
        let records = vec![record("100", ClassCategory::Adult.into(), TransactionKind::Income)];
        let configs = [config("c1", ClassCategory::Adult, "50")];
        let lines = commission_lines(&configs, &records, &HashMap::new()).expect("lines");
        assert_eq!(lines[0].matched_revenue, dec("100"));
        assert_eq!(lines[0].live_commission, dec("50.00"));
        assert!(!lines[0].paid);
        assert_eq!(lines[0].amount_due, dec("50.00"));
    }

    #[test]
    fn commission_scales_linearly_with_percentage() {
        let matched = dec("873.40");
        let base = commission(matched, dec("10")).expect("commission");
        assert_eq!(commission(matched, dec("20")), Ok(base * dec("2")));
        assert_eq!(commission(matched, dec("40")), Ok(base * dec("4")));
        assert_eq!(commission(matched, Decimal::ZERO), Ok(Decimal::ZERO));
    }

    #[test]
    fn expenses_and_other_categories_do_not_match() {
        let records = vec![
            record("100", ClassCategory::Adult.into(), TransactionKind::Income),
            record("70", ClassCategory::Adult.into(), TransactionKind::Expense),
            record("55", ClassCategory::Kids.into(), TransactionKind::Income),
            record("30", Category::Store, TransactionKind::Income),
        ];
        assert_eq!(matched_revenue(&records, ClassCategory::Adult), Ok(dec("100")));
        assert_eq!(matched_revenue(&records, ClassCategory::Kids), Ok(dec("55")));
        assert_eq!(matched_revenue(&records, ClassCategory::Teen), Ok(Decimal::ZERO));
    }

    #[test]
    fn paid_line_keeps_frozen_amount_while_peers_follow_revenue() {
        let configs = vec![
            config("c1", ClassCategory::Adult, "50"),
            config("c2", ClassCategory::Adult, "10"),
        ];
        let mut acks = HashMap::new();
        acks.insert(
            "c1".to_string(),
            PaymentAck {
                id: "ack".to_string(),
                instructor_id: "c1".to_string(),
                ref_month: "2025-03".to_string(),
                amount: dec("50.00"),
                paid_at: "2025-04-01T10:00:00Z".to_string(),
            },
        );
        let records = vec![
            record("100", ClassCategory::Adult.into(), TransactionKind::Income),
            record("200", ClassCategory::Adult.into(), TransactionKind::Income),
        ];
        let lines = commission_lines(&configs, &records, &acks).expect("lines");
        assert!(lines[0].paid);
        assert_eq!(lines[0].amount_due, dec("50.00"));
        assert_eq!(lines[0].live_commission, dec("150.00"));
        assert!(!lines[1].paid);
        assert_eq!(lines[1].amount_due, dec("30.00"));
    }

    #[test]
    fn oversized_revenue_reports_overflow() {
        let mut big = record("1", ClassCategory::Adult.into(), TransactionKind::Income);
        big.amount = Decimal::MAX;
        let configs = [config("c1", ClassCategory::Adult, "50")];
        assert_eq!(
            commission_lines(&configs, &[big.clone()], &HashMap::new()).map(|l| l.len()),
            Err(FinanceError::Overflow)
        );
        assert_eq!(
            matched_revenue(&[big.clone(), big], ClassCategory::Adult),
            Err(FinanceError::Overflow)
        );
    }
}
