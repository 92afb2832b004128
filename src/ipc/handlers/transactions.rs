use super::setup::split_tolerance;
use crate::finance::{
    self, breakdown_label, parse_payment, validate_payment, Category, PaymentBreakdown,
    RevenueRecord, TransactionKind,
};
use crate::ipc::error::err;
use crate::ipc::helpers::{
    bad_params, conversion_err, db_conn, db_err, finance_err, fmt_date, new_id, not_found,
    now_ts, opt_date, opt_str, required_date, required_money, required_str, respond,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde_json::json;

#[derive(Debug, Default, Clone)]
pub struct RecordFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub kind: Option<TransactionKind>,
    pub category: Option<Category>,
    pub student_id: Option<String>,
}

const RECORD_COLUMNS: &str =
    "id, kind, amount, category, date, description, lesson_type_id, student_id, payment_json";

fn record_from_row(r: &rusqlite::Row) -> rusqlite::Result<RevenueRecord> {
    let kind: String = r.get(1)?;
    let category: String = r.get(3)?;
    let payment_json: String = r.get(8)?;
    Ok(RevenueRecord {
        id: r.get(0)?,
        kind: kind.parse().map_err(|e| conversion_err(1, e))?,
        amount: finance::from_db(r.get(2)?),
        category: category.parse().map_err(|e| conversion_err(3, e))?,
        date: r.get(4)?,
        description: r.get(5)?,
        lesson_type_id: r.get(6)?,
        student_id: r.get(7)?,
        payment: serde_json::from_str(&payment_json).map_err(|e| conversion_err(8, e))?,
    })
}

/// Newest first. Date bounds are inclusive.
pub fn load_records(
    conn: &Connection,
    filter: &RecordFilter,
) -> rusqlite::Result<Vec<RevenueRecord>> {
    let mut sql = format!("SELECT {} FROM transactions WHERE 1 = 1", RECORD_COLUMNS);
    let mut bind: Vec<Value> = Vec::new();
    if let Some(from) = filter.from {
        sql.push_str(" AND date >= ?");
        bind.push(Value::Text(fmt_date(from)));
    }
    if let Some(to) = filter.to {
        sql.push_str(" AND date <= ?");
        bind.push(Value::Text(fmt_date(to)));
    }
    if let Some(kind) = filter.kind {
        sql.push_str(" AND kind = ?");
        bind.push(Value::Text(kind.as_str().to_string()));
    }
    if let Some(category) = filter.category {
        sql.push_str(" AND category = ?");
        bind.push(Value::Text(category.as_str().to_string()));
    }
    if let Some(student_id) = filter.student_id.as_ref() {
        sql.push_str(" AND student_id = ?");
        bind.push(Value::Text(student_id.clone()));
    }
    sql.push_str(" ORDER BY date DESC, created_at DESC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_record(conn: &Connection, id: &str) -> rusqlite::Result<Option<RevenueRecord>> {
    conn.query_row(
        &format!("SELECT {} FROM transactions WHERE id = ?", RECORD_COLUMNS),
        [id],
        record_from_row,
    )
    .optional()
}

#[derive(Debug, Clone)]
pub struct RecordDraft {
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub category: Category,
    pub date: NaiveDate,
    pub description: Option<String>,
    pub lesson_type_id: Option<String>,
    pub student_id: Option<String>,
    pub payment: PaymentBreakdown,
}

pub fn insert_record(conn: &Connection, d: &RecordDraft) -> anyhow::Result<String> {
    let id = new_id();
    conn.execute(
        "INSERT INTO transactions(id, kind, amount, category, date, description, lesson_type_id,
                                  student_id, payment_json, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            d.kind.as_str(),
            finance::to_db(d.amount),
            d.category.as_str(),
            fmt_date(d.date),
            d.description,
            d.lesson_type_id,
            d.student_id,
            serde_json::to_string(&d.payment)?,
            now_ts(),
        ],
    )?;
    Ok(id)
}

pub fn required_category(req: &Request, key: &str) -> Result<Category, serde_json::Value> {
    let raw = required_str(req, key)?;
    raw.parse::<Category>().map_err(|e| finance_err(req, e))
}

fn opt_category(req: &Request, key: &str) -> Result<Option<Category>, serde_json::Value> {
    match opt_str(req, key)? {
        None => Ok(None),
        Some(raw) => raw.parse::<Category>().map(Some).map_err(|e| finance_err(req, e)),
    }
}

/// Parses and validates `params.payment` against `total`.
pub fn checked_payment(
    conn: &Connection,
    req: &Request,
    total: Decimal,
) -> Result<PaymentBreakdown, serde_json::Value> {
    let payment = parse_payment(req.params.get("payment")).map_err(|e| finance_err(req, e))?;
    validate_payment(total, &payment, split_tolerance(conn)).map_err(|e| finance_err(req, e))?;
    Ok(payment)
}

fn parse_draft(conn: &Connection, req: &Request) -> Result<RecordDraft, serde_json::Value> {
    let kind = required_str(req, "kind")?
        .parse::<TransactionKind>()
        .map_err(|e| finance_err(req, e))?;
    let amount = required_money(req, "amount")?;
    if amount.is_zero() {
        return Err(bad_params(req, "amount must be greater than zero"));
    }
    let category = required_category(req, "category")?;
    let date = required_date(req, "date")?;
    let payment = checked_payment(conn, req, amount)?;
    Ok(RecordDraft {
        kind,
        amount,
        category,
        date,
        description: opt_str(req, "description")?,
        lesson_type_id: opt_str(req, "lessonTypeId")?,
        student_id: opt_str(req, "studentId")?,
        payment,
    })
}

fn record_json(r: &RevenueRecord) -> serde_json::Value {
    let mut v = json!(r);
    v["breakdownLabel"] = json!(breakdown_label(&r.payment));
    v
}

pub fn records_json(records: &[RevenueRecord]) -> Vec<serde_json::Value> {
    records.iter().map(record_json).collect()
}

fn handle_list(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let kind = match opt_str(req, "kind")? {
        Some(raw) => Some(raw.parse::<TransactionKind>().map_err(|e| finance_err(req, e))?),
        None => None,
    };
    let filter = RecordFilter {
        from: opt_date(req, "from")?,
        to: opt_date(req, "to")?,
        kind,
        category: opt_category(req, "category")?,
        student_id: opt_str(req, "studentId")?,
    };
    let records = load_records(conn, &filter).map_err(|e| db_err(req, "db_query_failed", e))?;
    Ok(json!({ "transactions": records_json(&records) }))
}

fn handle_get(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let record = get_record(conn, &id)
        .map_err(|e| db_err(req, "db_query_failed", e))?
        .ok_or_else(|| not_found(req, "transaction"))?;
    Ok(json!({ "transaction": record_json(&record) }))
}

fn handle_create(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let draft = parse_draft(conn, req)?;
    let id = insert_record(conn, &draft).map_err(|e| db_err(req, "db_insert_failed", e))?;
    tracing::info!(
        transaction_id = %id,
        kind = draft.kind.as_str(),
        category = %draft.category,
        amount = %draft.amount,
        "transaction recorded"
    );
    Ok(json!({ "transactionId": id }))
}

/// Whole-record re-submission; last write wins.
fn handle_update(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let d = parse_draft(conn, req)?;
    let payment_json =
        serde_json::to_string(&d.payment).map_err(|e| db_err(req, "db_update_failed", e))?;
    let n = conn
        .execute(
            "UPDATE transactions SET kind = ?, amount = ?, category = ?, date = ?, description = ?,
                    lesson_type_id = ?, student_id = ?, payment_json = ?, updated_at = ?
             WHERE id = ?",
            rusqlite::params![
                d.kind.as_str(),
                finance::to_db(d.amount),
                d.category.as_str(),
                fmt_date(d.date),
                d.description,
                d.lesson_type_id,
                d.student_id,
                payment_json,
                now_ts(),
                id,
            ],
        )
        .map_err(|e| db_err(req, "db_update_failed", e))?;
    if n == 0 {
        return Err(not_found(req, "transaction"));
    }
    Ok(json!({ "ok": true }))
}

/// Sale lines go with their transaction and their quantities return to stock.
fn handle_delete(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| db_err(req, "db_delete_failed", e))?;
    tx.execute(
        "UPDATE products SET stock = stock + COALESCE(
             (SELECT SUM(si.quantity) FROM sale_items si
              WHERE si.transaction_id = ?1 AND si.product_id = products.id), 0)
         WHERE id IN (SELECT product_id FROM sale_items WHERE transaction_id = ?1)",
        [&id],
    )
    .map_err(|e| db_err(req, "db_delete_failed", e))?;
    tx.execute("DELETE FROM sale_items WHERE transaction_id = ?", [&id])
        .map_err(|e| db_err(req, "db_delete_failed", e))?;
    let n = tx
        .execute("DELETE FROM transactions WHERE id = ?", [&id])
        .map_err(|e| db_err(req, "db_delete_failed", e))?;
    if n == 0 {
        return Err(not_found(req, "transaction"));
    }
    tx.commit().map_err(|e| db_err(req, "db_delete_failed", e))?;
    Ok(json!({ "ok": true }))
}

/// Flat `{method, cardType?, installments?}` form of a single payment.
fn settle_payment(req: &Request) -> Result<PaymentBreakdown, serde_json::Value> {
    let method = required_str(req, "method")?;
    let mut v = json!({ "kind": "single", "method": method });
    for key in ["cardType", "installments"] {
        if let Some(x) = req.params.get(key).filter(|x| !x.is_null()) {
            v[key] = x.clone();
        }
    }
    let payment = parse_payment(Some(&v)).map_err(|e| finance_err(req, e))?;
    validate_payment(Decimal::ZERO, &payment, Decimal::ZERO).map_err(|e| finance_err(req, e))?;
    Ok(payment)
}

/// Moves an on-account income to the method actually received. The amount was
/// already counted as income on creation, so only the bucket changes.
fn handle_settle(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let record = get_record(conn, &id)
        .map_err(|e| db_err(req, "db_query_failed", e))?
        .ok_or_else(|| not_found(req, "transaction"))?;
    if record.kind != TransactionKind::Income || !record.payment.is_deferred() {
        return Err(err(
            &req.id,
            "not_deferred",
            "only on-account income can be settled",
            None,
        ));
    }
    let payment = if req.params.get("payment").is_some() {
        checked_payment(conn, req, record.amount)?
    } else {
        settle_payment(req)?
    };
    match &payment {
        PaymentBreakdown::NotInformed => {
            return Err(bad_params(req, "payment is required to settle"));
        }
        p if p.is_deferred() => {
            return Err(bad_params(req, "settlement cannot be on account"));
        }
        _ => {}
    }
    let payment_json =
        serde_json::to_string(&payment).map_err(|e| db_err(req, "db_update_failed", e))?;
    conn.execute(
        "UPDATE transactions SET payment_json = ?, updated_at = ? WHERE id = ?",
        (&payment_json, now_ts(), &id),
    )
    .map_err(|e| db_err(req, "db_update_failed", e))?;
    tracing::info!(transaction_id = %id, "deferred income settled");
    Ok(json!({
        "ok": true,
        "breakdownLabel": breakdown_label(&payment),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "transactions.list" => handle_list(state, req),
        "transactions.get" => handle_get(state, req),
        "transactions.create" => handle_create(state, req),
        "transactions.update" => handle_update(state, req),
        "transactions.delete" => handle_delete(state, req),
        "transactions.settle" => handle_settle(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
