use super::instructors::{get_config, load_configs};
use super::transactions::{load_records, RecordFilter};
use crate::commission::{self, commission_lines, PaymentAck};
use crate::finance::{self, checked_sum, TransactionKind};
use crate::ipc::error::err;
use crate::ipc::helpers::{
    db_conn, db_err, finance_err, new_id, not_found, now_ts, opt_str, required_month,
    required_str, respond, HandlerResult, Month,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

const ACK_COLUMNS: &str = "id, instructor_id, ref_month, amount, paid_at";

fn ack_from_row(r: &rusqlite::Row) -> rusqlite::Result<PaymentAck> {
    Ok(PaymentAck {
        id: r.get(0)?,
        instructor_id: r.get(1)?,
        ref_month: r.get(2)?,
        amount: finance::from_db(r.get(3)?),
        paid_at: r.get(4)?,
    })
}

pub fn get_ack(
    conn: &Connection,
    instructor_id: &str,
    month: Month,
) -> rusqlite::Result<Option<PaymentAck>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM commission_payments WHERE instructor_id = ? AND ref_month = ?",
            ACK_COLUMNS
        ),
        (instructor_id, month.key()),
        ack_from_row,
    )
    .optional()
}

fn month_acks(conn: &Connection, month: Month) -> rusqlite::Result<HashMap<String, PaymentAck>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM commission_payments WHERE ref_month = ?",
        ACK_COLUMNS
    ))?;
    let rows = stmt
        .query_map([month.key()], ack_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .map(|a| (a.instructor_id.clone(), a))
        .collect())
}

fn month_income(conn: &Connection, month: Month) -> rusqlite::Result<Vec<finance::RevenueRecord>> {
    load_records(
        conn,
        &RecordFilter {
            from: Some(month.first_day()),
            to: Some(month.last_day()),
            kind: Some(TransactionKind::Income),
            ..RecordFilter::default()
        },
    )
}

fn handle_month(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let month = required_month(req, "month")?;
    let configs = load_configs(conn).map_err(|e| db_err(req, "db_query_failed", e))?;
    let records = month_income(conn, month).map_err(|e| db_err(req, "db_query_failed", e))?;
    let acks = month_acks(conn, month).map_err(|e| db_err(req, "db_query_failed", e))?;

    let lines = commission_lines(&configs, &records, &acks).map_err(|e| finance_err(req, e))?;
    let total_due = checked_sum(lines.iter().filter(|l| !l.paid).map(|l| l.amount_due))
        .map_err(|e| finance_err(req, e))?;
    let total_paid = checked_sum(lines.iter().filter_map(|l| l.paid_amount))
        .map_err(|e| finance_err(req, e))?;
    Ok(json!({
        "month": month.key(),
        "lines": lines,
        "totalDue": total_due,
        "totalPaid": total_paid,
    }))
}

/// Freezes this month's live commission. Later edits to records or to the
/// percentage do not touch the stored amount.
fn handle_mark_paid(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let instructor_id = required_str(req, "instructorId")?;
    let month = required_month(req, "month")?;
    let config = get_config(conn, &instructor_id)
        .map_err(|e| db_err(req, "db_query_failed", e))?
        .ok_or_else(|| not_found(req, "instructor"))?;
    if get_ack(conn, &instructor_id, month)
        .map_err(|e| db_err(req, "db_query_failed", e))?
        .is_some()
    {
        return Err(err(
            &req.id,
            "already_paid",
            format!("commission for {} is already paid", month.key()),
            None,
        ));
    }

    let records = month_income(conn, month).map_err(|e| db_err(req, "db_query_failed", e))?;
    let amount = commission::matched_revenue(&records, config.category)
        .and_then(|matched| commission::commission(matched, config.percentage))
        .map_err(|e| finance_err(req, e))?;
    let ack = PaymentAck {
        id: new_id(),
        instructor_id,
        ref_month: month.key(),
        amount,
        paid_at: now_ts(),
    };
    conn.execute(
        "INSERT INTO commission_payments(id, instructor_id, ref_month, amount, paid_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            &ack.id,
            &ack.instructor_id,
            &ack.ref_month,
            finance::to_db(ack.amount),
            &ack.paid_at,
        ),
    )
    .map_err(|e| db_err(req, "db_insert_failed", e))?;
    tracing::info!(
        instructor_id = %ack.instructor_id,
        month = %ack.ref_month,
        amount = %ack.amount,
        "commission marked paid"
    );
    Ok(json!({ "payment": ack }))
}

fn handle_cancel_payment(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let instructor_id = required_str(req, "instructorId")?;
    let month = required_month(req, "month")?;
    let n = conn
        .execute(
            "DELETE FROM commission_payments WHERE instructor_id = ? AND ref_month = ?",
            (&instructor_id, month.key()),
        )
        .map_err(|e| db_err(req, "db_delete_failed", e))?;
    if n == 0 {
        return Err(err(
            &req.id,
            "not_paid",
            format!("commission for {} is not paid", month.key()),
            None,
        ));
    }
    tracing::info!(
        instructor_id = %instructor_id,
        month = %month.key(),
        "commission payment cancelled"
    );
    Ok(json!({ "ok": true }))
}

fn handle_history(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let instructor_id = opt_str(req, "instructorId")?;
    let mut sql = format!("SELECT {} FROM commission_payments", ACK_COLUMNS);
    if instructor_id.is_some() {
        sql.push_str(" WHERE instructor_id = ?");
    }
    sql.push_str(" ORDER BY ref_month DESC, paid_at DESC");
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| db_err(req, "db_query_failed", e))?;
    let rows = match instructor_id.as_deref() {
        Some(id) => stmt.query_map([id], ack_from_row),
        None => stmt.query_map([], ack_from_row),
    }
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| db_err(req, "db_query_failed", e))?;

    // Receipts outlive their instructor; names are resolved when still known.
    let names: HashMap<String, String> = load_configs(conn)
        .map_err(|e| db_err(req, "db_query_failed", e))?
        .into_iter()
        .map(|c| (c.id, c.name))
        .collect();
    let payments: Vec<serde_json::Value> = rows
        .iter()
        .map(|a| {
            let mut v = json!(a);
            v["instructorName"] = json!(names.get(&a.instructor_id));
            v
        })
        .collect();
    Ok(json!({ "payments": payments }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "commissions.month" => handle_month(state, req),
        "commissions.markPaid" => handle_mark_paid(state, req),
        "commissions.cancelPayment" => handle_cancel_payment(state, req),
        "commissions.history" => handle_history(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
