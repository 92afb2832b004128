use super::lesson_types::get_lesson_type;
use super::students::{get_student, list_students, Student};
use super::transactions::{checked_payment, insert_record, RecordDraft};
use crate::finance::{checked_sum, Category, TransactionKind};
use crate::ipc::helpers::{
    db_conn, db_err, finance_err, fmt_date, not_found, opt_money, opt_str, required_date,
    required_month, required_str, respond, HandlerResult, Month,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde_json::json;

/// Latest income linked to the student inside `month`, if any.
pub fn paid_transaction(
    conn: &Connection,
    student_id: &str,
    month: Month,
) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM transactions
         WHERE student_id = ? AND kind = 'income' AND date >= ? AND date <= ?
         ORDER BY date DESC, created_at DESC
         LIMIT 1",
        (
            student_id,
            fmt_date(month.first_day()),
            fmt_date(month.last_day()),
        ),
        |r| r.get(0),
    )
    .optional()
}

pub fn due_date(student: &Student, month: Month) -> String {
    fmt_date(month.day(student.due_day))
}

fn handle_month(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let month = required_month(req, "month")?;
    let students =
        list_students(conn, true, None).map_err(|e| db_err(req, "db_query_failed", e))?;
    let mut rows: Vec<serde_json::Value> = Vec::with_capacity(students.len());
    let mut unpaid_fees: Vec<Decimal> = Vec::new();
    for s in &students {
        let paid_id =
            paid_transaction(conn, &s.id, month).map_err(|e| db_err(req, "db_query_failed", e))?;
        if paid_id.is_none() {
            unpaid_fees.push(s.monthly_fee);
        }
        rows.push(json!({
            "studentId": s.id,
            "name": s.name,
            "phone": s.phone,
            "lessonTypeName": s.lesson_type_name,
            "dueDate": due_date(s, month),
            "amount": s.monthly_fee,
            "paid": paid_id.is_some(),
            "paidTransactionId": paid_id,
        }));
    }
    let outstanding = checked_sum(unpaid_fees).map_err(|e| finance_err(req, e))?;
    Ok(json!({
        "month": month.key(),
        "students": rows,
        "outstanding": outstanding,
    }))
}

/// Records a monthly fee against the student's lesson type category.
fn handle_charge(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let student = get_student(conn, &student_id)
        .map_err(|e| db_err(req, "db_query_failed", e))?
        .ok_or_else(|| not_found(req, "student"))?;
    let date = required_date(req, "date")?;
    let amount = opt_money(req, "amount")?.unwrap_or(student.monthly_fee);
    let category = match student.lesson_type_id.as_deref() {
        Some(id) => get_lesson_type(conn, id)
            .map_err(|e| db_err(req, "db_query_failed", e))?
            .map(|lt| Category::from(lt.category))
            .unwrap_or(Category::Other),
        None => Category::Other,
    };
    let payment = checked_payment(conn, req, amount)?;
    let description = opt_str(req, "description")?.unwrap_or_else(|| {
        format!("Monthly fee {} - {}", Month::of(date).key(), student.name)
    });
    let draft = RecordDraft {
        kind: TransactionKind::Income,
        amount,
        category,
        date,
        description: Some(description),
        lesson_type_id: student.lesson_type_id.clone(),
        student_id: Some(student.id.clone()),
        payment,
    };
    let id = insert_record(conn, &draft).map_err(|e| db_err(req, "db_insert_failed", e))?;
    tracing::info!(
        student_id = %student.id,
        transaction_id = %id,
        amount = %amount,
        category = %category,
        "monthly fee charged"
    );
    Ok(json!({ "transactionId": id, "amount": amount, "category": category }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "billing.month" => handle_month(state, req),
        "billing.charge" => handle_charge(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
