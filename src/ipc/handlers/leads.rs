use super::lesson_types::get_lesson_type;
use super::students::{default_due_day, default_fee, insert_student, StudentDraftRef};
use crate::ipc::error::err;
use crate::ipc::helpers::{
    conversion_err, db_conn, db_err, fmt_date, new_id, not_found, now_ts, opt_date,
    opt_i64_range, opt_money, opt_str, required_str, respond, today, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::leads::{LeadError, LeadStatus};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub trial_date: Option<String>,
    pub lesson_type_id: Option<String>,
    pub notes: Option<String>,
    pub status: LeadStatus,
    pub converted_on: Option<String>,
    pub student_id: Option<String>,
}

const LEAD_COLUMNS: &str =
    "id, name, phone, trial_date, lesson_type_id, notes, status, converted_on, student_id";

fn lead_from_row(r: &rusqlite::Row) -> rusqlite::Result<Lead> {
    let status: String = r.get(6)?;
    Ok(Lead {
        id: r.get(0)?,
        name: r.get(1)?,
        phone: r.get(2)?,
        trial_date: r.get(3)?,
        lesson_type_id: r.get(4)?,
        notes: r.get(5)?,
        status: status.parse().map_err(|e| conversion_err(6, e))?,
        converted_on: r.get(7)?,
        student_id: r.get(8)?,
    })
}

pub fn get_lead(conn: &Connection, id: &str) -> rusqlite::Result<Option<Lead>> {
    conn.query_row(
        &format!("SELECT {} FROM leads WHERE id = ?", LEAD_COLUMNS),
        [id],
        lead_from_row,
    )
    .optional()
}

pub fn count_by_status(conn: &Connection) -> rusqlite::Result<Vec<(LeadStatus, i64)>> {
    LeadStatus::ALL
        .into_iter()
        .map(|st| {
            conn.query_row(
                "SELECT COUNT(*) FROM leads WHERE status = ?",
                [st.as_str()],
                |r| r.get::<_, i64>(0),
            )
            .map(|n| (st, n))
        })
        .collect()
}

fn lead_err(req: &Request, e: LeadError) -> serde_json::Value {
    err(&req.id, e.code(), e.to_string(), None)
}

fn lead_json(lead: &Lead) -> serde_json::Value {
    let mut v = json!(lead);
    v["nextStatuses"] = json!(lead.status.next_statuses());
    v["canEnroll"] = json!(lead.status.can_enroll());
    v
}

fn handle_list(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let status = match opt_str(req, "status")? {
        Some(raw) => Some(raw.parse::<LeadStatus>().map_err(|e| lead_err(req, e))?),
        None => None,
    };
    let mut sql = format!("SELECT {} FROM leads", LEAD_COLUMNS);
    if status.is_some() {
        sql.push_str(" WHERE status = ?");
    }
    sql.push_str(" ORDER BY COALESCE(trial_date, created_at) DESC, name COLLATE NOCASE");
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| db_err(req, "db_query_failed", e))?;
    let leads = match status {
        Some(st) => stmt.query_map([st.as_str()], lead_from_row),
        None => stmt.query_map([], lead_from_row),
    }
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| db_err(req, "db_query_failed", e))?;
    let leads: Vec<serde_json::Value> = leads.iter().map(lead_json).collect();
    Ok(json!({ "leads": leads }))
}

struct ContactDraft {
    name: String,
    phone: Option<String>,
    trial_date: Option<String>,
    lesson_type_id: Option<String>,
    notes: Option<String>,
}

fn parse_contact(req: &Request) -> Result<ContactDraft, serde_json::Value> {
    Ok(ContactDraft {
        name: required_str(req, "name")?,
        phone: opt_str(req, "phone")?,
        trial_date: opt_date(req, "trialDate")?.map(fmt_date),
        lesson_type_id: opt_str(req, "lessonTypeId")?,
        notes: opt_str(req, "notes")?,
    })
}

fn handle_create(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let d = parse_contact(req)?;
    let id = new_id();
    conn.execute(
        "INSERT INTO leads(id, name, phone, trial_date, lesson_type_id, notes, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            d.name,
            d.phone,
            d.trial_date,
            d.lesson_type_id,
            d.notes,
            LeadStatus::Scheduled.as_str(),
            now_ts(),
        ],
    )
    .map_err(|e| db_err(req, "db_insert_failed", e))?;
    Ok(json!({ "leadId": id }))
}

/// Contact fields only; status moves through `leads.transition`.
fn handle_update(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let d = parse_contact(req)?;
    let n = conn
        .execute(
            "UPDATE leads SET name = ?, phone = ?, trial_date = ?, lesson_type_id = ?, notes = ?
             WHERE id = ?",
            rusqlite::params![d.name, d.phone, d.trial_date, d.lesson_type_id, d.notes, id],
        )
        .map_err(|e| db_err(req, "db_update_failed", e))?;
    if n == 0 {
        return Err(not_found(req, "lead"));
    }
    Ok(json!({ "ok": true }))
}

fn handle_delete(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let n = conn
        .execute("DELETE FROM leads WHERE id = ?", [&id])
        .map_err(|e| db_err(req, "db_delete_failed", e))?;
    if n == 0 {
        return Err(not_found(req, "lead"));
    }
    Ok(json!({ "ok": true }))
}

fn handle_transition(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let to = required_str(req, "to")?
        .parse::<LeadStatus>()
        .map_err(|e| lead_err(req, e))?;
    let lead = get_lead(conn, &id)
        .map_err(|e| db_err(req, "db_query_failed", e))?
        .ok_or_else(|| not_found(req, "lead"))?;
    let next = lead.status.transition(to).map_err(|e| lead_err(req, e))?;
    conn.execute(
        "UPDATE leads SET status = ? WHERE id = ?",
        (next.as_str(), &id),
    )
    .map_err(|e| db_err(req, "db_update_failed", e))?;
    tracing::info!(lead_id = %id, from = lead.status.as_str(), to = next.as_str(), "lead moved");
    Ok(json!({
        "status": next,
        "nextStatuses": next.next_statuses(),
    }))
}

/// Enrolls an attended lead: the new student and the converted status are
/// written in one transaction.
fn handle_convert(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let lead = get_lead(conn, &id)
        .map_err(|e| db_err(req, "db_query_failed", e))?
        .ok_or_else(|| not_found(req, "lead"))?;
    let converted = lead.status.enroll().map_err(|e| lead_err(req, e))?;

    let lesson_type = match lead.lesson_type_id.as_deref() {
        Some(lt_id) => get_lesson_type(conn, lt_id).map_err(|e| db_err(req, "db_query_failed", e))?,
        None => None,
    };
    let monthly_fee = match opt_money(req, "monthlyFee")? {
        Some(fee) => fee,
        None => default_fee(conn, lesson_type.as_ref()),
    };
    let due_day = match opt_i64_range(req, "dueDay", 1, 28)? {
        Some(d) => d,
        None => default_due_day(conn),
    };
    let enrolled_on = fmt_date(opt_date(req, "enrolledOn")?.unwrap_or_else(today));

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| db_err(req, "db_insert_failed", e))?;
    let student_id = insert_student(
        &tx,
        &StudentDraftRef {
            name: &lead.name,
            phone: lead.phone.as_deref(),
            birth_date: None,
            // A lesson type deleted since the trial is not carried over.
            lesson_type_id: lesson_type.as_ref().map(|lt| lt.id.as_str()),
            monthly_fee,
            due_day,
            active: true,
            enrolled_on: &enrolled_on,
            notes: lead.notes.as_deref(),
        },
    )
    .map_err(|e| db_err(req, "db_insert_failed", e))?;
    tx.execute(
        "UPDATE leads SET status = ?, converted_on = ?, student_id = ? WHERE id = ?",
        (converted.as_str(), &enrolled_on, &student_id, &id),
    )
    .map_err(|e| db_err(req, "db_update_failed", e))?;
    tx.commit().map_err(|e| db_err(req, "db_update_failed", e))?;
    tracing::info!(lead_id = %id, student_id = %student_id, "lead enrolled");
    Ok(json!({ "studentId": student_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "leads.list" => handle_list(state, req),
        "leads.create" => handle_create(state, req),
        "leads.update" => handle_update(state, req),
        "leads.delete" => handle_delete(state, req),
        "leads.transition" => handle_transition(state, req),
        "leads.convert" => handle_convert(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
