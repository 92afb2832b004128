use super::lesson_types::{get_lesson_type, LessonType};
use super::setup::{setting_value, SetupSection};
use crate::finance;
use crate::ipc::helpers::{
    bad_params, db_conn, db_err, fmt_date, new_id, not_found, now_ts, opt_bool, opt_date,
    opt_i64_range, opt_money, opt_str, required_str, respond, today, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub birth_date: Option<String>,
    pub lesson_type_id: Option<String>,
    pub lesson_type_name: Option<String>,
    pub monthly_fee: Decimal,
    pub due_day: u32,
    pub active: bool,
    pub enrolled_on: String,
    pub notes: Option<String>,
}

const STUDENT_COLUMNS: &str = "s.id, s.name, s.phone, s.birth_date, s.lesson_type_id, lt.name,
     s.monthly_fee, s.due_day, s.active, s.enrolled_on, s.notes";

fn student_from_row(r: &rusqlite::Row) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        name: r.get(1)?,
        phone: r.get(2)?,
        birth_date: r.get(3)?,
        lesson_type_id: r.get(4)?,
        lesson_type_name: r.get(5)?,
        monthly_fee: finance::from_db(r.get(6)?),
        due_day: r.get::<_, i64>(7)?.clamp(1, 28) as u32,
        active: r.get::<_, i64>(8)? != 0,
        enrolled_on: r.get(9)?,
        notes: r.get(10)?,
    })
}

pub fn get_student(conn: &Connection, id: &str) -> rusqlite::Result<Option<Student>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM students s LEFT JOIN lesson_types lt ON lt.id = s.lesson_type_id
             WHERE s.id = ?",
            STUDENT_COLUMNS
        ),
        [id],
        student_from_row,
    )
    .optional()
}

pub fn list_students(
    conn: &Connection,
    active_only: bool,
    search: Option<&str>,
) -> rusqlite::Result<Vec<Student>> {
    let mut sql = format!(
        "SELECT {} FROM students s
         LEFT JOIN lesson_types lt ON lt.id = s.lesson_type_id
         WHERE 1 = 1",
        STUDENT_COLUMNS
    );
    let mut bind: Vec<Value> = Vec::new();
    if active_only {
        sql.push_str(" AND s.active = 1");
    }
    if let Some(q) = search {
        sql.push_str(" AND (s.name LIKE ? OR COALESCE(s.phone, '') LIKE ?)");
        let pattern = format!("%{}%", q);
        bind.push(Value::Text(pattern.clone()));
        bind.push(Value::Text(pattern));
    }
    sql.push_str(" ORDER BY s.name COLLATE NOCASE");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

struct StudentDraft {
    name: String,
    phone: Option<String>,
    birth_date: Option<String>,
    lesson_type_id: Option<String>,
    monthly_fee: Decimal,
    due_day: i64,
    active: bool,
    enrolled_on: String,
    notes: Option<String>,
}

/// Fee of the lesson type, else the billing default.
pub fn default_fee(conn: &Connection, lesson_type: Option<&LessonType>) -> Decimal {
    match lesson_type {
        Some(lt) => lt.monthly_fee,
        None => setting_value(conn, SetupSection::Billing, "defaultMonthlyFee")
            .and_then(|v| finance::parse_money(&v, "defaultMonthlyFee").ok())
            .unwrap_or(Decimal::ZERO),
    }
}

pub fn default_due_day(conn: &Connection) -> i64 {
    setting_value(conn, SetupSection::Billing, "defaultDueDay")
        .and_then(|v| v.as_i64())
        .unwrap_or(10)
}

/// Missing fee and due day fall back to the lesson type, then to the billing
/// defaults.
fn parse_draft(conn: &Connection, req: &Request) -> Result<StudentDraft, serde_json::Value> {
    let name = required_str(req, "name")?;
    let lesson_type_id = opt_str(req, "lessonTypeId")?;
    let lesson_type = match lesson_type_id.as_deref() {
        Some(id) => Some(
            get_lesson_type(conn, id)
                .map_err(|e| db_err(req, "db_query_failed", e))?
                .ok_or_else(|| not_found(req, "lesson type"))?,
        ),
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
    let birth_date = opt_date(req, "birthDate")?.map(fmt_date);
    let enrolled_on = fmt_date(opt_date(req, "enrolledOn")?.unwrap_or_else(today));
    Ok(StudentDraft {
        name,
        phone: opt_str(req, "phone")?,
        birth_date,
        lesson_type_id,
        monthly_fee,
        due_day,
        active: opt_bool(req, "active", true)?,
        enrolled_on,
        notes: opt_str(req, "notes")?,
    })
}

pub fn insert_student(conn: &Connection, d: &StudentDraftRef) -> rusqlite::Result<String> {
    let id = new_id();
    conn.execute(
        "INSERT INTO students(id, name, phone, birth_date, lesson_type_id, monthly_fee, due_day,
                              active, enrolled_on, notes, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            d.name,
            d.phone,
            d.birth_date,
            d.lesson_type_id,
            finance::to_db(d.monthly_fee),
            d.due_day,
            d.active as i64,
            d.enrolled_on,
            d.notes,
            now_ts(),
        ],
    )?;
    Ok(id)
}

/// Borrowed view used by enrollment from the lead funnel.
pub struct StudentDraftRef<'a> {
    pub name: &'a str,
    pub phone: Option<&'a str>,
    pub birth_date: Option<&'a str>,
    pub lesson_type_id: Option<&'a str>,
    pub monthly_fee: Decimal,
    pub due_day: i64,
    pub active: bool,
    pub enrolled_on: &'a str,
    pub notes: Option<&'a str>,
}

impl StudentDraft {
    fn borrowed(&self) -> StudentDraftRef<'_> {
        StudentDraftRef {
            name: &self.name,
            phone: self.phone.as_deref(),
            birth_date: self.birth_date.as_deref(),
            lesson_type_id: self.lesson_type_id.as_deref(),
            monthly_fee: self.monthly_fee,
            due_day: self.due_day,
            active: self.active,
            enrolled_on: &self.enrolled_on,
            notes: self.notes.as_deref(),
        }
    }
}

fn handle_list(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let active_only = opt_bool(req, "activeOnly", false)?;
    let search = opt_str(req, "search")?;
    let students = list_students(conn, active_only, search.as_deref())
        .map_err(|e| db_err(req, "db_query_failed", e))?;
    Ok(json!({ "students": students }))
}

fn handle_get(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let student = get_student(conn, &id)
        .map_err(|e| db_err(req, "db_query_failed", e))?
        .ok_or_else(|| not_found(req, "student"))?;
    Ok(json!({ "student": student }))
}

fn handle_create(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let draft = parse_draft(conn, req)?;
    let id = insert_student(conn, &draft.borrowed())
        .map_err(|e| db_err(req, "db_insert_failed", e))?;
    Ok(json!({ "studentId": id }))
}

fn handle_update(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let d = parse_draft(conn, req)?;
    let n = conn
        .execute(
            "UPDATE students SET name = ?, phone = ?, birth_date = ?, lesson_type_id = ?,
                    monthly_fee = ?, due_day = ?, active = ?, enrolled_on = ?, notes = ?,
                    updated_at = ?
             WHERE id = ?",
            rusqlite::params![
                d.name,
                d.phone,
                d.birth_date,
                d.lesson_type_id,
                finance::to_db(d.monthly_fee),
                d.due_day,
                d.active as i64,
                d.enrolled_on,
                d.notes,
                now_ts(),
                id,
            ],
        )
        .map_err(|e| db_err(req, "db_update_failed", e))?;
    if n == 0 {
        return Err(not_found(req, "student"));
    }
    Ok(json!({ "ok": true }))
}

/// Financial records linked to the student are kept as they are.
fn handle_delete(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let n = conn
        .execute("DELETE FROM students WHERE id = ?", [&id])
        .map_err(|e| db_err(req, "db_delete_failed", e))?;
    if n == 0 {
        return Err(not_found(req, "student"));
    }
    Ok(json!({ "ok": true }))
}

fn handle_set_active(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let Some(active) = req.params.get("active").and_then(|v| v.as_bool()) else {
        return Err(bad_params(req, "active must be boolean"));
    };
    let n = conn
        .execute(
            "UPDATE students SET active = ?, updated_at = ? WHERE id = ?",
            (active as i64, now_ts(), &id),
        )
        .map_err(|e| db_err(req, "db_update_failed", e))?;
    if n == 0 {
        return Err(not_found(req, "student"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => handle_list(state, req),
        "students.get" => handle_get(state, req),
        "students.create" => handle_create(state, req),
        "students.update" => handle_update(state, req),
        "students.delete" => handle_delete(state, req),
        "students.setActive" => handle_set_active(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
