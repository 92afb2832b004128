use crate::finance::{self, ClassCategory};
use crate::ipc::helpers::{
    bad_params, db_conn, db_err, new_id, not_found, opt_money, required_str, respond,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonType {
    pub id: String,
    pub name: String,
    pub category: ClassCategory,
    pub monthly_fee: Decimal,
}

pub fn get_lesson_type(conn: &Connection, id: &str) -> rusqlite::Result<Option<LessonType>> {
    conn.query_row(
        "SELECT id, name, category, monthly_fee FROM lesson_types WHERE id = ?",
        [id],
        lesson_type_from_row,
    )
    .optional()
}

fn lesson_type_from_row(r: &rusqlite::Row) -> rusqlite::Result<LessonType> {
    let category: String = r.get(2)?;
    Ok(LessonType {
        id: r.get(0)?,
        name: r.get(1)?,
        category: category
            .parse()
            .map_err(|e| crate::ipc::helpers::conversion_err(2, e))?,
        monthly_fee: finance::from_db(r.get(3)?),
    })
}

fn required_class_category(req: &Request) -> Result<ClassCategory, serde_json::Value> {
    let raw = required_str(req, "category")?;
    raw.parse::<ClassCategory>()
        .map_err(|e| bad_params(req, e.to_string()))
}

fn handle_list(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let mut stmt = conn
        .prepare("SELECT id, name, category, monthly_fee FROM lesson_types ORDER BY name")
        .map_err(|e| db_err(req, "db_query_failed", e))?;
    let rows = stmt
        .query_map([], lesson_type_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err(req, "db_query_failed", e))?;
    Ok(json!({ "lessonTypes": rows }))
}

fn handle_create(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let name = required_str(req, "name")?;
    let category = required_class_category(req)?;
    let fee = opt_money(req, "monthlyFee")?.unwrap_or(Decimal::ZERO);
    let id = new_id();
    conn.execute(
        "INSERT INTO lesson_types(id, name, category, monthly_fee) VALUES(?, ?, ?, ?)",
        (&id, &name, category.as_str(), finance::to_db(fee)),
    )
    .map_err(|e| db_err(req, "db_insert_failed", e))?;
    Ok(json!({ "lessonTypeId": id }))
}

fn handle_update(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let name = required_str(req, "name")?;
    let category = required_class_category(req)?;
    let fee = opt_money(req, "monthlyFee")?.unwrap_or(Decimal::ZERO);
    let n = conn
        .execute(
            "UPDATE lesson_types SET name = ?, category = ?, monthly_fee = ? WHERE id = ?",
            (&name, category.as_str(), finance::to_db(fee), &id),
        )
        .map_err(|e| db_err(req, "db_update_failed", e))?;
    if n == 0 {
        return Err(not_found(req, "lesson type"));
    }
    Ok(json!({ "ok": true }))
}

/// Students and records keep the dangling id; there is no cascade.
fn handle_delete(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let n = conn
        .execute("DELETE FROM lesson_types WHERE id = ?", [&id])
        .map_err(|e| db_err(req, "db_delete_failed", e))?;
    if n == 0 {
        return Err(not_found(req, "lesson type"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "lessonTypes.list" => handle_list(state, req),
        "lessonTypes.create" => handle_create(state, req),
        "lessonTypes.update" => handle_update(state, req),
        "lessonTypes.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
