use crate::commission::CommissionConfig;
use crate::finance::{self, ClassCategory};
use crate::ipc::helpers::{
    bad_params, conversion_err, db_conn, db_err, finance_err, new_id, not_found, opt_str,
    required_money, required_str, respond, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde_json::json;

fn config_from_row(r: &rusqlite::Row) -> rusqlite::Result<CommissionConfig> {
    let category: String = r.get(2)?;
    Ok(CommissionConfig {
        id: r.get(0)?,
        name: r.get(1)?,
        category: category.parse().map_err(|e| conversion_err(2, e))?,
        percentage: finance::from_db(r.get(3)?),
        phone: r.get(4)?,
    })
}

pub fn load_configs(conn: &Connection) -> rusqlite::Result<Vec<CommissionConfig>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, category, percentage, phone FROM instructors
         ORDER BY name COLLATE NOCASE",
    )?;
    let rows = stmt
        .query_map([], config_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_config(conn: &Connection, id: &str) -> rusqlite::Result<Option<CommissionConfig>> {
    conn.query_row(
        "SELECT id, name, category, percentage, phone FROM instructors WHERE id = ?",
        [id],
        config_from_row,
    )
    .optional()
}

struct InstructorDraft {
    name: String,
    category: ClassCategory,
    percentage: Decimal,
    phone: Option<String>,
}

fn parse_draft(req: &Request) -> Result<InstructorDraft, serde_json::Value> {
    let name = required_str(req, "name")?;
    let category = required_str(req, "category")?
        .parse::<ClassCategory>()
        .map_err(|e| finance_err(req, e))?;
    let percentage = required_money(req, "percentage")?;
    if percentage > Decimal::ONE_HUNDRED {
        return Err(bad_params(req, "percentage must be between 0 and 100"));
    }
    Ok(InstructorDraft {
        name,
        category,
        percentage,
        phone: opt_str(req, "phone")?,
    })
}

fn handle_list(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let rows = load_configs(conn).map_err(|e| db_err(req, "db_query_failed", e))?;
    Ok(json!({ "instructors": rows }))
}

fn handle_create(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let d = parse_draft(req)?;
    let id = new_id();
    conn.execute(
        "INSERT INTO instructors(id, name, category, percentage, phone) VALUES(?, ?, ?, ?, ?)",
        (&id, &d.name, d.category.as_str(), finance::to_db(d.percentage), &d.phone),
    )
    .map_err(|e| db_err(req, "db_insert_failed", e))?;
    Ok(json!({ "instructorId": id }))
}

fn handle_update(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let d = parse_draft(req)?;
    let n = conn
        .execute(
            "UPDATE instructors SET name = ?, category = ?, percentage = ?, phone = ? WHERE id = ?",
            (&d.name, d.category.as_str(), finance::to_db(d.percentage), &d.phone, &id),
        )
        .map_err(|e| db_err(req, "db_update_failed", e))?;
    if n == 0 {
        return Err(not_found(req, "instructor"));
    }
    Ok(json!({ "ok": true }))
}

/// Past commission receipts stay in `commission_payments`.
fn handle_delete(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let n = conn
        .execute("DELETE FROM instructors WHERE id = ?", [&id])
        .map_err(|e| db_err(req, "db_delete_failed", e))?;
    if n == 0 {
        return Err(not_found(req, "instructor"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "instructors.list" => handle_list(state, req),
        "instructors.create" => handle_create(state, req),
        "instructors.update" => handle_update(state, req),
        "instructors.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
