use crate::auth::{self, StaffIdentity, MIN_PASSWORD_LEN};
use crate::db;
use crate::ipc::error::err;
use crate::ipc::helpers::{
    bad_params, db_conn, db_err, new_id, not_found, now_ts, required_str, respond, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const DEVICE_CODE_KEY: &str = "auth.deviceCodeHash";

/// Reachable before the gate is open.
const OPEN_METHODS: &[&str] = &[
    "health",
    "workspace.select",
    "session.status",
    "device.authorize",
    "device.lock",
    "auth.bootstrap",
    "auth.login",
    "auth.logout",
];

/// Returns the rejection for a request the current session may not make.
pub fn guard(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    if OPEN_METHODS.contains(&req.method.as_str()) {
        return None;
    }
    if state.db.is_none() {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    }
    if !state.session.device_authorized() {
        return Some(err(
            &req.id,
            "device_not_authorized",
            "this device has not been authorized",
            None,
        ));
    }
    if state.session.user().is_none() {
        return Some(err(&req.id, "unauthenticated", "sign in first", None));
    }
    None
}

fn staff_count(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM staff_users", [], |r| r.get(0))
}

fn device_code_hash(conn: &Connection) -> anyhow::Result<Option<String>> {
    Ok(db::settings_get_json(conn, DEVICE_CODE_KEY)?
        .and_then(|v| v.as_str().map(|s| s.to_string())))
}

fn store_device_code(conn: &Connection, code: &str) -> anyhow::Result<()> {
    let hash = auth::hash_secret(code).map_err(|e| anyhow::anyhow!("hash failed: {}", e))?;
    db::settings_set_json(conn, DEVICE_CODE_KEY, &json!(hash))
}

fn validate_password(req: &Request, password: &str) -> Result<(), serde_json::Value> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(bad_params(
            req,
            format!("password must have at least {} characters", MIN_PASSWORD_LEN),
        ));
    }
    Ok(())
}

fn insert_staff(conn: &Connection, username: &str, password: &str) -> anyhow::Result<String> {
    let hash = auth::hash_secret(password).map_err(|e| anyhow::anyhow!("hash failed: {}", e))?;
    let id = new_id();
    conn.execute(
        "INSERT INTO staff_users(id, username, password_hash, created_at) VALUES(?, ?, ?, ?)",
        (&id, username, &hash, now_ts()),
    )?;
    Ok(id)
}

fn handle_status(state: &AppState, _req: &Request) -> HandlerResult {
    let bootstrapped = match state.db.as_ref() {
        Some(conn) => staff_count(conn).unwrap_or(0) > 0,
        None => false,
    };
    Ok(json!({
        "bootstrapped": bootstrapped,
        "deviceAuthorized": state.session.device_authorized(),
        "authenticated": state.session.user().is_some(),
        "open": state.session.is_open(),
        "username": state.session.user().map(|u| u.username.clone()),
    }))
}

fn handle_bootstrap(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let username = required_str(req, "username")?;
    let password = required_str(req, "password")?;
    let device_code = required_str(req, "deviceCode")?;
    validate_password(req, &password)?;
    validate_password(req, &device_code)?;

    if staff_count(conn).map_err(|e| db_err(req, "db_query_failed", e))? > 0 {
        return Err(err(
            &req.id,
            "already_bootstrapped",
            "this workspace already has staff users",
            None,
        ));
    }
    let id = insert_staff(conn, &username, &password)
        .map_err(|e| db_err(req, "db_insert_failed", e))?;
    store_device_code(conn, &device_code).map_err(|e| db_err(req, "db_update_failed", e))?;

    state.session.authorize_device();
    state.session.sign_in(StaffIdentity {
        id: id.clone(),
        username: username.clone(),
    });
    tracing::info!(%username, "workspace bootstrapped");
    Ok(json!({ "userId": id }))
}

fn handle_device_authorize(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let code = required_str(req, "code")?;
    let Some(hash) = device_code_hash(conn).map_err(|e| db_err(req, "db_query_failed", e))? else {
        return Err(err(
            &req.id,
            "device_not_authorized",
            "no device code configured; bootstrap the workspace first",
            None,
        ));
    };
    if !auth::verify_secret(&code, &hash) {
        tracing::warn!("device authorization rejected");
        return Err(err(&req.id, "invalid_credentials", "wrong device code", None));
    }
    state.session.authorize_device();
    Ok(json!({ "deviceAuthorized": true }))
}

fn handle_device_lock(state: &mut AppState, _req: &Request) -> HandlerResult {
    state.session.lock_device();
    Ok(json!({ "deviceAuthorized": false }))
}

fn handle_device_change_code(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let code = required_str(req, "code")?;
    validate_password(req, &code)?;
    store_device_code(conn, &code).map_err(|e| db_err(req, "db_update_failed", e))?;
    Ok(json!({ "ok": true }))
}

fn handle_login(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    if !state.session.device_authorized() {
        return Err(err(
            &req.id,
            "device_not_authorized",
            "this device has not been authorized",
            None,
        ));
    }
    let username = required_str(req, "username")?;
    let password = required_str(req, "password")?;
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT id, password_hash FROM staff_users WHERE username = ?",
            [&username],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| db_err(req, "db_query_failed", e))?;
    let Some((id, hash)) = row.filter(|(_, hash)| auth::verify_secret(&password, hash)) else {
        tracing::warn!(%username, "sign-in rejected");
        return Err(err(
            &req.id,
            "invalid_credentials",
            "wrong username or password",
            None,
        ));
    };
    state.session.sign_in(StaffIdentity {
        id: id.clone(),
        username: username.clone(),
    });
    tracing::info!(%username, "signed in");
    Ok(json!({ "userId": id, "username": username }))
}

fn handle_logout(state: &mut AppState, _req: &Request) -> HandlerResult {
    state.session.sign_out();
    Ok(json!({ "authenticated": false }))
}

fn handle_staff_list(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let mut stmt = conn
        .prepare("SELECT id, username, created_at FROM staff_users ORDER BY username")
        .map_err(|e| db_err(req, "db_query_failed", e))?;
    let users = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "username": r.get::<_, String>(1)?,
                "createdAt": r.get::<_, String>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err(req, "db_query_failed", e))?;
    Ok(json!({ "users": users }))
}

fn handle_staff_create(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let username = required_str(req, "username")?;
    let password = required_str(req, "password")?;
    validate_password(req, &password)?;
    let taken: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM staff_users WHERE username = ?",
            [&username],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| db_err(req, "db_query_failed", e))?;
    if taken.is_some() {
        return Err(bad_params(req, "username already exists"));
    }
    let id = insert_staff(conn, &username, &password)
        .map_err(|e| db_err(req, "db_insert_failed", e))?;
    Ok(json!({ "userId": id }))
}

fn handle_staff_delete(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    if staff_count(conn).map_err(|e| db_err(req, "db_query_failed", e))? <= 1 {
        return Err(bad_params(req, "cannot delete the last staff user"));
    }
    let n = conn
        .execute("DELETE FROM staff_users WHERE id = ?", [&id])
        .map_err(|e| db_err(req, "db_delete_failed", e))?;
    if n == 0 {
        return Err(not_found(req, "staff user"));
    }
    Ok(json!({ "ok": true }))
}

fn handle_staff_change_password(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let password = required_str(req, "password")?;
    validate_password(req, &password)?;
    let hash = auth::hash_secret(&password).map_err(|e| db_err(req, "db_update_failed", e))?;
    let n = conn
        .execute(
            "UPDATE staff_users SET password_hash = ? WHERE id = ?",
            (&hash, &id),
        )
        .map_err(|e| db_err(req, "db_update_failed", e))?;
    if n == 0 {
        return Err(not_found(req, "staff user"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "session.status" => handle_status(state, req),
        "auth.bootstrap" => handle_bootstrap(state, req),
        "auth.login" => handle_login(state, req),
        "auth.logout" => handle_logout(state, req),
        "device.authorize" => handle_device_authorize(state, req),
        "device.lock" => handle_device_lock(state, req),
        "device.changeCode" => handle_device_change_code(state, req),
        "staff.list" => handle_staff_list(state, req),
        "staff.create" => handle_staff_create(state, req),
        "staff.delete" => handle_staff_delete(state, req),
        "staff.changePassword" => handle_staff_change_password(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
