use super::core::open_workspace;
use crate::backup;
use crate::db;
use crate::ipc::error::err;
use crate::ipc::helpers::{required_str, respond, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn backup_err(req: &Request, e: anyhow::Error, path: &str) -> serde_json::Value {
    tracing::error!(method = %req.method, error = ?e, path, "backup failed");
    err(
        &req.id,
        "backup_failed",
        e.to_string(),
        Some(json!({ "path": path })),
    )
}

fn handle_export(state: &AppState, req: &Request) -> HandlerResult {
    let out_path = required_str(req, "outPath")?;
    let Some(workspace) = state.workspace.as_ref() else {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let summary = backup::export_workspace_bundle(workspace, &PathBuf::from(&out_path))
        .map_err(|e| backup_err(req, e, &out_path))?;
    tracing::info!(path = %out_path, sha256 = %summary.db_sha256, "workspace exported");
    Ok(json!({
        "path": out_path,
        "bundleFormat": summary.bundle_format,
        "dbSha256": summary.db_sha256,
        "dbBytes": summary.db_bytes,
    }))
}

/// Replaces the workspace database and reopens it. The session starts over,
/// since the imported staff and device code may differ.
fn handle_import(state: &mut AppState, req: &Request) -> HandlerResult {
    let in_path = required_str(req, "inPath")?;
    let Some(workspace) = state.workspace.clone() else {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        ));
    }

    // Release the handle before the file is replaced.
    state.db = None;
    let summary = match backup::import_workspace_bundle(&src, &workspace) {
        Ok(s) => s,
        Err(e) => {
            state.db = db::open_db(&workspace).ok();
            return Err(backup_err(req, e, &in_path));
        }
    };
    open_workspace(state, &workspace).map_err(|e| {
        tracing::error!(error = ?e, "reopen after import failed");
        err(&req.id, "db_open_failed", e.to_string(), None)
    })?;
    tracing::info!(path = %in_path, sha256 = %summary.db_sha256, "workspace imported");
    Ok(json!({
        "workspacePath": workspace.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "exportedAt": summary.exported_at,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.export" => handle_export(state, req),
        "backup.import" => handle_import(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
