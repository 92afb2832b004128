use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const HANDLERS: &[TryHandle] = &[
    handlers::core::try_handle,
    handlers::session::try_handle,
    handlers::setup::try_handle,
    handlers::lesson_types::try_handle,
    handlers::students::try_handle,
    handlers::instructors::try_handle,
    handlers::transactions::try_handle,
    handlers::products::try_handle,
    handlers::billing::try_handle,
    handlers::commissions::try_handle,
    handlers::leads::try_handle,
    handlers::reports::try_handle,
    handlers::messages::try_handle,
    handlers::backup::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    if let Some(rejected) = handlers::session::guard(state, &req) {
        tracing::debug!(method = %req.method, "request rejected by session gate");
        return rejected;
    }
    for try_handle in HANDLERS {
        if let Some(resp) = try_handle(state, &req) {
            return resp;
        }
    }

    tracing::warn!(method = %req.method, "unknown method");
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}

/// Opens the workspace named at startup, before any request arrives.
pub fn open_initial_workspace(state: &mut AppState, path: &std::path::Path) -> anyhow::Result<()> {
    handlers::core::open_workspace(state, path)
}
