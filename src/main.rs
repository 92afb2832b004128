mod auth;
mod backup;
mod commission;
mod config;
mod db;
mod finance;
mod ipc;
mod leads;
mod logger;
mod messages;

use std::io::{self, BufRead, Write};

fn main() {
    let cfg = config::Config::from_env();
    logger::init_logger(&cfg.log_filter, cfg.log_json);

    let mut state = ipc::AppState::default();
    if let Some(path) = cfg.workspace.as_ref() {
        if let Err(e) = ipc::open_initial_workspace(&mut state, path) {
            tracing::error!(
                workspace = %path.to_string_lossy(),
                error = ?e,
                "startup workspace failed to open"
            );
        }
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gymd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                tracing::warn!(error = %e, "unparseable request line");
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let method = req.method.clone();
        let resp = ipc::handle_request(&mut state, req);
        tracing::debug!(%method, ok = resp.get("ok").and_then(|v| v.as_bool()), "request handled");
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    tracing::info!("stdin closed, shutting down");
}
