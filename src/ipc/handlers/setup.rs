use crate::db;
use crate::finance;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::messages;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
pub enum SetupSection {
    Billing,
    Messages,
    Finance,
    Security,
}

impl SetupSection {
    const ALL: [SetupSection; 4] = [
        SetupSection::Billing,
        SetupSection::Messages,
        SetupSection::Finance,
        SetupSection::Security,
    ];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "billing" => Some(Self::Billing),
            "messages" => Some(Self::Messages),
            "finance" => Some(Self::Finance),
            "security" => Some(Self::Security),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Billing => "billing",
            Self::Messages => "messages",
            Self::Finance => "finance",
            Self::Security => "security",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Billing => "setup.billing",
            Self::Messages => "setup.messages",
            Self::Finance => "setup.finance",
            Self::Security => "setup.security",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Billing => json!({
            "defaultDueDay": 10,
            "defaultMonthlyFee": 0
        }),
        SetupSection::Messages => json!({
            "gymName": "",
            "countryCode": "55",
            "billingTemplate": messages::DEFAULT_BILLING_TEMPLATE,
            "leadTemplate": messages::DEFAULT_LEAD_TEMPLATE,
            "receiptTemplate": messages::DEFAULT_RECEIPT_TEMPLATE
        }),
        SetupSection::Finance => json!({
            "splitTolerance": 0.05,
            "defaultReportCategory": "all"
        }),
        // Read by the front end only; the sidecar never asks for confirmation.
        SetupSection::Security => json!({
            "confirmDeletes": true
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let Some(n) = v.as_i64() else {
        return Err(format!("{} must be an integer", key));
    };
    if n < min || n > max {
        return Err(format!("{} must be between {} and {}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let Some(s) = v.as_str() else {
        return Err(format!("{} must be a string", key));
    };
    if s.chars().count() > max_len {
        return Err(format!("{} must be at most {} characters", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_money_range(v: &Value, key: &str, max: Decimal) -> Result<Decimal, String> {
    let d = finance::parse_non_negative_money(v, key).map_err(|e| e.to_string())?;
    if d > max {
        return Err(format!("{} must be at most {}", key, max));
    }
    Ok(d)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        let parsed = match section {
            SetupSection::Billing => match k.as_str() {
                "defaultDueDay" => json!(parse_i64_range(v, k, 1, 28)?),
                "defaultMonthlyFee" => json!(parse_money_range(v, k, Decimal::from(100_000))?),
                _ => return Err(format!("unknown billing field: {}", k)),
            },
            SetupSection::Messages => match k.as_str() {
                "gymName" => json!(parse_string_max(v, k, 80)?.trim()),
                "countryCode" => {
                    let s = parse_string_max(v, k, 4)?;
                    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
                        return Err("countryCode must contain only digits".to_string());
                    }
                    json!(s)
                }
                "billingTemplate" | "leadTemplate" | "receiptTemplate" => {
                    json!(parse_string_max(v, k, 500)?)
                }
                _ => return Err(format!("unknown messages field: {}", k)),
            },
            SetupSection::Finance => match k.as_str() {
                "splitTolerance" => json!(parse_money_range(v, k, Decimal::ONE)?),
                "defaultReportCategory" => {
                    let s = parse_string_max(v, k, 16)?;
                    if !matches!(s.as_str(), "all" | "adult" | "teen" | "kids" | "store") {
                        return Err(
                            "defaultReportCategory must be one of: all, adult, teen, kids, store"
                                .to_string(),
                        );
                    }
                    json!(s)
                }
                _ => return Err(format!("unknown finance field: {}", k)),
            },
            SetupSection::Security => match k.as_str() {
                "confirmDeletes" => json!(parse_bool(v, k)?),
                _ => return Err(format!("unknown security field: {}", k)),
            },
        };
        obj.insert(k.clone(), parsed);
    }
    Ok(())
}

pub fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

pub fn split_tolerance(conn: &Connection) -> Decimal {
    load_section(conn, SetupSection::Finance)
        .ok()
        .and_then(|v| v.get("splitTolerance").cloned())
        .and_then(|v| finance::parse_money(&v, "splitTolerance").ok())
        .unwrap_or_else(finance::default_split_tolerance)
}

pub fn setting_str(conn: &Connection, section: SetupSection, key: &str) -> String {
    load_section(conn, section)
        .ok()
        .and_then(|v| v.get(key).and_then(|s| s.as_str()).map(|s| s.to_string()))
        .or_else(|| {
            default_section(section)
                .get(key)
                .and_then(|s| s.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_default()
}

pub fn setting_value(conn: &Connection, section: SetupSection, key: &str) -> Option<Value> {
    load_section(conn, section)
        .ok()
        .and_then(|v| v.get(key).cloned())
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.name(), "settings updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
