use crate::finance::{self, FinanceError};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{Datelike, Duration, NaiveDate, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::fmt::Display;

/// `Ok` carries the result payload, `Err` an already-built error envelope.
pub type HandlerResult = Result<JsonValue, JsonValue>;

pub fn respond(req: &Request, result: HandlerResult) -> JsonValue {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e,
    }
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, JsonValue> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn db_err(req: &Request, code: &str, e: impl Display) -> JsonValue {
    tracing::error!(method = %req.method, code, error = %e, "database call failed");
    err(&req.id, code, e.to_string(), None)
}

pub fn bad_params(req: &Request, message: impl Into<String>) -> JsonValue {
    err(&req.id, "bad_params", message, None)
}

pub fn not_found(req: &Request, what: &str) -> JsonValue {
    err(&req.id, "not_found", format!("{} not found", what), None)
}

pub fn finance_err(req: &Request, e: FinanceError) -> JsonValue {
    if e.code() != "bad_params" {
        tracing::warn!(method = %req.method, code = e.code(), "{}", e);
    }
    err(&req.id, e.code(), e.to_string(), e.details())
}

pub fn required_str(req: &Request, key: &str) -> Result<String, JsonValue> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| bad_params(req, format!("missing {}", key)))
}

/// Absent, null and blank all mean "no value".
pub fn opt_str(req: &Request, key: &str) -> Result<Option<String>, JsonValue> {
    match req.params.get(key) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| bad_params(req, format!("{} must be string or null", key)))?
                .trim()
                .to_string();
            Ok(if s.is_empty() { None } else { Some(s) })
        }
    }
}

pub fn opt_bool(req: &Request, key: &str, default: bool) -> Result<bool, JsonValue> {
    match req.params.get(key) {
        None | Some(JsonValue::Null) => Ok(default),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| bad_params(req, format!("{} must be boolean", key))),
    }
}

pub fn opt_i64_range(
    req: &Request,
    key: &str,
    min: i64,
    max: i64,
) -> Result<Option<i64>, JsonValue> {
    match req.params.get(key) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(v) => {
            let n = v
                .as_i64()
                .ok_or_else(|| bad_params(req, format!("{} must be an integer", key)))?;
            if n < min || n > max {
                return Err(bad_params(
                    req,
                    format!("{} must be between {} and {}", key, min, max),
                ));
            }
            Ok(Some(n))
        }
    }
}

pub fn required_money(req: &Request, key: &str) -> Result<Decimal, JsonValue> {
    let v = req
        .params
        .get(key)
        .filter(|v| !v.is_null())
        .ok_or_else(|| bad_params(req, format!("missing {}", key)))?;
    finance::parse_non_negative_money(v, key).map_err(|e| finance_err(req, e))
}

pub fn opt_money(req: &Request, key: &str) -> Result<Option<Decimal>, JsonValue> {
    match req.params.get(key) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(v) => finance::parse_non_negative_money(v, key)
            .map(Some)
            .map_err(|e| finance_err(req, e)),
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

pub fn required_date(req: &Request, key: &str) -> Result<NaiveDate, JsonValue> {
    let raw = required_str(req, key)?;
    parse_date(&raw).ok_or_else(|| bad_params(req, format!("{} must be YYYY-MM-DD", key)))
}

pub fn opt_date(req: &Request, key: &str) -> Result<Option<NaiveDate>, JsonValue> {
    match opt_str(req, key)? {
        None => Ok(None),
        Some(raw) => parse_date(&raw)
            .map(Some)
            .ok_or_else(|| bad_params(req, format!("{} must be YYYY-MM-DD", key))),
    }
}

pub fn fmt_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// A reference month (`YYYY-MM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Month {
    first: NaiveDate,
}

impl Month {
    pub fn parse(s: &str) -> Option<Month> {
        let (y, m) = s.trim().split_once('-')?;
        if y.len() != 4 || m.len() != 2 {
            return None;
        }
        let first = NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, 1)?;
        Some(Month { first })
    }

    pub fn of(date: NaiveDate) -> Month {
        Month {
            first: date.with_day(1).unwrap_or(date),
        }
    }

    pub fn key(self) -> String {
        self.first.format("%Y-%m").to_string()
    }

    pub fn first_day(self) -> NaiveDate {
        self.first
    }

    pub fn last_day(self) -> NaiveDate {
        let (y, m) = if self.first.month() == 12 {
            (self.first.year() + 1, 1)
        } else {
            (self.first.year(), self.first.month() + 1)
        };
        NaiveDate::from_ymd_opt(y, m, 1)
            .map(|next| next - Duration::days(1))
            .unwrap_or(self.first)
    }

    /// Clamped to the month length.
    pub fn day(self, day: u32) -> NaiveDate {
        let last = self.last_day();
        self.first
            .with_day(day.clamp(1, last.day()))
            .unwrap_or(last)
    }
}

pub fn required_month(req: &Request, key: &str) -> Result<Month, JsonValue> {
    let raw = required_str(req, key)?;
    Month::parse(&raw).ok_or_else(|| bad_params(req, format!("{} must be YYYY-MM", key)))
}

pub fn now_ts() -> String {
    Utc::now().to_rfc3339()
}

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

pub fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
