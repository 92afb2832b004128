use super::billing::paid_transaction;
use super::leads::count_by_status;
use super::setup::{setting_str, SetupSection};
use super::students::list_students;
use super::transactions::{load_records, records_json, RecordFilter};
use crate::finance::{checked_sum, reconcile, totals_by_category, Category, TransactionKind};
use crate::ipc::helpers::{
    bad_params, db_conn, db_err, finance_err, fmt_date, opt_str, required_date, required_month,
    respond, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map};

/// `None` means every category.
fn report_category(raw: &str, req: &Request) -> Result<Option<Category>, serde_json::Value> {
    if raw == "all" {
        return Ok(None);
    }
    let category = raw.parse::<Category>().map_err(|e| finance_err(req, e))?;
    if category == Category::Other {
        return Err(bad_params(
            req,
            "category must be one of: all, adult, teen, kids, store",
        ));
    }
    Ok(Some(category))
}

fn handle_finance(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let from = required_date(req, "from")?;
    let to = required_date(req, "to")?;
    if to < from {
        return Err(bad_params(req, "to must not be before from"));
    }
    let raw_category = match opt_str(req, "category")? {
        Some(c) => c,
        None => setting_str(conn, SetupSection::Finance, "defaultReportCategory"),
    };
    let category = report_category(&raw_category, req)?;

    let records = load_records(
        conn,
        &RecordFilter {
            from: Some(from),
            to: Some(to),
            category,
            ..RecordFilter::default()
        },
    )
    .map_err(|e| db_err(req, "db_query_failed", e))?;
    let totals = reconcile(&records).map_err(|e| finance_err(req, e))?;
    let buckets = totals.bucket_sum().map_err(|e| finance_err(req, e))?;
    if buckets != totals.income_total {
        // Buckets must sum to income.
        tracing::error!(
            buckets = %buckets,
            income = %totals.income_total,
            "payment buckets do not add up to income"
        );
    }
    let by_category = totals_by_category(&records).map_err(|e| finance_err(req, e))?;
    Ok(json!({
        "from": fmt_date(from),
        "to": fmt_date(to),
        "category": raw_category,
        "totals": totals,
        "byCategory": by_category,
        "transactions": records_json(&records),
    }))
}

fn handle_dashboard(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let month = required_month(req, "month")?;

    let students =
        list_students(conn, true, None).map_err(|e| db_err(req, "db_query_failed", e))?;
    let mut unpaid = 0usize;
    for s in &students {
        if paid_transaction(conn, &s.id, month)
            .map_err(|e| db_err(req, "db_query_failed", e))?
            .is_none()
        {
            unpaid += 1;
        }
    }

    let month_records = load_records(
        conn,
        &RecordFilter {
            from: Some(month.first_day()),
            to: Some(month.last_day()),
            ..RecordFilter::default()
        },
    )
    .map_err(|e| db_err(req, "db_query_failed", e))?;
    let totals = reconcile(&month_records).map_err(|e| finance_err(req, e))?;

    // Deferred balance is open until settled, whatever month it was sold in.
    let income = load_records(
        conn,
        &RecordFilter {
            kind: Some(TransactionKind::Income),
            ..RecordFilter::default()
        },
    )
    .map_err(|e| db_err(req, "db_query_failed", e))?;
    let open_deferred = checked_sum(
        income
            .iter()
            .filter(|r| r.payment.is_deferred())
            .map(|r| r.amount),
    )
    .map_err(|e| finance_err(req, e))?;

    let mut leads = Map::new();
    for (status, n) in count_by_status(conn).map_err(|e| db_err(req, "db_query_failed", e))? {
        leads.insert(status.as_str().to_string(), json!(n));
    }

    Ok(json!({
        "month": month.key(),
        "activeStudents": students.len(),
        "unpaidStudents": unpaid,
        "income": totals.income_total,
        "expense": totals.expense_total,
        "balance": totals.balance,
        "openDeferred": open_deferred,
        "leadsByStatus": leads,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "reports.finance" => handle_finance(state, req),
        "reports.dashboard" => handle_dashboard(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
