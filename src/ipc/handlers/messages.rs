use super::billing::due_date;
use super::commissions::get_ack;
use super::instructors::get_config;
use super::leads::get_lead;
use super::setup::{setting_str, SetupSection};
use super::students::get_student;
use crate::ipc::error::err;
use crate::ipc::helpers::{
    bad_params, db_conn, db_err, not_found, required_month, required_str, respond, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::messages::{compose, render};
use rusqlite::Connection;
use serde_json::json;

struct MessageSettings {
    gym: String,
    country_code: String,
}

fn message_settings(conn: &Connection) -> MessageSettings {
    MessageSettings {
        gym: setting_str(conn, SetupSection::Messages, "gymName"),
        country_code: setting_str(conn, SetupSection::Messages, "countryCode"),
    }
}

fn build(
    req: &Request,
    settings: &MessageSettings,
    phone: Option<&str>,
    text: String,
) -> HandlerResult {
    let Some(raw) = phone else {
        return Err(bad_params(req, "no phone number on file"));
    };
    let msg = compose(raw, &settings.country_code, text)
        .ok_or_else(|| bad_params(req, "phone number is too short"))?;
    Ok(json!(msg))
}

fn handle_billing_reminder(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let month = required_month(req, "month")?;
    let student = get_student(conn, &student_id)
        .map_err(|e| db_err(req, "db_query_failed", e))?
        .ok_or_else(|| not_found(req, "student"))?;
    let settings = message_settings(conn);
    let template = setting_str(conn, SetupSection::Messages, "billingTemplate");
    let amount = format!("{:.2}", student.monthly_fee);
    let due = due_date(&student, month);
    let month_key = month.key();
    let text = render(
        &template,
        &[
            ("name", student.name.as_str()),
            ("gym", settings.gym.as_str()),
            ("month", month_key.as_str()),
            ("amount", amount.as_str()),
            ("dueDate", due.as_str()),
        ],
    );
    build(req, &settings, student.phone.as_deref(), text)
}

fn handle_lead_follow_up(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let lead_id = required_str(req, "leadId")?;
    let lead = get_lead(conn, &lead_id)
        .map_err(|e| db_err(req, "db_query_failed", e))?
        .ok_or_else(|| not_found(req, "lead"))?;
    let settings = message_settings(conn);
    let template = setting_str(conn, SetupSection::Messages, "leadTemplate");
    let date = lead.trial_date.clone().unwrap_or_default();
    let text = render(
        &template,
        &[
            ("name", lead.name.as_str()),
            ("gym", settings.gym.as_str()),
            ("date", date.as_str()),
        ],
    );
    build(req, &settings, lead.phone.as_deref(), text)
}

fn handle_commission_receipt(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let instructor_id = required_str(req, "instructorId")?;
    let month = required_month(req, "month")?;
    let instructor = get_config(conn, &instructor_id)
        .map_err(|e| db_err(req, "db_query_failed", e))?
        .ok_or_else(|| not_found(req, "instructor"))?;
    let Some(ack) = get_ack(conn, &instructor_id, month)
        .map_err(|e| db_err(req, "db_query_failed", e))?
    else {
        return Err(err(
            &req.id,
            "not_paid",
            format!("commission for {} is not paid", month.key()),
            None,
        ));
    };
    let settings = message_settings(conn);
    let template = setting_str(conn, SetupSection::Messages, "receiptTemplate");
    let amount = format!("{:.2}", ack.amount);
    let text = render(
        &template,
        &[
            ("name", instructor.name.as_str()),
            ("gym", settings.gym.as_str()),
            ("month", ack.ref_month.as_str()),
            ("amount", amount.as_str()),
        ],
    );
    build(req, &settings, instructor.phone.as_deref(), text)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "messages.billingReminder" => handle_billing_reminder(state, req),
        "messages.leadFollowUp" => handle_lead_follow_up(state, req),
        "messages.commissionReceipt" => handle_commission_receipt(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
