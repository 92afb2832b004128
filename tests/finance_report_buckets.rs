mod test_support;

use serde_json::json;
use test_support::{
    approx, error_code, num_field, open_session, request_err, request_ok, spawn_sidecar,
    str_field, temp_dir,
};

fn income(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    id: &str,
    amount: f64,
    category: &str,
    date: &str,
    payment: serde_json::Value,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        id,
        "transactions.create",
        json!({
            "kind": "income",
            "amount": amount,
            "category": category,
            "date": date,
            "payment": payment
        }),
    );
    str_field(&created, "transactionId").to_string()
}

#[test]
fn report_buckets_add_up_to_income() {
    let workspace = temp_dir("gymd-report-buckets");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_session(&mut stdin, &mut reader, &workspace);

    income(
        &mut stdin,
        &mut reader,
        "1",
        100.0,
        "adult",
        "2025-05-03",
        json!({
            "kind": "split",
            "parts": [{ "method": "cash", "amount": 60 }, { "method": "instant", "amount": 40 }]
        }),
    );
    income(
        &mut stdin,
        &mut reader,
        "2",
        89.9,
        "kids",
        "2025-05-04",
        json!({ "kind": "single", "method": "card", "cardType": "debit" }),
    );
    income(
        &mut stdin,
        &mut reader,
        "3",
        150.0,
        "teen",
        "2025-05-05",
        json!({ "kind": "single", "method": "card", "cardType": "credit", "installments": 3 }),
    );
    income(
        &mut stdin,
        &mut reader,
        "4",
        45.0,
        "store",
        "2025-05-06",
        json!({ "kind": "single", "method": "onAccount" }),
    );
    income(&mut stdin, &mut reader, "5", 20.0, "other", "2025-05-07", json!(null));
    // Within tolerance: the last part absorbs the 0.03 residual.
    income(
        &mut stdin,
        &mut reader,
        "6",
        50.0,
        "adult",
        "2025-05-08",
        json!({
            "kind": "split",
            "parts": [{ "method": "card", "amount": 30 }, { "method": "cash", "amount": 19.97 }]
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "transactions.create",
        json!({
            "kind": "expense",
            "amount": 300,
            "category": "other",
            "date": "2025-05-10",
            "description": "rent",
            "payment": { "kind": "single", "method": "instant" }
        }),
    );
    // Outside the range.
    income(
        &mut stdin,
        &mut reader,
        "8",
        999.0,
        "adult",
        "2025-06-01",
        json!({ "kind": "single", "method": "cash" }),
    );

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "reports.finance",
        json!({ "from": "2025-05-01", "to": "2025-05-31" }),
    );
    let totals = &report["totals"];
    assert!(approx(num_field(totals, "cash"), 80.0));
    assert!(approx(num_field(totals, "instant"), 40.0));
    assert!(approx(num_field(totals, "credit"), 180.0));
    assert!(approx(num_field(totals, "debit"), 89.9));
    assert!(approx(num_field(totals, "deferred"), 45.0));
    assert!(approx(num_field(totals, "other"), 20.0));
    assert!(approx(num_field(totals, "incomeTotal"), 454.9));
    assert!(approx(num_field(totals, "expenseTotal"), 300.0));
    assert!(approx(num_field(totals, "balance"), 154.9));
    let bucket_sum: f64 = ["cash", "instant", "credit", "debit", "deferred", "other"]
        .iter()
        .map(|k| num_field(totals, k))
        .sum();
    assert!(approx(bucket_sum, num_field(totals, "incomeTotal")));
    assert_eq!(report["category"], json!("all"));

    let rows = report["transactions"].as_array().expect("transactions");
    assert_eq!(rows.len(), 7);
    let labels: Vec<&str> = rows
        .iter()
        .map(|r| r["breakdownLabel"].as_str().unwrap_or(""))
        .collect();
    assert!(labels.contains(&"cash 60.00 + instant 40.00"));
    assert!(labels.contains(&"card (debit)"));
    assert!(labels.contains(&"card (credit, 3x)"));
    assert!(labels.contains(&"on account"));
    assert!(labels.contains(&"not informed"));

    let adult = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "reports.finance",
        json!({ "from": "2025-05-01", "to": "2025-05-31", "category": "adult" }),
    );
    assert!(approx(num_field(&adult["totals"], "incomeTotal"), 150.0));
    assert!(approx(num_field(&adult["totals"], "expenseTotal"), 0.0));
    let by_cat = adult["byCategory"].as_array().expect("byCategory");
    assert_eq!(by_cat.len(), 1);
    assert_eq!(by_cat[0]["category"], json!("adult"));

    let bad = request_err(
        &mut stdin,
        &mut reader,
        "11",
        "reports.finance",
        json!({ "from": "2025-05-01", "to": "2025-05-31", "category": "Adult" }),
    );
    assert_eq!(error_code(&bad), "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn settling_deferred_income_moves_the_bucket_once() {
    let workspace = temp_dir("gymd-report-settle");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_session(&mut stdin, &mut reader, &workspace);

    let deferred = income(
        &mut stdin,
        &mut reader,
        "1",
        120.0,
        "store",
        "2025-07-02",
        json!({ "kind": "single", "method": "onAccount" }),
    );
    let paid_now = income(
        &mut stdin,
        &mut reader,
        "2",
        30.0,
        "store",
        "2025-07-03",
        json!({ "kind": "single", "method": "cash" }),
    );

    let dash = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reports.dashboard",
        json!({ "month": "2025-07" }),
    );
    assert!(approx(num_field(&dash, "openDeferred"), 120.0));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "transactions.settle",
        json!({ "id": paid_now, "payment": { "kind": "single", "method": "cash" } }),
    );
    assert_eq!(error_code(&e), "not_deferred");

    // On account is only ever a whole single payment.
    let e = request_err(
        &mut stdin,
        &mut reader,
        "4a",
        "transactions.create",
        json!({
            "kind": "income",
            "amount": 100,
            "category": "store",
            "date": "2025-07-04",
            "payment": {
                "kind": "split",
                "parts": [
                    { "method": "cash", "amount": 40 },
                    { "method": "onAccount", "amount": 60 }
                ]
            }
        }),
    );
    assert_eq!(error_code(&e), "bad_params");
    let e = request_err(
        &mut stdin,
        &mut reader,
        "4b",
        "transactions.settle",
        json!({
            "id": deferred,
            "payment": {
                "kind": "split",
                "parts": [
                    { "method": "cash", "amount": 50 },
                    { "method": "onAccount", "amount": 70 }
                ]
            }
        }),
    );
    assert_eq!(error_code(&e), "bad_params");

    let settled = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "transactions.settle",
        json!({ "id": deferred, "method": "instant" }),
    );
    assert_eq!(settled["breakdownLabel"], json!("instant"));

    let again = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "transactions.settle",
        json!({ "id": deferred, "payment": { "kind": "single", "method": "cash" } }),
    );
    assert_eq!(error_code(&again), "not_deferred");

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "reports.finance",
        json!({ "from": "2025-07-01", "to": "2025-07-31", "category": "store" }),
    );
    let totals = &report["totals"];
    assert!(approx(num_field(totals, "incomeTotal"), 150.0));
    assert!(approx(num_field(totals, "deferred"), 0.0));
    assert!(approx(num_field(totals, "instant"), 120.0));
    assert!(approx(num_field(totals, "cash"), 30.0));

    let dash = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "reports.dashboard",
        json!({ "month": "2025-07" }),
    );
    assert!(approx(num_field(&dash, "openDeferred"), 0.0));
    assert!(approx(num_field(&dash, "income"), 150.0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
