mod test_support;

use serde_json::json;
use test_support::{
    approx, error_code, num_field, open_session, request_err, request_ok, spawn_sidecar,
    str_field, temp_dir,
};

#[test]
fn oversized_amounts_are_rejected_and_reports_keep_answering() {
    let workspace = temp_dir("gymd-money-limits");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_session(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "instructors.create",
        json!({ "name": "Duda", "category": "adult", "percentage": 50 }),
    );

    for (i, amount) in [
        json!("70000000000000000000000000000"),
        json!(1_000_000_000_001i64),
        json!("1000000000000.01"),
    ]
    .into_iter()
    .enumerate()
    {
        let e = request_err(
            &mut stdin,
            &mut reader,
            &format!("huge-{}", i),
            "transactions.create",
            json!({
                "kind": "income",
                "amount": amount,
                "category": "adult",
                "date": "2025-03-05"
            }),
        );
        assert_eq!(error_code(&e), "bad_params");
    }

    let e = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "transactions.create",
        json!({
            "kind": "income",
            "amount": 100,
            "category": "adult",
            "date": "2025-03-05",
            "payment": {
                "kind": "split",
                "parts": [{ "method": "cash", "amount": "70000000000000000000000000000" }]
            }
        }),
    );
    assert_eq!(error_code(&e), "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "transactions.create",
        json!({
            "kind": "income",
            "amount": 1_000_000_000_000i64,
            "category": "adult",
            "date": "2025-03-05"
        }),
    );
    let month = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "commissions.month",
        json!({ "month": "2025-03" }),
    );
    let line = &month["lines"][0];
    assert!(approx(num_field(line, "matchedRevenue"), 1e12));
    assert!(approx(num_field(line, "liveCommission"), 5e11));

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "reports.finance",
        json!({ "from": "2025-03-01", "to": "2025-03-31" }),
    );
    assert!(approx(num_field(&report["totals"], "incomeTotal"), 1e12));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn stock_and_quantity_overflow_is_bad_params() {
    let workspace = temp_dir("gymd-stock-limits");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_session(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "products.create",
        json!({ "name": "Belt", "price": 1_000_000_000_000i64, "stock": 2 }),
    );
    let belt_id = str_field(&created, "productId").to_string();

    let e = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "products.adjustStock",
        json!({ "id": belt_id, "delta": i64::MAX }),
    );
    assert_eq!(error_code(&e), "bad_params");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "pos.sell",
        json!({
            "date": "2025-03-05",
            "items": [
                { "productId": belt_id, "quantity": i64::MAX },
                { "productId": belt_id, "quantity": 1 }
            ]
        }),
    );
    assert_eq!(error_code(&e), "bad_params");

    // Two belts at the price ceiling add up past it.
    let e = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "pos.sell",
        json!({ "date": "2025-03-05", "items": [{ "productId": belt_id, "quantity": 2 }] }),
    );
    assert_eq!(error_code(&e), "bad_params");

    let listed = request_ok(&mut stdin, &mut reader, "5", "products.list", json!({}));
    assert_eq!(listed["products"][0]["stock"], json!(2));
    let records = request_ok(&mut stdin, &mut reader, "6", "transactions.list", json!({}));
    assert_eq!(records["transactions"].as_array().map(|a| a.len()), Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
