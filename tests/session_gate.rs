mod test_support;

use serde_json::json;
use test_support::{
    error_code, request_err, request_ok, spawn_sidecar, temp_dir, DEVICE_CODE, STAFF_PASSWORD,
    STAFF_USER,
};

#[test]
fn gate_requires_device_and_staff_sign_in() {
    let workspace = temp_dir("gymd-session-gate");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let e = request_err(&mut stdin, &mut reader, "1", "students.list", json!({}));
    assert_eq!(error_code(&e), "no_workspace");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let status = request_ok(&mut stdin, &mut reader, "3", "session.status", json!({}));
    assert_eq!(status["bootstrapped"], json!(false));
    assert_eq!(status["authenticated"], json!(false));

    let e = request_err(&mut stdin, &mut reader, "4", "students.list", json!({}));
    assert_eq!(error_code(&e), "device_not_authorized");

    let short = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "auth.bootstrap",
        json!({ "username": STAFF_USER, "password": "123", "deviceCode": DEVICE_CODE }),
    );
    assert_eq!(error_code(&short), "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "auth.bootstrap",
        json!({ "username": STAFF_USER, "password": STAFF_PASSWORD, "deviceCode": DEVICE_CODE }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "7", "students.list", json!({}));

    let twice = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "auth.bootstrap",
        json!({ "username": "other", "password": STAFF_PASSWORD, "deviceCode": DEVICE_CODE }),
    );
    assert_eq!(error_code(&twice), "already_bootstrapped");

    let _ = request_ok(&mut stdin, &mut reader, "9", "auth.logout", json!({}));
    let e = request_err(&mut stdin, &mut reader, "10", "students.list", json!({}));
    assert_eq!(error_code(&e), "unauthenticated");

    let wrong = request_err(
        &mut stdin,
        &mut reader,
        "11",
        "auth.login",
        json!({ "username": STAFF_USER, "password": "not-the-password" }),
    );
    assert_eq!(error_code(&wrong), "invalid_credentials");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "auth.login",
        json!({ "username": STAFF_USER, "password": STAFF_PASSWORD }),
    );
    let status = request_ok(&mut stdin, &mut reader, "13", "session.status", json!({}));
    assert_eq!(status["username"], json!(STAFF_USER));

    // Locking the device also signs the user out.
    let _ = request_ok(&mut stdin, &mut reader, "14", "device.lock", json!({}));
    let e = request_err(&mut stdin, &mut reader, "15", "students.list", json!({}));
    assert_eq!(error_code(&e), "device_not_authorized");
    let e = request_err(
        &mut stdin,
        &mut reader,
        "16",
        "auth.login",
        json!({ "username": STAFF_USER, "password": STAFF_PASSWORD }),
    );
    assert_eq!(error_code(&e), "device_not_authorized");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "17",
        "device.authorize",
        json!({ "code": "nope-nope" }),
    );
    assert_eq!(error_code(&e), "invalid_credentials");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "device.authorize",
        json!({ "code": DEVICE_CODE }),
    );
    let e = request_err(&mut stdin, &mut reader, "19", "students.list", json!({}));
    assert_eq!(error_code(&e), "unauthenticated");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "20",
        "auth.login",
        json!({ "username": STAFF_USER, "password": STAFF_PASSWORD }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "21", "students.list", json!({}));

    drop(stdin);
    let _ = child.wait();

    // A fresh process starts with the gate closed.
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "22",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let status = request_ok(&mut stdin, &mut reader, "23", "session.status", json!({}));
    assert_eq!(status["bootstrapped"], json!(true));
    assert_eq!(status["deviceAuthorized"], json!(false));
    let e = request_err(&mut stdin, &mut reader, "24", "students.list", json!({}));
    assert_eq!(error_code(&e), "device_not_authorized");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn staff_accounts_can_be_managed() {
    let workspace = temp_dir("gymd-session-staff");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    test_support::open_session(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "staff.create",
        json!({ "username": "coach", "password": "coach-pass" }),
    );
    let coach_id = test_support::str_field(&created, "userId").to_string();
    let dup = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "staff.create",
        json!({ "username": "coach", "password": "coach-pass" }),
    );
    assert_eq!(error_code(&dup), "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "staff.changePassword",
        json!({ "id": coach_id, "password": "new-coach-pass" }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "4", "auth.logout", json!({}));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "auth.login",
        json!({ "username": "coach", "password": "new-coach-pass" }),
    );
    let list = request_ok(&mut stdin, &mut reader, "6", "staff.list", json!({}));
    let users = list["users"].as_array().expect("users");
    assert_eq!(users.len(), 2);
    assert!(users.iter().all(|u| u.get("passwordHash").is_none()));

    let _ = request_ok(&mut stdin, &mut reader, "7", "staff.delete", json!({ "id": coach_id }));
    let remaining = request_ok(&mut stdin, &mut reader, "8", "staff.list", json!({}));
    let last_id = remaining["users"][0]["id"].as_str().expect("id").to_string();
    let e = request_err(&mut stdin, &mut reader, "9", "staff.delete", json!({ "id": last_id }));
    assert_eq!(error_code(&e), "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
