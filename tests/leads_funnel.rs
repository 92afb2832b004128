mod test_support;

use serde_json::json;
use test_support::{
    approx, error_code, num_field, open_session, request_err, request_ok, spawn_sidecar,
    str_field, temp_dir,
};

#[test]
fn no_show_reschedule_attend_and_enroll() {
    let workspace = temp_dir("gymd-leads-funnel");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_session(&mut stdin, &mut reader, &workspace);

    let lt = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "lessonTypes.create",
        json!({ "name": "Jiu-jitsu kids", "category": "kids", "monthlyFee": 140 }),
    );
    let lesson_type_id = str_field(&lt, "lessonTypeId").to_string();

    let lead = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "leads.create",
        json!({
            "name": "Lia",
            "phone": "(21) 99876-5432",
            "trialDate": "2025-09-10",
            "lessonTypeId": lesson_type_id
        }),
    );
    let lead_id = str_field(&lead, "leadId").to_string();

    let listed = request_ok(&mut stdin, &mut reader, "3", "leads.list", json!({}));
    let row = &listed["leads"][0];
    assert_eq!(row["status"], json!("scheduled"));
    assert_eq!(row["nextStatuses"], json!(["attended", "noShow"]));
    assert_eq!(row["canEnroll"], json!(false));

    let early = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "leads.convert",
        json!({ "id": lead_id }),
    );
    assert_eq!(error_code(&early), "invalid_transition");

    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "leads.transition",
        json!({ "id": lead_id, "to": "noShow" }),
    );
    assert_eq!(moved["nextStatuses"], json!(["scheduled"]));
    let bad = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "leads.transition",
        json!({ "id": lead_id, "to": "attended" }),
    );
    assert_eq!(error_code(&bad), "invalid_transition");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "leads.transition",
        json!({ "id": lead_id, "to": "scheduled" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "leads.transition",
        json!({ "id": lead_id, "to": "attended" }),
    );
    let manual = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "leads.transition",
        json!({ "id": lead_id, "to": "converted" }),
    );
    assert_eq!(error_code(&manual), "invalid_transition");

    let follow_up = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "messages.leadFollowUp",
        json!({ "leadId": lead_id }),
    );
    assert!(str_field(&follow_up, "text").contains("2025-09-10"));
    assert_eq!(str_field(&follow_up, "phone"), "5521998765432");

    let converted = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "leads.convert",
        json!({ "id": lead_id, "dueDay": 5, "enrolledOn": "2025-09-12" }),
    );
    let student_id = str_field(&converted, "studentId").to_string();

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "students.get",
        json!({ "id": student_id }),
    );
    let s = &student["student"];
    assert_eq!(s["name"], json!("Lia"));
    assert_eq!(s["lessonTypeId"], json!(lesson_type_id));
    assert!(approx(num_field(s, "monthlyFee"), 140.0));
    assert_eq!(s["dueDay"], json!(5));
    assert_eq!(s["enrolledOn"], json!("2025-09-12"));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "leads.list",
        json!({ "status": "converted" }),
    );
    let row = &listed["leads"][0];
    assert_eq!(row["studentId"], json!(student_id));
    assert_eq!(row["convertedOn"], json!("2025-09-12"));
    assert_eq!(row["nextStatuses"], json!([]));

    let terminal = request_err(
        &mut stdin,
        &mut reader,
        "14",
        "leads.transition",
        json!({ "id": lead_id, "to": "scheduled" }),
    );
    assert_eq!(error_code(&terminal), "invalid_transition");
    let twice = request_err(
        &mut stdin,
        &mut reader,
        "15",
        "leads.convert",
        json!({ "id": lead_id }),
    );
    assert_eq!(error_code(&twice), "invalid_transition");

    let dash = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "reports.dashboard",
        json!({ "month": "2025-09" }),
    );
    assert_eq!(dash["leadsByStatus"]["converted"], json!(1));
    assert_eq!(dash["leadsByStatus"]["scheduled"], json!(0));
    assert_eq!(dash["activeStudents"], json!(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn lead_contact_edits_do_not_move_status() {
    let workspace = temp_dir("gymd-leads-edit");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_session(&mut stdin, &mut reader, &workspace);

    let lead = request_ok(&mut stdin, &mut reader, "1", "leads.create", json!({ "name": "Rui" }));
    let lead_id = str_field(&lead, "leadId").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "leads.update",
        json!({
            "id": lead_id,
            "name": "Rui Costa",
            "phone": "21 3333-4444",
            "status": "converted"
        }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "3", "leads.list", json!({}));
    assert_eq!(listed["leads"][0]["name"], json!("Rui Costa"));
    assert_eq!(listed["leads"][0]["status"], json!("scheduled"));

    let no_phone = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "leads.create",
        json!({ "name": "Ana" }),
    );
    let e = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "messages.leadFollowUp",
        json!({ "leadId": str_field(&no_phone, "leadId") }),
    );
    assert_eq!(error_code(&e), "bad_params");

    let bad_status = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "leads.list",
        json!({ "status": "Scheduled" }),
    );
    assert_eq!(error_code(&bad_status), "bad_params");

    let _ = request_ok(&mut stdin, &mut reader, "7", "leads.delete", json!({ "id": lead_id }));
    let e = request_err(&mut stdin, &mut reader, "8", "leads.delete", json!({ "id": lead_id }));
    assert_eq!(error_code(&e), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
