use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_maktabd");
    let mut child = Command::new(exe)
        .env_remove("MAKTABD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn maktabd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Decimals travel as strings; compare numerically.
fn amount(v: &serde_json::Value) -> f64 {
    v.as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or_else(|| panic!("expected decimal string, got {}", v))
}

#[test]
fn preview_is_pure_and_flags_warnings() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "invoices.preview",
        json!({
            "lineItems": [
                { "id": "a", "subjectName": "Hifz", "feeBreakdown": { "tuition": 1000 }, "totalAmount": 1 },
                { "id": "b", "subjectName": "Arabic", "feeBreakdown": { "tuition": "450", "transport": "", "books": "abc", "sibling": 50 } }
            ],
            "discountPercentage": 5
        }),
    );
    assert_eq!(amount(&preview["lineItems"][0]["totalAmount"]), 1000.0);
    assert_eq!(amount(&preview["lineItems"][1]["totalAmount"]), 500.0);
    assert_eq!(amount(&preview["totals"]["subtotal"]), 1500.0);
    assert_eq!(amount(&preview["totals"]["discountAmount"]), 75.0);
    assert_eq!(amount(&preview["totals"]["total"]), 1425.0);
    assert_eq!(preview["warnings"], json!([]));

    let flagged = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "invoices.preview",
        json!({
            "lineItems": [
                { "id": "a", "subjectName": "Hifz", "feeBreakdown": { "tuition": 100, "refund": -30 } }
            ],
            "discountPercentage": 150
        }),
    );
    assert_eq!(amount(&flagged["totals"]["subtotal"]), 70.0);
    assert_eq!(amount(&flagged["totals"]["total"]), -35.0);
    let codes: Vec<&str> = flagged["warnings"]
        .as_array()
        .expect("warnings")
        .iter()
        .filter_map(|w| w["code"].as_str())
        .collect();
    assert_eq!(codes, vec!["negative_amount", "discount_out_of_range"]);

    let not_array = request(
        &mut stdin,
        &mut reader,
        "3",
        "invoices.preview",
        json!({ "lineItems": { "a": 1 } }),
    );
    assert_eq!(not_array["error"]["code"], "bad_params");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn saved_invoices_are_recomputed_by_the_server() {
    let workspace = temp_dir("maktab-invoices");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "fees.types.upsert",
        json!({ "name": "Tuition", "defaultAmount": "300" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "fees.types.upsert",
        json!({ "name": "Transport", "defaultAmount": 45.5 }),
    );
    // Same name, different case: updates instead of inserting.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "fees.types.upsert",
        json!({ "name": "tuition", "defaultAmount": 350 }),
    );
    let types = request_ok(&mut stdin, &mut reader, "5", "fees.types.list", json!({}));
    assert_eq!(types["feeTypes"].as_array().map(|a| a.len()), Some(2));

    let negative_type = request(
        &mut stdin,
        &mut reader,
        "6",
        "fees.types.upsert",
        json!({ "name": "Books", "defaultAmount": -1 }),
    );
    assert_eq!(negative_type["error"]["code"], "bad_params");

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.create",
        json!({ "fullName": "Bilal Ahmed" }),
    );
    let student_id = student["studentId"].as_str().expect("studentId").to_string();

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "invoices.create",
        json!({
            "billTo": "Ahmed Family",
            "issuedOn": "2026-10-01",
            "discountPercentage": 10,
            "lineItems": [
                { "studentId": student_id, "subjectName": "Quran" }
            ]
        }),
    );
    let invoice_id = created["invoiceId"].as_str().expect("invoiceId").to_string();
    let inv = &created["invoice"];
    assert_eq!(inv["status"], "draft");
    assert_eq!(inv["invoiceNo"], 1);
    assert_eq!(amount(&inv["lineItems"][0]["feeBreakdown"]["tuition"]), 350.0);
    assert_eq!(amount(&inv["lineItems"][0]["totalAmount"]), 395.5);
    assert_eq!(amount(&inv["totals"]["discountAmount"]), 39.55);
    assert_eq!(amount(&inv["totals"]["total"]), 355.95);

    let out_of_range = request(
        &mut stdin,
        &mut reader,
        "9",
        "invoices.update",
        json!({ "invoiceId": invoice_id, "discountPercentage": 101 }),
    );
    assert_eq!(out_of_range["error"]["code"], "bad_params");

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "invoices.update",
        json!({
            "invoiceId": invoice_id,
            "discountPercentage": 5,
            "lineItems": [
                { "id": "line-1", "studentId": student_id, "subjectName": "Quran", "feeBreakdown": { "tuition": 1000 }, "totalAmount": 42 },
                { "id": "line-2", "subjectName": "Arabic", "feeBreakdown": { "tuition": 500, "late": -10 } }
            ]
        }),
    );
    let inv = &updated["invoice"];
    assert_eq!(amount(&inv["totals"]["subtotal"]), 1490.0);
    assert_eq!(amount(&inv["totals"]["discountAmount"]), 74.5);
    assert_eq!(amount(&inv["totals"]["total"]), 1415.5);
    assert_eq!(inv["lineItems"].as_array().map(|a| a.len()), Some(2));
    assert_eq!(updated["warnings"][0]["code"], "negative_amount");
    assert_eq!(updated["warnings"][0]["category"], "late");

    // Re-opening returns the stored, server-computed figures.
    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "invoices.open",
        json!({ "invoiceId": invoice_id }),
    );
    assert_eq!(opened["invoice"]["totals"], updated["invoice"]["totals"]);
    assert_eq!(amount(&opened["invoice"]["lineItems"][0]["totalAmount"]), 1000.0);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "invoices.update",
        json!({ "invoiceId": invoice_id, "status": "paid" }),
    );
    let locked = request(
        &mut stdin,
        &mut reader,
        "13",
        "invoices.update",
        json!({ "invoiceId": invoice_id, "discountPercentage": 0 }),
    );
    assert_eq!(locked["error"]["code"], "bad_params");

    let paid = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "invoices.list",
        json!({ "status": "paid" }),
    );
    assert_eq!(paid["invoices"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(paid["invoices"][0]["lineItemCount"], 2);
    let drafts = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "invoices.list",
        json!({ "status": "draft" }),
    );
    assert_eq!(drafts["invoices"].as_array().map(|a| a.len()), Some(0));

    let unknown_student = request(
        &mut stdin,
        &mut reader,
        "16",
        "invoices.create",
        json!({
            "billTo": "Nobody",
            "lineItems": [{ "studentId": "missing", "subjectName": "Quran" }]
        }),
    );
    assert_eq!(unknown_student["error"]["code"], "not_found");
    let all = request_ok(&mut stdin, &mut reader, "17", "invoices.list", json!({}));
    assert_eq!(all["invoices"].as_array().map(|a| a.len()), Some(1));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "invoices.delete",
        json!({ "invoiceId": invoice_id }),
    );
    let missing = request(
        &mut stdin,
        &mut reader,
        "19",
        "invoices.open",
        json!({ "invoiceId": invoice_id }),
    );
    assert_eq!(missing["error"]["code"], "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

const DECIMAL_MAX: &str = "79228162514264337593543950335";

#[test]
fn preview_survives_amounts_beyond_decimal_range() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let pinned = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "invoices.preview",
        json!({
            "lineItems": [
                { "id": "big", "subjectName": "Hifz", "feeBreakdown": { "a": DECIMAL_MAX, "b": "1" } }
            ],
            "discountPercentage": 0
        }),
    );
    assert_eq!(pinned["lineItems"][0]["totalAmount"], DECIMAL_MAX);
    assert_eq!(pinned["warnings"][0]["code"], "amount_overflow");
    assert_eq!(pinned["warnings"][0]["lineItemId"], "big");
    assert_eq!(pinned["warnings"][0]["field"], "totalAmount");

    let huge_discount = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "invoices.preview",
        json!({
            "lineItems": [
                { "id": "a", "subjectName": "Hifz", "feeBreakdown": { "tuition": "10000000000000000000" } }
            ],
            "discountPercentage": "100000000000"
        }),
    );
    assert_eq!(
        huge_discount["totals"]["discountAmount"],
        "10000000000000000000000000000"
    );

    // Still answering after both requests.
    let health = request_ok(&mut stdin, &mut reader, "3", "health", json!({}));
    assert!(health["version"].is_string());

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn failed_saves_leave_stored_invoices_untouched() {
    let workspace = temp_dir("maktab-invoices-atomic");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let rejected_create = request(
        &mut stdin,
        &mut reader,
        "2",
        "invoices.create",
        json!({
            "billTo": "Nobody",
            "lineItems": [{ "studentId": "no-such-student", "subjectName": "Quran" }]
        }),
    );
    assert_eq!(rejected_create["error"]["code"], "not_found");

    let overflow_create = request(
        &mut stdin,
        &mut reader,
        "3",
        "invoices.create",
        json!({
            "billTo": "Too Much",
            "lineItems": [{ "subjectName": "Quran", "feeBreakdown": { "a": DECIMAL_MAX, "b": 1 } }]
        }),
    );
    assert_eq!(overflow_create["error"]["code"], "bad_params");

    let listed = request_ok(&mut stdin, &mut reader, "4", "invoices.list", json!({}));
    assert_eq!(listed["invoices"], json!([]));

    // Rolled-back creates do not consume invoice numbers.
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "invoices.create",
        json!({
            "billTo": "Original Family",
            "issuedOn": "2026-10-01",
            "lineItems": [{ "subjectName": "Quran", "feeBreakdown": { "tuition": 100 } }]
        }),
    );
    assert_eq!(created["invoice"]["invoiceNo"], 1);
    let invoice_id = created["invoiceId"].as_str().expect("invoiceId").to_string();

    let rejected_update = request(
        &mut stdin,
        &mut reader,
        "6",
        "invoices.update",
        json!({
            "invoiceId": invoice_id,
            "status": "paid",
            "billTo": "CHANGED",
            "issuedOn": "2026-12-31",
            "lineItems": [
                { "studentId": "no-such-student", "subjectName": "Quran", "feeBreakdown": { "tuition": 999 } }
            ]
        }),
    );
    assert_eq!(rejected_update["error"]["code"], "not_found");

    let overflow_update = request(
        &mut stdin,
        &mut reader,
        "7",
        "invoices.update",
        json!({
            "invoiceId": invoice_id,
            "billTo": "CHANGED",
            "lineItems": [
                { "subjectName": "Quran", "feeBreakdown": { "a": DECIMAL_MAX } },
                { "subjectName": "Arabic", "feeBreakdown": { "a": DECIMAL_MAX } }
            ]
        }),
    );
    assert_eq!(overflow_update["error"]["code"], "bad_params");

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "invoices.open",
        json!({ "invoiceId": invoice_id }),
    );
    let inv = &opened["invoice"];
    assert_eq!(inv["status"], "draft");
    assert_eq!(inv["billTo"], "Original Family");
    assert_eq!(inv["issuedOn"], "2026-10-01");
    assert_eq!(inv["lineItems"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(amount(&inv["totals"]["total"]), 100.0);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
