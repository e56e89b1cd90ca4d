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
    let exe = env!("CARGO_BIN_EXE_feebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn feebookd");
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

#[test]
fn exported_bundle_restores_into_a_fresh_workspace() {
    let source_ws = temp_dir("feebook-backup-src");
    let target_ws = temp_dir("feebook-backup-dst");
    let bundle = temp_dir("feebook-backup-out").join("school.feebookbackup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": source_ws.to_string_lossy() }),
    );
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "admissionNumber": "S0800", "name": "Kagiso Mokoena", "form": 1, "stream": "S" }),
    );
    let student_id = student["id"].as_str().expect("id").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "fees.recordPayment",
        json!({ "studentId": student_id, "amount": 12000, "term": 1 }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "backup.export",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(
        exported["bundleFormat"].as_str(),
        Some("feebook-workspace-v1")
    );
    assert!(bundle.is_file());

    // Restore into an empty workspace and read the data back.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "workspace.select",
        json!({ "path": target_ws.to_string_lossy() }),
    );
    let empty = request_ok(&mut stdin, &mut reader, "6", "students.list", json!({}));
    assert_eq!(empty["students"].as_array().map(|a| a.len()), Some(0));

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "backup.import",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(
        imported["bundleFormatDetected"].as_str(),
        Some("feebook-workspace-v1")
    );

    let restored = request_ok(&mut stdin, &mut reader, "8", "students.list", json!({}));
    let rows = restored["students"].as_array().expect("students");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["admissionNumber"].as_str(), Some("S0800"));

    let ledger = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "fees.getLedger",
        json!({ "studentId": student_id }),
    );
    assert_eq!(ledger["totalPaid"].as_f64(), Some(12000.0));
    assert_eq!(ledger["payments"].as_array().map(|a| a.len()), Some(1));
}

#[test]
fn failed_import_keeps_the_workspace_open() {
    let workspace = temp_dir("feebook-backup-bad");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

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
        "students.create",
        json!({ "admissionNumber": "S0801", "name": "Lerato Dube", "form": 2, "stream": "W" }),
    );

    let missing = workspace.join("no-such.feebookbackup");
    let denied = request(
        &mut stdin,
        &mut reader,
        "3",
        "backup.import",
        json!({ "inPath": missing.to_string_lossy() }),
    );
    assert_eq!(denied["ok"].as_bool(), Some(false));
    assert_eq!(denied["error"]["code"].as_str(), Some("not_found"));
    assert_eq!(
        denied["error"]["details"]["path"].as_str(),
        Some(missing.to_string_lossy().as_ref())
    );

    // The session must survive the rejected import with its data intact.
    let still_there = request_ok(&mut stdin, &mut reader, "4", "students.list", json!({}));
    assert_eq!(still_there["students"].as_array().map(|a| a.len()), Some(1));

    // An outPath that is an existing directory surfaces as an IO error.
    let failed = request(
        &mut stdin,
        &mut reader,
        "5",
        "backup.export",
        json!({ "outPath": workspace.to_string_lossy() }),
    );
    assert_eq!(failed["ok"].as_bool(), Some(false));
    assert_eq!(failed["error"]["code"].as_str(), Some("io_failed"));
}
