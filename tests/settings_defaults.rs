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
    role: Option<&str>,
) -> serde_json::Value {
    let mut payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if let Some(role) = role {
        payload["role"] = json!(role);
    }
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
    role: Option<&str>,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params, role);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn methods_require_a_selected_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request(&mut stdin, &mut reader, "1", "settings.get", json!({}), None);
    assert_eq!(resp["ok"].as_bool(), Some(false));
    assert_eq!(resp["error"]["code"].as_str(), Some("no_workspace"));
}

#[test]
fn update_before_first_read_is_not_found() {
    let workspace = temp_dir("feebook-settings-missing");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
        None,
    );

    // The singleton is only created by settings.get.
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "settings.update",
        json!({ "feePerTerm": 9000 }),
        Some("Admin"),
    );
    assert_eq!(resp["ok"].as_bool(), Some(false));
    assert_eq!(resp["error"]["code"].as_str(), Some("not_found"));
}

#[test]
fn first_read_creates_defaults_and_updates_merge() {
    let workspace = temp_dir("feebook-settings-defaults");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
        None,
    );

    let settings = request_ok(&mut stdin, &mut reader, "2", "settings.get", json!({}), None);
    assert_eq!(
        settings["streams"],
        json!(["N", "E", "S", "W"])
    );
    assert_eq!(settings["feePerTerm"].as_f64(), Some(15000.0));
    assert_eq!(settings["currentTerm"].as_i64(), Some(1));
    assert_eq!(settings["annualFee"].as_f64(), Some(45000.0));

    // Partial update: untouched fields keep their values.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "settings.update",
        json!({ "feePerTerm": 18000, "schoolName": "Milima High" }),
        Some("Admin"),
    );
    assert_eq!(updated["feePerTerm"].as_f64(), Some(18000.0));
    assert_eq!(updated["annualFee"].as_f64(), Some(54000.0));
    assert_eq!(updated["currentTerm"].as_i64(), Some(1));
    assert_eq!(updated["streams"], json!(["N", "E", "S", "W"]));
    assert_eq!(updated["schoolName"].as_str(), Some("Milima High"));

    // The merge persists across reads.
    let settings = request_ok(&mut stdin, &mut reader, "4", "settings.get", json!({}), None);
    assert_eq!(settings["feePerTerm"].as_f64(), Some(18000.0));
    assert_eq!(settings["schoolName"].as_str(), Some("Milima High"));
}

#[test]
fn update_validates_enum_and_numeric_fields() {
    let workspace = temp_dir("feebook-settings-validation");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
        None,
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "settings.get", json!({}), None);

    let cases = [
        ("3", json!({ "currentTerm": 5 })),
        ("4", json!({ "currentTerm": 0 })),
        ("5", json!({ "feePerTerm": -1 })),
        ("6", json!({ "streams": ["N", ""] })),
        ("7", json!({ "streams": "N" })),
    ];
    for (id, params) in cases {
        let resp = request(
            &mut stdin,
            &mut reader,
            id,
            "settings.update",
            params,
            Some("Admin"),
        );
        assert_eq!(resp["ok"].as_bool(), Some(false), "case {}", id);
        assert_eq!(resp["error"]["code"].as_str(), Some("bad_params"), "case {}", id);
    }
}
