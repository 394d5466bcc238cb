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
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
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
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn active_year_ids(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    req_id: &str,
) -> Vec<String> {
    let res = request_ok(stdin, reader, req_id, "academicYears.list", json!({}));
    res["academicYears"]
        .as_array()
        .expect("academicYears")
        .iter()
        .filter(|y| y["active"].as_bool() == Some(true))
        .filter_map(|y| y["id"].as_str().map(|s| s.to_string()))
        .collect()
}

#[test]
fn at_most_one_academic_year_is_active() {
    let workspace = temp_dir("schoold-years-active");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let y1 = request_ok(
        &mut stdin,
        &mut reader,
        "y1",
        "academicYears.create",
        json!({ "year": 2025, "semester": 2, "active": true }),
    );
    let y1_id = y1["academicYearId"].as_str().expect("y1").to_string();
    assert_eq!(active_year_ids(&mut stdin, &mut reader, "l1"), vec![y1_id.clone()]);

    // Activating a newly created year deactivates the previous one.
    let y2 = request_ok(
        &mut stdin,
        &mut reader,
        "y2",
        "academicYears.create",
        json!({ "year": 2026, "semester": 1, "active": true }),
    );
    let y2_id = y2["academicYearId"].as_str().expect("y2").to_string();
    assert_eq!(active_year_ids(&mut stdin, &mut reader, "l2"), vec![y2_id.clone()]);

    let y3 = request_ok(
        &mut stdin,
        &mut reader,
        "y3",
        "academicYears.create",
        json!({ "year": 2026, "semester": 2 }),
    );
    let y3_id = y3["academicYearId"].as_str().expect("y3").to_string();
    // Creating without the active flag changes nothing.
    assert_eq!(active_year_ids(&mut stdin, &mut reader, "l3"), vec![y2_id]);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "set",
        "academicYears.setActive",
        json!({ "academicYearId": y3_id }),
    );
    assert_eq!(active_year_ids(&mut stdin, &mut reader, "l4"), vec![y3_id.clone()]);

    // Re-activating the current year is a harmless no-op.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "set2",
        "academicYears.setActive",
        json!({ "academicYearId": y3_id }),
    );
    assert_eq!(active_year_ids(&mut stdin, &mut reader, "l5"), vec![y3_id]);
}
