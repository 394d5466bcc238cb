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

fn notification_count(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    req_id: &str,
    student_id: &str,
) -> usize {
    let res = request_ok(
        stdin,
        reader,
        req_id,
        "notifications.recent",
        json!({ "studentId": student_id }),
    );
    res["notifications"].as_array().map(|a| a.len()).unwrap_or(0)
}

#[test]
fn absent_and_late_marks_notify_the_guardian_once() {
    let workspace = temp_dir("schoold-attendance-notify");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let classroom = request_ok(
        &mut stdin,
        &mut reader,
        "cls",
        "classrooms.create",
        json!({ "name": "5-E", "gradeLevel": 5 }),
    );
    let classroom_id = classroom["classroomId"].as_str().expect("classroomId").to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "stu",
        "students.create",
        json!({
            "classroomId": classroom_id,
            "studentNo": "031",
            "firstName": "Noa",
            "lastName": "Marsh",
            "guardianEmail": "guardian@example.com"
        }),
    );
    let student_id = student["studentId"].as_str().expect("studentId").to_string();
    let date = "2026-03-10";

    // Marking PRESENT creates the row but is not notification-worthy.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "attendance.save",
        json!({
            "classroomId": classroom_id,
            "date": date,
            "records": [{ "studentId": student_id, "status": "PRESENT" }]
        }),
    );
    assert_eq!(
        notification_count(&mut stdin, &mut reader, "n1", &student_id),
        0
    );

    // PRESENT -> ABSENT: exactly one notification.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "s2",
        "attendance.save",
        json!({
            "classroomId": classroom_id,
            "date": date,
            "records": [{ "studentId": student_id, "status": "ABSENT" }]
        }),
    );
    assert_eq!(
        notification_count(&mut stdin, &mut reader, "n2", &student_id),
        1
    );

    // Saving the same status again is a no-op: still one notification.
    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "s3",
        "attendance.save",
        json!({
            "classroomId": classroom_id,
            "date": date,
            "records": [{ "studentId": student_id, "status": "ABSENT" }]
        }),
    );
    assert_eq!(saved["saved"].as_u64(), Some(0));
    assert_eq!(
        notification_count(&mut stdin, &mut reader, "n3", &student_id),
        1
    );

    // ABSENT -> LATE is a change to a notification-worthy status.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "s4",
        "attendance.save",
        json!({
            "classroomId": classroom_id,
            "date": date,
            "records": [{ "studentId": student_id, "status": "LATE" }]
        }),
    );
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "n4",
        "notifications.recent",
        json!({ "studentId": student_id }),
    );
    let notifications = res["notifications"].as_array().expect("notifications");
    assert_eq!(notifications.len(), 2);
    for n in notifications {
        assert_eq!(n["kind"].as_str(), Some("attendance"));
        assert_eq!(n["recipient"].as_str(), Some("guardian@example.com"));
    }
}

#[test]
fn no_guardian_on_file_means_no_notification() {
    let workspace = temp_dir("schoold-attendance-no-guardian");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let classroom = request_ok(
        &mut stdin,
        &mut reader,
        "cls",
        "classrooms.create",
        json!({ "name": "6-F", "gradeLevel": 6 }),
    );
    let classroom_id = classroom["classroomId"].as_str().expect("classroomId").to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "stu",
        "students.create",
        json!({
            "classroomId": classroom_id,
            "studentNo": "032",
            "firstName": "Ira",
            "lastName": "Vance"
        }),
    );
    let student_id = student["studentId"].as_str().expect("studentId").to_string();

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "attendance.save",
        json!({
            "classroomId": classroom_id,
            "date": "2026-03-10",
            "records": [{ "studentId": student_id, "status": "ABSENT" }]
        }),
    );
    // The write itself still lands.
    assert_eq!(saved["saved"].as_u64(), Some(1));
    assert_eq!(
        notification_count(&mut stdin, &mut reader, "n1", &student_id),
        0
    );
}
