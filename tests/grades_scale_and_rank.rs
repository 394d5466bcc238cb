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

struct Fixture {
    classroom_id: String,
    year_id: String,
    subject_id: String,
}

fn setup_classroom(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> Fixture {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let classroom = request_ok(
        stdin,
        reader,
        "cls",
        "classrooms.create",
        json!({ "name": "1-A", "gradeLevel": 1 }),
    );
    let classroom_id = classroom
        .get("classroomId")
        .and_then(|v| v.as_str())
        .expect("classroomId")
        .to_string();
    let year = request_ok(
        stdin,
        reader,
        "yr",
        "academicYears.create",
        json!({ "year": 2026, "semester": 1, "active": true }),
    );
    let year_id = year
        .get("academicYearId")
        .and_then(|v| v.as_str())
        .expect("academicYearId")
        .to_string();
    let subject = request_ok(
        stdin,
        reader,
        "sub",
        "subjects.create",
        json!({ "code": "MATH", "name": "Math" }),
    );
    let subject_id = subject
        .get("subjectId")
        .and_then(|v| v.as_str())
        .expect("subjectId")
        .to_string();
    Fixture {
        classroom_id,
        year_id,
        subject_id,
    }
}

fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    classroom_id: &str,
    student_no: &str,
    last_name: &str,
) -> String {
    let res = request_ok(
        stdin,
        reader,
        &format!("stu-{}", student_no),
        "students.create",
        json!({
            "classroomId": classroom_id,
            "studentNo": student_no,
            "firstName": "Kid",
            "lastName": last_name
        }),
    );
    res.get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string()
}

fn find_student<'a>(open: &'a serde_json::Value, student_id: &str) -> &'a serde_json::Value {
    open.get("students")
        .and_then(|v| v.as_array())
        .expect("students")
        .iter()
        .find(|s| s.get("id").and_then(|v| v.as_str()) == Some(student_id))
        .expect("student present")
}

#[test]
fn scores_map_to_letters_gpa_and_rank() {
    let workspace = temp_dir("schoold-grades-e2e");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_classroom(&mut stdin, &mut reader, &workspace);

    let a = create_student(&mut stdin, &mut reader, &fx.classroom_id, "001", "Alpha");
    let b = create_student(&mut stdin, &mut reader, &fx.classroom_id, "002", "Beta");

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "save",
        "grades.save",
        json!({
            "classroomId": fx.classroom_id,
            "academicYearId": fx.year_id,
            "records": [
                { "studentId": a, "subjectId": fx.subject_id, "totalScore": "85" },
                { "studentId": b, "subjectId": fx.subject_id, "totalScore": "62" }
            ]
        }),
    );
    assert_eq!(saved.get("saved").and_then(|v| v.as_u64()), Some(2));

    let open = request_ok(
        &mut stdin,
        &mut reader,
        "open",
        "grades.open",
        json!({ "classroomId": fx.classroom_id, "academicYearId": fx.year_id }),
    );

    let a_rec = &open["records"][a.as_str()][0];
    assert_eq!(a_rec.get("letter").and_then(|v| v.as_str()), Some("4"));
    assert_eq!(a_rec.get("gpa").and_then(|v| v.as_f64()), Some(4.0));
    assert_eq!(a_rec.get("totalScore").and_then(|v| v.as_f64()), Some(85.0));
    let b_rec = &open["records"][b.as_str()][0];
    assert_eq!(b_rec.get("letter").and_then(|v| v.as_str()), Some("2"));
    assert_eq!(b_rec.get("gpa").and_then(|v| v.as_f64()), Some(2.0));

    let a_row = find_student(&open, &a);
    assert_eq!(a_row.get("averageGpa").and_then(|v| v.as_f64()), Some(4.0));
    assert_eq!(a_row.get("rank").and_then(|v| v.as_u64()), Some(1));
    let b_row = find_student(&open, &b);
    assert_eq!(b_row.get("averageGpa").and_then(|v| v.as_f64()), Some(2.0));
    assert_eq!(b_row.get("rank").and_then(|v| v.as_u64()), Some(2));
}

#[test]
fn tied_gpas_share_rank_and_skip_after_the_tie_group() {
    let workspace = temp_dir("schoold-grades-ties");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_classroom(&mut stdin, &mut reader, &workspace);

    let a = create_student(&mut stdin, &mut reader, &fx.classroom_id, "001", "Alpha");
    let b = create_student(&mut stdin, &mut reader, &fx.classroom_id, "002", "Beta");
    let c = create_student(&mut stdin, &mut reader, &fx.classroom_id, "003", "Gamma");
    // No grades for this student: it must stay unranked, not rank 0 or last.
    let d = create_student(&mut stdin, &mut reader, &fx.classroom_id, "004", "Delta");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "save",
        "grades.save",
        json!({
            "classroomId": fx.classroom_id,
            "academicYearId": fx.year_id,
            "records": [
                { "studentId": a, "subjectId": fx.subject_id, "totalScore": "85" },
                { "studentId": b, "subjectId": fx.subject_id, "totalScore": "82" },
                { "studentId": c, "subjectId": fx.subject_id, "totalScore": "70" }
            ]
        }),
    );

    let open = request_ok(
        &mut stdin,
        &mut reader,
        "open",
        "grades.open",
        json!({ "classroomId": fx.classroom_id, "academicYearId": fx.year_id }),
    );

    // 85 and 82 both land in the top tier (GPA 4.0), 70 maps to 3.0.
    assert_eq!(
        find_student(&open, &a).get("rank").and_then(|v| v.as_u64()),
        Some(1)
    );
    assert_eq!(
        find_student(&open, &b).get("rank").and_then(|v| v.as_u64()),
        Some(1)
    );
    assert_eq!(
        find_student(&open, &c).get("rank").and_then(|v| v.as_u64()),
        Some(3)
    );

    let d_row = find_student(&open, &d);
    assert!(d_row.get("rank").map(|v| v.is_null()).unwrap_or(true));
    assert!(d_row
        .get("averageGpa")
        .map(|v| v.is_null())
        .unwrap_or(true));
}

#[test]
fn open_defaults_to_the_active_academic_year() {
    let workspace = temp_dir("schoold-grades-active-year");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_classroom(&mut stdin, &mut reader, &workspace);
    let a = create_student(&mut stdin, &mut reader, &fx.classroom_id, "001", "Alpha");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "save",
        "grades.save",
        json!({
            "classroomId": fx.classroom_id,
            "academicYearId": fx.year_id,
            "records": [
                { "studentId": a, "subjectId": fx.subject_id, "totalScore": "90" }
            ]
        }),
    );

    // No academicYearId in params: the active year is used.
    let open = request_ok(
        &mut stdin,
        &mut reader,
        "open",
        "grades.open",
        json!({ "classroomId": fx.classroom_id }),
    );
    assert_eq!(
        open["academicYear"].get("id").and_then(|v| v.as_str()),
        Some(fx.year_id.as_str())
    );
    assert_eq!(
        open["academicYear"].get("label").and_then(|v| v.as_str()),
        Some("2026 S1")
    );
    assert_eq!(
        find_student(&open, &a)
            .get("averageGpa")
            .and_then(|v| v.as_f64()),
        Some(4.0)
    );
}
