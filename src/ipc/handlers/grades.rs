use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::notify::{self, Notification};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

#[derive(Debug, Clone)]
struct AcademicYear {
    id: String,
    year: i64,
    semester: i64,
}

impl AcademicYear {
    fn label(&self) -> String {
        format!("{} S{}", self.year, self.semester)
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn db_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

fn resolve_academic_year(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<AcademicYear, HandlerErr> {
    let row = match params.get("academicYearId").and_then(|v| v.as_str()) {
        Some(year_id) => conn
            .query_row(
                "SELECT id, year, semester FROM academic_years WHERE id = ?",
                [year_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()
            .map_err(db_err)?,
        None => conn
            .query_row(
                "SELECT id, year, semester FROM academic_years WHERE is_active = 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()
            .map_err(db_err)?,
    };
    let (id, year, semester) = row.ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "no active academic year configured".to_string(),
        details: None,
    })?;
    Ok(AcademicYear { id, year, semester })
}

fn classroom_exists(conn: &Connection, classroom_id: &str) -> Result<(), HandlerErr> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM classrooms WHERE id = ?",
            [classroom_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if exists.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "classroom not found".to_string(),
            details: None,
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct RosterStudent {
    id: String,
    student_no: String,
    display_name: String,
    guardian_email: Option<String>,
}

fn active_roster(conn: &Connection, classroom_id: &str) -> Result<Vec<RosterStudent>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, student_no, last_name, first_name, guardian_email
             FROM students
             WHERE classroom_id = ? AND status = 'active'
             ORDER BY sort_order",
        )
        .map_err(db_err)?;
    stmt.query_map([classroom_id], |r| {
        let last: String = r.get(2)?;
        let first: String = r.get(3)?;
        Ok(RosterStudent {
            id: r.get(0)?,
            student_no: r.get(1)?,
            display_name: format!("{}, {}", last, first),
            guardian_email: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

/// Subjects in play for the classroom + year: anything scheduled for the
/// classroom, plus anything that already has grade rows for the period.
fn subjects_for_classroom(
    conn: &Connection,
    classroom_id: &str,
    academic_year_id: &str,
) -> Result<Vec<(String, String, String)>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT s.id, s.code, s.name
             FROM subjects s
             WHERE s.id IN (SELECT subject_id FROM schedules WHERE classroom_id = ?)
                OR s.id IN (
                  SELECT gr.subject_id
                  FROM grade_records gr
                  JOIN students st ON st.id = gr.student_id
                  WHERE st.classroom_id = ? AND gr.academic_year_id = ?
                )
             ORDER BY s.code",
        )
        .map_err(db_err)?;
    stmt.query_map((classroom_id, classroom_id, academic_year_id), |r| {
        Ok((r.get(0)?, r.get(1)?, r.get(2)?))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

/// GPA averages and ranks are recomputed from the current grade rows on every
/// read; nothing derived is stored.
fn grades_open(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    classroom_exists(conn, &classroom_id)?;
    let year = resolve_academic_year(conn, params)?;
    let students = active_roster(conn, &classroom_id)?;
    let subjects = subjects_for_classroom(conn, &classroom_id, &year.id)?;

    let mut records_by_student: HashMap<String, Vec<serde_json::Value>> = HashMap::new();
    let mut gpas_by_student: HashMap<String, Vec<f64>> = HashMap::new();
    let mut stmt = conn
        .prepare(
            "SELECT gr.student_id, gr.subject_id, gr.total_score, gr.letter, gr.gpa
             FROM grade_records gr
             JOIN students st ON st.id = gr.student_id
             WHERE st.classroom_id = ? AND gr.academic_year_id = ?",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map((&classroom_id, &year.id), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<f64>>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, Option<f64>>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    for (student_id, subject_id, total_score, letter, gpa) in rows {
        if let Some(g) = gpa {
            gpas_by_student.entry(student_id.clone()).or_default().push(g);
        }
        records_by_student
            .entry(student_id)
            .or_default()
            .push(json!({
                "subjectId": subject_id,
                "totalScore": total_score,
                "letter": letter,
                "gpa": gpa
            }));
    }

    let averages: Vec<(String, f64)> = students
        .iter()
        .filter_map(|s| {
            let gpas = gpas_by_student.get(&s.id)?;
            grading::average_gpa(gpas).map(|avg| (s.id.clone(), avg))
        })
        .collect();
    let ranks = grading::dense_ranks(&averages);
    let average_by_id: HashMap<&str, f64> = averages
        .iter()
        .map(|(id, avg)| (id.as_str(), *avg))
        .collect();

    let students_json: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "studentNo": s.student_no,
                "displayName": s.display_name,
                "averageGpa": average_by_id.get(s.id.as_str()),
                "rank": ranks.get(&s.id)
            })
        })
        .collect();

    let subjects_json: Vec<serde_json::Value> = subjects
        .iter()
        .map(|(id, code, name)| json!({ "id": id, "code": code, "name": name }))
        .collect();

    let records_json: serde_json::Value = records_by_student
        .into_iter()
        .map(|(sid, recs)| (sid, json!(recs)))
        .collect::<serde_json::Map<_, _>>()
        .into();

    Ok(json!({
        "academicYear": {
            "id": year.id,
            "year": year.year,
            "semester": year.semester,
            "label": year.label()
        },
        "students": students_json,
        "subjects": subjects_json,
        "records": records_json
    }))
}

fn grades_save(
    conn: &Connection,
    mailer: &Arc<dyn notify::Mailer>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    classroom_exists(conn, &classroom_id)?;
    let year = resolve_academic_year(conn, params)?;
    let Some(records) = params.get("records").and_then(|v| v.as_array()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing records[]".to_string(),
            details: None,
        });
    };

    let roster: HashMap<String, RosterStudent> = active_roster(conn, &classroom_id)?
        .into_iter()
        .map(|s| (s.id.clone(), s))
        .collect();

    let mut pending: Vec<Notification> = Vec::new();
    let mut saved: usize = 0;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    for (i, record) in records.iter().enumerate() {
        let student_id = record
            .get("studentId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr {
                code: "bad_params",
                message: format!("record at index {} missing studentId", i),
                details: None,
            })?;
        let subject_id = record
            .get("subjectId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr {
                code: "bad_params",
                message: format!("record at index {} missing subjectId", i),
                details: None,
            })?;

        // The grid sends the raw text field; a number is tolerated from older
        // clients. Anything non-numeric clears the grade.
        let score = match record.get("totalScore") {
            Some(v) if v.is_string() => grading::parse_score(v.as_str().unwrap_or_default()),
            Some(v) if v.is_number() => v.as_f64(),
            _ => None,
        };
        let (letter, gpa) = match score {
            Some(s) => {
                let (l, g) = grading::grade_for_score(s);
                (Some(l), Some(g))
            }
            None => (None, None),
        };

        let Some(student) = roster.get(student_id) else {
            continue;
        };

        let subject_name: Option<String> = tx
            .query_row("SELECT name FROM subjects WHERE id = ?", [subject_id], |r| {
                r.get(0)
            })
            .optional()
            .map_err(db_err)?;
        let Some(subject_name) = subject_name else {
            return Err(HandlerErr {
                code: "not_found",
                message: "subject not found".to_string(),
                details: Some(json!({ "subjectId": subject_id })),
            });
        };

        let prior_score: Option<Option<f64>> = tx
            .query_row(
                "SELECT total_score FROM grade_records
                 WHERE student_id = ? AND subject_id = ? AND academic_year_id = ?",
                (student_id, subject_id, &year.id),
                |r| r.get(0),
            )
            .optional()
            .map_err(db_err)?;
        let changed = match prior_score {
            None => true,
            Some(prior) => prior != score,
        };
        if !changed {
            continue;
        }

        let record_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO grade_records(id, student_id, subject_id, academic_year_id, total_score, letter, gpa)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, subject_id, academic_year_id) DO UPDATE SET
               total_score = excluded.total_score,
               letter = excluded.letter,
               gpa = excluded.gpa",
            (&record_id, student_id, subject_id, &year.id, score, letter, gpa),
        )
        .map_err(|e| HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "grade_records" })),
        })?;
        saved += 1;

        // Cleared scores update the row but carry nothing worth mailing.
        if let (Some(s), Some(l)) = (score, letter) {
            if let Some(guardian) = student.guardian_email.as_deref() {
                pending.push(Notification {
                    student_id: Some(student.id.clone()),
                    kind: "grade",
                    recipient: guardian.to_string(),
                    subject: format!("Grade update for {}", student.display_name),
                    body: format!(
                        "{}: {} ({}) scored {} (grade {})",
                        student.display_name,
                        subject_name,
                        year.label(),
                        s,
                        l
                    ),
                });
            }
        }
    }

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    for notification in pending {
        notify::enqueue(conn, mailer, notification);
    }

    Ok(json!({ "saved": saved }))
}

fn handle_grades_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match grades_open(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_grades_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let mailer = Arc::clone(&state.mailer);
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match grades_save(conn, &mailer, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.open" => Some(handle_grades_open(state, req)),
        "grades.save" => Some(handle_grades_save(state, req)),
        _ => None,
    }
}
