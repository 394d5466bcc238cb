use crate::attendance::{week_dates, weekly_tier, AttendanceStatus};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::notify::{self, Notification};
use chrono::NaiveDate;
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
struct RosterStudent {
    id: String,
    student_no: String,
    display_name: String,
    guardian_email: Option<String>,
    sort_order: i64,
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

fn parse_date(raw: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| HandlerErr {
        code: "bad_params",
        message: "date must be YYYY-MM-DD".to_string(),
        details: None,
    })
}

fn classroom_name(conn: &Connection, classroom_id: &str) -> Result<String, HandlerErr> {
    conn.query_row(
        "SELECT name FROM classrooms WHERE id = ?",
        [classroom_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })?
    .ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "classroom not found".to_string(),
        details: None,
    })
}

fn active_roster(conn: &Connection, classroom_id: &str) -> Result<Vec<RosterStudent>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, student_no, last_name, first_name, guardian_email, sort_order
             FROM students
             WHERE classroom_id = ? AND status = 'active'
             ORDER BY sort_order",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    stmt.query_map([classroom_id], |r| {
        let last: String = r.get(2)?;
        let first: String = r.get(3)?;
        Ok(RosterStudent {
            id: r.get(0)?,
            student_no: r.get(1)?,
            display_name: format!("{}, {}", last, first),
            guardian_email: r.get(4)?,
            sort_order: r.get(5)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

/// Loads the stored week map only. The edit-mode default-to-PRESENT overlay
/// is a display transform (`attendance::display_status`) and never appears in
/// this map.
fn attendance_week_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    let date = parse_date(&get_required_str(params, "date")?)?;

    classroom_name(conn, &classroom_id)?;
    let students = active_roster(conn, &classroom_id)?;
    let week = week_dates(date);
    let start = week[0].format("%Y-%m-%d").to_string();
    let end = week[4].format("%Y-%m-%d").to_string();

    let mut by_student: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut stmt = conn
        .prepare(
            "SELECT a.student_id, a.date, a.status
             FROM attendance a
             JOIN students s ON s.id = a.student_id
             WHERE s.classroom_id = ? AND a.schedule_id IS NULL
               AND a.date >= ? AND a.date <= ?",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    let rows = stmt
        .query_map((&classroom_id, &start, &end), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    for (student_id, day, status) in rows {
        by_student.entry(student_id).or_default().insert(day, status);
    }

    let week_iso: Vec<String> = week
        .iter()
        .map(|d| d.format("%Y-%m-%d").to_string())
        .collect();

    let students_json: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "studentNo": s.student_no,
                "displayName": s.display_name,
                "sortOrder": s.sort_order
            })
        })
        .collect();

    let weekly_json: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            let marks = by_student.get(&s.id);
            let present = week_iso
                .iter()
                .filter(|d| {
                    marks
                        .and_then(|m| m.get(*d))
                        .map(|v| v == AttendanceStatus::Present.as_str())
                        .unwrap_or(false)
                })
                .count();
            json!({
                "studentId": s.id,
                "presentCount": present,
                "tier": weekly_tier(present).as_str()
            })
        })
        .collect();

    let map_json: serde_json::Value = by_student
        .into_iter()
        .map(|(sid, days)| (sid, json!(days)))
        .collect::<serde_json::Map<_, _>>()
        .into();

    Ok(json!({
        "weekDates": week_iso,
        "editableDate": date.format("%Y-%m-%d").to_string(),
        "students": students_json,
        "attendanceMap": map_json,
        "weekly": weekly_json
    }))
}

fn attendance_save(
    conn: &Connection,
    mailer: &Arc<dyn notify::Mailer>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    let date = parse_date(&get_required_str(params, "date")?)?;
    let date_iso = date.format("%Y-%m-%d").to_string();
    let Some(records) = params.get("records").and_then(|v| v.as_array()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing records[]".to_string(),
            details: None,
        });
    };

    let class_name = classroom_name(conn, &classroom_id)?;
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
        let status_raw = record
            .get("status")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr {
                code: "bad_params",
                message: format!("record at index {} missing status", i),
                details: None,
            })?;
        let status = AttendanceStatus::parse(status_raw).ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "status must be one of: PRESENT, ABSENT, LATE, LEAVE".to_string(),
            details: Some(json!({ "status": status_raw })),
        })?;

        // Records for students outside the active roster are dropped, not errors.
        let Some(student) = roster.get(student_id) else {
            continue;
        };

        let existing: Option<(String, String)> = tx
            .query_row(
                "SELECT id, status FROM attendance
                 WHERE student_id = ? AND date = ? AND schedule_id IS NULL",
                (student_id, &date_iso),
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(|e| HandlerErr {
                code: "db_query_failed",
                message: e.to_string(),
                details: None,
            })?;

        let prior = existing.as_ref().map(|(_, s)| s.as_str());
        if prior == Some(status.as_str()) {
            continue;
        }

        match existing {
            Some((row_id, _)) => {
                tx.execute(
                    "UPDATE attendance SET status = ? WHERE id = ?",
                    (status.as_str(), &row_id),
                )
                .map_err(|e| HandlerErr {
                    code: "db_update_failed",
                    message: e.to_string(),
                    details: Some(json!({ "table": "attendance" })),
                })?;
            }
            None => {
                let row_id = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO attendance(id, student_id, date, schedule_id, status)
                     VALUES(?, ?, ?, NULL, ?)",
                    (&row_id, student_id, &date_iso, status.as_str()),
                )
                .map_err(|e| HandlerErr {
                    code: "db_insert_failed",
                    message: e.to_string(),
                    details: Some(json!({ "table": "attendance" })),
                })?;
            }
        }
        saved += 1;

        let notify_worthy = matches!(
            status,
            AttendanceStatus::Absent | AttendanceStatus::Late
        );
        if notify_worthy {
            if let Some(guardian) = student.guardian_email.as_deref() {
                pending.push(Notification {
                    student_id: Some(student.id.clone()),
                    kind: "attendance",
                    recipient: guardian.to_string(),
                    subject: format!("Attendance update for {}", student.display_name),
                    body: format!(
                        "{} was marked {} on {} ({})",
                        student.display_name,
                        status.as_str(),
                        date_iso,
                        class_name
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

    // Fire-and-forget, after commit; never affects the save result.
    for notification in pending {
        notify::enqueue(conn, mailer, notification);
    }

    Ok(json!({ "saved": saved }))
}

fn handle_attendance_week_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_week_open(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_attendance_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let mailer = Arc::clone(&state.mailer);
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_save(conn, &mailer, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.weekOpen" => Some(handle_attendance_week_open(state, req)),
        "attendance.save" => Some(handle_attendance_save(state, req)),
        _ => None,
    }
}
