use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_schedules_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let classroom_id = match req.params.get("classroomId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classroomId", None),
    };

    let mut stmt = match conn.prepare(
        "SELECT sc.id, sc.subject_id, sub.code, sub.name, sc.teacher_id,
                sc.day_of_week, sc.start_time, sc.end_time
         FROM schedules sc
         JOIN subjects sub ON sub.id = sc.subject_id
         WHERE sc.classroom_id = ?
         ORDER BY sc.day_of_week, sc.start_time",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&classroom_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "subjectId": row.get::<_, String>(1)?,
                "subjectCode": row.get::<_, String>(2)?,
                "subjectName": row.get::<_, String>(3)?,
                "teacherId": row.get::<_, Option<String>>(4)?,
                "dayOfWeek": row.get::<_, i64>(5)?,
                "startTime": row.get::<_, String>(6)?,
                "endTime": row.get::<_, String>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(schedules) => ok(&req.id, json!({ "schedules": schedules })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_schedules_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let classroom_id = match req.params.get("classroomId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classroomId", None),
    };
    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let teacher_id = req
        .params
        .get("teacherId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let day_of_week = match req.params.get("dayOfWeek").and_then(|v| v.as_i64()) {
        Some(v) if (1..=7).contains(&v) => v,
        _ => return err(&req.id, "bad_params", "dayOfWeek must be 1-7", None),
    };
    let start_time = match req.params.get("startTime").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing startTime", None),
    };
    let end_time = match req.params.get("endTime").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing endTime", None),
    };

    for (table, id) in [("classrooms", &classroom_id), ("subjects", &subject_id)] {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
        let exists: Option<i64> = match conn.query_row(&sql, [id], |r| r.get(0)).optional() {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if exists.is_none() {
            return err(&req.id, "not_found", format!("{} row not found", table), None);
        }
    }

    let schedule_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO schedules(id, classroom_id, subject_id, teacher_id, day_of_week, start_time, end_time)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &schedule_id,
            &classroom_id,
            &subject_id,
            &teacher_id,
            day_of_week,
            &start_time,
            &end_time,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "schedules" })),
        );
    }

    ok(&req.id, json!({ "scheduleId": schedule_id }))
}

fn handle_schedules_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let schedule_id = match req.params.get("scheduleId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing scheduleId", None),
    };

    let affected = match conn.execute("DELETE FROM schedules WHERE id = ?", [&schedule_id]) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if affected == 0 {
        return err(&req.id, "not_found", "schedule not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedules.list" => Some(handle_schedules_list(state, req)),
        "schedules.create" => Some(handle_schedules_create(state, req)),
        "schedules.delete" => Some(handle_schedules_delete(state, req)),
        _ => None,
    }
}
