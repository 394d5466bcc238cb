use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_classrooms_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classrooms": [] }));
    };

    // Include active roster counts so the dashboard can render without a
    // second round trip. Correlated subquery avoids join double-counting.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.grade_level,
           c.homeroom_teacher_id,
           (SELECT COUNT(*) FROM students s
             WHERE s.classroom_id = c.id AND s.status = 'active') AS student_count
         FROM classrooms c
         ORDER BY c.grade_level, c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "gradeLevel": row.get::<_, i64>(2)?,
                "homeroomTeacherId": row.get::<_, Option<String>>(3)?,
                "studentCount": row.get::<_, i64>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classrooms) => ok(&req.id, json!({ "classrooms": classrooms })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classrooms_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let grade_level = match req.params.get("gradeLevel").and_then(|v| v.as_i64()) {
        Some(v) if v > 0 => v,
        _ => return err(&req.id, "bad_params", "missing/invalid gradeLevel", None),
    };
    let homeroom_teacher_id = req
        .params
        .get("homeroomTeacherId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    if let Some(tid) = homeroom_teacher_id.as_deref() {
        let exists: Option<i64> = match conn
            .query_row("SELECT 1 FROM teachers WHERE id = ?", [tid], |r| r.get(0))
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if exists.is_none() {
            return err(&req.id, "not_found", "teacher not found", None);
        }
    }

    let classroom_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classrooms(id, name, grade_level, homeroom_teacher_id) VALUES(?, ?, ?, ?)",
        (&classroom_id, &name, grade_level, &homeroom_teacher_id),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classrooms" })),
        );
    }

    ok(&req.id, json!({ "classroomId": classroom_id, "name": name }))
}

fn handle_classrooms_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let classroom_id = match req.params.get("classroomId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classroomId", None),
    };

    let existing = conn
        .query_row(
            "SELECT name, grade_level, homeroom_teacher_id FROM classrooms WHERE id = ?",
            [&classroom_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, Option<String>>(2)?,
                ))
            },
        )
        .optional();
    let (mut name, mut grade_level, mut homeroom_teacher_id) = match existing {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "classroom not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if let Some(v) = req.params.get("name").and_then(|v| v.as_str()) {
        if v.trim().is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        name = v.trim().to_string();
    }
    if let Some(v) = req.params.get("gradeLevel").and_then(|v| v.as_i64()) {
        if v <= 0 {
            return err(&req.id, "bad_params", "invalid gradeLevel", None);
        }
        grade_level = v;
    }
    if let Some(v) = req.params.get("homeroomTeacherId") {
        homeroom_teacher_id = if v.is_null() {
            None
        } else {
            match v.as_str() {
                Some(s) => Some(s.to_string()),
                None => {
                    return err(
                        &req.id,
                        "bad_params",
                        "homeroomTeacherId must be string or null",
                        None,
                    )
                }
            }
        };
        if let Some(tid) = homeroom_teacher_id.as_deref() {
            let exists: Option<i64> = match conn
                .query_row("SELECT 1 FROM teachers WHERE id = ?", [tid], |r| r.get(0))
                .optional()
            {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            if exists.is_none() {
                return err(&req.id, "not_found", "teacher not found", None);
            }
        }
    }

    if let Err(e) = conn.execute(
        "UPDATE classrooms SET name = ?, grade_level = ?, homeroom_teacher_id = ? WHERE id = ?",
        (&name, grade_level, &homeroom_teacher_id, &classroom_id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "classrooms" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_classrooms_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let classroom_id = match req.params.get("classroomId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classroomId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classrooms WHERE id = ?", [&classroom_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "classroom not found", None);
    }

    let roster_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM students WHERE classroom_id = ?",
        [&classroom_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if roster_count > 0 {
        return err(
            &req.id,
            "conflict",
            "classroom still has students; move or delete them first",
            Some(json!({ "studentCount": roster_count })),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for sql in [
        "DELETE FROM schedules WHERE classroom_id = ?",
        "DELETE FROM classrooms WHERE id = ?",
    ] {
        if let Err(e) = tx.execute(sql, [&classroom_id]) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classrooms.list" => Some(handle_classrooms_list(state, req)),
        "classrooms.create" => Some(handle_classrooms_create(state, req)),
        "classrooms.update" => Some(handle_classrooms_update(state, req)),
        "classrooms.delete" => Some(handle_classrooms_delete(state, req)),
        _ => None,
    }
}
