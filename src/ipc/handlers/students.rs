use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const STUDENT_STATUSES: &[&str] = &["active", "inactive", "transferred", "graduated"];

fn valid_status(s: &str) -> bool {
    STUDENT_STATUSES.contains(&s)
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let classroom_id = req.params.get("classroomId").and_then(|v| v.as_str());
    let search = req.params.get("search").and_then(|v| v.as_str());

    let mut sql = String::from(
        "SELECT id, classroom_id, student_no, first_name, last_name, guardian_email, status, sort_order
         FROM students",
    );
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    if let Some(cid) = classroom_id {
        clauses.push("classroom_id = ?");
        binds.push(Value::Text(cid.to_string()));
    }
    if let Some(q) = search {
        clauses.push("(first_name LIKE ? OR last_name LIKE ? OR student_no LIKE ?)");
        let like = format!("%{}%", q);
        binds.push(Value::Text(like.clone()));
        binds.push(Value::Text(like.clone()));
        binds.push(Value::Text(like));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY sort_order, last_name, first_name");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(binds), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "classroomId": row.get::<_, Option<String>>(1)?,
                "studentNo": row.get::<_, String>(2)?,
                "firstName": row.get::<_, String>(3)?,
                "lastName": row.get::<_, String>(4)?,
                "guardianEmail": row.get::<_, Option<String>>(5)?,
                "status": row.get::<_, String>(6)?,
                "sortOrder": row.get::<_, i64>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_no = match req.params.get("studentNo").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing studentNo", None),
    };
    let first_name = match req.params.get("firstName").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing firstName", None),
    };
    let last_name = match req.params.get("lastName").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing lastName", None),
    };
    let classroom_id = req
        .params
        .get("classroomId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let guardian_email = req
        .params
        .get("guardianEmail")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let status = req
        .params
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or("active")
        .to_string();
    if !valid_status(&status) {
        return err(
            &req.id,
            "bad_params",
            "status must be one of: active, inactive, transferred, graduated",
            Some(json!({ "status": status })),
        );
    }

    if let Some(cid) = classroom_id.as_deref() {
        let exists: Option<i64> = match conn
            .query_row("SELECT 1 FROM classrooms WHERE id = ?", [cid], |r| r.get(0))
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if exists.is_none() {
            return err(&req.id, "not_found", "classroom not found", None);
        }
    }

    // Append to the end of the classroom roster.
    let next_sort: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE classroom_id IS ?",
        [&classroom_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, classroom_id, student_no, first_name, last_name, guardian_email, status, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &classroom_id,
            &student_no,
            &first_name,
            &last_name,
            &guardian_email,
            &status,
            next_sort,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let existing = conn
        .query_row(
            "SELECT classroom_id, student_no, first_name, last_name, guardian_email, status
             FROM students WHERE id = ?",
            [&student_id],
            |r| {
                Ok((
                    r.get::<_, Option<String>>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, Option<String>>(4)?,
                    r.get::<_, String>(5)?,
                ))
            },
        )
        .optional();
    let (mut classroom_id, mut student_no, mut first_name, mut last_name, mut guardian_email, mut status) =
        match existing {
            Ok(Some(v)) => v,
            Ok(None) => return err(&req.id, "not_found", "student not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };

    if let Some(v) = req.params.get("classroomId") {
        classroom_id = if v.is_null() {
            None
        } else {
            match v.as_str() {
                Some(s) => Some(s.to_string()),
                None => return err(&req.id, "bad_params", "classroomId must be string or null", None),
            }
        };
        if let Some(cid) = classroom_id.as_deref() {
            let exists: Option<i64> = match conn
                .query_row("SELECT 1 FROM classrooms WHERE id = ?", [cid], |r| r.get(0))
                .optional()
            {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            if exists.is_none() {
                return err(&req.id, "not_found", "classroom not found", None);
            }
        }
    }
    if let Some(v) = req.params.get("studentNo").and_then(|v| v.as_str()) {
        if v.trim().is_empty() {
            return err(&req.id, "bad_params", "studentNo must not be empty", None);
        }
        student_no = v.trim().to_string();
    }
    if let Some(v) = req.params.get("firstName").and_then(|v| v.as_str()) {
        first_name = v.trim().to_string();
    }
    if let Some(v) = req.params.get("lastName").and_then(|v| v.as_str()) {
        last_name = v.trim().to_string();
    }
    if let Some(v) = req.params.get("guardianEmail") {
        guardian_email = if v.is_null() {
            None
        } else {
            v.as_str().map(|s| s.to_string())
        };
    }
    if let Some(v) = req.params.get("status").and_then(|v| v.as_str()) {
        if !valid_status(v) {
            return err(
                &req.id,
                "bad_params",
                "status must be one of: active, inactive, transferred, graduated",
                Some(json!({ "status": v })),
            );
        }
        status = v.to_string();
    }

    if let Err(e) = conn.execute(
        "UPDATE students SET classroom_id = ?, student_no = ?, first_name = ?, last_name = ?,
                guardian_email = ?, status = ?
         WHERE id = ?",
        (
            &classroom_id,
            &student_no,
            &first_name,
            &last_name,
            &guardian_email,
            &status,
            &student_id,
        ),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicit delete in dependency order (no ON DELETE CASCADE).
    for sql in [
        "DELETE FROM payments WHERE student_id = ?",
        "DELETE FROM attendance WHERE student_id = ?",
        "DELETE FROM grade_records WHERE student_id = ?",
        "DELETE FROM students WHERE id = ?",
    ] {
        if let Err(e) = tx.execute(sql, [&student_id]) {
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
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
