use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const RECENT_DEFAULT_LIMIT: i64 = 50;
const RECENT_MAX_LIMIT: i64 = 500;

fn handle_notifications_recent(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = req.params.get("studentId").and_then(|v| v.as_str());
    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(RECENT_DEFAULT_LIMIT)
        .clamp(1, RECENT_MAX_LIMIT);

    let sql = match student_id {
        Some(_) => {
            "SELECT id, student_id, kind, recipient, subject, body, created_at
             FROM notification_log WHERE student_id = ?
             ORDER BY created_at DESC LIMIT ?"
        }
        None => {
            "SELECT id, student_id, kind, recipient, subject, body, created_at
             FROM notification_log
             ORDER BY created_at DESC LIMIT ?"
        }
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": row.get::<_, String>(0)?,
            "studentId": row.get::<_, Option<String>>(1)?,
            "kind": row.get::<_, String>(2)?,
            "recipient": row.get::<_, String>(3)?,
            "subject": row.get::<_, String>(4)?,
            "body": row.get::<_, String>(5)?,
            "createdAt": row.get::<_, String>(6)?
        }))
    };
    let rows = match student_id {
        Some(sid) => stmt
            .query_map((sid, limit), map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([limit], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    };

    match rows {
        Ok(notifications) => ok(&req.id, json!({ "notifications": notifications })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notifications.recent" => Some(handle_notifications_recent(state, req)),
        _ => None,
    }
}
