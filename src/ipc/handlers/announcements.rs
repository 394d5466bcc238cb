use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::notify::{self, Notification};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

const AUDIENCES: &[&str] = &["all", "guardians", "teachers"];

fn handle_announcements_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT id, title, body, audience, created_at FROM announcements ORDER BY created_at DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "title": row.get::<_, String>(1)?,
                "body": row.get::<_, String>(2)?,
                "audience": row.get::<_, String>(3)?,
                "createdAt": row.get::<_, String>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(announcements) => ok(&req.id, json!({ "announcements": announcements })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_announcements_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let mailer = Arc::clone(&state.mailer);
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let title = match req.params.get("title").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing title", None),
    };
    let body = match req.params.get("body").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing body", None),
    };
    let audience = req
        .params
        .get("audience")
        .and_then(|v| v.as_str())
        .unwrap_or("all")
        .to_string();
    if !AUDIENCES.contains(&audience.as_str()) {
        return err(
            &req.id,
            "bad_params",
            "audience must be one of: all, guardians, teachers",
            Some(json!({ "audience": audience })),
        );
    }

    let announcement_id = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO announcements(id, title, body, audience, created_at) VALUES(?, ?, ?, ?, ?)",
        (&announcement_id, &title, &body, &audience, &created_at),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "announcements" })),
        );
    }

    notify::enqueue(
        conn,
        &mailer,
        Notification {
            student_id: None,
            kind: "announcement",
            recipient: audience.clone(),
            subject: title.clone(),
            body,
        },
    );

    ok(&req.id, json!({ "announcementId": announcement_id }))
}

fn handle_announcements_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let announcement_id = match req.params.get("announcementId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing announcementId", None),
    };

    let affected = match conn.execute(
        "DELETE FROM announcements WHERE id = ?",
        [&announcement_id],
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if affected == 0 {
        return err(&req.id, "not_found", "announcement not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "announcements.list" => Some(handle_announcements_list(state, req)),
        "announcements.create" => Some(handle_announcements_create(state, req)),
        "announcements.delete" => Some(handle_announcements_delete(state, req)),
        _ => None,
    }
}
