use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// At most one academic year is active system-wide. Both steps of the toggle
/// run in one transaction; a partial unique index on is_active backs this up
/// at the storage layer.
fn set_active_year(conn: &Connection, academic_year_id: &str) -> Result<(), rusqlite::Error> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE academic_years SET is_active = 0 WHERE is_active = 1",
        [],
    )?;
    tx.execute(
        "UPDATE academic_years SET is_active = 1 WHERE id = ?",
        [academic_year_id],
    )?;
    tx.commit()
}

fn handle_years_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT id, year, semester, is_active FROM academic_years ORDER BY year DESC, semester DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "year": row.get::<_, i64>(1)?,
                "semester": row.get::<_, i64>(2)?,
                "active": row.get::<_, i64>(3)? != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(years) => ok(&req.id, json!({ "academicYears": years })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_years_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let year = match req.params.get("year").and_then(|v| v.as_i64()) {
        Some(v) if v > 0 => v,
        _ => return err(&req.id, "bad_params", "missing/invalid year", None),
    };
    let semester = match req.params.get("semester").and_then(|v| v.as_i64()) {
        Some(v) if (1..=3).contains(&v) => v,
        _ => return err(&req.id, "bad_params", "semester must be 1-3", None),
    };
    let active = req
        .params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let year_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO academic_years(id, year, semester, is_active) VALUES(?, ?, ?, 0)",
        (&year_id, year, semester),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "academic_years" })),
        );
    }

    if active {
        if let Err(e) = set_active_year(conn, &year_id) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "academicYearId": year_id }))
}

fn handle_years_set_active(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let year_id = match req.params.get("academicYearId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing academicYearId", None),
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM academic_years WHERE id = ?",
            [&year_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "academic year not found", None);
    }

    if let Err(e) = set_active_year(conn, &year_id) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "academicYears.list" => Some(handle_years_list(state, req)),
        "academicYears.create" => Some(handle_years_create(state, req)),
        "academicYears.setActive" => Some(handle_years_set_active(state, req)),
        _ => None,
    }
}
