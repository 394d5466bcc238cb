use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::notify::{self, Notification};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn handle_fee_types_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, amount, academic_year_id FROM fee_types ORDER BY name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "amount": row.get::<_, f64>(2)?,
                "academicYearId": row.get::<_, Option<String>>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(fee_types) => ok(&req.id, json!({ "feeTypes": fee_types })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_fee_types_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing name", None),
    };
    let amount = match req.params.get("amount").and_then(|v| v.as_f64()) {
        Some(v) if v >= 0.0 => v,
        _ => return err(&req.id, "bad_params", "missing/invalid amount", None),
    };
    let academic_year_id = req
        .params
        .get("academicYearId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    if let Some(yid) = academic_year_id.as_deref() {
        let exists: Option<i64> = match conn
            .query_row("SELECT 1 FROM academic_years WHERE id = ?", [yid], |r| {
                r.get(0)
            })
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if exists.is_none() {
            return err(&req.id, "not_found", "academic year not found", None);
        }
    }

    let fee_type_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO fee_types(id, name, amount, academic_year_id) VALUES(?, ?, ?, ?)",
        (&fee_type_id, &name, amount, &academic_year_id),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "fee_types" })),
        );
    }

    ok(&req.id, json!({ "feeTypeId": fee_type_id }))
}

fn handle_fee_types_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let fee_type_id = match req.params.get("feeTypeId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing feeTypeId", None),
    };

    let paid: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM payments WHERE fee_type_id = ?",
        [&fee_type_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if paid > 0 {
        return err(
            &req.id,
            "conflict",
            "fee type has recorded payments and cannot be deleted",
            Some(json!({ "paymentCount": paid })),
        );
    }

    let affected = match conn.execute("DELETE FROM fee_types WHERE id = ?", [&fee_type_id]) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if affected == 0 {
        return err(&req.id, "not_found", "fee type not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_payments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = req.params.get("studentId").and_then(|v| v.as_str());

    let sql = match student_id {
        Some(_) => {
            "SELECT p.id, p.student_id, p.fee_type_id, ft.name, p.amount, p.method, p.paid_date
             FROM payments p JOIN fee_types ft ON ft.id = p.fee_type_id
             WHERE p.student_id = ? ORDER BY p.paid_date DESC"
        }
        None => {
            "SELECT p.id, p.student_id, p.fee_type_id, ft.name, p.amount, p.method, p.paid_date
             FROM payments p JOIN fee_types ft ON ft.id = p.fee_type_id
             ORDER BY p.paid_date DESC"
        }
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": row.get::<_, String>(0)?,
            "studentId": row.get::<_, String>(1)?,
            "feeTypeId": row.get::<_, String>(2)?,
            "feeTypeName": row.get::<_, String>(3)?,
            "amount": row.get::<_, f64>(4)?,
            "method": row.get::<_, String>(5)?,
            "paidDate": row.get::<_, String>(6)?
        }))
    };
    let rows = match student_id {
        Some(sid) => stmt
            .query_map([sid], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    };

    match rows {
        Ok(payments) => ok(&req.id, json!({ "payments": payments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_payments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let mailer = Arc::clone(&state.mailer);
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let fee_type_id = match req.params.get("feeTypeId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing feeTypeId", None),
    };
    let amount = match req.params.get("amount").and_then(|v| v.as_f64()) {
        Some(v) if v > 0.0 => v,
        _ => return err(&req.id, "bad_params", "missing/invalid amount", None),
    };
    let method = match req.params.get("method").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing method", None),
    };

    let student = conn
        .query_row(
            "SELECT last_name, first_name, guardian_email FROM students WHERE id = ?",
            [&student_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<String>>(2)?,
                ))
            },
        )
        .optional();
    let (last_name, first_name, guardian_email) = match student {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let fee_name: Option<String> = match conn
        .query_row(
            "SELECT name FROM fee_types WHERE id = ?",
            [&fee_type_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(fee_name) = fee_name else {
        return err(&req.id, "not_found", "fee type not found", None);
    };

    let payment_id = Uuid::new_v4().to_string();
    let paid_date = Utc::now().date_naive().format("%Y-%m-%d").to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO payments(id, student_id, fee_type_id, amount, method, paid_date)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &payment_id,
            &student_id,
            &fee_type_id,
            amount,
            &method,
            &paid_date,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "payments" })),
        );
    }

    if let Some(guardian) = guardian_email.as_deref() {
        let display_name = format!("{}, {}", last_name, first_name);
        notify::enqueue(
            conn,
            &mailer,
            Notification {
                student_id: Some(student_id.clone()),
                kind: "payment",
                recipient: guardian.to_string(),
                subject: format!("Payment received for {}", display_name),
                body: format!(
                    "{} paid {:.2} for {} via {} on {}",
                    display_name, amount, fee_name, method, paid_date
                ),
            },
        );
    }

    ok(&req.id, json!({ "paymentId": payment_id, "paidDate": paid_date }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "feeTypes.list" => Some(handle_fee_types_list(state, req)),
        "feeTypes.create" => Some(handle_fee_types_create(state, req)),
        "feeTypes.delete" => Some(handle_fee_types_delete(state, req)),
        "payments.list" => Some(handle_payments_list(state, req)),
        "payments.create" => Some(handle_payments_create(state, req)),
        _ => None,
    }
}
