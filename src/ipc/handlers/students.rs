use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{now_rfc3339, opt_str, req_str, req_text, require_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn optional_text(req: &Request, key: &str) -> Option<String> {
    opt_str(req, key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn student_json(conn: &Connection, student_id: &str) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        "SELECT id, full_name, guardian_name, active, sort_order
         FROM students WHERE id = ?",
        [student_id],
        |r| {
            let active: i64 = r.get(3)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "fullName": r.get::<_, String>(1)?,
                "guardianName": r.get::<_, Option<String>>(2)?,
                "active": active != 0,
                "sortOrder": r.get::<_, i64>(4)?,
            }))
        },
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::not_found("student not found"))
}

pub fn ensure_student(conn: &Connection, student_id: &str) -> Result<(), HandlerErr> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if exists.is_none() {
        return Err(HandlerErr::not_found("student not found")
            .with_details(json!({ "studentId": student_id })));
    }
    Ok(())
}

fn students_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "students": [] }));
    };
    let include_inactive = req
        .params
        .get("includeInactive")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let mut stmt = conn
        .prepare(
            "SELECT
               s.id,
               s.full_name,
               s.guardian_name,
               s.active,
               s.sort_order,
               (SELECT COUNT(*) FROM tracking_entries t WHERE t.student_id = s.id) AS entry_count
             FROM students s
             WHERE s.active = 1 OR ?
             ORDER BY s.sort_order, s.full_name",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let students = stmt
        .query_map([include_inactive], |r| {
            let active: i64 = r.get(3)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "fullName": r.get::<_, String>(1)?,
                "guardianName": r.get::<_, Option<String>>(2)?,
                "active": active != 0,
                "sortOrder": r.get::<_, i64>(4)?,
                "trackingEntryCount": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "students": students }))
}

fn students_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let full_name = req_text(req, "fullName")?;
    let guardian_name = optional_text(req, "guardianName");
    let active = req
        .params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students",
            [],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, full_name, guardian_name, active, sort_order, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &full_name,
            &guardian_name,
            i64::from(active),
            next_sort,
            now_rfc3339(),
        ),
    )
    .map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "students" }))
    })?;

    Ok(json!({ "studentId": student_id, "student": student_json(conn, &student_id)? }))
}

fn students_update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = req_str(req, "studentId")?;
    ensure_student(conn, student_id)?;

    let patch = req
        .params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("missing patch"))?;

    if let Some(v) = patch.get("fullName") {
        let name = v
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HandlerErr::bad_params("patch.fullName must be a non-empty string"))?;
        conn.execute(
            "UPDATE students SET full_name = ? WHERE id = ?",
            (name, student_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }
    if let Some(v) = patch.get("guardianName") {
        let guardian = v
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        conn.execute(
            "UPDATE students SET guardian_name = ? WHERE id = ?",
            (guardian, student_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }
    if let Some(v) = patch.get("active") {
        let active = v
            .as_bool()
            .ok_or_else(|| HandlerErr::bad_params("patch.active must be boolean"))?;
        conn.execute(
            "UPDATE students SET active = ? WHERE id = ?",
            (i64::from(active), student_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }

    Ok(json!({ "student": student_json(conn, student_id)? }))
}

fn students_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = req_str(req, "studentId")?;
    ensure_student(conn, student_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    // No ON DELETE CASCADE; delete dependents first. Invoice lines keep their
    // amounts and lose the student link.
    tx.execute(
        "DELETE FROM tracking_entries WHERE student_id = ?",
        [student_id],
    )
    .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.execute(
        "UPDATE invoice_line_items SET student_id = NULL WHERE student_id = ?",
        [student_id],
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.execute("DELETE FROM students WHERE id = ?", [student_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(respond(&req.id, students_list(state, req))),
        "students.create" => Some(respond(&req.id, students_create(state, req))),
        "students.update" => Some(respond(&req.id, students_update(state, req))),
        "students.delete" => Some(respond(&req.id, students_delete(state, req))),
        _ => None,
    }
}
