use crate::fees::{
    discount_in_range, fee_warnings, has_overflow, parse_amount, parse_breakdown,
    recompute_invoice_totals, warnings_json, FeeBreakdown, FeeLineItem, FeeWarning,
    InvoiceTotals,
};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::fee_types::default_breakdown;
use crate::ipc::handlers::students::ensure_student;
use crate::ipc::helpers::{date_or_today, now_rfc3339, opt_str, req_str, req_text, require_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;
use uuid::Uuid;

const STATUSES: [&str; 3] = ["draft", "issued", "paid"];

fn parse_status(raw: &str) -> Result<&'static str, HandlerErr> {
    STATUSES
        .iter()
        .copied()
        .find(|s| s.eq_ignore_ascii_case(raw.trim()))
        .ok_or_else(|| {
            HandlerErr::bad_params("status must be one of: draft, issued, paid")
                .with_details(json!({ "status": raw }))
        })
}

fn stored_decimal(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or(Decimal::ZERO)
}

/// Reads `params.lineItems`. Client-sent totals are ignored; every total is
/// derived from its breakdown. A missing breakdown falls back to `defaults`.
fn line_items_from_params(
    params: &serde_json::Value,
    defaults: Option<&FeeBreakdown>,
) -> Result<Vec<FeeLineItem>, HandlerErr> {
    let Some(raw) = params.get("lineItems").filter(|v| !v.is_null()) else {
        return Ok(Vec::new());
    };
    let Some(items) = raw.as_array() else {
        return Err(HandlerErr::bad_params("lineItems must be an array"));
    };

    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        if !item.is_object() {
            return Err(HandlerErr::bad_params(format!("lineItems[{}] must be an object", i)));
        }
        let id = item
            .get("id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let student_id = item
            .get("studentId")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string);
        let subject_name = item
            .get("subjectName")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        let breakdown = match item.get("feeBreakdown").filter(|v| !v.is_null()) {
            Some(b) => parse_breakdown(Some(b)),
            None => defaults.cloned().unwrap_or_default(),
        };
        out.push(FeeLineItem::derived(id, student_id, subject_name, breakdown));
    }
    Ok(out)
}

fn discount_from_params(params: &serde_json::Value) -> Option<Decimal> {
    params
        .get("discountPercentage")
        .filter(|v| !v.is_null())
        .map(|v| parse_amount(Some(v)))
}

fn require_discount_in_range(pct: Decimal) -> Result<(), HandlerErr> {
    if !discount_in_range(pct) {
        return Err(
            HandlerErr::bad_params("discountPercentage must be between 0 and 100")
                .with_details(json!({ "discountPercentage": pct })),
        );
    }
    Ok(())
}

fn totals_json(t: &InvoiceTotals) -> serde_json::Value {
    serde_json::to_value(t).unwrap_or_else(|_| json!({}))
}

fn load_line_items(conn: &Connection, invoice_id: &str) -> Result<Vec<FeeLineItem>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, student_id, subject_name, fee_breakdown_json, total_amount
             FROM invoice_line_items
             WHERE invoice_id = ?
             ORDER BY sort_order",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map([invoice_id], |r| {
        let breakdown_json: String = r.get(3)?;
        let total: String = r.get(4)?;
        let breakdown: serde_json::Value =
            serde_json::from_str(&breakdown_json).unwrap_or_else(|_| json!({}));
        Ok(FeeLineItem {
            id: r.get(0)?,
            student_id: r.get(1)?,
            subject_name: r.get(2)?,
            fee_breakdown: parse_breakdown(Some(&breakdown)),
            total_amount: stored_decimal(&total),
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn invoice_header(conn: &Connection, invoice_id: &str) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        "SELECT id, invoice_no, bill_to, issued_on, status,
                discount_percentage, subtotal, discount_amount, total,
                created_at, updated_at
         FROM invoices WHERE id = ?",
        [invoice_id],
        |r| {
            let totals = InvoiceTotals {
                discount_percentage: stored_decimal(&r.get::<_, String>(5)?),
                subtotal: stored_decimal(&r.get::<_, String>(6)?),
                discount_amount: stored_decimal(&r.get::<_, String>(7)?),
                total: stored_decimal(&r.get::<_, String>(8)?),
            };
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "invoiceNo": r.get::<_, i64>(1)?,
                "billTo": r.get::<_, String>(2)?,
                "issuedOn": r.get::<_, String>(3)?,
                "status": r.get::<_, String>(4)?,
                "totals": totals_json(&totals),
                "createdAt": r.get::<_, String>(9)?,
                "updatedAt": r.get::<_, Option<String>>(10)?,
            }))
        },
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::not_found("invoice not found"))
}

fn invoice_json(conn: &Connection, invoice_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let mut invoice = invoice_header(conn, invoice_id)?;
    let items = load_line_items(conn, invoice_id)?;
    invoice["lineItems"] = serde_json::to_value(&items).unwrap_or_else(|_| json!([]));
    Ok(invoice)
}

fn ensure_line_students(conn: &Connection, items: &[FeeLineItem]) -> Result<(), HandlerErr> {
    for li in items {
        if let Some(sid) = li.student_id.as_deref() {
            ensure_student(conn, sid)?;
        }
    }
    Ok(())
}

/// Saved invoices must hold exact figures; previews may show pinned ones.
fn require_representable(warnings: &[FeeWarning]) -> Result<(), HandlerErr> {
    if has_overflow(warnings) {
        return Err(
            HandlerErr::bad_params("amounts exceed the supported decimal range")
                .with_details(warnings_json(warnings)),
        );
    }
    Ok(())
}

/// Replaces all line items of an invoice and stores its totals. Runs on the
/// caller's transaction; every check happens before it is called.
fn replace_invoice_lines(
    tx: &Connection,
    invoice_id: &str,
    items: &[FeeLineItem],
    totals: &InvoiceTotals,
) -> Result<(), HandlerErr> {
    tx.execute(
        "DELETE FROM invoice_line_items WHERE invoice_id = ?",
        [invoice_id],
    )
    .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    for (i, li) in items.iter().enumerate() {
        let breakdown = serde_json::to_string(&li.fee_breakdown)
            .map_err(|e| HandlerErr::new("bad_params", e.to_string()))?;
        tx.execute(
            "INSERT INTO invoice_line_items(
                id, invoice_id, student_id, subject_name, fee_breakdown_json, total_amount, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                li.id,
                invoice_id,
                li.student_id,
                li.subject_name,
                breakdown,
                li.total_amount.normalize().to_string(),
                i as i64,
            ],
        )
        .map_err(|e| {
            HandlerErr::db("db_insert_failed", e)
                .with_details(json!({ "table": "invoice_line_items", "lineItemId": li.id }))
        })?;
    }
    tx.execute(
        "UPDATE invoices
         SET discount_percentage = ?, subtotal = ?, discount_amount = ?, total = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            totals.discount_percentage.to_string(),
            totals.subtotal.to_string(),
            totals.discount_amount.to_string(),
            totals.total.to_string(),
            now_rfc3339(),
            invoice_id,
        ],
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(())
}

fn invoices_preview(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let defaults = match state.db.as_ref() {
        Some(conn) => Some(default_breakdown(conn)?),
        None => None,
    };
    let items = line_items_from_params(&req.params, defaults.as_ref())?;
    let pct = discount_from_params(&req.params).unwrap_or(Decimal::ZERO);
    let totals = recompute_invoice_totals(&items, pct);
    let warnings = fee_warnings(&items, pct);
    Ok(json!({
        "lineItems": serde_json::to_value(&items).unwrap_or_else(|_| json!([])),
        "totals": totals_json(&totals),
        "warnings": warnings_json(&warnings),
    }))
}

fn invoices_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let bill_to = req_text(req, "billTo")?;
    let issued_on = date_or_today(req, "issuedOn")?;
    let pct = discount_from_params(&req.params).unwrap_or(Decimal::ZERO);
    require_discount_in_range(pct)?;

    let defaults = default_breakdown(conn)?;
    let items = line_items_from_params(&req.params, Some(&defaults))?;
    ensure_line_students(conn, &items)?;
    let totals = recompute_invoice_totals(&items, pct);
    let warnings = fee_warnings(&items, pct);
    require_representable(&warnings)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let next_no: i64 = tx
        .query_row(
            "SELECT COALESCE(MAX(invoice_no), 0) + 1 FROM invoices",
            [],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let invoice_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO invoices(
            id, invoice_no, bill_to, issued_on, status,
            discount_percentage, subtotal, discount_amount, total, created_at)
         VALUES(?, ?, ?, ?, 'draft', ?, ?, ?, ?, ?)",
        rusqlite::params![
            invoice_id,
            next_no,
            bill_to,
            issued_on,
            totals.discount_percentage.to_string(),
            totals.subtotal.to_string(),
            totals.discount_amount.to_string(),
            totals.total.to_string(),
            now_rfc3339(),
        ],
    )
    .map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "invoices" }))
    })?;
    replace_invoice_lines(&tx, &invoice_id, &items, &totals)?;
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tracing::info!(invoice = %invoice_id, invoice_no = next_no, total = %totals.total, "invoice created");

    Ok(json!({
        "invoiceId": invoice_id,
        "invoice": invoice_json(conn, &invoice_id)?,
        "warnings": warnings_json(&warnings),
    }))
}

fn invoices_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "invoices": [] }));
    };
    let status = opt_str(req, "status").map(parse_status).transpose()?;

    let mut stmt = conn
        .prepare(
            "SELECT id FROM invoices
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY invoice_no",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let ids = stmt
        .query_map([status], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let mut invoices = Vec::with_capacity(ids.len());
    for id in ids {
        let mut header = invoice_header(conn, &id)?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM invoice_line_items WHERE invoice_id = ?",
                [&id],
                |r| r.get(0),
            )
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        header["lineItemCount"] = json!(count);
        invoices.push(header);
    }
    Ok(json!({ "invoices": invoices }))
}

fn invoices_open(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let invoice_id = req_str(req, "invoiceId")?;
    Ok(json!({ "invoice": invoice_json(conn, invoice_id)? }))
}

fn invoices_update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let invoice_id = req_str(req, "invoiceId")?;

    let current: Option<(String, String)> = conn
        .query_row(
            "SELECT status, discount_percentage FROM invoices WHERE id = ?",
            [invoice_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((status, stored_pct)) = current else {
        return Err(HandlerErr::not_found("invoice not found"));
    };

    let edits_amounts = req.params.get("lineItems").is_some_and(|v| !v.is_null())
        || discount_from_params(&req.params).is_some();
    if status == "paid" && edits_amounts {
        return Err(HandlerErr::bad_params("paid invoices cannot change amounts")
            .with_details(json!({ "status": status })));
    }

    let pct = discount_from_params(&req.params).unwrap_or_else(|| stored_decimal(&stored_pct));
    require_discount_in_range(pct)?;

    let items = if req.params.get("lineItems").is_some_and(|v| !v.is_null()) {
        let defaults = default_breakdown(conn)?;
        line_items_from_params(&req.params, Some(&defaults))?
    } else {
        load_line_items(conn, invoice_id)?
    };
    ensure_line_students(conn, &items)?;
    // Authoritative recompute on every save, whatever the client previewed.
    let totals = recompute_invoice_totals(&items, pct);
    let warnings = fee_warnings(&items, pct);
    require_representable(&warnings)?;

    let bill_to = match req.params.get("billTo").filter(|v| !v.is_null()) {
        Some(v) => Some(
            v.as_str()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| HandlerErr::bad_params("billTo must be a non-empty string"))?,
        ),
        None => None,
    };
    let issued_on = if req.params.get("issuedOn").is_some_and(|v| !v.is_null()) {
        Some(date_or_today(req, "issuedOn")?)
    } else {
        None
    };
    let new_status = opt_str(req, "status").map(parse_status).transpose()?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    if let Some(bill_to) = bill_to {
        tx.execute(
            "UPDATE invoices SET bill_to = ? WHERE id = ?",
            (bill_to, invoice_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }
    if let Some(issued_on) = issued_on {
        tx.execute(
            "UPDATE invoices SET issued_on = ? WHERE id = ?",
            (issued_on, invoice_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }
    if let Some(new_status) = new_status {
        tx.execute(
            "UPDATE invoices SET status = ? WHERE id = ?",
            (new_status, invoice_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }
    replace_invoice_lines(&tx, invoice_id, &items, &totals)?;
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    Ok(json!({
        "invoice": invoice_json(conn, invoice_id)?,
        "warnings": warnings_json(&warnings),
    }))
}

fn invoices_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let invoice_id = req_str(req, "invoiceId")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute(
        "DELETE FROM invoice_line_items WHERE invoice_id = ?",
        [invoice_id],
    )
    .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    let changed = tx
        .execute("DELETE FROM invoices WHERE id = ?", [invoice_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("invoice not found"));
    }
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "invoices.preview" => Some(respond(&req.id, invoices_preview(state, req))),
        "invoices.create" => Some(respond(&req.id, invoices_create(state, req))),
        "invoices.list" => Some(respond(&req.id, invoices_list(state, req))),
        "invoices.open" => Some(respond(&req.id, invoices_open(state, req))),
        "invoices.update" => Some(respond(&req.id, invoices_update(state, req))),
        "invoices.delete" => Some(respond(&req.id, invoices_delete(state, req))),
        _ => None,
    }
}
