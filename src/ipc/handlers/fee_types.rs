use crate::fees::{parse_amount, FeeBreakdown};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{opt_str, req_str, req_text, require_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;
use uuid::Uuid;

pub struct FeeTypeRow {
    pub id: String,
    pub name: String,
    pub default_amount: Decimal,
    pub sort_order: i64,
}

pub fn load_fee_types(conn: &Connection) -> Result<Vec<FeeTypeRow>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name, default_amount, sort_order FROM fee_types ORDER BY sort_order, name")
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map([], |r| {
        let amount: String = r.get(2)?;
        Ok(FeeTypeRow {
            id: r.get(0)?,
            name: r.get(1)?,
            default_amount: Decimal::from_str(&amount).unwrap_or(Decimal::ZERO),
            sort_order: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

/// Breakdown pre-filled from configured fee types, used for new line items
/// that arrive without one.
pub fn default_breakdown(conn: &Connection) -> Result<FeeBreakdown, HandlerErr> {
    Ok(load_fee_types(conn)?
        .into_iter()
        .map(|ft| (ft.name, ft.default_amount))
        .collect())
}

fn fee_types_list(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "feeTypes": [] }));
    };
    let fee_types: Vec<serde_json::Value> = load_fee_types(conn)?
        .into_iter()
        .map(|ft| {
            json!({
                "id": ft.id,
                "name": ft.name,
                "defaultAmount": ft.default_amount.normalize(),
                "sortOrder": ft.sort_order,
            })
        })
        .collect();
    Ok(json!({ "feeTypes": fee_types }))
}

fn fee_types_upsert(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let name = req_text(req, "name")?;
    let default_amount = parse_amount(req.params.get("defaultAmount"));
    if default_amount.is_sign_negative() && !default_amount.is_zero() {
        return Err(HandlerErr::bad_params("defaultAmount must not be negative")
            .with_details(json!({ "defaultAmount": default_amount })));
    }

    let existing: Option<String> = match opt_str(req, "feeTypeId") {
        Some(id) => Some(
            conn.query_row("SELECT id FROM fee_types WHERE id = ?", [id], |r| r.get(0))
                .optional()
                .map_err(|e| HandlerErr::db("db_query_failed", e))?
                .ok_or_else(|| HandlerErr::not_found("fee type not found"))?,
        ),
        None => conn
            .query_row(
                "SELECT id FROM fee_types WHERE name = ? COLLATE NOCASE",
                [&name],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| HandlerErr::db("db_query_failed", e))?,
    };

    let fee_type_id = match existing {
        Some(id) => {
            conn.execute(
                "UPDATE fee_types SET name = ?, default_amount = ? WHERE id = ?",
                (&name, default_amount.to_string(), &id),
            )
            .map_err(|e| HandlerErr::db("db_update_failed", e))?;
            id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            let next_sort: i64 = conn
                .query_row(
                    "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM fee_types",
                    [],
                    |r| r.get(0),
                )
                .map_err(|e| HandlerErr::db("db_query_failed", e))?;
            conn.execute(
                "INSERT INTO fee_types(id, name, default_amount, sort_order) VALUES(?, ?, ?, ?)",
                (&id, &name, default_amount.to_string(), next_sort),
            )
            .map_err(|e| {
                HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "fee_types" }))
            })?;
            id
        }
    };

    Ok(json!({
        "feeTypeId": fee_type_id,
        "name": name,
        "defaultAmount": default_amount.normalize(),
    }))
}

fn fee_types_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let fee_type_id = req_str(req, "feeTypeId")?;
    let changed = conn
        .execute("DELETE FROM fee_types WHERE id = ?", [fee_type_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("fee type not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.types.list" => Some(respond(&req.id, fee_types_list(state))),
        "fees.types.upsert" => Some(respond(&req.id, fee_types_upsert(state, req))),
        "fees.types.delete" => Some(respond(&req.id, fee_types_delete(state, req))),
        _ => None,
    }
}
