use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{load_config, require_db};
use crate::ipc::types::{AppState, Request};
use crate::quran::RangePolicy;

fn settings_get(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    Ok(load_config(conn)?.to_json())
}

fn settings_update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let mut cfg = load_config(conn)?;

    if let Some(v) = req.params.get("rangePolicy").filter(|v| !v.is_null()) {
        let policy = v.as_str().and_then(RangePolicy::parse).ok_or_else(|| {
            HandlerErr::bad_params("rangePolicy must be one of: bidirectional, ascendingOnly")
                .with_details(v.clone())
        })?;
        cfg.range_policy = policy;
    }
    if let Some(v) = req.params.get("currency").filter(|v| !v.is_null()) {
        let code = v
            .as_str()
            .map(str::trim)
            .filter(|s| s.len() == 3 && s.chars().all(|c| c.is_ascii_alphabetic()))
            .ok_or_else(|| HandlerErr::bad_params("currency must be a 3-letter code"))?;
        cfg.currency = code.to_ascii_uppercase();
    }

    cfg.store(conn)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tracing::info!(policy = cfg.range_policy.as_str(), currency = %cfg.currency, "settings updated");
    Ok(cfg.to_json())
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(respond(&req.id, settings_get(state))),
        "settings.update" => Some(respond(&req.id, settings_update(state, req))),
        _ => None,
    }
}
