use crate::config::AppConfig;
use crate::ipc::error::HandlerErr;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;

pub fn require_db<'a>(state: &'a AppState) -> Result<&'a Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn load_config(conn: &Connection) -> Result<AppConfig, HandlerErr> {
    AppConfig::load(conn).map_err(|e| HandlerErr::db("db_query_failed", e))
}

pub fn opt_str<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params.get(key).and_then(|v| v.as_str())
}

pub fn req_str<'a>(req: &'a Request, key: &str) -> Result<&'a str, HandlerErr> {
    opt_str(req, key).ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Trimmed, non-empty string param.
pub fn req_text(req: &Request, key: &str) -> Result<String, HandlerErr> {
    let s = req_str(req, key)?.trim().to_string();
    if s.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(s)
}

pub fn u32_from(v: &serde_json::Value, key: &str) -> Result<u32, HandlerErr> {
    v.as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a non-negative integer", key)))
}

pub fn req_u32(params: &serde_json::Value, key: &str) -> Result<u32, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => {
            Err(HandlerErr::bad_params(format!("missing {}", key)))
        }
        Some(v) => u32_from(v, key),
    }
}

/// `YYYY-MM-DD`, or today when absent.
pub fn date_or_today(req: &Request, key: &str) -> Result<String, HandlerErr> {
    match opt_str(req, key).map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(|d| d.format("%Y-%m-%d").to_string())
            .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key))),
        None => Ok(chrono::Local::now().date_naive().format("%Y-%m-%d").to_string()),
    }
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
