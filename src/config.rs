use crate::db;
use crate::quran::RangePolicy;
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;

pub const RANGE_POLICY_KEY: &str = "quran.rangePolicy";
pub const CURRENCY_KEY: &str = "fees.currency";
const DEFAULT_CURRENCY: &str = "USD";

pub const LOG_ENV: &str = "MAKTABD_LOG";
pub const WORKSPACE_ENV: &str = "MAKTABD_WORKSPACE";

/// Workspace-level settings, read fresh for each request that needs them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub range_policy: RangePolicy,
    pub currency: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            range_policy: RangePolicy::default(),
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

impl AppConfig {
    /// Unknown or malformed values fall back to defaults.
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let mut cfg = Self::default();
        if let Some(v) = db::settings_get_json(conn, RANGE_POLICY_KEY)? {
            if let Some(p) = v.as_str().and_then(RangePolicy::parse) {
                cfg.range_policy = p;
            } else {
                tracing::warn!(value = %v, "ignoring unrecognised {}", RANGE_POLICY_KEY);
            }
        }
        if let Some(v) = db::settings_get_json(conn, CURRENCY_KEY)? {
            if let Some(s) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) {
                cfg.currency = s.to_ascii_uppercase();
            }
        }
        Ok(cfg)
    }

    pub fn store(&self, conn: &Connection) -> anyhow::Result<()> {
        db::settings_set_json(conn, RANGE_POLICY_KEY, &json!(self.range_policy.as_str()))?;
        db::settings_set_json(conn, CURRENCY_KEY, &json!(self.currency))?;
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "rangePolicy": self.range_policy.as_str(),
            "currency": self.currency,
        })
    }
}

/// Workspace to open at startup, if the environment names one.
pub fn workspace_from_env() -> Option<PathBuf> {
    std::env::var_os(WORKSPACE_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
