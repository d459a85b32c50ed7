use crate::calc::CalcError;
use crate::quran::RangeError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let message = message.into();
    tracing::warn!(request_id = id, code, "{}", message);
    let mut error = json!({
        "code": code,
        "message": message,
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Failure carried through a handler with `?` and turned into the error
/// envelope at the edge.
#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn db(code: &'static str, e: impl std::fmt::Display) -> Self {
        Self::new(code, e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<RangeError> for HandlerErr {
    fn from(e: RangeError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            details: Some(e.details()),
        }
    }
}

impl From<CalcError> for HandlerErr {
    fn from(e: CalcError) -> Self {
        // Calc codes are a closed set; anything unexpected reports as calc_failed.
        let code = match e.code.as_str() {
            "unknown_chapter" => "unknown_chapter",
            "verse_out_of_range" => "verse_out_of_range",
            "descending_range_disallowed" => "descending_range_disallowed",
            "bad_params" => "bad_params",
            _ => "calc_failed",
        };
        Self {
            code,
            message: e.message,
            details: e.details,
        }
    }
}

/// Collapses a handler body into a response envelope.
pub fn respond(id: &str, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}
