use crate::ipc::error::err;
use crate::register::RegisterError;
use crate::store::StoreError;
use serde_json::json;

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

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        HandlerErr::new("db_query_failed", e.to_string())
    }
}

impl From<StoreError> for HandlerErr {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict { constraint } => HandlerErr::new("conflict", "identifier already taken")
                .with_details(json!({ "constraint": constraint })),
            StoreError::Unavailable(inner) => HandlerErr::new("store_unavailable", "save failed, try again")
                .with_details(json!({ "cause": inner.to_string() })),
        }
    }
}

impl From<RegisterError> for HandlerErr {
    fn from(e: RegisterError) -> Self {
        match e {
            RegisterError::ClassNotFound(_) => HandlerErr::new("not_found", "class not found"),
            RegisterError::ConflictAfterRetry { constraint } => {
                HandlerErr::new("write_conflict", "save failed, try again")
                    .with_details(json!({ "constraint": constraint }))
            }
            RegisterError::Store(inner) => inner.into(),
        }
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let v = params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))?;
    if v.is_empty() {
        return Err(HandlerErr::new(
            "bad_params",
            format!("{} must not be empty", key),
        ));
    }
    Ok(v)
}

/// Trimmed string param; blank counts as absent.
pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
