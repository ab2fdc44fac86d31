//! Upstream error body normalization
//!
//! Upstream services report failures in a few shapes:
//!
//! - `{"detail": "Not found"}`
//! - `{"detail": [{"loc": ["body", "name"], "msg": "field required"}]}`
//! - `{"message": "Quota exceeded", "error_code": "QUOTA"}`
//! - plain text or an empty body
//!
//! [`NormalizedError::from_response`] collapses all of them into one shape.
//! Normalization never fails; anything unrecognised gets the generic message.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;

/// One error shape for every failed upstream exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{message}")]
pub struct NormalizedError {
    /// Human-readable message
    pub message: String,
    /// Status of the response, when there was one
    pub http_status: Option<u16>,
    /// Machine-readable code for programmatic branching
    pub error_code: Option<String>,
    /// Raw response body, kept for diagnostics
    pub body: String,
}

impl NormalizedError {
    /// Error with a message and nothing else
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), http_status: None, error_code: None, body: String::new() }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    /// Normalize a failed response from its status and raw body
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        let raw = String::from_utf8_lossy(body).into_owned();
        let parsed = serde_json::from_slice::<ErrorBody>(body).ok();

        let message = parsed
            .as_ref()
            .and_then(ErrorBody::message)
            .unwrap_or_else(|| format!("Request failed with status {status}"));
        let error_code = parsed.as_ref().and_then(ErrorBody::error_code);

        Self { message, http_status: Some(status), error_code, body: raw }
    }
}

/// Known error body fields; all optional
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<Field>,
    #[serde(default)]
    message: Option<Field>,
    #[serde(default)]
    error_code: Option<Field>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Field {
    Text(String),
    Number(Number),
    Entries(Vec<DetailEntry>),
    Other(Value),
}

/// Validation entry as emitted by FastAPI-style backends
#[derive(Debug, Deserialize)]
struct DetailEntry {
    #[serde(default)]
    loc: Vec<Value>,
    #[serde(default)]
    msg: Option<String>,
}

impl ErrorBody {
    /// `detail` wins over `message`; blank values are skipped
    fn message(&self) -> Option<String> {
        self.detail
            .as_ref()
            .and_then(Field::render)
            .or_else(|| self.message.as_ref().and_then(Field::render))
    }

    fn error_code(&self) -> Option<String> {
        match self.error_code.as_ref()? {
            Field::Text(code) if !code.trim().is_empty() => Some(code.clone()),
            Field::Number(code) => Some(code.to_string()),
            _ => None,
        }
    }
}

impl Field {
    fn render(&self) -> Option<String> {
        let rendered = match self {
            Self::Text(text) => text.trim().to_string(),
            Self::Number(number) => number.to_string(),
            Self::Entries(entries) => {
                entries.iter().filter_map(DetailEntry::render).collect::<Vec<_>>().join("; ")
            }
            Self::Other(Value::Null) => String::new(),
            Self::Other(value) => value.to_string(),
        };

        (!rendered.is_empty()).then_some(rendered)
    }
}

impl DetailEntry {
    fn render(&self) -> Option<String> {
        let msg = self.msg.as_deref()?.trim();
        if msg.is_empty() {
            return None;
        }

        let loc = self
            .loc
            .iter()
            .map(|part| match part {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(".");

        if loc.is_empty() {
            Some(msg.to_string())
        } else {
            Some(format!("{loc}: {msg}"))
        }
    }
}
