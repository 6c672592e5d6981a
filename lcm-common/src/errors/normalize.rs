//! Canonical error shape for anything crossing the helper boundary.
//!
//! Backend error bodies come in several shapes (`{"detail": "..."}`,
//! `{"detail": [{"loc": [...], "msg": "..."}]}`, `{"message": "..."}`,
//! `{"error": {"message": "..."}}`, plain text). Callers only ever see
//! [`NormalizedError`].

use super::catalog::ErrorCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Longest raw body excerpt kept when no structured message is found.
const MAX_BODY_EXCERPT: usize = 200;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid configuration.
    Configuration,
    /// Timing or availability problem expected to clear on retry.
    Transient,
    /// Automation and application disagree about state.
    Integrity,
    /// Credentials or session rejected.
    Authentication,
    /// Request payload rejected.
    Validation,
    /// Backend 5xx.
    Server,
    /// No HTTP response at all.
    Transport,
    /// Anything else.
    Unknown,
}

impl ErrorKind {
    /// Classify an HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Authentication,
            400 | 409 | 422 => Self::Validation,
            408 | 425 | 429 => Self::Transient,
            500..=599 => Self::Server,
            _ => Self::Unknown,
        }
    }

    /// Catalog code used when this kind surfaces from the API layer.
    pub fn api_code(&self) -> ErrorCode {
        match self {
            Self::Authentication => ErrorCode::ApiUnauthorized,
            Self::Validation => ErrorCode::ApiValidation,
            Self::Server => ErrorCode::ApiServerError,
            Self::Transport | Self::Transient => ErrorCode::ApiTransport,
            Self::Configuration => ErrorCode::ConfigInvalidValue,
            Self::Integrity | Self::Unknown => ErrorCode::ApiUnexpectedBody,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Configuration => "configuration",
            Self::Transient => "transient",
            Self::Integrity => "integrity",
            Self::Authentication => "authentication",
            Self::Validation => "validation",
            Self::Server => "server",
            Self::Transport => "transport",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// `{kind, message}` plus the HTTP status when there was one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct NormalizedError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl NormalizedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    /// Normalize an HTTP error response from its status and raw body.
    pub fn from_response(status: u16, body: &str) -> Self {
        let kind = ErrorKind::from_status(status);
        let message = match serde_json::from_str::<Value>(body) {
            Ok(json) => extract_message(&json),
            Err(_) => None,
        }
        .or_else(|| excerpt(body))
        .unwrap_or_else(|| format!("HTTP {status}"));

        Self {
            kind,
            message,
            status: Some(status),
        }
    }

    /// Normalize a request that never got a response.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    /// Catalog code for this error.
    pub fn code(&self) -> ErrorCode {
        self.kind.api_code()
    }
}

/// Pull a human-readable message out of a JSON error body.
pub fn extract_message(json: &Value) -> Option<String> {
    match json {
        Value::String(s) => non_empty(s),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(extract_item).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("; "))
            }
        }
        Value::Object(map) => ["detail", "message", "error", "error_description", "msg"]
            .iter()
            .find_map(|key| map.get(*key).and_then(extract_message)),
        _ => None,
    }
}

fn extract_item(item: &Value) -> Option<String> {
    let Value::Object(map) = item else {
        return extract_message(item);
    };
    let msg = map
        .get("msg")
        .or_else(|| map.get("message"))
        .and_then(extract_message)?;
    let loc = map.get("loc").and_then(|loc| loc.as_array()).map(|parts| {
        parts
            .iter()
            .filter_map(|p| match p {
                Value::String(s) if s != "body" => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(".")
    });
    match loc {
        Some(loc) if !loc.is_empty() => Some(format!("{loc}: {msg}")),
        _ => Some(msg),
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn excerpt(body: &str) -> Option<String> {
    let trimmed = non_empty(body)?;
    if trimmed.chars().count() <= MAX_BODY_EXCERPT {
        return Some(trimmed);
    }
    let cut: String = trimmed.chars().take(MAX_BODY_EXCERPT).collect();
    Some(format!("{cut}..."))
}
