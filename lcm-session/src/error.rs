//! Hard failures raised by the session helpers.
//!
//! Soft conditions (response not observed, optional element absent) never
//! show up here; they are logged and returned as values.

use lcm_common::config::ConfigError;
use lcm_common::errors::{ErrorCode, ErrorKind, NormalizedError};

use crate::diagnostics::LoginFailureReport;
use crate::driver::DriverError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("form {selector} not visible at {url} within {timeout_ms}ms")]
    FormNotVisible {
        url: String,
        selector: String,
        timeout_ms: u64,
    },

    #[error("hydration marker {selector} not present within {timeout_ms}ms")]
    HydrationMarkerMissing { selector: String, timeout_ms: u64 },

    /// Read-back after fill disagrees with what was typed. Never retried.
    #[error("field {field} holds {actual} after fill, expected {expected}")]
    FieldMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("{0}")]
    AuthenticationFailed(Box<LoginFailureReport>),

    #[error("registration could not be submitted: {reason}")]
    RegistrationFailed {
        reason: String,
        diagnostics: Vec<String>,
    },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("api request failed: {0}")]
    Api(#[from] NormalizedError),
}

impl SessionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::FormNotVisible { .. } => ErrorCode::SessionFormNotVisible,
            Self::HydrationMarkerMissing { .. } => ErrorCode::SessionHydrationMarkerMissing,
            Self::FieldMismatch { .. } => ErrorCode::SessionFieldMismatch,
            Self::AuthenticationFailed(report) if report.recovery_attempted => {
                ErrorCode::SessionRecoveryFailed
            }
            Self::AuthenticationFailed(_) => ErrorCode::SessionAuthenticationFailed,
            Self::RegistrationFailed { .. } => ErrorCode::SessionRegistrationFailed,
            Self::Driver(err) => err.code(),
            Self::Config(err) => err.code(),
            Self::Api(err) => err.code(),
        }
    }

    /// Canonical `{kind, message}` form for callers outside the helper layer.
    pub fn normalize(&self) -> NormalizedError {
        match self {
            Self::Driver(err) => err.normalize(),
            Self::Api(err) => err.clone(),
            Self::Config(_) => NormalizedError::new(ErrorKind::Configuration, self.to_string()),
            Self::FieldMismatch { .. } => NormalizedError::new(ErrorKind::Integrity, self.to_string()),
            Self::AuthenticationFailed(_) => {
                NormalizedError::new(ErrorKind::Authentication, self.to_string())
            }
            Self::FormNotVisible { .. }
            | Self::HydrationMarkerMissing { .. }
            | Self::RegistrationFailed { .. } => {
                NormalizedError::new(ErrorKind::Transient, self.to_string())
            }
        }
    }

    pub fn failure_report(&self) -> Option<&LoginFailureReport> {
        match self {
            Self::AuthenticationFailed(report) => Some(report),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_kinds() {
        let err = SessionError::FieldMismatch {
            field: "email".into(),
            expected: "\"a@b.test\"".into(),
            actual: "\"\"".into(),
        };
        assert_eq!(err.code(), ErrorCode::SessionFieldMismatch);
        assert_eq!(err.normalize().kind, ErrorKind::Integrity);
        assert!(err.to_string().contains("email"));

        let err = SessionError::from(DriverError::ContextDestroyed);
        assert_eq!(err.code(), ErrorCode::DriverContextDestroyed);
        assert_eq!(err.normalize().kind, ErrorKind::Transient);
    }

    #[test]
    fn test_api_error_passes_through() {
        let api = NormalizedError::from_response(401, r#"{"detail":"Invalid email or password"}"#);
        let err = SessionError::from(api.clone());
        assert_eq!(err.normalize(), api);
        assert_eq!(err.code(), ErrorCode::ApiUnauthorized);
    }
}
