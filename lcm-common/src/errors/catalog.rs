//! Error catalog for the end-to-end session helpers.
//!
//! Every hard failure the helpers raise maps to a stable code in the
//! `LCM-Exxx` format, with a message template and remediation steps, so a
//! failing test run points straight at the fix.
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                               |
//! |------------|-------------|-------------------------------------------|
//! | E001-E099  | Config      | Environment and credential configuration  |
//! | E100-E199  | Driver      | Browser automation driver failures        |
//! | E200-E299  | Session     | Login flow, hydration and redirect issues |
//! | E300-E399  | Api         | Backend HTTP API responses                |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering all helper failure scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Config Errors (E001-E099)
    // =========================================================================
    /// A required environment variable is absent
    ConfigMissingVar,
    /// An environment variable has an invalid value
    ConfigInvalidValue,
    /// A base URL is not an absolute http(s) URL
    ConfigInvalidUrl,
    /// Credential pool emails and passwords differ in length
    ConfigCredentialPoolMismatch,

    // =========================================================================
    // Driver Errors (E100-E199)
    // =========================================================================
    /// Navigation did not reach DOMContentLoaded
    DriverNavigationFailed,
    /// A selector matched no element
    DriverElementNotFound,
    /// The page's execution context was destroyed mid-operation
    DriverContextDestroyed,
    /// In-page script evaluation failed
    DriverScriptFailed,
    /// Browser protocol (CDP) error
    DriverProtocol,
    /// Local I/O failure (screenshots, artifacts)
    DriverIo,

    // =========================================================================
    // Session Errors (E200-E299)
    // =========================================================================
    /// The login or registration form never became visible
    SessionFormNotVisible,
    /// Strict hydration mode is on and no hydration marker appeared
    SessionHydrationMarkerMissing,
    /// A filled field read back a different value
    SessionFieldMismatch,
    /// Login stalled with no evidence of a backend session
    SessionAuthenticationFailed,
    /// Evidence showed a session but forced navigation did not land
    SessionRecoveryFailed,
    /// Registration submit failed or was never enabled
    SessionRegistrationFailed,

    // =========================================================================
    // Api Errors (E300-E399)
    // =========================================================================
    /// Backend rejected the credentials or token
    ApiUnauthorized,
    /// Backend rejected the request payload
    ApiValidation,
    /// Backend returned a 5xx status
    ApiServerError,
    /// Request never produced an HTTP response
    ApiTransport,
    /// Response body did not have the expected shape
    ApiUnexpectedBody,
}

impl ErrorCode {
    /// All known codes, in catalog order.
    pub const fn all() -> &'static [ErrorCode] {
        &[
            Self::ConfigMissingVar,
            Self::ConfigInvalidValue,
            Self::ConfigInvalidUrl,
            Self::ConfigCredentialPoolMismatch,
            Self::DriverNavigationFailed,
            Self::DriverElementNotFound,
            Self::DriverContextDestroyed,
            Self::DriverScriptFailed,
            Self::DriverProtocol,
            Self::DriverIo,
            Self::SessionFormNotVisible,
            Self::SessionHydrationMarkerMissing,
            Self::SessionFieldMismatch,
            Self::SessionAuthenticationFailed,
            Self::SessionRecoveryFailed,
            Self::SessionRegistrationFailed,
            Self::ApiUnauthorized,
            Self::ApiValidation,
            Self::ApiServerError,
            Self::ApiTransport,
            Self::ApiUnexpectedBody,
        ]
    }

    /// Returns the numeric part of the code.
    #[must_use]
    pub const fn code_number(&self) -> u16 {
        match self {
            Self::ConfigMissingVar => 1,
            Self::ConfigInvalidValue => 2,
            Self::ConfigInvalidUrl => 3,
            Self::ConfigCredentialPoolMismatch => 4,
            Self::DriverNavigationFailed => 100,
            Self::DriverElementNotFound => 101,
            Self::DriverContextDestroyed => 102,
            Self::DriverScriptFailed => 103,
            Self::DriverProtocol => 104,
            Self::DriverIo => 105,
            Self::SessionFormNotVisible => 200,
            Self::SessionHydrationMarkerMissing => 201,
            Self::SessionFieldMismatch => 202,
            Self::SessionAuthenticationFailed => 203,
            Self::SessionRecoveryFailed => 204,
            Self::SessionRegistrationFailed => 205,
            Self::ApiUnauthorized => 300,
            Self::ApiValidation => 301,
            Self::ApiServerError => 302,
            Self::ApiTransport => 303,
            Self::ApiUnexpectedBody => 304,
        }
    }

    /// Returns the formatted code, e.g. `LCM-E203`.
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("LCM-E{:03}", self.code_number())
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            1..=99 => ErrorCategory::Config,
            100..=199 => ErrorCategory::Driver,
            200..=299 => ErrorCategory::Session,
            _ => ErrorCategory::Api,
        }
    }

    /// Returns the full error entry with all metadata.
    #[must_use]
    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self
                .remediation()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Returns the error message template.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::ConfigMissingVar => "Required environment variable is not set",
            Self::ConfigInvalidValue => "Environment variable has an invalid value",
            Self::ConfigInvalidUrl => "Base URL is not an absolute http(s) URL",
            Self::ConfigCredentialPoolMismatch => {
                "Credential pool email and password lists differ in length"
            }
            Self::DriverNavigationFailed => "Navigation did not complete",
            Self::DriverElementNotFound => "No element matched the selector",
            Self::DriverContextDestroyed => "Page execution context was destroyed",
            Self::DriverScriptFailed => "In-page script evaluation failed",
            Self::DriverProtocol => "Browser protocol error",
            Self::DriverIo => "Local I/O failure while handling browser artifacts",
            Self::SessionFormNotVisible => "Form did not become visible",
            Self::SessionHydrationMarkerMissing => "Hydration marker never appeared",
            Self::SessionFieldMismatch => "Field value did not read back as written",
            Self::SessionAuthenticationFailed => "Login stalled without an authenticated session",
            Self::SessionRecoveryFailed => {
                "Session evidence found but forced navigation did not reach the destination"
            }
            Self::SessionRegistrationFailed => "Registration did not complete",
            Self::ApiUnauthorized => "Backend rejected the credentials",
            Self::ApiValidation => "Backend rejected the request payload",
            Self::ApiServerError => "Backend returned a server error",
            Self::ApiTransport => "Request did not reach the backend",
            Self::ApiUnexpectedBody => "Backend response had an unexpected shape",
        }
    }

    /// Returns remediation steps for this error.
    #[must_use]
    pub const fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::ConfigMissingVar => &[
                "Export the variable named in the error (all use the LCM_E2E_ prefix)",
                "Check that the CI job injects the credential secrets for this suite",
            ],
            Self::ConfigInvalidValue | Self::ConfigInvalidUrl => &[
                "Fix the value named in the error and re-run",
                "Base URLs must look like http://host:port without a path",
            ],
            Self::ConfigCredentialPoolMismatch => &[
                "Give LCM_E2E_USER_EMAILS and LCM_E2E_USER_PASSWORDS the same number of entries",
            ],
            Self::DriverNavigationFailed => &[
                "Confirm the frontend is reachable at LCM_E2E_FRONTEND_URL",
                "Check the browser console output attached to the failure",
            ],
            Self::DriverElementNotFound => &[
                "Verify the selector against the current markup",
                "The page may not have finished rendering; check hydration settings",
            ],
            Self::DriverContextDestroyed => &[
                "The page navigated during the operation; retry after navigation settles",
            ],
            Self::DriverScriptFailed | Self::DriverProtocol => &[
                "Re-run with LCM_E2E_LOG_LEVEL=debug to capture the protocol exchange",
            ],
            Self::DriverIo => &["Check that the artifact directory is writable"],
            Self::SessionFormNotVisible => &[
                "Open the entry route manually and confirm the form renders",
                "Check for a maintenance page or a client-side crash in the console",
            ],
            Self::SessionHydrationMarkerMissing => &[
                "Ensure the application sets the hydration marker attribute on the form",
                "Or unset LCM_E2E_REQUIRE_HYDRATION_MARKER to allow the grace delay",
            ],
            Self::SessionFieldMismatch => &[
                "Inputs were filled before the form was wired to state (hydration race)",
                "Increase LCM_E2E_HYDRATION_GRACE_MS or add the hydration marker",
            ],
            Self::SessionAuthenticationFailed => &[
                "Check the visible error text in the report",
                "Verify the worker's credentials exist in the target environment",
                "Inspect the attached screenshot",
            ],
            Self::SessionRecoveryFailed => &[
                "The backend issued a session but the client refused the destination route",
                "Check role assignment for the account and client-side route guards",
            ],
            Self::SessionRegistrationFailed => &[
                "Check the collected validation messages in the failure",
            ],
            Self::ApiUnauthorized => &["Verify the credentials and that the account is active"],
            Self::ApiValidation => &["Inspect the normalized error detail for the failing field"],
            Self::ApiServerError => &["Check backend logs for the request timestamp"],
            Self::ApiTransport => &["Confirm the backend is reachable at LCM_E2E_BACKEND_URL"],
            Self::ApiUnexpectedBody => &["The API contract may have changed; compare the body"],
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code_string(), self.message())
    }
}

/// Error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Environment and credential configuration (E001-E099)
    Config,
    /// Browser automation driver (E100-E199)
    Driver,
    /// Login flow, hydration and redirects (E200-E299)
    Session,
    /// Backend HTTP API (E300-E399)
    Api,
}

impl ErrorCategory {
    /// Returns a human-readable name for the category.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Config => "Configuration",
            Self::Driver => "Driver",
            Self::Session => "Session",
            Self::Api => "API",
        }
    }
}

/// Full metadata for a catalogued error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Error code string (e.g., "LCM-E001")
    pub code: String,
    /// Error category
    pub category: ErrorCategory,
    /// Human-readable error message
    pub message: String,
    /// Steps to remediate the error
    pub remediation: Vec<String>,
}

impl ErrorEntry {
    /// Formats the error for display with full remediation steps.
    #[must_use]
    pub fn format_full(&self) -> String {
        let mut output = format!("[{}] {}\n", self.code, self.message);

        if !self.remediation.is_empty() {
            output.push_str("\nRemediation steps:\n");
            for (i, step) in self.remediation.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_numbers_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for code in ErrorCode::all() {
            let num = code.code_number();
            assert!(
                seen.insert(num),
                "Duplicate error code number: {} for {:?}",
                num,
                code
            );
        }
    }

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::ConfigMissingVar.code_string(), "LCM-E001");
        assert_eq!(ErrorCode::DriverNavigationFailed.code_string(), "LCM-E100");
        assert_eq!(ErrorCode::SessionAuthenticationFailed.code_string(), "LCM-E203");
        assert_eq!(ErrorCode::ApiUnauthorized.code_string(), "LCM-E300");
        assert_eq!(ErrorCode::ConfigCredentialPoolMismatch.code_string(), "LCM-E004");
    }

    #[test]
    fn test_error_categories_follow_ranges() {
        for code in ErrorCode::all() {
            let expected = match code.code_number() {
                1..=99 => ErrorCategory::Config,
                100..=199 => ErrorCategory::Driver,
                200..=299 => ErrorCategory::Session,
                300..=399 => ErrorCategory::Api,
                other => panic!("{code:?} outside every range: {other}"),
            };
            assert_eq!(code.category(), expected, "{code:?}");
        }
    }

    #[test]
    fn test_every_code_has_remediation() {
        for code in ErrorCode::all() {
            assert!(!code.remediation().is_empty(), "{code:?} has no remediation");
            assert!(!code.message().is_empty());
        }
    }

    #[test]
    fn test_format_full_numbers_steps() {
        let text = ErrorCode::SessionFieldMismatch.entry().format_full();
        assert!(text.starts_with("[LCM-E202]"));
        assert!(text.contains("  1. "));
        assert!(text.contains("  2. "));
    }
}
