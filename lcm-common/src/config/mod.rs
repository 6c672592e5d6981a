//! Configuration system for the end-to-end helpers.
//!
//! This module provides:
//! - Environment variable parsing with type safety
//! - Source tracking for debugging
//! - Aggregated, fail-fast configuration errors

pub mod env;
pub mod source;

pub use env::{ENV_PREFIX, EnvError, EnvParser};
pub use source::{ConfigSource, Sourced};

use std::fmt;

use crate::errors::ErrorCode;

/// Every problem found while loading configuration, reported together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub errors: Vec<EnvError>,
}

impl ConfigError {
    /// Turn the parser's collected errors into a result.
    pub fn check(parser: &mut EnvParser) -> Result<(), ConfigError> {
        let errors = parser.take_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError { errors })
        }
    }

    /// Catalog code of the first problem reported.
    pub fn code(&self) -> ErrorCode {
        self.errors
            .first()
            .map(EnvError::code)
            .unwrap_or(ErrorCode::ConfigInvalidValue)
    }

    /// Names of variables that were required but absent.
    pub fn missing_vars(&self) -> Vec<&str> {
        self.errors
            .iter()
            .filter(|e| matches!(e, EnvError::Missing { .. }))
            .map(EnvError::var)
            .collect()
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid end-to-end configuration ({} problem{})",
            self.errors.len(),
            if self.errors.len() == 1 { "" } else { "s" }
        )?;
        for err in &self.errors {
            write!(f, "\n  - {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_lists_every_problem() {
        let err = ConfigError {
            errors: vec![
                EnvError::Missing {
                    var: "LCM_E2E_USER_EMAIL".into(),
                },
                EnvError::InvalidValue {
                    var: "LCM_E2E_WORKER_INDEX".into(),
                    expected: "unsigned 32-bit integer".into(),
                    value: "two".into(),
                },
            ],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("2 problems"));
        assert!(rendered.contains("LCM_E2E_USER_EMAIL"));
        assert!(rendered.contains("'two'"));
        assert_eq!(err.missing_vars(), vec!["LCM_E2E_USER_EMAIL"]);
        assert_eq!(err.code(), ErrorCode::ConfigMissingVar);
    }

    #[test]
    fn test_code_follows_first_problem() {
        let cases = [
            (
                EnvError::InvalidUrl {
                    var: "LCM_E2E_FRONTEND_URL".into(),
                    value: "ftp://app".into(),
                    reason: "scheme must be http or https".into(),
                },
                ErrorCode::ConfigInvalidUrl,
            ),
            (
                EnvError::OutOfRange {
                    var: "LCM_E2E_FORM_TIMEOUT_MS".into(),
                    value: "5".into(),
                    min: "100".into(),
                    max: "120000".into(),
                },
                ErrorCode::ConfigInvalidValue,
            ),
            (
                EnvError::CredentialPoolMismatch {
                    var: "LCM_E2E_USER_PASSWORDS".into(),
                    emails: 3,
                    passwords: 2,
                },
                ErrorCode::ConfigCredentialPoolMismatch,
            ),
        ];
        for (first, code) in cases {
            let err = ConfigError {
                errors: vec![
                    first,
                    EnvError::Missing {
                        var: "LCM_E2E_USER_EMAIL".into(),
                    },
                ],
            };
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn test_check_drains_parser_errors() {
        let mut parser = EnvParser::with_prefix("LCM_E2E_CHECKTEST_");
        assert!(ConfigError::check(&mut parser).is_ok());
        parser.record_error(EnvError::CredentialPoolMismatch {
            var: parser.full_name("USER_PASSWORDS"),
            emails: 2,
            passwords: 3,
        });
        let err = ConfigError::check(&mut parser).unwrap_err();
        assert_eq!(err.errors.len(), 1);
        assert!(err.to_string().contains("LCM_E2E_CHECKTEST_USER_PASSWORDS has 3 entries"));
        assert!(!parser.has_errors());
    }
}
