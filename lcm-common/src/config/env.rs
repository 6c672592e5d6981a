//! Environment variable parsing with type safety.
//!
//! Provides a type-safe parser for `LCM_E2E_` environment variables with
//! validation, error collection, and source tracking. Required values that
//! are missing are collected like any other error so a misconfigured run
//! reports every problem at once.

use super::source::{ConfigSource, Sourced};
use crate::errors::ErrorCode;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default prefix for all end-to-end configuration variables.
pub const ENV_PREFIX: &str = "LCM_E2E_";

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    /// A required variable is not set (or empty).
    #[error("Missing required environment variable {var}")]
    Missing { var: String },

    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Value is not an absolute http(s) URL.
    #[error("Invalid URL for {var}: '{value}' ({reason})")]
    InvalidUrl {
        var: String,
        value: String,
        reason: String,
    },

    /// Value out of valid range.
    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    /// Invalid log level.
    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },

    /// Pool passwords neither shared (one entry) nor one per email.
    #[error("{var} has {passwords} entries for {emails} pool emails (expected 1 or {emails})")]
    CredentialPoolMismatch {
        var: String,
        emails: usize,
        passwords: usize,
    },
}

impl EnvError {
    /// Name of the offending variable.
    pub fn var(&self) -> &str {
        match self {
            Self::Missing { var }
            | Self::InvalidValue { var, .. }
            | Self::InvalidUrl { var, .. }
            | Self::OutOfRange { var, .. }
            | Self::InvalidLogLevel { var, .. }
            | Self::CredentialPoolMismatch { var, .. } => var,
        }
    }

    /// Catalog code for this problem.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Missing { .. } => ErrorCode::ConfigMissingVar,
            Self::InvalidUrl { .. } => ErrorCode::ConfigInvalidUrl,
            Self::CredentialPoolMismatch { .. } => ErrorCode::ConfigCredentialPoolMismatch,
            Self::InvalidValue { .. } | Self::OutOfRange { .. } | Self::InvalidLogLevel { .. } => {
                ErrorCode::ConfigInvalidValue
            }
        }
    }
}

/// Type-safe environment variable parser.
///
/// Collects errors during parsing so all issues can be reported at once.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Create a new parser with the `LCM_E2E_` prefix.
    pub fn new() -> Self {
        Self::with_prefix(ENV_PREFIX)
    }

    /// Create a parser for a custom prefix.
    pub fn with_prefix(prefix: &'static str) -> Self {
        Self {
            prefix,
            errors: Vec::new(),
        }
    }

    /// Get all accumulated errors.
    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    /// Check if any errors occurred.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Take ownership of errors.
    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// Record a cross-variable problem found by the caller.
    pub fn record_error(&mut self, error: EnvError) {
        self.errors.push(error);
    }

    /// Full variable name for `name` under this parser's prefix.
    pub fn full_name(&self, name: &str) -> String {
        self.var_name(name)
    }

    /// Get the full variable name with prefix.
    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Get a required, non-empty string.
    ///
    /// Records [`EnvError::Missing`] and returns an empty string when absent.
    pub fn get_required_string(&mut self, name: &str) -> Sourced<String> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) if !value.trim().is_empty() => Sourced::from_env(value, var_name),
            _ => {
                self.errors.push(EnvError::Missing { var: var_name });
                Sourced::default_value(String::new())
            }
        }
    }

    /// Get a required absolute http(s) URL. A trailing slash is trimmed.
    pub fn get_required_url(&mut self, name: &str) -> Sourced<String> {
        let raw = self.get_required_string(name);
        if raw.source == ConfigSource::Default {
            return raw;
        }
        let var_name = self.var_name(name);
        match url::Url::parse(raw.value.trim()) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
                Sourced::from_env(raw.value.trim().trim_end_matches('/').to_string(), var_name)
            }
            Ok(parsed) => {
                self.errors.push(EnvError::InvalidUrl {
                    var: var_name.clone(),
                    value: raw.value.clone(),
                    reason: format!("unsupported scheme '{}'", parsed.scheme()),
                });
                Sourced::from_env(raw.value, var_name)
            }
            Err(err) => {
                self.errors.push(EnvError::InvalidUrl {
                    var: var_name.clone(),
                    value: raw.value.clone(),
                    reason: err.to_string(),
                });
                Sourced::from_env(raw.value, var_name)
            }
        }
    }

    /// Get a boolean value with default.
    ///
    /// Accepts: 1, true, yes, on (for true)
    ///          0, false, no, off, "" (for false)
    pub fn get_bool(&mut self, name: &str, default: bool) -> Sourced<bool> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => {
                let parsed = match value.to_lowercase().as_str() {
                    "1" | "true" | "yes" | "on" => true,
                    "0" | "false" | "no" | "off" | "" => false,
                    _ => {
                        self.errors.push(EnvError::InvalidValue {
                            var: var_name.clone(),
                            expected: "boolean (true/false/1/0/yes/no)".to_string(),
                            value: value.clone(),
                        });
                        default
                    }
                };
                Sourced::from_env(parsed, var_name)
            }
            Err(_) => Sourced::default_value(default),
        }
    }

    /// Get a u32 value with default and range validation.
    pub fn get_u32_range(&mut self, name: &str, default: u32, min: u32, max: u32) -> Sourced<u32> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match value.trim().parse::<u32>() {
                Ok(n) if n >= min && n <= max => Sourced::from_env(n, var_name),
                Ok(n) => {
                    self.errors.push(EnvError::OutOfRange {
                        var: var_name.clone(),
                        value: n.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                    Sourced::from_env(default, var_name)
                }
                Err(_) => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name.clone(),
                        expected: "unsigned 32-bit integer".to_string(),
                        value,
                    });
                    Sourced::default_value(default)
                }
            },
            Err(_) => Sourced::default_value(default),
        }
    }

    /// Get a u64 value with default and range validation.
    pub fn get_u64_range(&mut self, name: &str, default: u64, min: u64, max: u64) -> Sourced<u64> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match value.trim().parse::<u64>() {
                Ok(n) if n >= min && n <= max => Sourced::from_env(n, var_name),
                Ok(n) => {
                    self.errors.push(EnvError::OutOfRange {
                        var: var_name.clone(),
                        value: n.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                    Sourced::from_env(default, var_name)
                }
                Err(_) => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name.clone(),
                        expected: "unsigned 64-bit integer".to_string(),
                        value,
                    });
                    Sourced::default_value(default)
                }
            },
            Err(_) => Sourced::default_value(default),
        }
    }

    /// Get a millisecond duration with default and range validation.
    pub fn get_duration_ms(
        &mut self,
        name: &str,
        default: Duration,
        min: Duration,
        max: Duration,
    ) -> Sourced<Duration> {
        self.get_u64_range(
            name,
            default.as_millis() as u64,
            min.as_millis() as u64,
            max.as_millis() as u64,
        )
        .map(Duration::from_millis)
    }

    /// Get an optional path (None if not set or empty), with ~ expansion.
    pub fn get_optional_path(&mut self, name: &str) -> Sourced<Option<PathBuf>> {
        let sourced = self.get_optional_string(name);
        sourced.map(|value| value.map(|v| expand_home(&v)))
    }

    /// Get a log level value with validation.
    pub fn get_log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => {
                let lower = value.to_lowercase();
                match lower.as_str() {
                    "trace" | "debug" | "info" | "warn" | "error" | "off" => {
                        Sourced::from_env(lower, var_name)
                    }
                    _ => {
                        self.errors.push(EnvError::InvalidLogLevel {
                            var: var_name.clone(),
                            value: value.clone(),
                        });
                        Sourced::from_env(default.to_string(), var_name)
                    }
                }
            }
            Err(_) => Sourced::default_value(default.to_string()),
        }
    }

    /// Get a comma-separated list of strings.
    pub fn get_string_list(&mut self, name: &str, default: Vec<String>) -> Sourced<Vec<String>> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) if value.is_empty() => Sourced::from_env(Vec::new(), var_name),
            Ok(value) => {
                let items: Vec<String> = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                Sourced::from_env(items, var_name)
            }
            Err(_) => Sourced::default_value(default),
        }
    }

    /// Get an optional string (None if not set or empty).
    pub fn get_optional_string(&mut self, name: &str) -> Sourced<Option<String>> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) if value.is_empty() => Sourced::from_env(None, var_name),
            Ok(value) => Sourced::from_env(Some(value), var_name),
            Err(_) => Sourced::default_value(None),
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

fn expand_home(value: &str) -> PathBuf {
    if let Some(stripped) = value.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(value)
}
