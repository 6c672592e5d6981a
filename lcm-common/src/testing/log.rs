//! Structured test logging.
//!
//! Call `init_test_logging()` once per test binary (typically from a
//! `#[ctor::ctor]` in `tests/common/mod.rs`). It installs a global
//! subscriber with a human-readable test writer and, when possible, a JSONL
//! file at `target/test-logs/session_tests.jsonl`.
//!
//! Environment variables:
//! - `LCM_E2E_TEST_LOG_FILE`: override the JSONL path
//! - `LCM_E2E_LOG_LEVEL`: filter level for the helper crates (default `info`)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Mutex, Once};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

use crate::config::{ENV_PREFIX, EnvParser};

/// Test execution phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestPhase {
    Setup,
    Execute,
    Verify,
    Teardown,
}

impl std::fmt::Display for TestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Execute => write!(f, "execute"),
            Self::Verify => write!(f, "verify"),
            Self::Teardown => write!(f, "teardown"),
        }
    }
}

static TEST_LOGGING_INIT: Once = Once::new();

/// Install the global test subscriber. Safe to call many times.
pub fn init_test_logging() {
    TEST_LOGGING_INIT.call_once(|| {
        let file_layer = create_log_file().map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
        });

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .with_level(true)
            .compact();

        let level = EnvParser::new().get_log_level("LOG_LEVEL", "info").into_inner();
        let filter = tracing_subscriber::EnvFilter::try_new(format!(
            "lcm_common={level},lcm_session={level}"
        ))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(stderr_layer);

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

fn create_log_file() -> Option<std::fs::File> {
    if let Ok(custom_path) = std::env::var(format!("{ENV_PREFIX}TEST_LOG_FILE")) {
        if let Some(parent) = PathBuf::from(&custom_path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        return std::fs::File::create(&custom_path).ok();
    }

    let log_dir = find_target_dir().join("test-logs");
    let _ = std::fs::create_dir_all(&log_dir);
    std::fs::File::create(log_dir.join("session_tests.jsonl")).ok()
}

fn find_target_dir() -> PathBuf {
    if let Ok(target_dir) = std::env::var("CARGO_TARGET_DIR") {
        return PathBuf::from(target_dir);
    }

    let mut cwd = std::env::current_dir().unwrap_or_default();
    loop {
        let target = cwd.join("target");
        if target.is_dir() {
            return target;
        }
        if !cwd.pop() {
            return PathBuf::from("target");
        }
    }
}

/// One phase marker emitted by a scenario test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestLogEntry {
    pub timestamp: String,
    pub test_name: String,
    pub phase: TestPhase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl TestLogEntry {
    pub fn new(test_name: &str, phase: TestPhase, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            test_name: test_name.to_string(),
            phase,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Emit through `tracing` so it lands in the JSONL file.
    pub fn emit(&self) {
        let data = self
            .data
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default();
        tracing::info!(
            test = %self.test_name,
            phase = %self.phase,
            data = %data,
            "{}",
            self.message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_test_logging();
        init_test_logging();
        tracing::info!("still logging");
    }

    #[test]
    fn test_entry_serialization() {
        let entry = TestLogEntry::new("login_user", TestPhase::Verify, "route checked")
            .with_data(serde_json::json!({"route": "/dashboard"}));
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"phase\":\"verify\""));
        assert!(json.contains("/dashboard"));
        entry.emit();
    }
}
