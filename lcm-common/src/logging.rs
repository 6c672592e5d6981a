//! Injected structured event log.
//!
//! Every helper component writes its decisions through an [`EventLog`]
//! instead of printing. Entries are:
//! - mirrored to `tracing` (so normal subscribers see them)
//! - kept in memory, so tests can assert on diagnostic content
//! - optionally appended as JSONL under a log directory
//!
//! Cloning an `EventLog` shares the same underlying buffer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Log severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

/// Component that produced a log entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    Retry,
    Poll,
    Orchestrator,
    Forms,
    Redirect,
    Diagnostics,
    Fixture,
    AppData,
    Api,
    Driver,
    Custom(String),
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSource::Retry => write!(f, "retry"),
            LogSource::Poll => write!(f, "poll"),
            LogSource::Orchestrator => write!(f, "orchestrator"),
            LogSource::Forms => write!(f, "forms"),
            LogSource::Redirect => write!(f, "redirect"),
            LogSource::Diagnostics => write!(f, "diagnostics"),
            LogSource::Fixture => write!(f, "fixture"),
            LogSource::AppData => write!(f, "app_data"),
            LogSource::Api => write!(f, "api"),
            LogSource::Driver => write!(f, "driver"),
            LogSource::Custom(s) => write!(f, "{s}"),
        }
    }
}

/// A single log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    /// Elapsed time since the log was created
    pub elapsed_ms: u64,
    pub level: LogLevel,
    pub source: LogSource,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<(String, String)>,
}

impl LogEntry {
    /// Value of a context key, if present.
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:>6}ms] [{:<5}] [{}] {}",
            self.elapsed_ms, self.level, self.source, self.message
        )?;
        if !self.context.is_empty() {
            write!(f, " {{")?;
            for (i, (k, v)) in self.context.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{k}={v}")?;
            }
            write!(f, "}}")?;
        }
        Ok(())
    }
}

/// Configuration for the event log
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Minimum log level to capture
    pub min_level: LogLevel,
    /// Maximum number of entries to keep in memory (0 = unlimited)
    pub max_entries: usize,
    /// Directory for JSONL logs and JSON artifacts
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Debug,
            max_entries: 10_000,
            log_dir: None,
        }
    }
}

/// Thread-safe structured log shared by the helper components.
#[derive(Clone)]
pub struct EventLog {
    config: Arc<LoggerConfig>,
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    start_time: Instant,
    name: Arc<String>,
    file_writer: Arc<Mutex<Option<BufWriter<File>>>>,
    artifact_root: Arc<Option<PathBuf>>,
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog")
            .field("name", &self.name)
            .field("entries", &lock(&self.entries).len())
            .finish()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new("session", LoggerConfig::default())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EventLog {
    /// Create a log with the given configuration
    pub fn new(name: &str, config: LoggerConfig) -> Self {
        let mut file_writer = None;
        let mut artifact_root = None;

        if let Some(ref dir) = config.log_dir
            && fs::create_dir_all(dir).is_ok()
        {
            let sanitized = sanitize_component(name);
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
            let log_path = dir.join(format!("{sanitized}_{timestamp}.jsonl"));
            match File::create(&log_path) {
                Ok(file) => file_writer = Some(BufWriter::new(file)),
                Err(error) => {
                    tracing::warn!(path = %log_path.display(), %error, "failed to create event log file");
                }
            }

            let artifacts_dir = dir.join("artifacts").join(&sanitized);
            if fs::create_dir_all(&artifacts_dir).is_ok() {
                artifact_root = Some(artifacts_dir);
            }
        }

        Self {
            config: Arc::new(config),
            entries: Arc::new(Mutex::new(VecDeque::new())),
            start_time: Instant::now(),
            name: Arc::new(name.to_string()),
            file_writer: Arc::new(Mutex::new(file_writer)),
            artifact_root: Arc::new(artifact_root),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory where artifacts (screenshots, reports) for this log go.
    pub fn artifact_dir(&self) -> Option<&Path> {
        self.artifact_root.as_deref()
    }

    pub fn log(&self, level: LogLevel, source: LogSource, message: impl Into<String>) {
        self.log_with_context(level, source, message, Vec::new());
    }

    /// Log an entry with context key-value pairs
    pub fn log_with_context(
        &self,
        level: LogLevel,
        source: LogSource,
        message: impl Into<String>,
        context: Vec<(String, String)>,
    ) {
        if level < self.config.min_level {
            return;
        }

        let entry = LogEntry {
            timestamp: Utc::now(),
            elapsed_ms: self.start_time.elapsed().as_millis() as u64,
            level,
            source,
            message: message.into(),
            context,
        };

        mirror_to_tracing(&entry);

        if let Ok(mut writer) = self.file_writer.lock()
            && let Some(ref mut w) = *writer
            && let Ok(json) = serde_json::to_string(&entry)
        {
            let _ = writeln!(w, "{json}");
            let _ = w.flush();
        }

        let mut entries = lock(&self.entries);
        entries.push_back(entry);
        if self.config.max_entries > 0 && entries.len() > self.config.max_entries {
            entries.pop_front();
        }
    }

    pub fn trace(&self, source: LogSource, message: impl Into<String>) {
        self.log(LogLevel::Trace, source, message);
    }

    pub fn debug(&self, source: LogSource, message: impl Into<String>) {
        self.log(LogLevel::Debug, source, message);
    }

    pub fn info(&self, source: LogSource, message: impl Into<String>) {
        self.log(LogLevel::Info, source, message);
    }

    pub fn warn(&self, source: LogSource, message: impl Into<String>) {
        self.log(LogLevel::Warn, source, message);
    }

    pub fn error(&self, source: LogSource, message: impl Into<String>) {
        self.log(LogLevel::Error, source, message);
    }

    /// Get all log entries
    pub fn entries(&self) -> Vec<LogEntry> {
        lock(&self.entries).iter().cloned().collect()
    }

    /// Get entries at or above a level
    pub fn entries_by_level(&self, min_level: LogLevel) -> Vec<LogEntry> {
        lock(&self.entries)
            .iter()
            .filter(|e| e.level >= min_level)
            .cloned()
            .collect()
    }

    pub fn entries_by_source(&self, source: &LogSource) -> Vec<LogEntry> {
        lock(&self.entries)
            .iter()
            .filter(|e| &e.source == source)
            .cloned()
            .collect()
    }

    /// Case-insensitive search over messages
    pub fn search(&self, pattern: &str) -> Vec<LogEntry> {
        let pattern_lower = pattern.to_lowercase();
        lock(&self.entries)
            .iter()
            .filter(|e| e.message.to_lowercase().contains(&pattern_lower))
            .cloned()
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        lock(&self.entries).iter().any(|e| e.level == LogLevel::Error)
    }

    pub fn warn_count(&self) -> usize {
        lock(&self.entries)
            .iter()
            .filter(|e| e.level == LogLevel::Warn)
            .count()
    }

    pub fn error_count(&self) -> usize {
        lock(&self.entries)
            .iter()
            .filter(|e| e.level == LogLevel::Error)
            .count()
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    /// Write a JSON artifact next to the log. Requires a configured log dir.
    pub fn capture_artifact_json<T: Serialize>(
        &self,
        artifact_name: &str,
        value: &T,
    ) -> std::io::Result<PathBuf> {
        let serialized = serde_json::to_string_pretty(value).map_err(|error| {
            std::io::Error::other(format!("failed to serialize artifact json: {error}"))
        })?;
        let Some(artifact_root) = self.artifact_root.as_deref() else {
            return Err(std::io::Error::other(
                "artifact capture requires log_dir to be configured",
            ));
        };
        let path = artifact_root.join(format!("{}.json", sanitize_component(artifact_name)));
        fs::write(&path, serialized)?;
        Ok(path)
    }
}

fn mirror_to_tracing(entry: &LogEntry) {
    let source = entry.source.to_string();
    let context = if entry.context.is_empty() {
        String::new()
    } else {
        entry
            .context
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ")
    };
    match entry.level {
        LogLevel::Trace => tracing::trace!(source = %source, context = %context, "{}", entry.message),
        LogLevel::Debug => tracing::debug!(source = %source, context = %context, "{}", entry.message),
        LogLevel::Info => tracing::info!(source = %source, context = %context, "{}", entry.message),
        LogLevel::Warn => tracing::warn!(source = %source, context = %context, "{}", entry.message),
        LogLevel::Error => tracing::error!(source = %source, context = %context, "{}", entry.message),
    }
}

/// Replace anything that is not safe in a file name.
pub fn sanitize_component(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
            cleaned.push(ch);
        } else {
            cleaned.push('_');
        }
    }
    if cleaned.is_empty() {
        "artifact".to_string()
    } else {
        cleaned
    }
}

/// Builder for an [`EventLog`] with custom configuration
pub struct EventLogBuilder {
    name: String,
    config: LoggerConfig,
}

impl EventLogBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            config: LoggerConfig::default(),
        }
    }

    pub fn min_level(mut self, level: LogLevel) -> Self {
        self.config.min_level = level;
        self
    }

    pub fn max_entries(mut self, max: usize) -> Self {
        self.config.max_entries = max;
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.log_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> EventLog {
        EventLog::new(&self.name, self.config)
    }
}
