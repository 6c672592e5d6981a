//! Shared primitives for the LCM end-to-end session helpers.
//!
//! - [`config`]: `LCM_E2E_*` environment parsing with aggregated errors
//! - [`errors`]: error catalog and backend error normalization
//! - [`logging`]: injected structured event log
//! - [`retry`] / [`poll`]: bounded retry and polling waits
//! - [`testing`]: test subscriber bootstrap

pub mod config;
pub mod errors;
pub mod logging;
pub mod poll;
pub mod retry;
pub mod testing;

pub use config::{ConfigError, ConfigSource, ENV_PREFIX, EnvError, EnvParser, Sourced};
pub use errors::{ErrorCategory, ErrorCode, ErrorEntry, ErrorKind, NormalizedError};
pub use logging::{EventLog, EventLogBuilder, LogEntry, LogLevel, LogSource, LoggerConfig};
pub use poll::{PollOutcome, PollPolicy, poll_simple, poll_until};
pub use retry::{RetryAttempt, RetryOutcome, RetryPolicy, retry_with_backoff};
