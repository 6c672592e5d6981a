//! Polling condition waiter.
//!
//! Probes a boolean condition at a fixed interval until it holds or the
//! attempt limit is reached. Once the attempt count passes a threshold, a
//! second probe gathers diagnostic strings (for example visible validation
//! errors) so a timed-out wait explains itself.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{Instant, sleep};

use crate::logging::{EventLog, LogLevel, LogSource};
use crate::retry::duration_ms;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    /// Diagnostics are collected on attempts strictly after this one.
    pub diagnostics_after: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            interval: Duration::from_millis(200),
            diagnostics_after: 10,
        }
    }
}

impl PollPolicy {
    /// Upper bound on the time a poll can take, ignoring probe latency.
    pub fn ceiling(&self) -> Duration {
        self.interval
            .saturating_mul(self.max_attempts.max(1).saturating_sub(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollOutcome {
    pub condition_met: bool,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
    pub attempts: u32,
    pub diagnostics: Vec<String>,
}

/// Poll `probe` until it returns true or `policy.max_attempts` probes ran.
///
/// No sleep follows a successful probe or the final probe.
pub async fn poll_until<P, PF, D, DF>(
    log: &EventLog,
    label: &str,
    policy: &PollPolicy,
    mut probe: P,
    mut diagnostics_probe: D,
) -> PollOutcome
where
    P: FnMut() -> PF,
    PF: Future<Output = bool>,
    D: FnMut() -> DF,
    DF: Future<Output = Vec<String>>,
{
    let start = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut diagnostics: Vec<String> = Vec::new();

    for attempt in 1..=max_attempts {
        if probe().await {
            let elapsed = start.elapsed();
            log.log_with_context(
                LogLevel::Debug,
                LogSource::Poll,
                format!("{label}: condition met on attempt {attempt}"),
                vec![
                    ("attempt".to_string(), attempt.to_string()),
                    ("elapsed_ms".to_string(), elapsed.as_millis().to_string()),
                ],
            );
            return PollOutcome {
                condition_met: true,
                elapsed,
                attempts: attempt,
                diagnostics,
            };
        }

        if attempt > policy.diagnostics_after {
            for line in diagnostics_probe().await {
                if !line.is_empty() && !diagnostics.contains(&line) {
                    log.debug(LogSource::Poll, format!("{label}: diagnostic: {line}"));
                    diagnostics.push(line);
                }
            }
        }

        if attempt < max_attempts {
            sleep(policy.interval).await;
        }
    }

    let elapsed = start.elapsed();
    log.log_with_context(
        LogLevel::Warn,
        LogSource::Poll,
        format!("{label}: condition not met after {max_attempts} attempts"),
        vec![
            ("elapsed_ms".to_string(), elapsed.as_millis().to_string()),
            ("diagnostics".to_string(), diagnostics.join(" | ")),
        ],
    );
    PollOutcome {
        condition_met: false,
        elapsed,
        attempts: max_attempts,
        diagnostics,
    }
}

/// [`poll_until`] without a diagnostics probe.
pub async fn poll_simple<P, PF>(
    log: &EventLog,
    label: &str,
    policy: &PollPolicy,
    probe: P,
) -> PollOutcome
where
    P: FnMut() -> PF,
    PF: Future<Output = bool>,
{
    poll_until(log, label, policy, probe, || async { Vec::new() }).await
}
