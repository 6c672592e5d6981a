//! Browser driver seam.
//!
//! Everything the session helpers need from a browser goes through
//! [`BrowserPage`]. The Chromium implementation lives in `chromium` (feature
//! `chromium`); `mock_page::MockPage` is a scripted implementation used by
//! the test suites.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use lcm_common::errors::{ErrorCode, ErrorKind, NormalizedError};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};

/// Interval used by the default `wait_for_selector`.
pub const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Browser driver failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("execution context was destroyed")]
    ContextDestroyed,

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("browser protocol error: {0}")]
    Protocol(String),

    #[error("i/o error: {0}")]
    Io(String),
}

impl DriverError {
    /// Classify a raw protocol message.
    pub fn from_protocol_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("execution context was destroyed")
            || lower.contains("target closed")
            || lower.contains("session closed")
            || lower.contains("cannot find context")
        {
            Self::ContextDestroyed
        } else {
            Self::Protocol(message)
        }
    }

    /// The page navigated away or closed while the call was in flight.
    pub fn is_context_destroyed(&self) -> bool {
        matches!(self, Self::ContextDestroyed)
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ElementNotFound { .. } => ErrorCode::DriverElementNotFound,
            Self::ContextDestroyed => ErrorCode::DriverContextDestroyed,
            Self::Navigation { .. } => ErrorCode::DriverNavigationFailed,
            Self::Script(_) => ErrorCode::DriverScriptFailed,
            Self::Protocol(_) => ErrorCode::DriverProtocol,
            Self::Io(_) => ErrorCode::DriverIo,
        }
    }

    pub fn normalize(&self) -> NormalizedError {
        let kind = match self {
            Self::ElementNotFound { .. } | Self::ContextDestroyed => ErrorKind::Transient,
            Self::Navigation { .. } | Self::Protocol(_) => ErrorKind::Transport,
            Self::Script(_) | Self::Io(_) => ErrorKind::Unknown,
        };
        NormalizedError::new(kind, self.to_string())
    }
}

/// Cookie metadata visible to the automation API. Values are never read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieInfo {
    pub name: String,
    pub domain: String,
    pub http_only: bool,
    pub secure: bool,
}

impl CookieInfo {
    pub fn http_only(name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
            http_only: true,
            secure: false,
        }
    }
}

/// A network response observed by the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedResponse {
    pub url: String,
    pub status: u16,
}

impl ObservedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Resolves with the first response whose URL contains the armed fragment.
///
/// Resolves to `None` when the page goes away before a match. Callers bound
/// it with `tokio::time::timeout`.
pub type ResponseWaiter = BoxFuture<'static, Option<ObservedResponse>>;

/// Minimal page surface used by the session helpers.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Stable identifier for this page, used by the instrumentation registry.
    fn page_id(&self) -> String;

    /// Navigate and resolve once DOMContentLoaded fired.
    async fn goto(&self, url: &str) -> Result<(), DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    async fn is_visible(&self, selector: &str) -> Result<bool, DriverError>;

    /// Wait until `selector` is visible. `Ok(false)` on timeout.
    ///
    /// A context destroyed by an in-flight navigation counts as not visible yet.
    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<bool, DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.is_visible(selector).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(err) if err.is_context_destroyed() => {}
                Err(err) => return Err(err),
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            sleep(SELECTOR_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), DriverError>;

    async fn input_value(&self, selector: &str) -> Result<String, DriverError>;

    async fn blur(&self, selector: &str) -> Result<(), DriverError>;

    async fn click(&self, selector: &str) -> Result<(), DriverError>;

    async fn is_enabled(&self, selector: &str) -> Result<bool, DriverError>;

    /// Trimmed, non-empty text of every visible element matching `selector`.
    async fn visible_texts(&self, selector: &str) -> Result<Vec<String>, DriverError>;

    /// Arm a response listener. Must be called before the triggering action.
    async fn expect_response(&self, url_fragment: &str) -> Result<ResponseWaiter, DriverError>;

    async fn cookies(&self) -> Result<Vec<CookieInfo>, DriverError>;

    /// Same-origin credentialed `fetch` from page script; returns the status.
    async fn fetch_status(&self, method: &str, path: &str) -> Result<u16, DriverError>;

    async fn clear_cookies(&self) -> Result<(), DriverError>;

    /// Clear localStorage and sessionStorage.
    async fn clear_storage(&self) -> Result<(), DriverError>;

    async fn screenshot(&self, path: &Path) -> Result<(), DriverError>;

    /// Start recording `console.error` output for this page, on the current
    /// document and on every document loaded afterwards.
    async fn install_console_capture(&self) -> Result<(), DriverError>;

    async fn console_errors(&self) -> Result<Vec<String>, DriverError>;
}

/// Path component of a URL. Relative inputs are returned without query or fragment.
pub fn url_path(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => raw
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

/// Join a base URL and a route, tolerating slashes on either side.
pub fn join_url(base: &str, route: &str) -> String {
    if route.starts_with("http://") || route.starts_with("https://") {
        return route.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        route.trim_start_matches('/')
    )
}
