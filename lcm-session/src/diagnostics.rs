//! Evidence gathering when a login appears stuck on the login route.
//!
//! Three independent signals are collected and none is trusted alone:
//! an auth cookie in the browser context, a credentialed "who am I" probe,
//! and visible error text. If either of the first two says the session
//! exists, the UI redirect is assumed to have failed and one forced
//! navigation to the expected route is attempted. Otherwise a
//! [`LoginFailureReport`] is produced.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lcm_common::logging::{EventLog, LogLevel, LogSource, sanitize_component};
use lcm_common::poll::{PollPolicy, poll_simple};
use serde::Serialize;

use crate::driver::{BrowserPage, join_url, url_path};
use crate::error::SessionError;
use crate::forms::FormSelectors;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsConfig {
    pub frontend_url: String,
    /// Cookie name suffixes that mark an authentication cookie.
    pub auth_cookie_suffixes: Vec<String>,
    pub whoami_path: String,
    pub error_selectors: Vec<String>,
    /// Bound on verifying arrival after forced navigation.
    pub recovery_timeout: Duration,
    pub artifact_dir: Option<PathBuf>,
}

impl DiagnosticsConfig {
    pub fn new(frontend_url: impl Into<String>) -> Self {
        Self {
            frontend_url: frontend_url.into(),
            auth_cookie_suffixes: vec!["_access_token".to_string(), "_refresh_token".to_string()],
            whoami_path: "/api/v1/users/me".to_string(),
            error_selectors: FormSelectors::default().error_text,
            recovery_timeout: Duration::from_secs(10),
            artifact_dir: None,
        }
    }

    /// `access_token` itself or anything ending in one of the suffixes.
    pub fn is_auth_cookie(&self, name: &str) -> bool {
        self.auth_cookie_suffixes
            .iter()
            .any(|suffix| name.ends_with(suffix.as_str()) || name == suffix.trim_start_matches('_'))
    }
}

/// Signals gathered from one diagnostic run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionEvidence {
    pub has_cookie: bool,
    pub backend_confirmed: bool,
    pub visible_error_text: Option<String>,
    pub auth_cookie_names: Vec<String>,
    pub backend_status: Option<u16>,
    /// Console errors of the document the stall happened on.
    pub console_errors: Vec<String>,
}

impl SessionEvidence {
    pub fn indicates_authenticated(&self) -> bool {
        self.has_cookie || self.backend_confirmed
    }
}

/// Everything known about a login that did not reach its destination.
#[derive(Debug, Clone, Serialize)]
pub struct LoginFailureReport {
    pub current_url: String,
    pub expected_route: String,
    pub visible_error_text: Option<String>,
    pub evidence: SessionEvidence,
    pub recovery_attempted: bool,
    pub console_errors: Vec<String>,
    pub screenshot: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
    pub captured_at: DateTime<Utc>,
}

impl fmt::Display for LoginFailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "login did not reach {}: browser is at {}",
            self.expected_route, self.current_url
        )?;
        match &self.visible_error_text {
            Some(text) => write!(f, "\n  visible error: {text}")?,
            None => write!(f, "\n  visible error: <none>")?,
        }
        write!(
            f,
            "\n  auth cookie present: {}, backend session confirmed: {}",
            self.evidence.has_cookie, self.evidence.backend_confirmed
        )?;
        if self.recovery_attempted {
            write!(f, "\n  forced navigation to {} did not stick", self.expected_route)?;
        }
        if !self.console_errors.is_empty() {
            write!(f, "\n  console errors: {}", self.console_errors.join(" | "))?;
        }
        if let Some(path) = &self.screenshot {
            write!(f, "\n  screenshot: {}", path.display())?;
        }
        if let Some(path) = &self.report_path {
            write!(f, "\n  report: {}", path.display())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DiagnosticsCollector {
    config: DiagnosticsConfig,
    log: EventLog,
}

impl DiagnosticsCollector {
    pub fn new(config: DiagnosticsConfig, log: EventLog) -> Self {
        Self { config, log }
    }

    pub fn config(&self) -> &DiagnosticsConfig {
        &self.config
    }

    /// Probe failures degrade to "no evidence" rather than erroring.
    pub async fn collect_evidence(&self, page: &dyn BrowserPage) -> SessionEvidence {
        let auth_cookie_names: Vec<String> = match page.cookies().await {
            Ok(cookies) => cookies
                .into_iter()
                .filter(|c| self.config.is_auth_cookie(&c.name))
                .map(|c| c.name)
                .collect(),
            Err(err) => {
                self.log
                    .debug(LogSource::Diagnostics, format!("cookie probe failed: {err}"));
                Vec::new()
            }
        };

        let backend_status = match page.fetch_status("GET", &self.config.whoami_path).await {
            Ok(status) => Some(status),
            Err(err) => {
                self.log
                    .debug(LogSource::Diagnostics, format!("whoami probe failed: {err}"));
                None
            }
        };

        let mut visible_error_text = None;
        for selector in &self.config.error_selectors {
            if let Ok(texts) = page.visible_texts(selector).await
                && let Some(text) = texts.into_iter().find(|t| !t.is_empty())
            {
                visible_error_text = Some(text);
                break;
            }
        }

        let console_errors = page.console_errors().await.unwrap_or_default();

        let evidence = SessionEvidence {
            has_cookie: !auth_cookie_names.is_empty(),
            backend_confirmed: backend_status.is_some_and(|s| (200..300).contains(&s)),
            visible_error_text,
            auth_cookie_names,
            backend_status,
            console_errors,
        };
        self.log.log_with_context(
            LogLevel::Info,
            LogSource::Diagnostics,
            "session evidence collected",
            vec![
                ("has_cookie".to_string(), evidence.has_cookie.to_string()),
                (
                    "backend_confirmed".to_string(),
                    evidence.backend_confirmed.to_string(),
                ),
                (
                    "visible_error_text".to_string(),
                    evidence.visible_error_text.clone().unwrap_or_default(),
                ),
            ],
        );
        evidence
    }

    /// Decide what a stall on the login route means.
    ///
    /// Returns the recovered route, or `AuthenticationFailed` with a report.
    /// Forced navigation is attempted at most once per call.
    pub async fn diagnose_stall(
        &self,
        page: &dyn BrowserPage,
        expected_route: &str,
    ) -> Result<String, SessionError> {
        let evidence = self.collect_evidence(page).await;

        let mut recovery_attempted = false;
        if evidence.indicates_authenticated() {
            self.log.warn(
                LogSource::Diagnostics,
                format!(
                    "session exists but UI stayed on login; forcing navigation to {expected_route}"
                ),
            );
            recovery_attempted = true;
            if self.force_navigation(page, expected_route).await {
                self.log.info(
                    LogSource::Diagnostics,
                    format!("forced navigation reached {expected_route}"),
                );
                return Ok(expected_route.to_string());
            }
        }

        let report = self
            .build_report(page, expected_route, evidence, recovery_attempted)
            .await;
        self.log
            .error(LogSource::Diagnostics, report.to_string());
        Err(SessionError::AuthenticationFailed(Box::new(report)))
    }

    async fn force_navigation(&self, page: &dyn BrowserPage, expected_route: &str) -> bool {
        let url = join_url(&self.config.frontend_url, expected_route);
        if let Err(err) = page.goto(&url).await {
            self.log
                .warn(LogSource::Diagnostics, format!("forced navigation failed: {err}"));
            return false;
        }
        let interval = Duration::from_millis(100);
        let policy = PollPolicy {
            max_attempts: (self.config.recovery_timeout.as_millis() / interval.as_millis()) as u32 + 1,
            interval,
            diagnostics_after: u32::MAX,
        };
        poll_simple(&self.log, "forced navigation arrival", &policy, move || async move {
            match page.current_url().await {
                Ok(current) => url_path(&current).trim_end_matches('/') == expected_route.trim_end_matches('/'),
                Err(_) => false,
            }
        })
        .await
        .condition_met
    }

    /// Assemble the report; screenshot and artifact writes are best-effort.
    pub async fn build_report(
        &self,
        page: &dyn BrowserPage,
        expected_route: &str,
        evidence: SessionEvidence,
        recovery_attempted: bool,
    ) -> LoginFailureReport {
        let current_url = match page.current_url().await {
            Ok(url) => url,
            Err(err) => format!("<unavailable: {err}>"),
        };
        // Forced navigation loads a new document, so keep what the stalled one logged.
        let mut console_errors = evidence.console_errors.clone();
        for message in page.console_errors().await.unwrap_or_default() {
            if !console_errors.contains(&message) {
                console_errors.push(message);
            }
        }
        let captured_at = Utc::now();

        let artifact_dir = self.artifact_dir();
        let screenshot = match &artifact_dir {
            Some(dir) => self.capture_screenshot(page, dir, captured_at).await,
            None => None,
        };

        let mut report = LoginFailureReport {
            current_url,
            expected_route: expected_route.to_string(),
            visible_error_text: evidence.visible_error_text.clone(),
            evidence,
            recovery_attempted,
            console_errors,
            screenshot,
            report_path: None,
            captured_at,
        };

        let name = format!("login-failure-{}", sanitize_component(&page.page_id()));
        match self.log.capture_artifact_json(&name, &report) {
            Ok(path) => report.report_path = Some(path),
            Err(err) => self.log.debug(
                LogSource::Diagnostics,
                format!("failure report not persisted: {err}"),
            ),
        }
        report
    }

    fn artifact_dir(&self) -> Option<PathBuf> {
        self.config
            .artifact_dir
            .clone()
            .or_else(|| self.log.artifact_dir().map(Path::to_path_buf))
    }

    async fn capture_screenshot(
        &self,
        page: &dyn BrowserPage,
        dir: &Path,
        at: DateTime<Utc>,
    ) -> Option<PathBuf> {
        if let Err(err) = tokio::fs::create_dir_all(dir).await {
            self.log.debug(
                LogSource::Diagnostics,
                format!("screenshot dir {} unavailable: {err}", dir.display()),
            );
            return None;
        }
        let path = dir.join(format!(
            "login-failure-{}-{}.png",
            sanitize_component(&page.page_id()),
            at.format("%Y%m%d_%H%M%S%3f")
        ));
        match page.screenshot(&path).await {
            Ok(()) => Some(path),
            Err(err) => {
                self.log
                    .debug(LogSource::Diagnostics, format!("screenshot failed: {err}"));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::CookieInfo;
    use crate::mock_page::MockPage;

    fn collector(log: &EventLog) -> DiagnosticsCollector {
        DiagnosticsCollector::new(DiagnosticsConfig::new("http://app.test"), log.clone())
    }

    #[test]
    fn test_auth_cookie_names() {
        let config = DiagnosticsConfig::new("http://app.test");
        assert!(config.is_auth_cookie("lcm_access_token"));
        assert!(config.is_auth_cookie("lcm_refresh_token"));
        assert!(config.is_auth_cookie("access_token"));
        assert!(!config.is_auth_cookie("csrftoken"));
        assert!(!config.is_auth_cookie("access_token_hint"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evidence_from_all_three_signals() {
        let page = MockPage::login_page("http://app.test");
        page.add_cookie(CookieInfo::http_only("lcm_access_token", "app.test"));
        page.add_cookie(CookieInfo::http_only("theme", "app.test"));
        page.set_fetch_status("/api/v1/users/me", 200);
        page.set_texts(r#"[role="alert"]"#, &["  Session expired  "]);
        let log = EventLog::default();

        let evidence = collector(&log).collect_evidence(&page).await;
        assert!(evidence.has_cookie);
        assert!(evidence.backend_confirmed);
        assert_eq!(evidence.visible_error_text.as_deref(), Some("Session expired"));
        assert_eq!(evidence.auth_cookie_names, vec!["lcm_access_token"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_errors_degrade_to_no_evidence() {
        let page = MockPage::login_page("http://app.test");
        page.destroy_context();
        let log = EventLog::default();
        let evidence = collector(&log).collect_evidence(&page).await;
        assert!(!evidence.indicates_authenticated());
        assert_eq!(evidence.backend_status, None);
        assert_eq!(evidence.visible_error_text, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cookie_triggers_single_forced_navigation() {
        let page = MockPage::login_page("http://app.test");
        page.goto("http://app.test/auth/login").await.unwrap();
        page.add_cookie(CookieInfo::http_only("lcm_access_token", "app.test"));
        let log = EventLog::default();

        let route = collector(&log)
            .diagnose_stall(&page, "/dashboard")
            .await
            .unwrap();
        assert_eq!(route, "/dashboard");
        assert_eq!(page.call_count("goto:/dashboard"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_recovery_reports_once() {
        let page = MockPage::login_page("http://app.test");
        page.goto("http://app.test/auth/login").await.unwrap();
        page.set_fetch_status("/api/v1/users/me", 200);
        page.guard_route("/admin", "/auth/login");
        let log = EventLog::default();

        let err = collector(&log)
            .diagnose_stall(&page, "/admin")
            .await
            .unwrap_err();
        let report = err.failure_report().unwrap();
        assert!(report.recovery_attempted);
        assert!(report.evidence.backend_confirmed);
        assert_eq!(page.call_count("goto:/admin"), 1);
        assert_eq!(err.code(), lcm_common::errors::ErrorCode::SessionRecoveryFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_console_errors_survive_forced_navigation() {
        let page = MockPage::login_page("http://app.test");
        page.install_console_capture().await.unwrap();
        page.goto("http://app.test/auth/login").await.unwrap();
        page.emit_console_error("Hydration failed");
        page.set_fetch_status("/api/v1/users/me", 200);
        page.guard_route("/admin", "/auth/login");
        let log = EventLog::default();

        let err = collector(&log)
            .diagnose_stall(&page, "/admin")
            .await
            .unwrap_err();
        let report = err.failure_report().unwrap();
        assert!(report.recovery_attempted);
        assert_eq!(report.console_errors, vec!["Hydration failed".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_screenshot_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let page = MockPage::login_page("http://app.test");
        page.goto("http://app.test/auth/login").await.unwrap();
        page.fail_screenshots();
        let log = EventLog::default();
        let mut config = DiagnosticsConfig::new("http://app.test");
        config.artifact_dir = Some(dir.path().to_path_buf());

        let err = DiagnosticsCollector::new(config, log)
            .diagnose_stall(&page, "/dashboard")
            .await
            .unwrap_err();
        let report = err.failure_report().unwrap();
        assert!(report.screenshot.is_none());
        assert_eq!(report.current_url, "http://app.test/auth/login");
        assert!(!report.recovery_attempted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_screenshot_written_to_artifact_dir() {
        let dir = tempfile::tempdir().unwrap();
        let page = MockPage::login_page("http://app.test");
        page.goto("http://app.test/auth/login").await.unwrap();
        let mut config = DiagnosticsConfig::new("http://app.test");
        config.artifact_dir = Some(dir.path().to_path_buf());

        let err = DiagnosticsCollector::new(config, EventLog::default())
            .diagnose_stall(&page, "/dashboard")
            .await
            .unwrap_err();
        let shot = err.failure_report().unwrap().screenshot.clone().unwrap();
        assert!(shot.starts_with(dir.path()));
        assert!(shot.exists());
        assert!(err.to_string().contains("screenshot:"));
    }
}
