//! Session establishment.
//!
//! [`SessionOrchestrator::login_and_wait_for_redirect`] runs the login flow
//! as a strictly sequential pipeline, each step bounded:
//!
//! 1. navigate to the entry route
//! 2. wait for the form (hard) and the hydration marker (soft unless strict)
//! 3. fill credentials and read them back (hard)
//! 4. blur and let debounced validation settle
//! 5. arm the login response waiter, then click submit
//! 6. await the response (soft)
//! 7. resolve the redirect, running diagnostics on a stall
//!
//! Registration, logout and API preload waits share the same building blocks.

use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use lcm_common::logging::{EventLog, LogLevel, LogSource};
use lcm_common::poll::{PollPolicy, poll_simple};
use lcm_common::retry::{RetryPolicy, retry_with_backoff};
use serde::Serialize;
use tokio::time::{sleep, timeout};

use crate::app_data::{ClearReport, clear_application_data};
use crate::credentials::{CredentialSet, E2eEnvironment, Role};
use crate::diagnostics::{DiagnosticsCollector, DiagnosticsConfig};
use crate::driver::{BrowserPage, ObservedResponse, join_url, url_path};
use crate::error::{Result, SessionError};
use crate::forms::{
    ButtonWait, FieldInput, FormSelectors, blur_and_settle, fill_and_verify,
    wait_for_button_enabled,
};
use crate::redirect::{RedirectOutcome, RedirectResolver, RouteMap};

/// Bounds for every wait in the login and registration flows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTimings {
    pub form_timeout: Duration,
    pub hydration_timeout: Duration,
    /// Fixed delay used when the hydration marker never shows up.
    pub hydration_grace: Duration,
    /// Fail instead of falling back to `hydration_grace`.
    pub require_hydration_marker: bool,
    pub blur_settle: Duration,
    pub response_timeout: Duration,
    pub redirect_timeout: Duration,
    pub intermediate_hop_timeout: Duration,
    pub recovery_timeout: Duration,
    /// Per-attempt bound when waiting for a preload response.
    pub preload_timeout: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            form_timeout: Duration::from_secs(15),
            hydration_timeout: Duration::from_secs(10),
            hydration_grace: Duration::from_secs(2),
            require_hydration_marker: false,
            blur_settle: Duration::from_millis(300),
            response_timeout: Duration::from_secs(15),
            redirect_timeout: Duration::from_secs(15),
            intermediate_hop_timeout: Duration::from_secs(10),
            recovery_timeout: Duration::from_secs(10),
            preload_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub frontend_url: String,
    pub routes: RouteMap,
    pub register_route: String,
    pub selectors: FormSelectors,
    pub timings: SessionTimings,
    pub login_endpoint: String,
    pub register_endpoint: String,
    pub logout_endpoint: String,
    /// Validation rules fetched by the registration page, if any.
    pub validation_preload: Option<String>,
    pub button_poll: PollPolicy,
    pub preload_retry: RetryPolicy,
    pub diagnostics: DiagnosticsConfig,
}

impl OrchestratorConfig {
    pub fn new(frontend_url: &str) -> Self {
        Self {
            frontend_url: frontend_url.trim_end_matches('/').to_string(),
            routes: RouteMap::default(),
            register_route: "/auth/register".to_string(),
            selectors: FormSelectors::default(),
            timings: SessionTimings::default(),
            login_endpoint: "/api/v1/auth/login".to_string(),
            register_endpoint: "/api/v1/auth/register".to_string(),
            logout_endpoint: "/api/v1/auth/logout".to_string(),
            validation_preload: Some("/api/v1/auth/password-policy".to_string()),
            button_poll: PollPolicy::default(),
            preload_retry: RetryPolicy::default(),
            diagnostics: DiagnosticsConfig::new(frontend_url),
        }
    }

    pub fn from_environment(env: &E2eEnvironment) -> Self {
        let mut config = Self::new(&env.frontend_url);
        config.timings = env.timings.clone();
        config.diagnostics.recovery_timeout = env.timings.recovery_timeout;
        config.diagnostics.artifact_dir = env.artifact_dir.clone();
        config
    }
}

/// Pages that already have console capture installed.
///
/// Owned by one orchestrator, so nothing leaks between tests.
#[derive(Debug, Default)]
pub struct InstrumentationRegistry {
    pages: Mutex<HashSet<String>>,
}

impl InstrumentationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when `page_id` was not registered yet.
    pub fn register(&self, page_id: &str) -> bool {
        self.lock().insert(page_id.to_string())
    }

    pub fn contains(&self, page_id: &str) -> bool {
        self.lock().contains(page_id)
    }

    pub fn forget(&self, page_id: &str) -> bool {
        self.lock().remove(page_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.pages.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct LoginRequest {
    /// Where the login starts; the orchestrator's login route when unset.
    pub entry_route: Option<String>,
    pub email: String,
    pub password: String,
    pub is_admin: bool,
}

impl LoginRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>, is_admin: bool) -> Self {
        Self {
            entry_route: None,
            email: email.into(),
            password: password.into(),
            is_admin,
        }
    }

    pub fn from_credentials(credentials: &CredentialSet) -> Self {
        Self::new(
            credentials.email.clone(),
            credentials.password.clone(),
            credentials.is_admin,
        )
    }

    pub fn with_entry_route(mut self, route: impl Into<String>) -> Self {
        self.entry_route = Some(route.into());
        self
    }

    pub fn role(&self) -> Role {
        Role::from_admin_flag(self.is_admin)
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("entry_route", &self.entry_route)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("is_admin", &self.is_admin)
            .finish()
    }
}

/// How an authenticated session was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPath {
    Direct,
    IntermediateHop,
    ForcedRecovery,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LoginResult {
    Authenticated { route: String, path: AuthPath },
    /// The app sent the account somewhere else (e.g. email verification).
    Interrupted { route: String },
}

impl LoginResult {
    pub fn route(&self) -> &str {
        match self {
            Self::Authenticated { route, .. } | Self::Interrupted { route } => route,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl RegistrationRequest {
    pub fn new(full_name: &str, email: &str, password: &str) -> Self {
        Self {
            full_name: full_name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            confirm_password: password.to_string(),
        }
    }
}

impl fmt::Debug for RegistrationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationRequest")
            .field("full_name", &self.full_name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationResult {
    /// Status of the register response, if it was observed.
    pub status: Option<u16>,
    pub route: String,
    pub validation_errors: Vec<String>,
}

impl RegistrationResult {
    pub fn succeeded(&self) -> bool {
        self.status.is_some_and(|s| (200..300).contains(&s)) && self.validation_errors.is_empty()
    }
}

/// Drives login, registration and logout through a [`BrowserPage`].
#[derive(Debug)]
pub struct SessionOrchestrator {
    config: OrchestratorConfig,
    log: EventLog,
    registry: InstrumentationRegistry,
    resolver: RedirectResolver,
    diagnostics: DiagnosticsCollector,
}

impl SessionOrchestrator {
    pub fn new(config: OrchestratorConfig, log: EventLog) -> Self {
        let resolver = RedirectResolver::new(
            log.clone(),
            config.routes.clone(),
            config.timings.redirect_timeout,
        )
        .with_intermediate_hop_timeout(config.timings.intermediate_hop_timeout);
        let diagnostics = DiagnosticsCollector::new(config.diagnostics.clone(), log.clone());
        Self {
            config,
            log,
            registry: InstrumentationRegistry::new(),
            resolver,
            diagnostics,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn registry(&self) -> &InstrumentationRegistry {
        &self.registry
    }

    /// Install console capture unless this page already has it.
    pub async fn instrument(&self, page: &dyn BrowserPage) {
        let id = page.page_id();
        if !self.registry.register(&id) {
            self.log
                .trace(LogSource::Orchestrator, format!("{id} already instrumented"));
            return;
        }
        if let Err(err) = page.install_console_capture().await {
            self.registry.forget(&id);
            self.log.debug(
                LogSource::Orchestrator,
                format!("console capture unavailable on {id}: {err}"),
            );
        }
    }

    /// Drop a page from the instrumentation registry, e.g. after closing it.
    pub fn release_page(&self, page: &dyn BrowserPage) {
        self.registry.forget(&page.page_id());
    }

    pub async fn login_and_wait_for_redirect(
        &self,
        page: &dyn BrowserPage,
        request: &LoginRequest,
    ) -> Result<LoginResult> {
        let role = request.role();
        let expected = self.config.routes.expected_for(role).to_string();
        let entry_route = request
            .entry_route
            .as_deref()
            .unwrap_or(&self.config.routes.login);
        self.log.log_with_context(
            LogLevel::Info,
            LogSource::Orchestrator,
            format!("logging in as {} via {entry_route}", request.email),
            vec![
                ("role".to_string(), role.to_string()),
                ("expected_route".to_string(), expected.clone()),
            ],
        );

        self.instrument(page).await;
        self.navigate(page, entry_route).await?;
        self.ensure_form_ready(page).await?;

        let sel = &self.config.selectors;
        let fields = [
            FieldInput::plain("email", &sel.email, &request.email),
            FieldInput::secret("password", &sel.password, &request.password),
        ];
        fill_and_verify(page, &self.log, &fields).await?;
        blur_and_settle(page, &fields, self.config.timings.blur_settle).await?;

        match self
            .submit_and_observe(page, &self.config.login_endpoint)
            .await?
        {
            Some(response) if response.is_success() => self.log.info(
                LogSource::Orchestrator,
                format!("login response {}", response.status),
            ),
            Some(response) => self.log.warn(
                LogSource::Orchestrator,
                format!("login endpoint answered {}", response.status),
            ),
            None => {}
        }

        let resolution = self.resolver.resolve(page, role, entry_route).await?;
        let result = match resolution.outcome {
            RedirectOutcome::Success(route) => LoginResult::Authenticated {
                route,
                path: AuthPath::Direct,
            },
            RedirectOutcome::IntermediateThenRedirected(route) => LoginResult::Authenticated {
                route,
                path: AuthPath::IntermediateHop,
            },
            RedirectOutcome::UnexpectedRoute(route) => LoginResult::Interrupted { route },
            RedirectOutcome::StalledOnLogin => {
                let route = self.diagnostics.diagnose_stall(page, &expected).await?;
                LoginResult::Authenticated {
                    route,
                    path: AuthPath::ForcedRecovery,
                }
            }
        };
        self.log.info(
            LogSource::Orchestrator,
            format!("login finished: {result:?}"),
        );
        Ok(result)
    }

    pub async fn register_account(
        &self,
        page: &dyn BrowserPage,
        request: &RegistrationRequest,
    ) -> Result<RegistrationResult> {
        self.instrument(page).await;
        let url = join_url(&self.config.frontend_url, &self.config.register_route);
        match &self.config.validation_preload {
            Some(fragment) => {
                if self.wait_for_api_response(page, fragment, &url).await.is_none() {
                    self.log.warn(
                        LogSource::Orchestrator,
                        format!("validation rules from {fragment} not observed; client-side validation may lag"),
                    );
                }
            }
            None => page.goto(&url).await?,
        }
        self.ensure_form_ready(page).await?;

        let sel = &self.config.selectors;
        let fields = [
            FieldInput::plain("full_name", &sel.full_name, &request.full_name),
            FieldInput::plain("email", &sel.email, &request.email),
            FieldInput::secret("password", &sel.password, &request.password),
            FieldInput::secret(
                "confirmPassword",
                &sel.confirm_password,
                &request.confirm_password,
            ),
        ];
        fill_and_verify(page, &self.log, &fields).await?;
        blur_and_settle(page, &fields, self.config.timings.blur_settle).await?;

        let button = self.wait_for_button_enabled(page, &sel.submit).await;
        if !button.enabled {
            return Err(SessionError::RegistrationFailed {
                reason: format!(
                    "submit button still disabled after {}ms",
                    button.wait_time.as_millis()
                ),
                diagnostics: button.diagnostics,
            });
        }

        let response = self
            .submit_and_observe(page, &self.config.register_endpoint)
            .await?;
        if response.as_ref().is_some_and(ObservedResponse::is_success) {
            let register_route = self.config.register_route.as_str();
            let policy = PollPolicy {
                max_attempts: self.config.button_poll.max_attempts,
                interval: self.config.button_poll.interval,
                diagnostics_after: u32::MAX,
            };
            poll_simple(&self.log, "leave registration route", &policy, move || async move {
                page.current_url()
                    .await
                    .map(|url| !url_path(&url).contains(register_route))
                    .unwrap_or(false)
            })
            .await;
        }

        let mut validation_errors: Vec<String> = Vec::new();
        for selector in &sel.error_text {
            for text in page.visible_texts(selector).await.unwrap_or_default() {
                if !validation_errors.contains(&text) {
                    validation_errors.push(text);
                }
            }
        }
        let route = url_path(&page.current_url().await?);
        let result = RegistrationResult {
            status: response.map(|r| r.status),
            route,
            validation_errors,
        };
        self.log.info(
            LogSource::Orchestrator,
            format!("registration for {} finished: {result:?}", request.email),
        );
        Ok(result)
    }

    pub async fn wait_for_button_enabled(&self, page: &dyn BrowserPage, selector: &str) -> ButtonWait {
        wait_for_button_enabled(
            page,
            &self.log,
            selector,
            &self.config.selectors.error_text,
            &self.config.button_poll,
        )
        .await
    }

    /// Navigate to `navigate_to` and wait for a response matching
    /// `url_fragment`, retrying with backoff. `None` means proceed degraded.
    pub async fn wait_for_api_response(
        &self,
        page: &dyn BrowserPage,
        url_fragment: &str,
        navigate_to: &str,
    ) -> Option<ObservedResponse> {
        let per_attempt = self.config.timings.preload_timeout;
        retry_with_backoff(
            &self.log,
            &format!("preload {url_fragment}"),
            &self.config.preload_retry,
            move || async move {
                let waiter = page
                    .expect_response(url_fragment)
                    .await
                    .map_err(|e| e.to_string())?;
                page.goto(navigate_to).await.map_err(|e| e.to_string())?;
                match timeout(per_attempt, waiter).await {
                    Ok(Some(response)) if response.is_success() => Ok(response),
                    Ok(Some(response)) => Err(format!("answered {}", response.status)),
                    Ok(None) => Err("page closed before a response".to_string()),
                    Err(_) => Err(format!("not observed within {}ms", per_attempt.as_millis())),
                }
            },
        )
        .await
        .into_option()
    }

    /// Log out through the UI when possible, else through the API from the
    /// page, then clear cookies and storage.
    pub async fn logout(&self, page: &dyn BrowserPage) -> Result<ClearReport> {
        let sel = &self.config.selectors.logout;
        if page.is_visible(sel).await.unwrap_or(false) {
            let waiter = page.expect_response(&self.config.logout_endpoint).await?;
            page.click(sel).await?;
            if timeout(self.config.timings.response_timeout, waiter)
                .await
                .ok()
                .flatten()
                .is_none()
            {
                self.log
                    .warn(LogSource::Orchestrator, "logout response not observed");
            }
        } else {
            match page.fetch_status("POST", &self.config.logout_endpoint).await {
                Ok(status) => self.log.debug(
                    LogSource::Orchestrator,
                    format!("logout endpoint answered {status}"),
                ),
                Err(err) if err.is_context_destroyed() => {}
                Err(err) => self
                    .log
                    .warn(LogSource::Orchestrator, format!("logout call failed: {err}")),
            }
        }
        Ok(clear_application_data(page, &self.log).await?)
    }

    async fn navigate(&self, page: &dyn BrowserPage, route: &str) -> Result<()> {
        let url = join_url(&self.config.frontend_url, route);
        self.log
            .debug(LogSource::Orchestrator, format!("navigating to {url}"));
        page.goto(&url).await?;
        Ok(())
    }

    async fn ensure_form_ready(&self, page: &dyn BrowserPage) -> Result<()> {
        let sel = &self.config.selectors;
        let timings = &self.config.timings;
        if !page.wait_for_selector(&sel.form, timings.form_timeout).await? {
            let url = page
                .current_url()
                .await
                .unwrap_or_else(|e| format!("<unavailable: {e}>"));
            return Err(SessionError::FormNotVisible {
                url,
                selector: sel.form.clone(),
                timeout_ms: timings.form_timeout.as_millis() as u64,
            });
        }

        let hydrated = page
            .wait_for_selector(&sel.hydration_marker, timings.hydration_timeout)
            .await
            .unwrap_or(false);
        if hydrated {
            self.log.debug(LogSource::Orchestrator, "form hydrated");
            return Ok(());
        }
        if timings.require_hydration_marker {
            return Err(SessionError::HydrationMarkerMissing {
                selector: sel.hydration_marker.clone(),
                timeout_ms: timings.hydration_timeout.as_millis() as u64,
            });
        }
        // TODO: drop this fallback once every form renders data-hydrated.
        self.log.warn(
            LogSource::Orchestrator,
            format!(
                "hydration marker missing, waiting {}ms grace",
                timings.hydration_grace.as_millis()
            ),
        );
        sleep(timings.hydration_grace).await;
        Ok(())
    }

    /// Arm the response waiter, click submit, await the response (soft).
    async fn submit_and_observe(
        &self,
        page: &dyn BrowserPage,
        endpoint: &str,
    ) -> Result<Option<ObservedResponse>> {
        let waiter = page.expect_response(endpoint).await?;
        page.click(&self.config.selectors.submit).await?;
        let bound = self.config.timings.response_timeout;
        match timeout(bound, waiter).await {
            Ok(Some(response)) => Ok(Some(response)),
            Ok(None) => {
                self.log.warn(
                    LogSource::Orchestrator,
                    format!("page closed before {endpoint} responded"),
                );
                Ok(None)
            }
            Err(_) => {
                self.log.warn(
                    LogSource::Orchestrator,
                    format!(
                        "{endpoint} response not observed within {}ms, continuing",
                        bound.as_millis()
                    ),
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_page::MockPage;

    fn orchestrator() -> SessionOrchestrator {
        SessionOrchestrator::new(OrchestratorConfig::new("http://app.test"), EventLog::default())
    }

    #[test]
    fn test_registry_tracks_pages() {
        let registry = InstrumentationRegistry::new();
        assert!(registry.register("p1"));
        assert!(!registry.register("p1"));
        assert!(registry.contains("p1"));
        assert!(registry.forget("p1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_login_request_debug_redacts() {
        let request = LoginRequest::from_credentials(&CredentialSet::new("a@test.com", "pw-123", true));
        assert_eq!(request.entry_route, None);
        assert_eq!(request.role(), Role::Admin);
        assert!(!format!("{request:?}").contains("pw-123"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_instrumentation_installed_once_per_page() {
        let orch = orchestrator();
        let page = MockPage::login_page("http://app.test");
        orch.instrument(&page).await;
        orch.instrument(&page).await;
        assert_eq!(page.console_installs(), 1);
        orch.release_page(&page);
        orch.instrument(&page).await;
        assert_eq!(page.console_installs(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_login_route_is_the_default_entry() {
        let mut config = OrchestratorConfig::new("http://app.test");
        config.routes.login = "/signin".to_string();
        config.timings.redirect_timeout = Duration::from_secs(2);
        let orch = SessionOrchestrator::new(config, EventLog::default());
        let page = MockPage::login_page("http://app.test");

        let err = orch
            .login_and_wait_for_redirect(&page, &LoginRequest::new("u@test.com", "pw", false))
            .await
            .unwrap_err();
        assert_eq!(page.call_count("goto:/signin"), 1);
        assert!(err.failure_report().unwrap().current_url.ends_with("/signin"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_form_is_hard_failure() {
        let orch = orchestrator();
        let page = MockPage::new("http://app.test");
        let err = orch
            .login_and_wait_for_redirect(&page, &LoginRequest::new("u@test.com", "pw", false))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::FormNotVisible { .. }));
        assert!(err.to_string().contains("15000ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_hydration_fails_without_marker() {
        let mut config = OrchestratorConfig::new("http://app.test");
        config.timings.require_hydration_marker = true;
        let orch = SessionOrchestrator::new(config, EventLog::default());
        let page = MockPage::login_page("http://app.test");
        page.set_visible(r#"form[data-hydrated="true"]"#, false);

        let err = orch
            .login_and_wait_for_redirect(&page, &LoginRequest::new("u@test.com", "pw", false))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::HydrationMarkerMissing { .. }));
        assert_eq!(page.call_count("fill:"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_api_response_gives_up_with_none() {
        let orch = orchestrator();
        let page = MockPage::login_page("http://app.test");
        let observed = orch
            .wait_for_api_response(&page, "/api/v1/auth/password-policy", "http://app.test/auth/register")
            .await;
        assert!(observed.is_none());
        assert_eq!(page.call_count("goto:/auth/register"), 3);
    }
}
