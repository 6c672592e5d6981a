//! Scripted in-memory [`BrowserPage`].
//!
//! `MockPage` behaves like a small single-page app: a current path, visible
//! selectors, input values, cookies and same-origin fetch statuses. Clicks
//! can trigger a [`ClickScript`] that delivers a network response and
//! schedules client-side redirects on the tokio clock, so tests with paused
//! time replay hydration races and slow redirects deterministically.
//!
//! Handles are cheap clones sharing one state.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep};

use crate::driver::{
    BrowserPage, CookieInfo, DriverError, ObservedResponse, ResponseWaiter, url_path,
};
use crate::forms::FormSelectors;

static NEXT_PAGE_ID: AtomicU64 = AtomicU64::new(1);

/// A response delivered some time after a click.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub delay: Duration,
    pub response: ObservedResponse,
}

/// What happens when a selector is clicked.
#[derive(Debug, Clone, Default)]
pub struct ClickScript {
    pub response: Option<ScriptedResponse>,
    /// Client-side navigations, each relative to the click.
    pub redirects: Vec<(Duration, String)>,
    pub set_cookies: Vec<CookieInfo>,
    pub clear_cookies: bool,
    pub fetch_statuses: Vec<(String, u16)>,
    pub error_texts: Vec<(String, String)>,
    pub console_errors: Vec<String>,
}

impl ClickScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, url: impl Into<String>, status: u16, delay: Duration) -> Self {
        self.response = Some(ScriptedResponse {
            delay,
            response: ObservedResponse {
                url: url.into(),
                status,
            },
        });
        self
    }

    pub fn redirect_after(mut self, delay: Duration, path: impl Into<String>) -> Self {
        self.redirects.push((delay, path.into()));
        self
    }

    pub fn set_cookie(mut self, cookie: CookieInfo) -> Self {
        self.set_cookies.push(cookie);
        self
    }

    pub fn clear_cookies(mut self) -> Self {
        self.clear_cookies = true;
        self
    }

    pub fn fetch_status(mut self, path: impl Into<String>, status: u16) -> Self {
        self.fetch_statuses.push((path.into(), status));
        self
    }

    pub fn show_error(mut self, selector: impl Into<String>, text: impl Into<String>) -> Self {
        self.error_texts.push((selector.into(), text.into()));
        self
    }

    /// Log a `console.error` on the current document when the script runs.
    pub fn console_error(mut self, message: impl Into<String>) -> Self {
        self.console_errors.push(message.into());
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum Enabled {
    Fixed(bool),
    AfterProbes(u32),
}

struct MockState {
    id: String,
    origin: String,
    path: String,
    visible: HashSet<String>,
    inputs: HashMap<String, String>,
    dropped_fills: HashMap<String, u32>,
    enabled: HashMap<String, Enabled>,
    texts: HashMap<String, Vec<String>>,
    cookies: Vec<CookieInfo>,
    fetch_statuses: HashMap<String, u16>,
    click_scripts: HashMap<String, ClickScript>,
    goto_scripts: HashMap<String, ClickScript>,
    pending_redirects: Vec<(Instant, String)>,
    waiters: Vec<(String, oneshot::Sender<ObservedResponse>)>,
    route_guards: HashMap<String, String>,
    failing_navigations: HashSet<String>,
    context_destroyed: bool,
    context_restores_at: Option<Instant>,
    screenshot_fails: bool,
    screenshots: Vec<PathBuf>,
    storage_items: usize,
    console_capture: bool,
    /// Capture is re-armed on every new document.
    console_on_new_documents: bool,
    current_document_capture_only: bool,
    console_installs: u32,
    console_errors: Vec<String>,
    calls: Vec<String>,
}

impl MockState {
    fn apply_due_redirects(&mut self) {
        let now = Instant::now();
        self.pending_redirects.sort_by_key(|(at, _)| *at);
        while let Some((at, _)) = self.pending_redirects.first() {
            if *at > now {
                break;
            }
            let (_, path) = self.pending_redirects.remove(0);
            self.path = path;
        }
    }

    fn script_context(&self) -> Result<(), DriverError> {
        let restored = self
            .context_restores_at
            .is_some_and(|at| Instant::now() >= at);
        if self.context_destroyed && !restored {
            Err(DriverError::ContextDestroyed)
        } else {
            Ok(())
        }
    }
}

/// Apply a click or navigation script to the page state.
fn apply_script(shared: &Arc<Mutex<MockState>>, state: &mut MockState, script: ClickScript) {
    let now = Instant::now();
    if script.clear_cookies {
        state.cookies.clear();
    }
    state.cookies.extend(script.set_cookies.iter().cloned());
    for (path, status) in &script.fetch_statuses {
        state.fetch_statuses.insert(path.clone(), *status);
    }
    for (selector, text) in &script.error_texts {
        state
            .texts
            .entry(selector.clone())
            .or_default()
            .push(text.clone());
        state.visible.insert(selector.clone());
    }
    if state.console_capture {
        state.console_errors.extend(script.console_errors.iter().cloned());
    }
    for (delay, path) in &script.redirects {
        state.pending_redirects.push((now + *delay, path.clone()));
    }

    if let Some(scripted) = script.response {
        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            sleep(scripted.delay).await;
            let mut state = shared.lock().unwrap_or_else(|p| p.into_inner());
            let waiters = std::mem::take(&mut state.waiters);
            for (fragment, tx) in waiters {
                if scripted.response.url.contains(&fragment) {
                    let _ = tx.send(scripted.response.clone());
                } else {
                    state.waiters.push((fragment, tx));
                }
            }
        });
    }
}

/// Scripted page for deterministic tests.
#[derive(Clone)]
pub struct MockPage {
    state: Arc<Mutex<MockState>>,
}

impl std::fmt::Debug for MockPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MockPage")
            .field("id", &state.id)
            .field("path", &state.path)
            .finish()
    }
}

impl MockPage {
    /// Blank page at `origin` + `/`.
    pub fn new(origin: &str) -> Self {
        let id = format!("mock-page-{}", NEXT_PAGE_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            state: Arc::new(Mutex::new(MockState {
                id,
                origin: origin.trim_end_matches('/').to_string(),
                path: "/".to_string(),
                visible: HashSet::new(),
                inputs: HashMap::new(),
                dropped_fills: HashMap::new(),
                enabled: HashMap::new(),
                texts: HashMap::new(),
                cookies: Vec::new(),
                fetch_statuses: HashMap::new(),
                click_scripts: HashMap::new(),
                goto_scripts: HashMap::new(),
                pending_redirects: Vec::new(),
                waiters: Vec::new(),
                route_guards: HashMap::new(),
                failing_navigations: HashSet::new(),
                context_destroyed: false,
                context_restores_at: None,
                screenshot_fails: false,
                screenshots: Vec::new(),
                storage_items: 0,
                console_capture: false,
                console_on_new_documents: false,
                current_document_capture_only: false,
                console_installs: 0,
                console_errors: Vec::new(),
                calls: Vec::new(),
            })),
        }
    }

    /// Page exposing the default login form, hydrated, with an anonymous
    /// "who am I" endpoint.
    pub fn login_page(origin: &str) -> Self {
        let page = Self::new(origin);
        let sel = FormSelectors::default();
        for selector in [
            &sel.form,
            &sel.hydration_marker,
            &sel.email,
            &sel.password,
            &sel.full_name,
            &sel.confirm_password,
            &sel.submit,
        ] {
            page.set_visible(selector, true);
        }
        page.set_fetch_status("/api/v1/users/me", 401);
        page
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn record(&self, call: String) -> MutexGuard<'_, MockState> {
        let mut state = self.lock();
        state.apply_due_redirects();
        state.calls.push(call);
        state
    }

    pub fn set_visible(&self, selector: &str, visible: bool) {
        let mut state = self.lock();
        if visible {
            state.visible.insert(selector.to_string());
        } else {
            state.visible.remove(selector);
        }
    }

    pub fn set_enabled(&self, selector: &str, enabled: bool) {
        self.lock()
            .enabled
            .insert(selector.to_string(), Enabled::Fixed(enabled));
    }

    /// Report disabled for the next `probes` checks, enabled afterwards.
    pub fn enable_after_probes(&self, selector: &str, probes: u32) {
        self.lock()
            .enabled
            .insert(selector.to_string(), Enabled::AfterProbes(probes));
    }

    pub fn set_texts(&self, selector: &str, texts: &[&str]) {
        self.lock().texts.insert(
            selector.to_string(),
            texts.iter().map(|t| t.to_string()).collect(),
        );
        self.set_visible(selector, !texts.is_empty());
    }

    /// Ignore the next `count` fills of `selector`, as an unhydrated input does.
    pub fn drop_next_fills(&self, selector: &str, count: u32) {
        self.lock().dropped_fills.insert(selector.to_string(), count);
    }

    pub fn on_click(&self, selector: &str, script: ClickScript) {
        self.lock()
            .click_scripts
            .insert(selector.to_string(), script);
    }

    /// Run `script` every time the page navigates to `path`.
    pub fn on_goto(&self, path: &str, script: ClickScript) {
        self.lock().goto_scripts.insert(path.to_string(), script);
    }

    pub fn set_fetch_status(&self, path: &str, status: u16) {
        self.lock().fetch_statuses.insert(path.to_string(), status);
    }

    pub fn add_cookie(&self, cookie: CookieInfo) {
        self.lock().cookies.push(cookie);
    }

    /// Navigating to `from` lands on `to`, like a client-side route guard.
    pub fn guard_route(&self, from: &str, to: &str) {
        self.lock()
            .route_guards
            .insert(from.to_string(), to.to_string());
    }

    pub fn fail_navigation(&self, path: &str) {
        self.lock().failing_navigations.insert(path.to_string());
    }

    /// Make script-based calls fail as if the page navigated mid-call.
    pub fn destroy_context(&self) {
        let mut state = self.lock();
        state.context_destroyed = true;
        state.context_restores_at = None;
    }

    /// Like [`MockPage::destroy_context`], until `duration` has passed.
    pub fn destroy_context_for(&self, duration: Duration) {
        let mut state = self.lock();
        state.context_destroyed = true;
        state.context_restores_at = Some(Instant::now() + duration);
    }

    pub fn fail_screenshots(&self) {
        self.lock().screenshot_fails = true;
    }

    pub fn set_storage_items(&self, count: usize) {
        self.lock().storage_items = count;
    }

    /// Install console capture on the current document only, as a driver
    /// without new-document scripts would.
    pub fn capture_current_document_only(&self) {
        self.lock().current_document_capture_only = true;
    }

    /// Simulate an uncaught console error; only captured once capture is installed.
    pub fn emit_console_error(&self, message: &str) {
        let mut state = self.lock();
        if state.console_capture {
            state.console_errors.push(message.to_string());
        }
    }

    pub fn path(&self) -> String {
        let mut state = self.lock();
        state.apply_due_redirects();
        state.path.clone()
    }

    pub fn input(&self, selector: &str) -> Option<String> {
        self.lock().inputs.get(selector).cloned()
    }

    pub fn cookie_names(&self) -> Vec<String> {
        self.lock().cookies.iter().map(|c| c.name.clone()).collect()
    }

    pub fn storage_items(&self) -> usize {
        self.lock().storage_items
    }

    pub fn console_installs(&self) -> u32 {
        self.lock().console_installs
    }

    pub fn screenshots(&self) -> Vec<PathBuf> {
        self.lock().screenshots.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of recorded calls starting with `prefix`, e.g. `"goto:/admin"`.
    pub fn call_count(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl BrowserPage for MockPage {
    fn page_id(&self) -> String {
        self.lock().id.clone()
    }

    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        let target = url_path(url);
        let mut state = self.record(format!("goto:{target}"));
        if state.failing_navigations.contains(&target) {
            return Err(DriverError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_ABORTED".to_string(),
            });
        }
        state.pending_redirects.clear();
        state.path = state.route_guards.get(&target).cloned().unwrap_or(target);
        state.context_destroyed = false;
        state.context_restores_at = None;
        state.console_errors.clear();
        state.console_capture = state.console_on_new_documents;
        let landed = state.path.clone();
        if let Some(script) = state.goto_scripts.get(&landed).cloned() {
            apply_script(&self.state, &mut state, script);
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        let mut state = self.lock();
        state.apply_due_redirects();
        Ok(format!("{}{}", state.origin, state.path))
    }

    async fn is_visible(&self, selector: &str) -> Result<bool, DriverError> {
        let mut state = self.lock();
        state.apply_due_redirects();
        state.script_context()?;
        Ok(state.visible.contains(selector))
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), DriverError> {
        let mut state = self.record(format!("fill:{selector}"));
        if !state.visible.contains(selector) {
            return Err(DriverError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        if let Some(remaining) = state.dropped_fills.get_mut(selector)
            && *remaining > 0
        {
            *remaining -= 1;
            state.inputs.entry(selector.to_string()).or_default();
            return Ok(());
        }
        state.inputs.insert(selector.to_string(), value.to_string());
        Ok(())
    }

    async fn input_value(&self, selector: &str) -> Result<String, DriverError> {
        let state = self.lock();
        state.script_context()?;
        Ok(state.inputs.get(selector).cloned().unwrap_or_default())
    }

    async fn blur(&self, selector: &str) -> Result<(), DriverError> {
        drop(self.record(format!("blur:{selector}")));
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        let mut state = self.record(format!("click:{selector}"));
        if !state.visible.contains(selector) {
            return Err(DriverError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        let Some(script) = state.click_scripts.get(selector).cloned() else {
            return Ok(());
        };

        apply_script(&self.state, &mut state, script);
        Ok(())
    }

    async fn is_enabled(&self, selector: &str) -> Result<bool, DriverError> {
        let mut state = self.lock();
        let rule = state
            .enabled
            .get(selector)
            .copied()
            .unwrap_or(Enabled::Fixed(true));
        Ok(match rule {
            Enabled::Fixed(enabled) => enabled,
            Enabled::AfterProbes(0) => true,
            Enabled::AfterProbes(n) => {
                state
                    .enabled
                    .insert(selector.to_string(), Enabled::AfterProbes(n - 1));
                false
            }
        })
    }

    async fn visible_texts(&self, selector: &str) -> Result<Vec<String>, DriverError> {
        let state = self.lock();
        state.script_context()?;
        if !state.visible.contains(selector) {
            return Ok(Vec::new());
        }
        Ok(state
            .texts
            .get(selector)
            .map(|texts| {
                texts
                    .iter()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn expect_response(&self, url_fragment: &str) -> Result<ResponseWaiter, DriverError> {
        let (tx, rx) = oneshot::channel();
        self.record(format!("expect_response:{url_fragment}"))
            .waiters
            .push((url_fragment.to_string(), tx));
        Ok(Box::pin(async move { rx.await.ok() }))
    }

    async fn cookies(&self) -> Result<Vec<CookieInfo>, DriverError> {
        Ok(self.lock().cookies.clone())
    }

    async fn fetch_status(&self, method: &str, path: &str) -> Result<u16, DriverError> {
        let state = self.record(format!("fetch:{method} {path}"));
        state.script_context()?;
        Ok(state.fetch_statuses.get(path).copied().unwrap_or(404))
    }

    async fn clear_cookies(&self) -> Result<(), DriverError> {
        self.record("clear_cookies".to_string()).cookies.clear();
        Ok(())
    }

    async fn clear_storage(&self) -> Result<(), DriverError> {
        let mut state = self.record("clear_storage".to_string());
        state.script_context()?;
        state.storage_items = 0;
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<(), DriverError> {
        let fails = self.record(format!("screenshot:{}", path.display())).screenshot_fails;
        if fails {
            return Err(DriverError::Protocol("screenshot capture timed out".to_string()));
        }
        tokio::fs::write(path, b"\x89PNG\r\n\x1a\n")
            .await
            .map_err(|e| DriverError::Io(e.to_string()))?;
        self.lock().screenshots.push(path.to_path_buf());
        Ok(())
    }

    async fn install_console_capture(&self) -> Result<(), DriverError> {
        let mut state = self.record("install_console_capture".to_string());
        state.script_context()?;
        state.console_capture = true;
        state.console_on_new_documents = !state.current_document_capture_only;
        state.console_installs += 1;
        Ok(())
    }

    async fn console_errors(&self) -> Result<Vec<String>, DriverError> {
        let state = self.lock();
        state.script_context()?;
        Ok(state.console_errors.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_redirect_applies_on_clock() {
        let page = MockPage::login_page("http://app.test");
        page.on_click(
            r#"button[type="submit"]"#,
            ClickScript::new().redirect_after(Duration::from_millis(500), "/dashboard"),
        );
        page.goto("http://app.test/auth/login").await.unwrap();
        page.click(r#"button[type="submit"]"#).await.unwrap();
        assert_eq!(page.path(), "/auth/login");
        sleep(Duration::from_millis(500)).await;
        assert_eq!(page.current_url().await.unwrap(), "http://app.test/dashboard");
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_reaches_only_armed_waiters() {
        let page = MockPage::login_page("http://app.test");
        page.on_click(
            r#"button[type="submit"]"#,
            ClickScript::new().respond(
                "http://api.test/api/v1/auth/login",
                200,
                Duration::from_millis(100),
            ),
        );
        let waiter = page.expect_response("/api/v1/auth/login").await.unwrap();
        page.click(r#"button[type="submit"]"#).await.unwrap();
        let observed = waiter.await.unwrap();
        assert_eq!(observed.status, 200);

        let late = page.expect_response("/api/v1/auth/login").await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), late).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_route_guard_and_failing_navigation() {
        let page = MockPage::new("http://app.test");
        page.guard_route("/admin", "/auth/login");
        page.fail_navigation("/broken");
        page.goto("http://app.test/admin").await.unwrap();
        assert_eq!(page.path(), "/auth/login");
        assert!(matches!(
            page.goto("/broken").await,
            Err(DriverError::Navigation { .. })
        ));
        assert_eq!(page.call_count("goto:"), 2);
    }

    #[tokio::test]
    async fn test_console_capture_follows_new_documents() {
        let page = MockPage::new("http://app.test");
        page.install_console_capture().await.unwrap();
        page.emit_console_error("before navigation");
        page.goto("http://app.test/auth/login").await.unwrap();
        page.emit_console_error("after navigation");
        assert_eq!(
            page.console_errors().await.unwrap(),
            vec!["after navigation".to_string()]
        );

        let bare = MockPage::new("http://app.test");
        bare.capture_current_document_only();
        bare.install_console_capture().await.unwrap();
        bare.goto("http://app.test/auth/login").await.unwrap();
        bare.emit_console_error("lost");
        assert!(bare.console_errors().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_destroyed_context_fails_script_calls_only() {
        let page = MockPage::new("http://app.test");
        page.destroy_context();
        assert!(page.clear_storage().await.unwrap_err().is_context_destroyed());
        assert!(page.clear_cookies().await.is_ok());
    }
}
