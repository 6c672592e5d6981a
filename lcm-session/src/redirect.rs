//! Post-login redirect resolution.
//!
//! After the login form is submitted the resolver waits (bounded, non-fatal)
//! for the URL to leave the login route, then classifies where the browser
//! landed:
//!
//! ```text
//! AwaitingRedirect ──► Success          expected route for the role
//!                 ├──► IntermediateHop  admin on the user dashboard
//!                 │        ├──► Success (follow-up redirect to /admin)
//!                 │        └──► Stalled
//!                 ├──► Stalled          still on the login route
//!                 └──► Unknown          anywhere else
//! ```

use std::sync::Mutex;
use std::time::Duration;

use lcm_common::logging::{EventLog, LogLevel, LogSource};
use lcm_common::poll::{PollPolicy, poll_simple};
use serde::Serialize;
use tokio::time::Instant;

use crate::credentials::Role;
use crate::driver::{BrowserPage, DriverError, url_path};

/// Application routes the resolver knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMap {
    pub login: String,
    pub user_home: String,
    pub admin_home: String,
    /// Other paths that render the login form, matched exactly.
    pub login_aliases: Vec<String>,
}

impl Default for RouteMap {
    fn default() -> Self {
        Self {
            login: "/auth/login".to_string(),
            user_home: "/dashboard".to_string(),
            admin_home: "/admin".to_string(),
            login_aliases: Vec::new(),
        }
    }
}

impl RouteMap {
    pub fn expected_for(&self, role: Role) -> &str {
        match role {
            Role::Admin => &self.admin_home,
            Role::User => &self.user_home,
        }
    }

    pub fn is_login(&self, path: &str) -> bool {
        path.contains(self.login.as_str())
            || self.login_aliases.iter().any(|alias| same_route(path, alias))
    }

    /// Treat the route a login started from as a login route too.
    ///
    /// Home routes are never aliased.
    pub fn with_entry_route(&self, entry_route: &str) -> Self {
        let mut routes = self.clone();
        let path = url_path(entry_route);
        if !path.is_empty()
            && !routes.is_login(&path)
            && !same_route(&path, &routes.user_home)
            && !same_route(&path, &routes.admin_home)
        {
            routes.login_aliases.push(path);
        }
        routes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectState {
    AwaitingRedirect,
    Success,
    IntermediateHop,
    Stalled,
    Unknown,
}

/// Where a login attempt ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "route", rename_all = "snake_case")]
pub enum RedirectOutcome {
    Success(String),
    /// Admin passed through the user dashboard before reaching `/admin`.
    IntermediateThenRedirected(String),
    StalledOnLogin,
    /// Somewhere else, e.g. an email-verification interstitial.
    UnexpectedRoute(String),
}

fn same_route(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

/// Classify a settled path.
pub fn classify_route(path: &str, role: Role, routes: &RouteMap) -> RedirectState {
    if same_route(path, routes.expected_for(role)) {
        RedirectState::Success
    } else if role.is_admin() && same_route(path, &routes.user_home) {
        RedirectState::IntermediateHop
    } else if routes.is_login(path) {
        RedirectState::Stalled
    } else {
        RedirectState::Unknown
    }
}

/// Outcome plus how the resolver got there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub outcome: RedirectOutcome,
    pub final_path: String,
    pub trail: Vec<RedirectState>,
    #[serde(skip)]
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct RedirectResolver {
    pub routes: RouteMap,
    /// Bound on waiting for the URL to leave the login route.
    pub redirect_timeout: Duration,
    /// Bound on the admin follow-up redirect after an intermediate hop.
    pub intermediate_hop_timeout: Duration,
    pub poll_interval: Duration,
    log: EventLog,
}

impl RedirectResolver {
    pub fn new(log: EventLog, routes: RouteMap, redirect_timeout: Duration) -> Self {
        Self {
            routes,
            redirect_timeout,
            intermediate_hop_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            log,
        }
    }

    pub fn with_intermediate_hop_timeout(mut self, timeout: Duration) -> Self {
        self.intermediate_hop_timeout = timeout;
        self
    }

    /// Wait for the page to leave `entry_route` (and the configured login
    /// route), then classify where it landed.
    pub async fn resolve(
        &self,
        page: &dyn BrowserPage,
        role: Role,
        entry_route: &str,
    ) -> Result<Resolution, DriverError> {
        let start = Instant::now();
        let mut trail = vec![RedirectState::AwaitingRedirect];

        let routes = &self.routes.with_entry_route(entry_route);
        let (left_login, mut path) = self
            .wait_for_path(page, "leave login route", self.redirect_timeout, |p| {
                !routes.is_login(p)
            })
            .await?;
        if !left_login {
            self.log.warn(
                LogSource::Redirect,
                format!("still on {} after {:?}", path, self.redirect_timeout),
            );
        }

        let state = classify_route(&path, role, routes);
        trail.push(state);
        let expected = routes.expected_for(role).to_string();

        let outcome = match state {
            RedirectState::Success => RedirectOutcome::Success(path.clone()),
            RedirectState::IntermediateHop => {
                self.log.info(
                    LogSource::Redirect,
                    format!("admin landed on {path}, waiting for follow-up redirect to {expected}"),
                );
                let (arrived, hop_path) = self
                    .wait_for_path(
                        page,
                        "follow-up redirect",
                        self.intermediate_hop_timeout,
                        |p| same_route(p, &expected),
                    )
                    .await?;
                path = hop_path;
                if arrived {
                    trail.push(RedirectState::Success);
                    RedirectOutcome::IntermediateThenRedirected(path.clone())
                } else {
                    trail.push(RedirectState::Stalled);
                    RedirectOutcome::StalledOnLogin
                }
            }
            RedirectState::Stalled => RedirectOutcome::StalledOnLogin,
            RedirectState::Unknown => {
                self.log.warn(
                    LogSource::Redirect,
                    format!("login navigated to unexpected route {path} (expected {expected})"),
                );
                RedirectOutcome::UnexpectedRoute(path.clone())
            }
            RedirectState::AwaitingRedirect => RedirectOutcome::StalledOnLogin,
        };

        let elapsed = start.elapsed();
        self.log.log_with_context(
            LogLevel::Info,
            LogSource::Redirect,
            format!("redirect resolved: {outcome:?}"),
            vec![
                ("final_path".to_string(), path.clone()),
                ("role".to_string(), role.to_string()),
                ("elapsed_ms".to_string(), elapsed.as_millis().to_string()),
            ],
        );

        Ok(Resolution {
            outcome,
            final_path: path,
            trail,
            elapsed,
        })
    }

    /// Poll the current path until `matches` holds or `timeout` elapses.
    ///
    /// Transient driver errors during navigation count as "not yet".
    async fn wait_for_path(
        &self,
        page: &dyn BrowserPage,
        label: &str,
        timeout: Duration,
        matches: impl Fn(&str) -> bool,
    ) -> Result<(bool, String), DriverError> {
        let last_path: Mutex<Option<String>> = Mutex::new(None);
        let last_ref = &last_path;
        let matches_ref = &matches;
        let policy = PollPolicy {
            max_attempts: attempts_for(timeout, self.poll_interval),
            interval: self.poll_interval,
            diagnostics_after: u32::MAX,
        };

        let outcome = poll_simple(&self.log, label, &policy, move || async move {
            match page.current_url().await {
                Ok(url) => {
                    let path = url_path(&url);
                    let hit = matches_ref(&path);
                    *last_ref.lock().unwrap_or_else(|p| p.into_inner()) = Some(path);
                    hit
                }
                Err(_) => false,
            }
        })
        .await;

        let last = last_path
            .into_inner()
            .unwrap_or_else(|p| p.into_inner());
        let path = match last {
            Some(path) => path,
            None => url_path(&page.current_url().await?),
        };
        Ok((outcome.condition_met, path))
    }
}

fn attempts_for(timeout: Duration, interval: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    let attempts = timeout.as_millis() / interval_ms + 1;
    u32::try_from(attempts).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_page::{ClickScript, MockPage};
    use proptest::prelude::*;

    const SUBMIT: &str = r#"button[type="submit"]"#;

    async fn submitted_page(script: ClickScript) -> MockPage {
        let page = MockPage::login_page("http://app.test");
        page.on_click(SUBMIT, script);
        page.goto("http://app.test/auth/login").await.unwrap();
        page.click(SUBMIT).await.unwrap();
        page
    }

    fn resolver() -> RedirectResolver {
        RedirectResolver::new(EventLog::default(), RouteMap::default(), Duration::from_secs(15))
    }

    #[test]
    fn test_classify_route_table() {
        let routes = RouteMap::default();
        assert_eq!(classify_route("/dashboard", Role::User, &routes), RedirectState::Success);
        assert_eq!(classify_route("/dashboard/", Role::User, &routes), RedirectState::Success);
        assert_eq!(classify_route("/admin", Role::Admin, &routes), RedirectState::Success);
        assert_eq!(
            classify_route("/dashboard", Role::Admin, &routes),
            RedirectState::IntermediateHop
        );
        assert_eq!(classify_route("/auth/login", Role::User, &routes), RedirectState::Stalled);
        assert_eq!(classify_route("/admin", Role::User, &routes), RedirectState::Unknown);
        assert_eq!(
            classify_route("/auth/verify-email", Role::User, &routes),
            RedirectState::Unknown
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_redirect_success() {
        let page =
            submitted_page(ClickScript::new().redirect_after(Duration::from_secs(2), "/dashboard"))
                .await;
        let resolution = resolver().resolve(&page, Role::User, "/auth/login").await.unwrap();
        assert_eq!(resolution.outcome, RedirectOutcome::Success("/dashboard".into()));
        assert_eq!(
            resolution.trail,
            vec![RedirectState::AwaitingRedirect, RedirectState::Success]
        );
        assert!(resolution.elapsed >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admin_intermediate_hop_then_admin() {
        let page = submitted_page(
            ClickScript::new()
                .redirect_after(Duration::from_millis(800), "/dashboard")
                .redirect_after(Duration::from_millis(1500), "/admin"),
        )
        .await;
        let resolution = resolver().resolve(&page, Role::Admin, "/auth/login").await.unwrap();
        assert_eq!(
            resolution.outcome,
            RedirectOutcome::IntermediateThenRedirected("/admin".into())
        );
        assert_eq!(
            resolution.trail,
            vec![
                RedirectState::AwaitingRedirect,
                RedirectState::IntermediateHop,
                RedirectState::Success
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_admin_hop_without_follow_up_stalls() {
        let page = submitted_page(
            ClickScript::new().redirect_after(Duration::from_millis(300), "/dashboard"),
        )
        .await;
        let resolution = resolver()
            .with_intermediate_hop_timeout(Duration::from_secs(2))
            .resolve(&page, Role::Admin, "/auth/login")
            .await
            .unwrap();
        assert_eq!(resolution.outcome, RedirectOutcome::StalledOnLogin);
        assert_eq!(resolution.trail.last(), Some(&RedirectState::Stalled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_on_login_is_bounded() {
        let page = submitted_page(ClickScript::new()).await;
        let log = EventLog::default();
        let resolver = RedirectResolver::new(log.clone(), RouteMap::default(), Duration::from_secs(3));
        let start = Instant::now();
        let resolution = resolver.resolve(&page, Role::User, "/auth/login").await.unwrap();
        assert_eq!(resolution.outcome, RedirectOutcome::StalledOnLogin);
        assert_eq!(resolution.final_path, "/auth/login");
        assert!(start.elapsed() <= Duration::from_secs(3));
        assert!(!log.search("still on /auth/login").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_route_is_returned_not_failed() {
        let page = submitted_page(
            ClickScript::new().redirect_after(Duration::from_millis(200), "/auth/verify-email"),
        )
        .await;
        // "/auth/verify-email" is not the login route, so the wait ends there.
        let resolution = resolver().resolve(&page, Role::User, "/auth/login").await.unwrap();
        assert_eq!(
            resolution.outcome,
            RedirectOutcome::UnexpectedRoute("/auth/verify-email".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_entry_route_stalls() {
        let page = MockPage::login_page("http://app.test");
        page.goto("http://app.test/login?next=/dashboard").await.unwrap();
        page.click(SUBMIT).await.unwrap();
        let resolver =
            RedirectResolver::new(EventLog::default(), RouteMap::default(), Duration::from_secs(3));

        let resolution = resolver
            .resolve(&page, Role::User, "/login?next=/dashboard")
            .await
            .unwrap();
        assert_eq!(resolution.outcome, RedirectOutcome::StalledOnLogin);
        assert_eq!(resolution.final_path, "/login");
        assert!(resolution.elapsed >= Duration::from_secs(3));
    }

    #[test]
    fn test_entry_route_aliasing() {
        let routes = RouteMap::default();
        let custom = routes.with_entry_route("/login?next=/admin");
        assert_eq!(custom.login_aliases, vec!["/login".to_string()]);
        assert_eq!(classify_route("/login", Role::User, &custom), RedirectState::Stalled);
        assert_eq!(classify_route("/login", Role::User, &routes), RedirectState::Unknown);
        assert!(routes.with_entry_route("/auth/login?next=/x").login_aliases.is_empty());
        assert!(routes.with_entry_route("/dashboard").login_aliases.is_empty());
    }

    #[test]
    fn test_attempts_for() {
        assert_eq!(attempts_for(Duration::from_secs(15), Duration::from_millis(100)), 151);
        assert_eq!(attempts_for(Duration::ZERO, Duration::from_millis(100)), 1);
    }

    proptest! {
        #[test]
        fn prop_expected_route_always_success(admin in any::<bool>(), trailing in any::<bool>()) {
            let routes = RouteMap::default();
            let role = Role::from_admin_flag(admin);
            let mut path = routes.expected_for(role).to_string();
            if trailing {
                path.push('/');
            }
            prop_assert_eq!(classify_route(&path, role, &routes), RedirectState::Success);
        }

        #[test]
        fn prop_login_paths_stall(suffix in "[a-z?=&]{0,12}") {
            let routes = RouteMap::default();
            let path = format!("/auth/login{suffix}");
            prop_assert_eq!(classify_route(&path, Role::User, &routes), RedirectState::Stalled);
            prop_assert_eq!(classify_route(&path, Role::Admin, &routes), RedirectState::Stalled);
        }
    }
}
