//! Shared fixtures for the session integration tests.

#![allow(dead_code)]

use std::time::Duration;

use lcm_common::logging::EventLog;
use lcm_common::testing::init_test_logging;
use lcm_session::{ClickScript, CookieInfo, MockPage, OrchestratorConfig, SessionOrchestrator};

pub const ORIGIN: &str = "http://app.test";
pub const SUBMIT: &str = r#"button[type="submit"]"#;
pub const ALERT: &str = r#"[role="alert"]"#;
pub const EMAIL: &str = r#"input[name="email"]"#;
pub const PASSWORD: &str = r#"input[name="password"]"#;
pub const HYDRATED: &str = r#"form[data-hydrated="true"]"#;
pub const LOGOUT: &str = r#"[data-testid="logout-button"]"#;

#[ctor::ctor]
fn setup() {
    init_test_logging();
}

pub fn orchestrator_with(config: OrchestratorConfig) -> (SessionOrchestrator, EventLog) {
    let log = EventLog::default();
    (SessionOrchestrator::new(config, log.clone()), log)
}

pub fn orchestrator() -> (SessionOrchestrator, EventLog) {
    orchestrator_with(OrchestratorConfig::new(ORIGIN))
}

/// Login page whose submit button runs `script`.
pub fn login_page_with(script: ClickScript) -> MockPage {
    let page = MockPage::login_page(ORIGIN);
    page.on_click(SUBMIT, script);
    page
}

/// Backend login response arriving 150ms after the click.
pub fn login_response(status: u16) -> ClickScript {
    ClickScript::new().respond(
        format!("{ORIGIN}/api/v1/auth/login"),
        status,
        Duration::from_millis(150),
    )
}

pub fn auth_cookie() -> CookieInfo {
    CookieInfo::http_only("lcm_access_token", "app.test")
}

/// Index of the first recorded call starting with `prefix`.
pub fn call_index(page: &MockPage, prefix: &str) -> Option<usize> {
    page.calls().iter().position(|c| c.starts_with(prefix))
}
