//! Form interaction: fill with read-back verification, blur, submit gating.

use std::time::Duration;

use lcm_common::logging::{EventLog, LogLevel, LogSource};
use lcm_common::poll::{PollPolicy, poll_until};
use serde::Serialize;
use tokio::time::sleep;

use crate::driver::BrowserPage;
use crate::error::{Result, SessionError};

/// Selectors for the login and registration forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSelectors {
    pub form: String,
    pub hydration_marker: String,
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub confirm_password: String,
    pub submit: String,
    pub logout: String,
    /// Elements that carry inline validation or login error text.
    pub error_text: Vec<String>,
}

impl Default for FormSelectors {
    fn default() -> Self {
        Self {
            form: "form".to_string(),
            hydration_marker: r#"form[data-hydrated="true"]"#.to_string(),
            email: r#"input[name="email"]"#.to_string(),
            password: r#"input[name="password"]"#.to_string(),
            full_name: r#"input[name="full_name"]"#.to_string(),
            confirm_password: r#"input[name="confirmPassword"]"#.to_string(),
            submit: r#"button[type="submit"]"#.to_string(),
            logout: r#"[data-testid="logout-button"]"#.to_string(),
            error_text: vec![
                r#"[role="alert"]"#.to_string(),
                r#"[data-testid="login-error"]"#.to_string(),
                ".error-message".to_string(),
                ".text-destructive".to_string(),
                ".text-red-500".to_string(),
            ],
        }
    }
}

/// One field to fill. Secret values are masked in errors and logs.
#[derive(Debug, Clone, Copy)]
pub struct FieldInput<'a> {
    pub name: &'a str,
    pub selector: &'a str,
    pub value: &'a str,
    pub secret: bool,
}

impl<'a> FieldInput<'a> {
    pub fn plain(name: &'a str, selector: &'a str, value: &'a str) -> Self {
        Self {
            name,
            selector,
            value,
            secret: false,
        }
    }

    pub fn secret(name: &'a str, selector: &'a str, value: &'a str) -> Self {
        Self {
            name,
            selector,
            value,
            secret: true,
        }
    }

    fn render(&self, value: &str) -> String {
        if self.secret {
            format!("<{} chars>", value.chars().count())
        } else {
            format!("{value:?}")
        }
    }
}

/// Fill each field and read it back. A mismatch is a hard failure.
pub async fn fill_and_verify(
    page: &dyn BrowserPage,
    log: &EventLog,
    fields: &[FieldInput<'_>],
) -> Result<()> {
    for field in fields {
        page.fill(field.selector, field.value).await?;
        let actual = page.input_value(field.selector).await?;
        if actual != field.value {
            log.log_with_context(
                LogLevel::Error,
                LogSource::Forms,
                format!("field {} did not keep its value", field.name),
                vec![
                    ("expected".to_string(), field.render(field.value)),
                    ("actual".to_string(), field.render(&actual)),
                ],
            );
            return Err(SessionError::FieldMismatch {
                field: field.name.to_string(),
                expected: field.render(field.value),
                actual: field.render(&actual),
            });
        }
        log.debug(LogSource::Forms, format!("filled {}", field.name));
    }
    Ok(())
}

/// Blur every field, then give debounced validation time to settle.
pub async fn blur_and_settle(
    page: &dyn BrowserPage,
    fields: &[FieldInput<'_>],
    settle: Duration,
) -> Result<()> {
    for field in fields {
        page.blur(field.selector).await?;
    }
    if !settle.is_zero() {
        sleep(settle).await;
    }
    Ok(())
}

/// Result of waiting for a submit button to become enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ButtonWait {
    pub enabled: bool,
    #[serde(serialize_with = "serialize_ms")]
    pub wait_time: Duration,
    /// Visible validation messages seen while the button stayed disabled.
    pub diagnostics: Vec<String>,
}

fn serialize_ms<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Poll `selector` until it is enabled.
///
/// Probe errors count as "not enabled yet". After `policy.diagnostics_after`
/// attempts the visible validation messages are collected.
pub async fn wait_for_button_enabled(
    page: &dyn BrowserPage,
    log: &EventLog,
    selector: &str,
    error_selectors: &[String],
    policy: &PollPolicy,
) -> ButtonWait {
    let outcome = poll_until(
        log,
        &format!("button {selector} enabled"),
        policy,
        move || async move { page.is_enabled(selector).await.unwrap_or(false) },
        move || async move {
            let mut lines = Vec::new();
            for error_selector in error_selectors {
                if let Ok(texts) = page.visible_texts(error_selector).await {
                    lines.extend(texts);
                }
            }
            lines
        },
    )
    .await;

    ButtonWait {
        enabled: outcome.condition_met,
        wait_time: outcome.elapsed,
        diagnostics: outcome.diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_page::MockPage;

    #[tokio::test(start_paused = true)]
    async fn test_fill_and_verify_roundtrip() {
        let page = MockPage::login_page("http://app.test");
        let log = EventLog::default();
        let sel = FormSelectors::default();
        let fields = [
            FieldInput::plain("email", &sel.email, "user@test.com"),
            FieldInput::secret("password", &sel.password, "Secret123!"),
        ];
        fill_and_verify(&page, &log, &fields).await.unwrap();
        assert_eq!(page.input(&sel.email).as_deref(), Some("user@test.com"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_fill_is_field_mismatch_with_masked_secret() {
        let page = MockPage::login_page("http://app.test");
        let sel = FormSelectors::default();
        page.drop_next_fills(&sel.password, 1);
        let log = EventLog::default();
        let fields = [
            FieldInput::plain("email", &sel.email, "user@test.com"),
            FieldInput::secret("password", &sel.password, "Secret123!"),
        ];
        let err = fill_and_verify(&page, &log, &fields).await.unwrap_err();
        match &err {
            SessionError::FieldMismatch {
                field,
                expected,
                actual,
            } => {
                assert_eq!(field, "password");
                assert_eq!(expected, "<10 chars>");
                assert_eq!(actual, "<0 chars>");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!err.to_string().contains("Secret123!"));
        assert!(log.has_errors());
    }

    #[tokio::test(start_paused = true)]
    async fn test_button_enabled_on_fourth_poll() {
        let page = MockPage::login_page("http://app.test");
        let sel = FormSelectors::default();
        page.enable_after_probes(&sel.submit, 3);
        let log = EventLog::default();

        let wait = wait_for_button_enabled(
            &page,
            &log,
            &sel.submit,
            &sel.error_text,
            &PollPolicy::default(),
        )
        .await;

        assert!(wait.enabled);
        assert!(wait.wait_time >= Duration::from_millis(600));
        assert!(wait.wait_time <= Duration::from_millis(800));
        assert!(wait.diagnostics.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_button_never_enabled_collects_validation_text() {
        let page = MockPage::login_page("http://app.test");
        let sel = FormSelectors::default();
        page.set_enabled(&sel.submit, false);
        page.set_texts(".error-message", &["Passwords do not match"]);
        let log = EventLog::default();
        let policy = PollPolicy {
            max_attempts: 5,
            interval: Duration::from_millis(200),
            diagnostics_after: 2,
        };

        let wait = wait_for_button_enabled(&page, &log, &sel.submit, &sel.error_text, &policy).await;

        assert!(!wait.enabled);
        assert_eq!(wait.wait_time, Duration::from_millis(800));
        assert_eq!(wait.diagnostics, vec!["Passwords do not match"]);
    }
}
