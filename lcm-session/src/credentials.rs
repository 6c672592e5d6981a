//! Worker-scoped credentials loaded from `LCM_E2E_*` environment variables.
//!
//! A worker is one test process. The fixture is loaded once per process and
//! every caller receives the same object, so server-side per-account state
//! (session counts, rate-limit buckets) stays on one account per worker.
//! A configuration failure is cached too: every call fails the same way.

use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use lcm_common::config::{ConfigError, EnvError, EnvParser};
use serde::Serialize;
use tracing::{error, info};

use crate::orchestrator::SessionTimings;

/// Which destination a login should reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn from_admin_flag(is_admin: bool) -> Self {
        if is_admin { Self::Admin } else { Self::User }
    }

    pub fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// Immutable login identity.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSet {
    pub email: String,
    pub password: String,
    pub is_admin: bool,
}

impl CredentialSet {
    pub fn new(email: impl Into<String>, password: impl Into<String>, is_admin: bool) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            is_admin,
        }
    }

    pub fn role(&self) -> Role {
        Role::from_admin_flag(self.is_admin)
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("is_admin", &self.is_admin)
            .finish()
    }
}

/// Everything the helpers read from the environment.
#[derive(Debug, Clone)]
pub struct E2eEnvironment {
    pub frontend_url: String,
    pub backend_url: String,
    pub user: CredentialSet,
    pub admin: CredentialSet,
    /// Optional per-worker standard-user pool.
    pub user_pool: Vec<CredentialSet>,
    pub worker_index: u32,
    pub timings: SessionTimings,
    pub artifact_dir: Option<PathBuf>,
}

impl E2eEnvironment {
    /// Load from `LCM_E2E_*`. Every problem is reported in one error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_parser(EnvParser::new())
    }

    pub fn from_parser(mut parser: EnvParser) -> Result<Self, ConfigError> {
        let frontend_url = parser.get_required_url("FRONTEND_URL").into_inner();
        let backend_url = parser.get_required_url("BACKEND_URL").into_inner();
        let user_email = parser.get_required_string("USER_EMAIL").into_inner();
        let user_password = parser.get_required_string("USER_PASSWORD").into_inner();
        let admin_email = parser.get_required_string("ADMIN_EMAIL").into_inner();
        let admin_password = parser.get_required_string("ADMIN_PASSWORD").into_inner();

        let pool_emails = parser.get_string_list("USER_EMAILS", Vec::new());
        let pool_passwords = parser.get_string_list("USER_PASSWORDS", Vec::new());
        let worker_index = parser
            .get_u32_range("WORKER_INDEX", 0, 0, u32::MAX)
            .into_inner();

        let defaults = SessionTimings::default();
        let timings = SessionTimings {
            form_timeout: parser
                .get_duration_ms(
                    "FORM_TIMEOUT_MS",
                    defaults.form_timeout,
                    Duration::from_millis(100),
                    Duration::from_secs(120),
                )
                .into_inner(),
            hydration_timeout: parser
                .get_duration_ms(
                    "HYDRATION_TIMEOUT_MS",
                    defaults.hydration_timeout,
                    Duration::ZERO,
                    Duration::from_secs(120),
                )
                .into_inner(),
            hydration_grace: parser
                .get_duration_ms(
                    "HYDRATION_GRACE_MS",
                    defaults.hydration_grace,
                    Duration::ZERO,
                    Duration::from_secs(30),
                )
                .into_inner(),
            require_hydration_marker: parser
                .get_bool("REQUIRE_HYDRATION_MARKER", defaults.require_hydration_marker)
                .into_inner(),
            response_timeout: parser
                .get_duration_ms(
                    "RESPONSE_TIMEOUT_MS",
                    defaults.response_timeout,
                    Duration::from_millis(100),
                    Duration::from_secs(120),
                )
                .into_inner(),
            redirect_timeout: parser
                .get_duration_ms(
                    "REDIRECT_TIMEOUT_MS",
                    defaults.redirect_timeout,
                    Duration::from_millis(100),
                    Duration::from_secs(120),
                )
                .into_inner(),
            ..defaults
        };

        let artifact_dir = parser.get_optional_path("ARTIFACT_DIR").into_inner();

        let user_pool = build_pool(&pool_emails.value, &pool_passwords.value).unwrap_or_else(|| {
            let var = parser.full_name("USER_PASSWORDS");
            parser.record_error(EnvError::CredentialPoolMismatch {
                var,
                emails: pool_emails.value.len(),
                passwords: pool_passwords.value.len(),
            });
            Vec::new()
        });
        ConfigError::check(&mut parser)?;

        Ok(Self {
            frontend_url,
            backend_url,
            user: CredentialSet::new(user_email, user_password, false),
            admin: CredentialSet::new(admin_email, admin_password, true),
            user_pool,
            worker_index,
            timings,
            artifact_dir,
        })
    }
}

/// Pair pool emails with passwords. A single password is shared by all emails.
///
/// `None` when the counts cannot be paired.
fn build_pool(emails: &[String], passwords: &[String]) -> Option<Vec<CredentialSet>> {
    if emails.is_empty() {
        return Some(Vec::new());
    }
    match passwords.len() {
        1 => Some(emails
            .iter()
            .map(|email| CredentialSet::new(email.clone(), passwords[0].clone(), false))
            .collect()),
        n if n == emails.len() => Some(emails
            .iter()
            .zip(passwords)
            .map(|(email, password)| CredentialSet::new(email.clone(), password.clone(), false))
            .collect()),
        _ => None,
    }
}

/// Stable credentials for one worker process.
#[derive(Debug, Clone)]
pub struct WorkerFixture {
    environment: E2eEnvironment,
    user: CredentialSet,
}

static WORKER_FIXTURE: OnceLock<Result<WorkerFixture, ConfigError>> = OnceLock::new();

impl WorkerFixture {
    /// Select this worker's standard user from the pool, if one is configured.
    pub fn from_environment(environment: E2eEnvironment) -> Self {
        let user = if environment.user_pool.is_empty() {
            environment.user.clone()
        } else {
            let slot = environment.worker_index as usize % environment.user_pool.len();
            environment.user_pool[slot].clone()
        };
        Self { environment, user }
    }

    /// The process-wide fixture, loaded on first use.
    pub fn global() -> Result<&'static WorkerFixture, ConfigError> {
        WORKER_FIXTURE
            .get_or_init(|| match E2eEnvironment::from_env() {
                Ok(env) => {
                    let fixture = WorkerFixture::from_environment(env);
                    info!(
                        worker = fixture.worker_index(),
                        user = %fixture.user.email,
                        admin = %fixture.environment.admin.email,
                        "worker credentials loaded"
                    );
                    Ok(fixture)
                }
                Err(err) => {
                    error!(%err, "worker credentials unavailable");
                    Err(err)
                }
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn credentials(&self, role: Role) -> &CredentialSet {
        match role {
            Role::User => &self.user,
            Role::Admin => &self.environment.admin,
        }
    }

    pub fn environment(&self) -> &E2eEnvironment {
        &self.environment
    }

    pub fn worker_index(&self) -> u32 {
        self.environment.worker_index
    }
}
