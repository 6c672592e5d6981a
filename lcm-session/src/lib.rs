//! Authenticated session establishment for LCM browser end-to-end tests.
//!
//! The entry point is [`SessionOrchestrator`], which drives a
//! [`BrowserPage`] through login, registration and logout with bounded
//! waits, resolves the post-login redirect and explains stalls with a
//! [`LoginFailureReport`]. [`WorkerFixture`] hands each worker process its
//! credentials.
//!
//! Pages come from the `chromium` module (feature `chromium`) or from
//! [`MockPage`] in tests.

pub mod api;
pub mod app_data;
#[cfg(feature = "chromium")]
pub mod chromium;
pub mod credentials;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod forms;
pub mod mock_page;
pub mod orchestrator;
pub mod redirect;

pub use api::{ApiClient, ApiSession};
pub use app_data::{ClearReport, clear_application_data};
pub use credentials::{CredentialSet, E2eEnvironment, Role, WorkerFixture};
pub use diagnostics::{DiagnosticsCollector, DiagnosticsConfig, LoginFailureReport, SessionEvidence};
pub use driver::{BrowserPage, CookieInfo, DriverError, ObservedResponse};
pub use error::{Result, SessionError};
pub use forms::{ButtonWait, FormSelectors};
pub use mock_page::{ClickScript, MockPage};
pub use orchestrator::{
    AuthPath, LoginRequest, LoginResult, OrchestratorConfig, RegistrationRequest,
    RegistrationResult, SessionOrchestrator, SessionTimings,
};
pub use redirect::{RedirectOutcome, RedirectResolver, Resolution, RouteMap};
