//! Clearing cookies and web storage between tests.

use lcm_common::logging::{EventLog, LogSource};

use crate::driver::{BrowserPage, DriverError};

/// What a clear actually did. A destroyed context counts as already clean.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub cookies_cleared: bool,
    pub storage_cleared: bool,
}

/// Clear cookies plus local and session storage.
///
/// Idempotent. `DriverError::ContextDestroyed` from either step is logged at
/// debug and ignored so this can run during teardown after a navigation.
pub async fn clear_application_data(
    page: &dyn BrowserPage,
    log: &EventLog,
) -> Result<ClearReport, DriverError> {
    let cookies_cleared = tolerate_destroyed(log, "cookies", page.clear_cookies().await)?;
    let storage_cleared = tolerate_destroyed(log, "storage", page.clear_storage().await)?;
    log.debug(
        LogSource::AppData,
        format!("application data cleared (cookies={cookies_cleared}, storage={storage_cleared})"),
    );
    Ok(ClearReport {
        cookies_cleared,
        storage_cleared,
    })
}

fn tolerate_destroyed(
    log: &EventLog,
    what: &str,
    result: Result<(), DriverError>,
) -> Result<bool, DriverError> {
    match result {
        Ok(()) => Ok(true),
        Err(err) if err.is_context_destroyed() => {
            log.debug(
                LogSource::AppData,
                format!("skipping {what} clear: page context already destroyed"),
            );
            Ok(false)
        }
        Err(err) => Err(err),
    }
}
