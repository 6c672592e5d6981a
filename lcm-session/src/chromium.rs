//! [`BrowserPage`] over the Chrome DevTools Protocol.
//!
//! DOM access is done with small `page.evaluate` snippets. Selectors are
//! embedded as JSON string literals so quoting inside attribute selectors
//! survives.

use std::path::Path;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCookiesParams, EventResponseReceived,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde::de::DeserializeOwned;

use crate::driver::{BrowserPage, CookieInfo, DriverError, ObservedResponse, ResponseWaiter};

const CONSOLE_CAPTURE_SCRIPT: &str = r#"(() => {
  if (!window.__lcmConsoleErrors) {
    window.__lcmConsoleErrors = [];
    const original = console.error;
    console.error = function (...args) {
      window.__lcmConsoleErrors.push(args.map(String).join(' '));
      return original.apply(console, args);
    };
    window.addEventListener('error', (e) => window.__lcmConsoleErrors.push(String(e.message)));
  }
  return true;
})()"#;

/// Launch a headless Chromium and keep its CDP handler running.
///
/// `executable` overrides browser discovery.
pub async fn launch_browser(executable: Option<&Path>) -> Result<Browser, DriverError> {
    let mut builder = BrowserConfig::builder()
        .arg("--headless")
        .arg("--disable-gpu")
        .arg("--no-sandbox");
    if let Some(path) = executable {
        builder = builder.chrome_executable(path);
    }
    let config = builder.build().map_err(DriverError::Protocol)?;
    let (browser, mut handler) = Browser::launch(config).await.map_err(protocol)?;
    tokio::spawn(async move { while handler.next().await.is_some() {} });
    tracing::debug!("chromium launched");
    Ok(browser)
}

fn protocol(err: impl std::fmt::Display) -> DriverError {
    DriverError::from_protocol_message(err.to_string())
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// A Chromium tab.
#[derive(Debug, Clone)]
pub struct ChromiumPage {
    page: Page,
}

impl ChromiumPage {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// Open a blank tab in `browser`.
    pub async fn open(browser: &Browser) -> Result<Self, DriverError> {
        let page = browser.new_page("about:blank").await.map_err(protocol)?;
        Ok(Self::new(page))
    }

    pub fn inner(&self) -> &Page {
        &self.page
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T, DriverError> {
        self.page
            .evaluate(script)
            .await
            .map_err(protocol)?
            .into_value()
            .map_err(|e| DriverError::Script(e.to_string()))
    }

    /// Run `body` with `el` bound to the first match; fails when nothing matches.
    async fn with_element<T: DeserializeOwned>(
        &self,
        selector: &str,
        body: &str,
    ) -> Result<T, DriverError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return {{ missing: true }}; return {{ missing: false, value: (() => {{ {body} }})() }}; }})()",
            js_string(selector)
        );
        let raw: serde_json::Value = self.eval(script).await?;
        if raw.get("missing").and_then(serde_json::Value::as_bool) != Some(false) {
            return Err(DriverError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        serde_json::from_value(raw.get("value").cloned().unwrap_or_default())
            .map_err(|e| DriverError::Script(e.to_string()))
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    fn page_id(&self) -> String {
        self.page.target_id().inner().clone()
    }

    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| DriverError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self
            .page
            .url()
            .await
            .map_err(protocol)?
            .unwrap_or_default())
    }

    async fn is_visible(&self, selector: &str) -> Result<bool, DriverError> {
        self.eval(format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; const r = el.getBoundingClientRect(); const s = getComputedStyle(el); return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none'; }})()",
            js_string(selector)
        ))
        .await
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), DriverError> {
        let body = format!(
            "el.focus(); const setter = Object.getOwnPropertyDescriptor(Object.getPrototypeOf(el), 'value').set; setter.call(el, {}); el.dispatchEvent(new Event('input', {{ bubbles: true }})); el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true;",
            js_string(value)
        );
        self.with_element::<bool>(selector, &body).await.map(|_| ())
    }

    async fn input_value(&self, selector: &str) -> Result<String, DriverError> {
        self.with_element(selector, "return String(el.value ?? '');")
            .await
    }

    async fn blur(&self, selector: &str) -> Result<(), DriverError> {
        self.with_element::<bool>(
            selector,
            "el.blur(); el.dispatchEvent(new Event('blur')); return true;",
        )
        .await
        .map(|_| ())
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        self.with_element::<bool>(selector, "el.click(); return true;")
            .await
            .map(|_| ())
    }

    async fn is_enabled(&self, selector: &str) -> Result<bool, DriverError> {
        self.with_element(
            selector,
            "return !el.disabled && el.getAttribute('aria-disabled') !== 'true';",
        )
        .await
    }

    async fn visible_texts(&self, selector: &str) -> Result<Vec<String>, DriverError> {
        self.eval(format!(
            "Array.from(document.querySelectorAll({})).filter(el => el.offsetParent !== null).map(el => (el.innerText || '').trim()).filter(t => t.length > 0)",
            js_string(selector)
        ))
        .await
    }

    async fn expect_response(&self, url_fragment: &str) -> Result<ResponseWaiter, DriverError> {
        let mut events = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(protocol)?;
        let fragment = url_fragment.to_string();
        Ok(Box::pin(async move {
            while let Some(event) = events.next().await {
                if event.response.url.contains(&fragment) {
                    return Some(ObservedResponse {
                        url: event.response.url.clone(),
                        status: u16::try_from(event.response.status).unwrap_or(0),
                    });
                }
            }
            None
        }))
    }

    async fn cookies(&self) -> Result<Vec<CookieInfo>, DriverError> {
        let cookies = self.page.get_cookies().await.map_err(protocol)?;
        Ok(cookies
            .into_iter()
            .map(|c| CookieInfo {
                name: c.name,
                domain: c.domain,
                http_only: c.http_only,
                secure: c.secure,
            })
            .collect())
    }

    async fn fetch_status(&self, method: &str, path: &str) -> Result<u16, DriverError> {
        let script = format!(
            "fetch({}, {{ method: {}, credentials: 'include' }}).then(r => r.status).catch(() => 0)",
            js_string(path),
            js_string(method)
        );
        self.eval(script).await
    }

    async fn clear_cookies(&self) -> Result<(), DriverError> {
        self.page
            .execute(ClearBrowserCookiesParams::default())
            .await
            .map_err(protocol)?;
        Ok(())
    }

    async fn clear_storage(&self) -> Result<(), DriverError> {
        self.eval::<bool>(
            "(() => { localStorage.clear(); sessionStorage.clear(); return true; })()".to_string(),
        )
        .await
        .map(|_| ())
    }

    async fn screenshot(&self, path: &Path) -> Result<(), DriverError> {
        self.page
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), path)
            .await
            .map_err(protocol)?;
        Ok(())
    }

    async fn install_console_capture(&self) -> Result<(), DriverError> {
        self.page
            .evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(
                CONSOLE_CAPTURE_SCRIPT,
            ))
            .await
            .map_err(protocol)?;
        self.eval::<bool>(CONSOLE_CAPTURE_SCRIPT.to_string())
            .await
            .map(|_| ())
    }

    async fn console_errors(&self) -> Result<Vec<String>, DriverError> {
        self.eval("(window.__lcmConsoleErrors || []).slice()".to_string())
            .await
    }
}
