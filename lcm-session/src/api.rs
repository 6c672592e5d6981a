//! HTTP-level session establishment against the backend API.
//!
//! Used to seed sessions without a browser and to confirm a browser login
//! from the outside. Every non-2xx response is turned into a
//! [`NormalizedError`] before it leaves this module.

use std::fmt;
use std::time::Duration;

use lcm_common::errors::{ErrorKind, NormalizedError};
use lcm_common::logging::{EventLog, LogSource};
use reqwest::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use serde::Deserialize;

use crate::credentials::E2eEnvironment;

pub const LOGIN_PATH: &str = "/api/v1/auth/login";
pub const WHOAMI_PATH: &str = "/api/v1/users/me";

#[derive(Debug, Default, Deserialize)]
struct LoginBody {
    access_token: Option<String>,
    refresh_token: Option<String>,
    session_id: Option<String>,
}

/// Tokens and cookies returned by a successful login.
///
/// Tokens are absent when the backend only sets HttpOnly cookies.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ApiSession {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub session_id: Option<String>,
    pub cookies: Vec<(String, String)>,
}

impl ApiSession {
    pub fn cookie_names(&self) -> Vec<&str> {
        self.cookies.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// `Cookie` header value for forwarding the session.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn has_credentials(&self) -> bool {
        self.access_token.is_some() || !self.cookies.is_empty()
    }
}

impl fmt::Debug for ApiSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSession")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("session_id", &self.session_id)
            .field("cookies", &self.cookie_names())
            .finish()
    }
}

/// Parse `name=value` out of one `Set-Cookie` header value.
pub fn parse_set_cookie(raw: &str) -> Option<(String, String)> {
    let pair = raw.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    log: EventLog,
}

impl ApiClient {
    pub fn new(base_url: &str, log: EventLog) -> Result<Self, NormalizedError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| NormalizedError::new(ErrorKind::Configuration, e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            log,
        })
    }

    /// Client for the backend named by `LCM_E2E_BACKEND_URL`.
    pub fn from_environment(env: &E2eEnvironment, log: EventLog) -> Result<Self, NormalizedError> {
        Self::new(&env.backend_url, log)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `POST /api/v1/auth/login` with form-encoded `username`/`password`.
    pub async fn login(&self, email: &str, password: &str) -> Result<ApiSession, NormalizedError> {
        let response = self
            .http
            .post(self.url(LOGIN_PATH))
            .form(&[("username", email), ("password", password)])
            .send()
            .await
            .map_err(|e| NormalizedError::transport(e.to_string()))?;

        let status = response.status().as_u16();
        let cookies: Vec<(String, String)> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(parse_set_cookie)
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| NormalizedError::transport(e.to_string()))?;

        if !(200..300).contains(&status) {
            let err = NormalizedError::from_response(status, &body);
            self.log
                .warn(LogSource::Api, format!("login for {email} rejected: {err}"));
            return Err(err);
        }

        let parsed: LoginBody = if body.trim().is_empty() {
            LoginBody::default()
        } else {
            serde_json::from_str(&body).map_err(|e| {
                NormalizedError::new(ErrorKind::Unknown, format!("unexpected login body: {e}"))
            })?
        };

        let session = ApiSession {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token,
            session_id: parsed.session_id,
            cookies,
        };
        if !session.has_credentials() {
            return Err(NormalizedError::new(
                ErrorKind::Authentication,
                "login succeeded but returned neither a token nor a cookie",
            ));
        }
        self.log.info(
            LogSource::Api,
            format!("api login for {email} succeeded (cookies: {:?})", session.cookie_names()),
        );
        Ok(session)
    }

    /// `GET /api/v1/users/me` with the session's bearer token or cookies.
    pub async fn whoami(&self, session: &ApiSession) -> Result<serde_json::Value, NormalizedError> {
        let mut request = self.http.get(self.url(WHOAMI_PATH));
        if let Some(token) = &session.access_token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(cookie) = session.cookie_header() {
            request = request.header(COOKIE, cookie);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NormalizedError::transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| NormalizedError::transport(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(NormalizedError::from_response(status, &body));
        }
        serde_json::from_str(&body)
            .map_err(|e| NormalizedError::new(ErrorKind::Unknown, format!("unexpected whoami body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set_cookie() {
        assert_eq!(
            parse_set_cookie("lcm_access_token=abc.def; HttpOnly; Path=/; SameSite=Lax"),
            Some(("lcm_access_token".to_string(), "abc.def".to_string()))
        );
        assert_eq!(parse_set_cookie("=novalue"), None);
        assert_eq!(parse_set_cookie("garbage"), None);
    }

    #[test]
    fn test_session_debug_redacts_tokens() {
        let session = ApiSession {
            access_token: Some("secret-token".into()),
            refresh_token: None,
            session_id: Some("s-1".into()),
            cookies: vec![("lcm_refresh_token".into(), "r".into())],
        };
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("lcm_refresh_token"));
        assert_eq!(session.cookie_header().as_deref(), Some("lcm_refresh_token=r"));
    }
}
