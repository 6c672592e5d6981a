//! `ApiClient` against an in-process axum stub of the auth endpoints.

mod common;

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use lcm_common::errors::{ErrorCode, ErrorKind};
use lcm_common::logging::EventLog;
use lcm_session::{ApiClient, CredentialSet, E2eEnvironment, SessionTimings};
use serde_json::json;

const USER: &str = "user@test.com";
const PASSWORD: &str = "Secret123!";

async fn login(Form(form): Form<HashMap<String, String>>) -> Response {
    let username = form.get("username").map(String::as_str);
    let password = form.get("password").map(String::as_str);
    match (username, password) {
        (Some(USER), Some(PASSWORD)) => (
            AppendHeaders([
                (
                    header::SET_COOKIE,
                    "lcm_access_token=acc-1; HttpOnly; Path=/; SameSite=Lax",
                ),
                (
                    header::SET_COOKIE,
                    "lcm_refresh_token=ref-1; HttpOnly; Path=/api/v1/auth",
                ),
            ]),
            Json(json!({ "access_token": "acc-1", "token_type": "bearer" })),
        )
            .into_response(),
        (Some("cookie-only@test.com"), Some(_)) => (
            [(header::SET_COOKIE, "lcm_access_token=acc-2; HttpOnly; Path=/")],
            StatusCode::NO_CONTENT,
        )
            .into_response(),
        (Some("bare@test.com"), Some(_)) => (StatusCode::OK, Json(json!({}))).into_response(),
        (None, _) | (_, None) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "detail": [
                { "loc": ["body", "username"], "msg": "field required", "type": "missing" }
            ]})),
        )
            .into_response(),
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "Invalid email or password" })),
        )
            .into_response(),
    }
}

async fn whoami(headers: HeaderMap) -> Response {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "Bearer acc-1");
    let cookie = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("lcm_access_token=acc-2"));
    if bearer || cookie {
        let email = if bearer { USER } else { "cookie-only@test.com" };
        Json(json!({ "email": email })).into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "Not authenticated" })),
        )
            .into_response()
    }
}

async fn start_stub() -> SocketAddr {
    let app = Router::new()
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/users/me", get(whoami));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn client() -> (ApiClient, EventLog) {
    let addr = start_stub().await;
    let log = EventLog::default();
    let client = ApiClient::new(&format!("http://{addr}/"), log.clone()).unwrap();
    (client, log)
}

#[tokio::test]
async fn login_returns_tokens_and_cookies() {
    let (client, _log) = client().await;

    let session = client.login(USER, PASSWORD).await.unwrap();

    assert_eq!(session.access_token.as_deref(), Some("acc-1"));
    assert_eq!(
        session.cookie_names(),
        vec!["lcm_access_token", "lcm_refresh_token"]
    );
    let me = client.whoami(&session).await.unwrap();
    assert_eq!(me["email"], USER);
}

#[tokio::test]
async fn client_from_environment_targets_backend_url() {
    let addr = start_stub().await;
    let env = E2eEnvironment {
        frontend_url: "http://127.0.0.1:1".to_string(),
        backend_url: format!("http://{addr}"),
        user: CredentialSet::new(USER, PASSWORD, false),
        admin: CredentialSet::new("admin@test.com", "Admin123!", true),
        user_pool: Vec::new(),
        worker_index: 0,
        timings: SessionTimings::default(),
        artifact_dir: None,
    };
    let client = ApiClient::from_environment(&env, EventLog::default()).unwrap();
    assert_eq!(client.base_url(), env.backend_url);

    let session = client.login(&env.user.email, &env.user.password).await.unwrap();
    assert_eq!(client.whoami(&session).await.unwrap()["email"], USER);
}

#[tokio::test]
async fn cookie_only_login_is_forwarded_on_whoami() {
    let (client, _log) = client().await;

    let session = client.login("cookie-only@test.com", "x").await.unwrap();

    assert!(session.access_token.is_none());
    assert!(session.has_credentials());
    let me = client.whoami(&session).await.unwrap();
    assert_eq!(me["email"], "cookie-only@test.com");
}

#[tokio::test]
async fn wrong_password_is_normalized() {
    let (client, log) = client().await;

    let err = client.login(USER, "wrong").await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Authentication);
    assert_eq!(err.status, Some(401));
    assert_eq!(err.message, "Invalid email or password");
    assert_eq!(err.code(), ErrorCode::ApiUnauthorized);
    assert_eq!(log.warn_count(), 1);
}

#[tokio::test]
async fn login_without_credentials_in_response_is_rejected() {
    let (client, _log) = client().await;

    let err = client.login("bare@test.com", "x").await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Authentication);
    assert_eq!(err.status, None);
}

#[tokio::test]
async fn whoami_without_session_is_unauthorized() {
    let (client, _log) = client().await;

    let err = client
        .whoami(&lcm_session::ApiSession::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Authentication);
    assert_eq!(err.message, "Not authenticated");
}

#[tokio::test]
async fn unreachable_backend_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = ApiClient::new(&format!("http://{addr}"), EventLog::default()).unwrap();

    let err = client.login(USER, PASSWORD).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Transport);
}
