//! Shared helpers for integration tests: loopback stub servers and a BFF
//! configuration pointed at them.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Form, Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bff_gateway::config::Config;
use bff_gateway::gateway::{AppState, create_router};
use bff_gateway::session::{InMemorySessionStore, SessionStore};
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// Serve `router` on an ephemeral loopback port.
pub async fn spawn(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Unsigned compact JWT around `claims`
pub fn unsigned_jwt(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

/// Token endpoint stub. Records every form it receives.
#[derive(Clone, Default)]
pub struct StubIdentityProvider {
    pub forms: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

impl StubIdentityProvider {
    pub fn forms(&self) -> Vec<HashMap<String, String>> {
        self.forms.lock().unwrap().clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/tenant/oauth2/v2.0/token", post(token_handler))
            .with_state(self.clone())
    }
}

/// Refresh token the stub provider rejects with `invalid_grant`
pub const REJECTED_REFRESH_TOKEN: &str = "rt-bad";

/// Access token the stub issues on code exchange
pub fn issued_access_token() -> String {
    unsigned_jwt(&json!({ "scp": "Data.Read", "roles": ["role.alpha"] }))
}

async fn token_handler(
    State(idp): State<StubIdentityProvider>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    idp.forms.lock().unwrap().push(form.clone());

    match form.get("grant_type").map(String::as_str) {
        Some("authorization_code") if form.get("code").map(String::as_str) == Some("bad") => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_grant" })),
        )
            .into_response(),
        Some("authorization_code") => Json(json!({
            "access_token": issued_access_token(),
            "refresh_token": "rt-1",
            "id_token": unsigned_jwt(&json!({
                "name": "Ada Lovelace",
                "roles": ["role.alpha", "role.beta"],
            })),
            "token_type": "Bearer",
            "expires_in": 3600,
        }))
        .into_response(),
        Some("refresh_token")
            if form.get("refresh_token").map(String::as_str) == Some(REJECTED_REFRESH_TOKEN) =>
        {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid_grant" })),
            )
                .into_response()
        }
        Some("refresh_token") => Json(json!({
            "access_token": "at-2",
            "token_type": "Bearer",
            "expires_in": 3600,
        }))
        .into_response(),
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "unsupported_grant_type" })),
        )
            .into_response(),
    }
}

/// One request observed by [`StubUpstream`]
#[derive(Debug, Clone)]
pub struct UpstreamHit {
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub accept: Option<String>,
}

/// Resource server stub. Paths containing `forbidden` answer 403; paths
/// containing `slow` stall for [`SLOW_RESPONSE`] first.
#[derive(Clone, Default)]
pub struct StubUpstream {
    pub hits: Arc<Mutex<Vec<UpstreamHit>>>,
    pub count: Arc<AtomicUsize>,
}

impl StubUpstream {
    pub fn hits(&self) -> Vec<UpstreamHit> {
        self.hits.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/{*path}", get(upstream_handler))
            .with_state(self.clone())
    }
}

pub const FORBIDDEN_BODY: &str = r#"{"error":"forbidden"}"#;

/// How long the stub upstream stalls on `slow` paths
pub const SLOW_RESPONSE: Duration = Duration::from_secs(10);

async fn upstream_handler(
    State(upstream): State<StubUpstream>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    upstream.count.fetch_add(1, Ordering::SeqCst);
    let header_value = |name| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
    };
    upstream.hits.lock().unwrap().push(UpstreamHit {
        path: uri.path().to_string(),
        query: uri.query().map(ToString::to_string),
        authorization: header_value(header::AUTHORIZATION),
        accept: header_value(header::ACCEPT),
    });

    if uri.path().contains("slow") {
        tokio::time::sleep(SLOW_RESPONSE).await;
    }
    if uri.path().contains("forbidden") {
        return (
            StatusCode::FORBIDDEN,
            [(header::CONTENT_TYPE, "application/json")],
            FORBIDDEN_BODY,
        )
            .into_response();
    }
    Json(json!({ "source": "Data Backend", "path": uri.path() })).into_response()
}

/// BFF configuration against a stub provider and upstream
pub fn bff_config(idp: SocketAddr, upstream: &str) -> Config {
    let mut config = Config::default();
    config.identity.client_id = "client-123".to_string();
    config.identity.client_secret = "s3cret".to_string();
    config.identity.issuer_uri = format!("http://{idp}/tenant/v2.0");
    config.app.client_url = "http://localhost:3000".to_string();
    config.upstream.base_url = upstream.to_string();
    config
}

/// Router plus the store behind it
pub fn bff_app(config: &Config) -> (Router, Arc<dyn SessionStore>) {
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::default());
    let http_client = reqwest::Client::builder().no_proxy().build().unwrap();
    let state = Arc::new(AppState::new(config, http_client, Arc::clone(&store)));
    (create_router(state), store)
}

/// Value of the `name=value` pair in a `Set-Cookie` header
pub fn cookie_pair(response: &Response) -> String {
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
