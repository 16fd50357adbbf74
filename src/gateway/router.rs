//! HTTP router and handlers for the BFF surface

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use serde_json::json;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowHeaders, AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::warn;

use super::cookies::SessionCookie;
use super::flow::AuthFlow;
use super::proxy::{PROXY_PREFIX, UpstreamProxy};
use crate::config::Config;
use crate::oauth::{ClaimsDecoder, JwtClaimsDecoder, TokenClient};
use crate::session::SessionStore;
use crate::{Error, Result};

/// Shared application state
pub struct AppState {
    /// Login/refresh/logout orchestration
    pub flow: AuthFlow,
    /// Upstream forwarding
    pub proxy: UpstreamProxy,
    /// Session cookie settings
    pub cookie: SessionCookie,
    /// Session store shared with the flow and the reaper
    pub store: Arc<dyn SessionStore>,
    /// Allowed CORS origin
    pub client_url: String,
    /// Per-request timeout
    pub request_timeout: std::time::Duration,
}

impl AppState {
    /// Wire the BFF from configuration.
    ///
    /// `http_client` is shared by the token client and the proxy; per-call
    /// timeouts come from the `identity` and `upstream` sections.
    pub fn new(
        config: &Config,
        http_client: reqwest::Client,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self::with_decoder(config, http_client, store, Arc::new(JwtClaimsDecoder))
    }

    /// Same as [`AppState::new`] with a custom claims decoder
    pub fn with_decoder(
        config: &Config,
        http_client: reqwest::Client,
        store: Arc<dyn SessionStore>,
        decoder: Arc<dyn ClaimsDecoder>,
    ) -> Self {
        let token_client = TokenClient::new(http_client.clone(), &config.identity.issuer_uri)
            .with_timeout(config.identity.timeout);
        let flow = AuthFlow::new(
            token_client,
            config.client_registration(),
            decoder,
            Arc::clone(&store),
            config.app.client_url.clone(),
        );
        let proxy = UpstreamProxy::new(
            http_client,
            &config.upstream.base_url,
            &config.upstream.api_prefix,
            config.upstream.timeout,
        );

        Self {
            flow,
            proxy,
            cookie: SessionCookie::new(
                config.session.cookie_name.clone(),
                config.session.secure_cookie,
            ),
            store,
            client_url: config.app.client_url.clone(),
            request_timeout: config.server.request_timeout,
        }
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.client_url);
    let request_timeout = state.request_timeout;

    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/auth/session/create", post(create_session_handler))
        .route("/v1/auth/session/codeUrl", get(code_url_handler))
        .route("/v1/auth/session/accessToken", get(callback_handler))
        .route("/v1/auth/session/refreshToken", get(refresh_handler))
        .route("/v1/auth/session/clear", post(clear_handler))
        .route("/v1/auth/me", get(me_handler))
        .route(PROXY_PREFIX, get(proxy_handler))
        .route(&format!("{PROXY_PREFIX}/{{*path}}"), get(proxy_handler))
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::GATEWAY_TIMEOUT,
            request_timeout,
        ))
        .layer(cors)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// CORS: single client origin with credentials
fn cors_layer(client_url: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    match HeaderValue::from_str(client_url.trim_end_matches('/')) {
        Ok(origin) => cors.allow_origin(AllowOrigin::exact(origin)),
        Err(e) => {
            warn!(client_url, error = %e, "Invalid client URL, cross-origin requests disabled");
            cors
        }
    }
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// POST /v1/auth/session/create
async fn create_session_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> impl IntoResponse {
    let (session, jar) = state
        .cookie
        .resolve_or_create(jar, state.store.as_ref())
        .await;
    (jar, Json(json!({ "sessionId": session.as_str() })))
}

/// GET /v1/auth/session/codeUrl
async fn code_url_handler(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let (session, jar) = state
        .cookie
        .resolve_or_create(jar, state.store.as_ref())
        .await;
    let result = state
        .flow
        .begin_login(&session)
        .await
        .map(|url| Json(json!({ "url": url })));
    with_cookie(jar, result)
}

/// Query of the provider redirect
#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: String,
}

/// GET /v1/auth/session/accessToken?code=...
async fn callback_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    let (session, jar) = state
        .cookie
        .resolve_or_create(jar, state.store.as_ref())
        .await;
    let result = state
        .flow
        .complete_login(&session, &params.code)
        .await
        .map(|()| Redirect::to(state.flow.client_url()));
    with_cookie(jar, result)
}

/// GET /v1/auth/session/refreshToken
async fn refresh_handler(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let (session, jar) = state
        .cookie
        .resolve_or_create(jar, state.store.as_ref())
        .await;
    let result = state.flow.refresh(&session).await.map(|()| StatusCode::OK);
    with_cookie(jar, result)
}

/// Respond with `jar` on success and failure alike, so a session allocated
/// by this request stays bound to the browser.
fn with_cookie<T: IntoResponse>(jar: CookieJar, result: Result<T>) -> Response {
    match result {
        Ok(body) => (jar, body).into_response(),
        Err(e) => (jar, e).into_response(),
    }
}

/// POST /v1/auth/session/clear
async fn clear_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<Response> {
    let session = state.cookie.session_id(&jar);
    let logout_url = state.flow.logout(session.as_ref()).await?;
    let jar = state.cookie.clear(jar);
    Ok((jar, Json(json!({ "logoutUrl": logout_url }))).into_response())
}

/// GET /v1/auth/me
async fn me_handler(State(state): State<Arc<AppState>>, jar: CookieJar) -> Result<Response> {
    let Some(session) = state.cookie.session_id(&jar) else {
        return Err(Error::missing_credential("Not authenticated"));
    };
    let identity = state
        .flow
        .whoami(&session)
        .await
        .ok_or_else(|| Error::missing_credential("Not authenticated"))?;

    Ok(Json(json!({
        "name": identity.name,
        "roles": identity.roles,
    }))
    .into_response())
}

/// GET /v1/proxy/**
async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    uri: Uri,
) -> Result<Response> {
    let access_token = match state.cookie.session_id(&jar) {
        Some(session) => state
            .store
            .get(&session)
            .await
            .and_then(|s| s.access_token),
        None => None,
    }
    .ok_or_else(|| Error::missing_credential("No access token in session"))?;

    state
        .proxy
        .forward(&access_token, uri.path(), uri.query())
        .await
}
