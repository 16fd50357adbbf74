//! Downstream resource server: bearer authentication, authority gates and the
//! `/v1/data/*` endpoints the BFF proxies to.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{Request, State},
    http::header,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use super::authority::{DATA_READ, Principal};
use super::verifier::{JwksCache, JwksVerifier, TokenVerifier, VerifyError};
use crate::config::Config;
use crate::gateway::{drain_with_timeout, shutdown_signal};
use crate::{Error, Result};

/// Role required by `/v1/data/metrics`
pub const METRICS_ROLE: &str = "role.alpha";
/// Role required by `/v1/data/analytics`
pub const ANALYTICS_ROLE: &str = "role.beta";

/// Shared resource-server state
pub struct ResourceState {
    /// Token verifier; `None` runs every request as [`Principal::mock`]
    pub verifier: Option<Arc<dyn TokenVerifier>>,
}

/// Create the resource-server router
pub fn create_resource_router(state: Arc<ResourceState>) -> Router {
    let data = Router::new()
        .route(
            "/v1/data/metrics",
            get(metrics_handler)
                .route_layer(middleware::from_fn_with_state(METRICS_ROLE, require_authority)),
        )
        .route(
            "/v1/data/analytics",
            get(analytics_handler)
                .route_layer(middleware::from_fn_with_state(ANALYTICS_ROLE, require_authority)),
        )
        .route_layer(middleware::from_fn_with_state(DATA_READ, require_authority));

    Router::new()
        .merge(data)
        .layer(middleware::from_fn_with_state(state, authenticate))
        // Registered after the auth layer so it stays open
        .route("/health", get(health_handler))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Resolve the request principal from its bearer token.
async fn authenticate(
    State(state): State<Arc<ResourceState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(verifier) = &state.verifier else {
        request.extensions_mut().insert(Principal::mock());
        return next.run(request).await;
    };

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        });

    let Some(token) = token else {
        debug!(path = %request.uri().path(), "Missing bearer token");
        return VerifyError::MissingToken.into_response();
    };

    match verifier.verify(token).await {
        Ok(principal) => {
            debug!(subject = ?principal.subject, authorities = ?principal.authorities, "Authenticated request");
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(e) => {
            warn!(path = %request.uri().path(), error = %e, "Rejected bearer token");
            e.into_response()
        }
    }
}

/// Reject requests whose principal lacks `required`.
async fn require_authority(
    State(required): State<&'static str>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(principal) = request.extensions().get::<Principal>() else {
        return VerifyError::MissingToken.into_response();
    };
    if principal.authorities.contains(required) {
        next.run(request).await
    } else {
        warn!(subject = ?principal.subject, required, "Access denied");
        VerifyError::Forbidden(required.to_string()).into_response()
    }
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /v1/data/metrics
async fn metrics_handler(Extension(principal): Extension<Principal>) -> impl IntoResponse {
    debug!(subject = ?principal.subject, "Serving metrics");
    Json(json!({
        "source": "Data Backend",
        "type": "Metrics",
        "value": 1250,
        "status": "Healthy",
    }))
}

/// GET /v1/data/analytics
async fn analytics_handler(Extension(principal): Extension<Principal>) -> impl IntoResponse {
    debug!(subject = ?principal.subject, "Serving analytics");
    Json(json!({
        "source": "Data Backend",
        "type": "Analytics",
        "growth": "15%",
        "users": 5400,
    }))
}

/// Resource server
pub struct ResourceServer {
    config: Config,
}

impl ResourceServer {
    /// Create a new resource server
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Build the verifier the configuration asks for
    fn verifier(&self) -> Result<Option<Arc<dyn TokenVerifier>>> {
        if !self.config.resource.security_enabled {
            return Ok(None);
        }

        let issuer = self.config.resource_issuer();
        if issuer.trim().is_empty() {
            return Err(Error::Config(
                "resource.issuer or identity.issuer_uri is required when security is enabled"
                    .to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        let verifier = JwksVerifier::new(
            issuer,
            self.config.resource.audiences.clone(),
            self.config.resource_jwks_uri(),
            JwksCache::new(http, self.config.resource.jwks_cache_ttl),
        );
        Ok(Some(Arc::new(verifier)))
    }

    /// Run the resource server
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .resource
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.resource.port,
        );

        let verifier = self.verifier()?;
        if verifier.is_none() {
            warn!("SECURITY disabled - every request runs as a mock principal");
        }
        let app = create_resource_router(Arc::new(ResourceState { verifier }));

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        let listener = TcpListener::bind(addr).await?;

        info!(
            host = %self.config.resource.host,
            port = %self.config.resource.port,
            version = env!("CARGO_PKG_VERSION"),
            "Resource server listening"
        );
        if self.config.resource.security_enabled {
            info!(
                issuer = %self.config.resource_issuer(),
                jwks_uri = %self.config.resource_jwks_uri(),
                "Verifying bearer tokens"
            );
        }

        let server =
            axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()));
        drain_with_timeout(server, shutdown_tx, self.config.server.shutdown_timeout).await
    }
}
