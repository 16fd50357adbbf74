//! Authenticated reverse proxy to the single upstream resource server.
//!
//! `GET /v1/proxy/<rest>?<query>` is forwarded to
//! `<upstream>/<api_prefix>/<rest>?<query>` with the session's access token as
//! bearer credential. The upstream status, body bytes and content type are
//! relayed unchanged; no refresh or retry happens on this path.

use std::time::Duration;

use axum::{
    body::Body,
    http::{StatusCode, header},
    response::Response,
};
use reqwest::Client;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Path prefix reserved for proxied requests on the BFF surface
pub const PROXY_PREFIX: &str = "/v1/proxy";

/// Forwards requests to the upstream resource server.
#[derive(Debug, Clone)]
pub struct UpstreamProxy {
    http_client: Client,
    base_url: String,
    api_prefix: String,
    timeout: Duration,
}

impl UpstreamProxy {
    /// Create a proxy for `base_url`, normalizing paths onto `api_prefix`
    pub fn new(http_client: Client, base_url: &str, api_prefix: &str, timeout: Duration) -> Self {
        let api_prefix = api_prefix.trim_end_matches('/');
        let api_prefix = if api_prefix.is_empty() || api_prefix.starts_with('/') {
            api_prefix.to_string()
        } else {
            format!("/{api_prefix}")
        };

        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_prefix,
            timeout,
        }
    }

    /// Rewrite an inbound BFF path to the upstream path.
    ///
    /// The reserved prefix is removed and the result carries exactly one API
    /// version prefix, whether or not the caller already included it.
    #[must_use]
    pub fn rewrite_path(&self, inbound_path: &str) -> String {
        let rest = inbound_path
            .strip_prefix(PROXY_PREFIX)
            .unwrap_or(inbound_path);

        let prefix = self.api_prefix.as_str();
        let rest = if prefix.is_empty() {
            rest
        } else if rest == prefix {
            ""
        } else {
            rest.strip_prefix(prefix)
                .filter(|r| r.starts_with('/'))
                .unwrap_or(rest)
        };

        if rest.is_empty() {
            if prefix.is_empty() { "/".to_string() } else { prefix.to_string() }
        } else if rest.starts_with('/') {
            format!("{prefix}{rest}")
        } else {
            format!("{prefix}/{rest}")
        }
    }

    /// Full upstream URL, with the query string appended verbatim
    #[must_use]
    pub fn upstream_url(&self, inbound_path: &str, query: Option<&str>) -> String {
        let path = self.rewrite_path(inbound_path);
        match query {
            Some(q) if !q.is_empty() => format!("{}{path}?{q}", self.base_url),
            _ => format!("{}{path}", self.base_url),
        }
    }

    /// Forward a GET with `access_token` as bearer and relay the response.
    ///
    /// # Errors
    ///
    /// [`Error::Network`] when the upstream cannot be reached. Non-2xx upstream
    /// responses are not errors; they are relayed as-is.
    pub async fn forward(
        &self,
        access_token: &str,
        inbound_path: &str,
        query: Option<&str>,
    ) -> Result<Response> {
        let url = self.upstream_url(inbound_path, query);
        debug!(url = %url, "Proxying request upstream");

        let upstream = self
            .http_client
            .get(&url)
            .bearer_auth(access_token)
            .header(header::ACCEPT, "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Upstream unreachable");
                Error::Network(format!("Proxy request failed: {e}"))
            })?;

        let status = StatusCode::from_u16(upstream.status().as_u16())
            .map_err(|e| Error::Internal(format!("Invalid upstream status: {e}")))?;
        let content_type = upstream.headers().get(header::CONTENT_TYPE).cloned();
        let body = upstream
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("Failed to read upstream body: {e}")))?;

        if !status.is_success() {
            debug!(status = status.as_u16(), "Relaying upstream error response");
        }

        let mut builder = Response::builder().status(status);
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        builder
            .body(Body::from(body))
            .map_err(|e| Error::Internal(format!("Failed to build response: {e}")))
    }
}
