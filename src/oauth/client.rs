//! Token Exchange Client
//!
//! Talks to the identity provider's `/oauth2/v2.0/*` endpoints: builds the
//! authorize URL, exchanges authorization codes and refreshes tokens.

use std::fmt;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::{Error, Result};

/// Version suffix some issuers are configured with (`.../{tenant}/v2.0`).
const ISSUER_VERSION_SUFFIX: &str = "/v2.0";

const AUTHORIZE_PATH: &str = "/oauth2/v2.0/authorize";
const TOKEN_PATH: &str = "/oauth2/v2.0/token";
const LOGOUT_PATH: &str = "/oauth2/v2.0/logout";

/// Strip a trailing slash and a trailing `/v2.0` from an issuer URL.
///
/// Idempotent: applying it to its own output returns the same value.
#[must_use]
pub fn issuer_base(issuer: &str) -> &str {
    let trimmed = issuer.trim_end_matches('/');
    trimmed
        .strip_suffix(ISSUER_VERSION_SUFFIX)
        .unwrap_or(trimmed)
        .trim_end_matches('/')
}

/// Identity provider endpoints derived from the configured issuer.
#[derive(Debug, Clone)]
pub struct IdentityEndpoints {
    base: String,
}

impl IdentityEndpoints {
    /// Derive endpoints from an issuer URL, with or without a version suffix
    #[must_use]
    pub fn from_issuer(issuer: &str) -> Self {
        Self {
            base: issuer_base(issuer).to_string(),
        }
    }

    /// Authorization endpoint
    #[must_use]
    pub fn authorize_endpoint(&self) -> String {
        format!("{}{AUTHORIZE_PATH}", self.base)
    }

    /// Token endpoint
    #[must_use]
    pub fn token_endpoint(&self) -> String {
        format!("{}{TOKEN_PATH}", self.base)
    }

    /// Provider logout URL that returns the browser to `post_logout_redirect`
    pub fn logout_url(&self, post_logout_redirect: &str) -> Result<String> {
        let mut url = Url::parse(&format!("{}{LOGOUT_PATH}", self.base))
            .map_err(|e| Error::Config(format!("Invalid issuer URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("post_logout_redirect_uri", post_logout_redirect);
        Ok(url.into())
    }
}

/// Registered client identity used on every token request
#[derive(Clone)]
pub struct ClientRegistration {
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret (confidential client)
    pub client_secret: String,
    /// Redirect URI registered with the provider
    pub redirect_uri: String,
    /// Space-delimited scope string
    pub scopes: String,
}

impl fmt::Debug for ClientRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistration")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Token endpoint response
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    /// Access token (opaque to the BFF)
    pub access_token: String,
    /// Refresh token; providers may omit it on refresh when not rotating
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// OIDC identity token carrying name/roles
    #[serde(default)]
    pub id_token: Option<String>,
    /// Token type (usually "Bearer")
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime of the access token in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Granted scopes
    #[serde(default)]
    pub scope: Option<String>,
    /// Provider-specific fields, passed through untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Client for the identity provider's authorize and token endpoints
pub struct TokenClient {
    /// HTTP client for token requests
    http_client: Client,
    /// Endpoints derived from the issuer
    endpoints: IdentityEndpoints,
    /// Per-request timeout on token calls
    timeout: Option<Duration>,
}

impl TokenClient {
    /// Create a token client for the given issuer
    #[must_use]
    pub fn new(http_client: Client, issuer_uri: &str) -> Self {
        Self {
            http_client,
            endpoints: IdentityEndpoints::from_issuer(issuer_uri),
            timeout: None,
        }
    }

    /// Bound every token request by `timeout`
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Provider endpoints
    #[must_use]
    pub fn endpoints(&self) -> &IdentityEndpoints {
        &self.endpoints
    }

    /// Build the authorization URL for a PKCE login
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configured issuer is not a valid URL.
    pub fn build_authorize_url(
        &self,
        client_id: &str,
        redirect_uri: &str,
        challenge: &str,
        scopes: &str,
    ) -> Result<String> {
        let mut auth_url = Url::parse(&self.endpoints.authorize_endpoint())
            .map_err(|e| Error::Config(format!("Invalid auth endpoint: {e}")))?;

        {
            let mut params = auth_url.query_pairs_mut();
            params.append_pair("client_id", client_id);
            params.append_pair("response_type", "code");
            params.append_pair("redirect_uri", redirect_uri);
            params.append_pair("response_mode", "query");
            params.append_pair("scope", scopes);
            params.append_pair("code_challenge", challenge);
            params.append_pair("code_challenge_method", "S256");
        }

        Ok(auth_url.into())
    }

    /// Exchange an authorization code for tokens
    ///
    /// # Errors
    ///
    /// [`Error::UpstreamAuth`] when the provider rejects the request (body kept),
    /// [`Error::Network`] when the token endpoint is unreachable.
    pub async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        registration: &ClientRegistration,
    ) -> Result<TokenResponse> {
        let params = [
            ("client_id", registration.client_id.as_str()),
            ("client_secret", registration.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", registration.redirect_uri.as_str()),
            ("code_verifier", verifier),
            ("scope", registration.scopes.as_str()),
        ];

        let tokens = self.post_token_form("token exchange", &params).await?;
        info!(
            has_refresh_token = tokens.refresh_token.is_some(),
            has_id_token = tokens.id_token.is_some(),
            "Authorization code exchanged"
        );
        Ok(tokens)
    }

    /// Refresh tokens with a stored refresh token
    ///
    /// The response may not carry a new refresh token; callers keep the old one.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`TokenClient::exchange_code`].
    pub async fn refresh(
        &self,
        refresh_token: &str,
        registration: &ClientRegistration,
    ) -> Result<TokenResponse> {
        let params = [
            ("client_id", registration.client_id.as_str()),
            ("client_secret", registration.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", registration.scopes.as_str()),
        ];

        let tokens = self.post_token_form("token refresh", &params).await?;
        info!(rotated = tokens.refresh_token.is_some(), "Token refreshed");
        Ok(tokens)
    }

    /// POST a form to the token endpoint and parse the response
    async fn post_token_form(
        &self,
        operation: &'static str,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse> {
        let token_endpoint = self.endpoints.token_endpoint();
        debug!(endpoint = %token_endpoint, operation, "Calling token endpoint");

        let mut request = self.http_client.post(&token_endpoint).form(params);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("{operation} request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(operation, status, "Identity provider rejected token request");
            return Err(Error::UpstreamAuth {
                operation,
                status,
                body,
            });
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::Internal(format!("Failed to parse {operation} response: {e}")))
    }
}
