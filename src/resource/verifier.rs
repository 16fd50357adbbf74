//! Bearer-token verification: JWT signature validation and JWKS caching.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to extract `kid` and `alg`.
//! 2. Fetch the issuer's JWKS (cached; refreshed once on unknown `kid`).
//! 3. Verify the signature and standard claims (`exp`, `nbf`, `iss`).
//! 4. Check the audience against the configured list, if any.
//! 5. Map `scp`/`roles` onto an [`Authorities`] set.
//!
//! Clock leeway of 60 seconds tolerates minor clock skew between the IdP and
//! this host.

use std::time::{Duration, Instant};

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use jsonwebtoken::{
    Algorithm, DecodingKey, Header, TokenData, Validation,
    jwk::{AlgorithmParameters, JwkSet},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::authority::{Authorities, Principal};

/// Error variants for bearer-token verification and authorization.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// No bearer token on the request.
    #[error("Missing bearer token")]
    MissingToken,

    /// JWT decode / signature / claim validation failed.
    #[error("JWT verification failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// The JWT header contains no `kid` field.
    #[error("JWT missing 'kid' field in header")]
    MissingKeyId,

    /// The `kid` in the JWT header is not in the issuer's JWKS.
    #[error("Unknown key ID: {0}")]
    UnknownKeyId(String),

    /// Network or HTTP error while fetching JWKS.
    #[error("JWKS fetch error: {0}")]
    Jwks(#[from] reqwest::Error),

    /// Token is valid but lacks a required authority.
    #[error("Missing required authority: {0}")]
    Forbidden(String),
}

impl VerifyError {
    /// HTTP status for this failure
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for VerifyError {
    fn into_response(self) -> Response {
        let challenge = match &self {
            Self::MissingToken => "Bearer",
            Self::Forbidden(_) => r#"Bearer error="insufficient_scope""#,
            _ => r#"Bearer error="invalid_token""#,
        };
        (
            self.status_code(),
            [(header::WWW_AUTHENTICATE, challenge)],
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// Verifies a bearer token and yields the calling principal.
#[async_trait::async_trait]
pub trait TokenVerifier: Send + Sync + 'static {
    /// Verify `token` and map its claims to authorities.
    async fn verify(&self, token: &str) -> Result<Principal, VerifyError>;
}

/// Claims read from a verified access token.
#[derive(Debug, Deserialize)]
struct AccessClaims {
    /// Subject
    #[serde(default)]
    sub: Option<String>,
    /// Audience (may be a single string or an array)
    #[serde(default)]
    aud: serde_json::Value,
    /// Delegated scopes, space-delimited
    #[serde(default)]
    scp: Option<String>,
    /// App roles
    #[serde(default)]
    roles: Option<Vec<String>>,
}

/// Cached JWKS entry.
struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// JWKS cache, one entry per JWKS URI.
pub struct JwksCache {
    inner: DashMap<String, CachedJwks>,
    http: reqwest::Client,
    /// How long to cache a fetched JWKS.
    ttl: Duration,
}

impl JwksCache {
    /// Create a cache fetching with `http` and keeping key sets for `ttl`.
    #[must_use]
    pub fn new(http: reqwest::Client, ttl: Duration) -> Self {
        Self {
            inner: DashMap::new(),
            http,
            ttl,
        }
    }

    /// Return the cached JWKS for `jwks_uri`, or fetch it if stale.
    ///
    /// If `force_refresh` is `true`, the cache is bypassed regardless of TTL.
    pub async fn get_or_fetch(
        &self,
        jwks_uri: &str,
        force_refresh: bool,
    ) -> Result<JwkSet, VerifyError> {
        if !force_refresh {
            if let Some(cached) = self.inner.get(jwks_uri) {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(cached.keys.clone());
                }
            }
        }

        debug!(jwks_uri = %jwks_uri, "Fetching JWKS");
        let jwks: JwkSet = self
            .http
            .get(jwks_uri)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        self.inner.insert(
            jwks_uri.to_string(),
            CachedJwks {
                keys: jwks.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(jwks)
    }
}

/// [`TokenVerifier`] backed by the issuer's published signing keys.
pub struct JwksVerifier {
    issuer: String,
    audiences: Vec<String>,
    jwks_uri: String,
    jwks_cache: JwksCache,
}

impl JwksVerifier {
    /// Create a verifier for tokens from `issuer`, signed by keys at `jwks_uri`.
    ///
    /// An empty `audiences` list disables the audience check.
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        audiences: Vec<String>,
        jwks_uri: impl Into<String>,
        jwks_cache: JwksCache,
    ) -> Self {
        let issuer = issuer.into();
        if !issuer.starts_with("https://") {
            warn!(issuer = %issuer, "Token issuer is not HTTPS");
        }
        if audiences.is_empty() {
            warn!("No audiences configured; token audience is not checked");
        }
        Self {
            issuer,
            audiences,
            jwks_uri: jwks_uri.into(),
            jwks_cache,
        }
    }

    /// Find a decoding key by `kid`, refreshing the JWKS cache if not found.
    async fn find_decoding_key(&self, kid: &str) -> Result<DecodingKey, VerifyError> {
        // Try cached JWKS first
        let jwks = self.jwks_cache.get_or_fetch(&self.jwks_uri, false).await?;
        if let Some(key) = find_key_in_jwks(&jwks, kid) {
            return Ok(key);
        }

        // Unknown kid: refresh once and retry
        debug!(kid = %kid, "Key not found in cached JWKS, refreshing");
        let jwks = self.jwks_cache.get_or_fetch(&self.jwks_uri, true).await?;
        find_key_in_jwks(&jwks, kid).ok_or_else(|| VerifyError::UnknownKeyId(kid.to_string()))
    }
}

#[async_trait::async_trait]
impl TokenVerifier for JwksVerifier {
    async fn verify(&self, token: &str) -> Result<Principal, VerifyError> {
        let header = jsonwebtoken::decode_header(token)?;
        let kid = header.kid.clone().ok_or(VerifyError::MissingKeyId)?;
        let decoding_key = self.find_decoding_key(&kid).await?;

        let mut validation = build_validation(&header);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        // Audience is checked manually below to accept both string and array forms
        validation.validate_aud = false;

        let token_data: TokenData<AccessClaims> =
            jsonwebtoken::decode(token, &decoding_key, &validation)?;
        let claims = token_data.claims;

        if !self.audiences.is_empty() {
            check_audience(&claims.aud, &self.audiences)?;
        }

        Ok(Principal {
            subject: claims.sub,
            authorities: Authorities::from_claims(claims.scp.as_deref(), claims.roles.as_deref()),
        })
    }
}

/// Find a JWK by `kid` in a `JwkSet` and convert it to a `DecodingKey`.
fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    let jwk = jwks
        .keys
        .iter()
        .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))?;

    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
        AlgorithmParameters::EllipticCurve(ec) => {
            DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
        }
        // Symmetric keys are never accepted from a published key set
        AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
    }
}

/// Build a [`Validation`] from the JWT header algorithm.
fn build_validation(header: &Header) -> Validation {
    let alg = match header.alg {
        Algorithm::RS256 => Algorithm::RS256,
        Algorithm::RS384 => Algorithm::RS384,
        Algorithm::RS512 => Algorithm::RS512,
        Algorithm::ES256 => Algorithm::ES256,
        Algorithm::ES384 => Algorithm::ES384,
        other => {
            warn!(alg = ?other, "Unsupported JWT algorithm, defaulting to RS256");
            Algorithm::RS256
        }
    };

    let mut v = Validation::new(alg);
    v.leeway = 60; // 60-second clock skew tolerance
    v
}

/// Validate that the token's `aud` claim contains one of the expected audiences.
fn check_audience(aud_claim: &serde_json::Value, expected: &[String]) -> Result<(), VerifyError> {
    let matches = match aud_claim {
        serde_json::Value::String(s) => expected.iter().any(|e| e == s),
        serde_json::Value::Array(arr) => arr
            .iter()
            .any(|v| v.as_str().is_some_and(|s| expected.iter().any(|e| e == s))),
        _ => false,
    };

    if matches {
        Ok(())
    } else {
        Err(VerifyError::Jwt(jsonwebtoken::errors::Error::from(
            jsonwebtoken::errors::ErrorKind::InvalidAudience,
        )))
    }
}
