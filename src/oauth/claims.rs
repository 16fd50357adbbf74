//! Identity claim extraction from tokens returned by the token endpoint.
//!
//! The identity token comes straight from the provider's token endpoint over
//! TLS, so only its payload is read here; signature checks on bearer tokens
//! happen on the resource server (see [`crate::resource::verifier`]).

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Identity claims copied into the session after login
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Display name (`name` claim)
    #[serde(default)]
    pub name: Option<String>,
    /// App roles (`roles` claim), in token order
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Claims of interest on an access token (debug logging only)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessTokenClaims {
    /// Space-delimited delegated scopes
    #[serde(default)]
    pub scp: Option<String>,
}

/// Decode a token and extract the claims the BFF cares about.
pub trait ClaimsDecoder: Send + Sync + 'static {
    /// Extract `name` and `roles` from an identity token
    fn identity_claims(&self, token: &str) -> Result<IdentityClaims>;

    /// Extract `scp` from an access token
    fn access_claims(&self, token: &str) -> Result<AccessTokenClaims>;
}

/// [`ClaimsDecoder`] for compact-serialized JWTs.
#[derive(Debug, Clone, Copy, Default)]
pub struct JwtClaimsDecoder;

#[derive(Deserialize)]
struct RawIdentityClaims {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    roles: Option<Vec<String>>,
}

impl ClaimsDecoder for JwtClaimsDecoder {
    fn identity_claims(&self, token: &str) -> Result<IdentityClaims> {
        let raw: RawIdentityClaims = decode_payload(token)?;
        Ok(IdentityClaims {
            name: raw.name,
            roles: raw.roles.unwrap_or_default(),
        })
    }

    fn access_claims(&self, token: &str) -> Result<AccessTokenClaims> {
        decode_payload(token)
    }
}

/// Base64url-decode and deserialize the payload segment of a JWT.
fn decode_payload<T: for<'de> Deserialize<'de>>(token: &str) -> Result<T> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::TokenDecode("token is not a compact JWT".to_string()));
    };

    // Tolerate padded payloads from non-conforming issuers
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::TokenDecode(format!("invalid payload encoding: {e}")))?;

    serde_json::from_slice(&bytes).map_err(|e| Error::TokenDecode(format!("invalid claims: {e}")))
}
