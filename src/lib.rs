//! BFF Gateway Library
//!
//! Backend-for-Frontend OAuth2 broker: the browser holds only an opaque session
//! cookie while access and refresh tokens stay server-side.
//!
//! # Features
//!
//! - **Authorization Code + PKCE**: S256 challenge, code exchange and refresh
//! - **Session Store**: per-session verifier and tokens with atomic updates and idle expiry
//! - **Authenticated Proxy**: forwards `/v1/proxy/**` upstream with the session's bearer token
//! - **Resource Server**: JWKS-verified bearer tokens mapped to scope/role authorities

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod oauth;
pub mod resource;
pub mod session;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
    }
}
