//! Error types for the BFF gateway

use std::io;

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for the BFF gateway
pub type Result<T> = std::result::Result<T, Error>;

/// BFF gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No session credential where one is required
    #[error("{0}")]
    MissingCredential(String),

    /// Callback arrived without a pending login for this session
    #[error("Missing code_verifier in session")]
    MissingVerifier,

    /// Identity provider token endpoint rejected the request
    #[error("{operation} rejected by identity provider: HTTP {status} - {body}")]
    UpstreamAuth {
        /// Operation that failed (`token exchange`, `token refresh`)
        operation: &'static str,
        /// HTTP status returned by the provider
        status: u16,
        /// Raw provider response body (OAuth error code/description)
        body: String,
    },

    /// Refresh attempted without a stored refresh token
    #[error("No refresh token found")]
    NoRefreshToken,

    /// Session was cleared (or never existed) while the request was in flight
    #[error("Session not found")]
    SessionNotFound,

    /// Outbound call could not reach its target
    #[error("Network error: {0}")]
    Network(String),

    /// Identity token could not be decoded
    #[error("Token decode error: {0}")]
    TokenDecode(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a missing-credential error with the given message
    pub fn missing_credential(message: impl Into<String>) -> Self {
        Self::MissingCredential(message.into())
    }

    /// HTTP status this error maps to on the BFF surface
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingCredential(_) | Self::NoRefreshToken | Self::SessionNotFound => {
                StatusCode::UNAUTHORIZED
            }
            Self::MissingVerifier => StatusCode::BAD_REQUEST,
            Self::UpstreamAuth { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::TokenDecode(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            // Provider body is surfaced as-is so the caller sees the OAuth error payload
            Self::UpstreamAuth { body, .. } => {
                let content_type = if serde_json::from_str::<serde_json::Value>(&body).is_ok() {
                    "application/json"
                } else {
                    "text/plain; charset=utf-8"
                };
                (status, [(header::CONTENT_TYPE, content_type)], body).into_response()
            }
            Self::MissingCredential(_) | Self::NoRefreshToken | Self::SessionNotFound => {
                (status, self.to_string()).into_response()
            }
            Self::MissingVerifier => (status, self.to_string()).into_response(),
            other => {
                tracing::error!(error = %other, "Request failed");
                (status, Json(json!({ "error": other.to_string() }))).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_expected_statuses() {
        assert_eq!(
            Error::missing_credential("No access token in session").status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(Error::MissingVerifier.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::NoRefreshToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::SessionNotFound.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            Error::Network("connection refused".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn upstream_auth_keeps_provider_status() {
        let err = Error::UpstreamAuth {
            operation: "token exchange",
            status: 400,
            body: r#"{"error":"invalid_grant"}"#.to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[test]
    fn upstream_auth_with_bogus_status_becomes_bad_gateway() {
        let err = Error::UpstreamAuth {
            operation: "token refresh",
            status: 42,
            body: String::new(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }
}
