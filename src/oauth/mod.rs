//! OAuth 2.0 client side of the BFF
//!
//! Implements the Authorization Code flow with PKCE (RFC 7636) against the
//! identity provider:
//! - PKCE verifier/challenge generation
//! - Authorize URL construction
//! - Code exchange and refresh against the token endpoint
//! - Identity claim extraction from returned tokens

pub mod claims;
pub mod client;
pub mod pkce;

pub use claims::{AccessTokenClaims, ClaimsDecoder, IdentityClaims, JwtClaimsDecoder};
pub use client::{ClientRegistration, IdentityEndpoints, TokenClient, TokenResponse, issuer_base};
pub use pkce::{derive_challenge, generate_verifier};
