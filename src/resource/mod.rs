//! Downstream resource server
//!
//! Verifies bearer tokens issued by the identity provider, maps their `scp`
//! and `roles` claims to authorities, and gates the `/v1/data/*` endpoints.

pub mod authority;
pub mod server;
pub mod verifier;

pub use authority::{Authorities, DATA_READ, Principal, SCOPE_PREFIX};
pub use server::{ResourceServer, ResourceState, create_resource_router};
pub use verifier::{JwksCache, JwksVerifier, TokenVerifier, VerifyError};
