//! Claims-to-authority mapping for the resource server.
//!
//! Each whitespace-separated entry of `scp` becomes `SCOPE_<entry>`; each
//! entry of `roles` is taken verbatim. The result is a set.

use std::collections::HashSet;

/// Marker prepended to delegated scopes
pub const SCOPE_PREFIX: &str = "SCOPE_";

/// Authority required on every `/v1/data/**` endpoint
pub const DATA_READ: &str = "SCOPE_Data.Read";

/// Set of authorities held by a request principal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Authorities(HashSet<String>);

impl Authorities {
    /// Build from the `scp` and `roles` claims; absent claims contribute nothing.
    #[must_use]
    pub fn from_claims(scp: Option<&str>, roles: Option<&[String]>) -> Self {
        let scopes = scp
            .into_iter()
            .flat_map(str::split_whitespace)
            .map(|scope| format!("{SCOPE_PREFIX}{scope}"));
        let roles = roles.into_iter().flatten().cloned();
        Self(scopes.chain(roles).collect())
    }

    /// Exact-match membership check
    #[must_use]
    pub fn contains(&self, authority: &str) -> bool {
        self.0.contains(authority)
    }

    /// Number of distinct authorities
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no authority is held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Authorities {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Authenticated caller of the resource server
#[derive(Debug, Clone)]
pub struct Principal {
    /// `sub` claim, when present
    pub subject: Option<String>,
    /// Mapped authorities
    pub authorities: Authorities,
}

impl Principal {
    /// Stand-in principal used when token verification is switched off
    #[must_use]
    pub fn mock() -> Self {
        Self {
            subject: Some("Mock Developer".to_string()),
            authorities: ["role.alpha", "role.beta", DATA_READ].into_iter().collect(),
        }
    }
}
