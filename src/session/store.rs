//! Session token store: server-side state behind the browser's session cookie.
//!
//! The [`SessionStore`] trait abstracts over storage backends. The only current
//! implementation is [`InMemorySessionStore`], a `DashMap` keyed by session id
//! with lazy idle-expiry on access and a background reaper.
//!
//! # Atomicity
//!
//! Every mutation runs under the map's per-key write guard and replaces the
//! affected fields in one step, so a verifier can only be consumed once and a
//! token update is never observed half-applied. There is no lock spanning
//! sessions, and no guard is held across an `.await`.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use dashmap::DashMap;
use rand::Rng;
use tracing::debug;

use crate::oauth::IdentityClaims;
use crate::{Error, Result};

/// Opaque, server-generated session identifier.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a new random identifier (256 bits, base64url).
    #[must_use]
    pub fn generate() -> Self {
        let random_bytes: [u8; 32] = rand::rng().random();
        Self(URL_SAFE_NO_PAD.encode(random_bytes))
    }

    /// The identifier as sent in the session cookie
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Enough to correlate log lines without leaking the cookie value
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "SessionId({prefix}…)")
    }
}

/// Snapshot of one session's state.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// PKCE verifier of the in-flight login, if any
    pub code_verifier: Option<String>,
    /// Access token forwarded to the upstream resource server
    pub access_token: Option<String>,
    /// Refresh token used only for renewal
    pub refresh_token: Option<String>,
    /// Display name from the identity token
    pub user_name: Option<String>,
    /// Roles from the identity token, in token order
    pub roles: Vec<String>,
}

impl Session {
    /// Identity view for `whoami`: present only with tokens and a name.
    #[must_use]
    pub fn identity(&self) -> Option<IdentityClaims> {
        if self.access_token.is_none() {
            return None;
        }
        self.user_name.as_ref().map(|name| IdentityClaims {
            name: Some(name.clone()),
            roles: self.roles.clone(),
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("pending_login", &self.code_verifier.is_some())
            .field("has_access_token", &self.access_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("user_name", &self.user_name)
            .field("roles", &self.roles)
            .finish()
    }
}

/// Tokens and claims written after a successful code exchange.
#[derive(Clone, Default)]
pub struct SessionTokens {
    /// Access token
    pub access_token: String,
    /// Refresh token, if the provider issued one
    pub refresh_token: Option<String>,
    /// Identity claims (empty when no identity token was returned)
    pub claims: IdentityClaims,
}

/// Trait abstracting the session storage backend.
///
/// Implementations must be `Send + Sync` because the store is shared across
/// request handlers.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Allocate a new, empty session.
    async fn create(&self) -> SessionId;

    /// Current state of a session, or `None` if it does not exist.
    async fn get(&self, id: &SessionId) -> Option<Session>;

    /// Store the verifier for a new login, superseding any unconsumed one.
    async fn set_pending_verifier(&self, id: &SessionId, verifier: String) -> Result<()>;

    /// Take the pending verifier, leaving none behind.
    ///
    /// Fails with [`Error::MissingVerifier`] when there is nothing to consume.
    async fn consume_verifier(&self, id: &SessionId) -> Result<String>;

    /// Replace access token, refresh token and claims in one step.
    async fn set_tokens(&self, id: &SessionId, tokens: SessionTokens) -> Result<()>;

    /// Apply a refresh result: the access token is replaced, the refresh token
    /// only when rotated, and claims only when a new identity token arrived.
    async fn rotate_tokens(
        &self,
        id: &SessionId,
        access_token: String,
        refresh_token: Option<String>,
        claims: Option<IdentityClaims>,
    ) -> Result<()>;

    /// Erase all state and invalidate the identifier.
    ///
    /// Returns `true` if the session existed.
    async fn clear(&self, id: &SessionId) -> bool;

    /// Remove idle sessions. Called periodically by the background reaper.
    async fn reap_expired(&self) -> usize;
}

struct SessionRecord {
    session: Session,
    last_seen: Instant,
}

/// In-memory session store backed by a `DashMap`.
pub struct InMemorySessionStore {
    sessions: DashMap<SessionId, SessionRecord>,
    idle_timeout: Duration,
}

impl InMemorySessionStore {
    /// Create an empty store whose sessions expire after `idle_timeout` without use.
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            idle_timeout,
        }
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store holds no sessions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Run `f` against a live session under its write guard.
    ///
    /// Returns `None` when the session is missing or idle-expired (the latter is
    /// evicted on the spot).
    fn with_session<T>(&self, id: &SessionId, f: impl FnOnce(&mut Session) -> T) -> Option<T> {
        let result = {
            let mut entry = self.sessions.get_mut(id)?;
            if entry.last_seen.elapsed() >= self.idle_timeout {
                None
            } else {
                entry.last_seen = Instant::now();
                Some(f(&mut entry.session))
            }
        };

        if result.is_none() {
            // Lazy eviction; re-check under the removal guard in case it was touched meanwhile
            self.sessions
                .remove_if(id, |_, record| record.last_seen.elapsed() >= self.idle_timeout);
            debug!(session = ?id, "Lazy-evicted idle session");
        }
        result
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(30 * 60))
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self) -> SessionId {
        let id = SessionId::generate();
        self.sessions.insert(
            id.clone(),
            SessionRecord {
                session: Session::default(),
                last_seen: Instant::now(),
            },
        );
        debug!(session = ?id, "Session created");
        id
    }

    async fn get(&self, id: &SessionId) -> Option<Session> {
        self.with_session(id, |session| session.clone())
    }

    async fn set_pending_verifier(&self, id: &SessionId, verifier: String) -> Result<()> {
        self.with_session(id, |session| session.code_verifier = Some(verifier))
            .ok_or(Error::SessionNotFound)
    }

    async fn consume_verifier(&self, id: &SessionId) -> Result<String> {
        self.with_session(id, |session| session.code_verifier.take())
            .flatten()
            .ok_or(Error::MissingVerifier)
    }

    async fn set_tokens(&self, id: &SessionId, tokens: SessionTokens) -> Result<()> {
        self.with_session(id, move |session| {
            session.access_token = Some(tokens.access_token);
            session.refresh_token = tokens.refresh_token;
            session.user_name = tokens.claims.name;
            session.roles = tokens.claims.roles;
        })
        .ok_or(Error::SessionNotFound)
    }

    async fn rotate_tokens(
        &self,
        id: &SessionId,
        access_token: String,
        refresh_token: Option<String>,
        claims: Option<IdentityClaims>,
    ) -> Result<()> {
        self.with_session(id, move |session| {
            session.access_token = Some(access_token);
            if let Some(refresh_token) = refresh_token {
                session.refresh_token = Some(refresh_token);
            }
            if let Some(claims) = claims {
                session.user_name = claims.name;
                session.roles = claims.roles;
            }
        })
        .ok_or(Error::SessionNotFound)
    }

    async fn clear(&self, id: &SessionId) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            debug!(session = ?id, "Session cleared");
        }
        removed
    }

    async fn reap_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, record| record.last_seen.elapsed() < self.idle_timeout);
        before.saturating_sub(self.sessions.len())
    }
}

/// Spawn a background task that reaps idle sessions every `interval`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_reaper(
    store: Arc<dyn SessionStore>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = store.reap_expired().await;
                    if reaped > 0 {
                        debug!(count = reaped, "Reaped idle sessions");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Session reaper shutting down");
                    break;
                }
            }
        }
    });
}
