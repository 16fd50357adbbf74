//! Authorization flow orchestrator
//!
//! Drives one session through `ANONYMOUS → PENDING_CALLBACK → AUTHENTICATED`
//! and back:
//! - [`AuthFlow::begin_login`] mints a PKCE pair and returns the authorize URL
//! - [`AuthFlow::complete_login`] consumes the verifier and exchanges the code
//! - [`AuthFlow::refresh`] renews tokens in place
//! - [`AuthFlow::logout`] erases the session and returns the provider logout URL
//! - [`AuthFlow::whoami`] reads the stored identity

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::oauth::{
    ClaimsDecoder, ClientRegistration, IdentityClaims, TokenClient, derive_challenge,
    generate_verifier,
};
use crate::session::{SessionId, SessionStore, SessionTokens};
use crate::{Error, Result};

/// Login/refresh/logout orchestration over a [`SessionStore`].
pub struct AuthFlow {
    token_client: TokenClient,
    registration: ClientRegistration,
    decoder: Arc<dyn ClaimsDecoder>,
    store: Arc<dyn SessionStore>,
    client_url: String,
}

impl AuthFlow {
    /// Create a new flow orchestrator
    pub fn new(
        token_client: TokenClient,
        registration: ClientRegistration,
        decoder: Arc<dyn ClaimsDecoder>,
        store: Arc<dyn SessionStore>,
        client_url: impl Into<String>,
    ) -> Self {
        Self {
            token_client,
            registration,
            decoder,
            store,
            client_url: client_url.into(),
        }
    }

    /// Client application landing URL (post-login redirect target)
    #[must_use]
    pub fn client_url(&self) -> &str {
        &self.client_url
    }

    /// Session store backing this flow
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Start a login: store a fresh verifier and return the authorize URL.
    ///
    /// Each call supersedes any pending login on the same session.
    pub async fn begin_login(&self, session: &SessionId) -> Result<String> {
        let verifier = generate_verifier();
        let challenge = derive_challenge(&verifier);

        let url = self.token_client.build_authorize_url(
            &self.registration.client_id,
            &self.registration.redirect_uri,
            &challenge,
            &self.registration.scopes,
        )?;

        self.store.set_pending_verifier(session, verifier).await?;
        debug!(session = ?session, "Login started");
        Ok(url)
    }

    /// Finish a login from the provider callback.
    ///
    /// The verifier is consumed before the exchange, so a failed exchange
    /// requires a fresh [`AuthFlow::begin_login`].
    pub async fn complete_login(&self, session: &SessionId, code: &str) -> Result<()> {
        let verifier = self.store.consume_verifier(session).await?;

        let tokens = self
            .token_client
            .exchange_code(code, &verifier, &self.registration)
            .await?;

        let claims = match tokens.id_token.as_deref() {
            Some(id_token) => self.decoder.identity_claims(id_token)?,
            None => IdentityClaims::default(),
        };

        // Access tokens may be opaque; scopes are logged only when readable
        match self.decoder.access_claims(&tokens.access_token) {
            Ok(access) => debug!(scp = ?access.scp, "Access token scopes"),
            Err(e) => debug!(error = %e, "Access token is not a decodable JWT"),
        }

        self.store
            .set_tokens(
                session,
                SessionTokens {
                    access_token: tokens.access_token,
                    refresh_token: tokens.refresh_token,
                    claims,
                },
            )
            .await?;

        info!(session = ?session, "Login completed");
        Ok(())
    }

    /// Renew the session's tokens with its stored refresh token.
    ///
    /// On provider failure the stored tokens are left untouched.
    pub async fn refresh(&self, session: &SessionId) -> Result<()> {
        let refresh_token = self
            .store
            .get(session)
            .await
            .and_then(|s| s.refresh_token)
            .ok_or(Error::NoRefreshToken)?;

        let tokens = self
            .token_client
            .refresh(&refresh_token, &self.registration)
            .await?;

        let claims = match tokens.id_token.as_deref() {
            Some(id_token) => match self.decoder.identity_claims(id_token) {
                Ok(claims) => Some(claims),
                Err(e) => {
                    warn!(error = %e, "Ignoring undecodable identity token on refresh");
                    None
                }
            },
            None => None,
        };

        self.store
            .rotate_tokens(session, tokens.access_token, tokens.refresh_token, claims)
            .await
    }

    /// Log out locally and return the provider logout URL.
    ///
    /// Always succeeds locally, with or without a live session.
    pub async fn logout(&self, session: Option<&SessionId>) -> Result<String> {
        if let Some(session) = session {
            if self.store.clear(session).await {
                info!(session = ?session, "Session cleared");
            }
        }
        self.token_client.endpoints().logout_url(&self.client_url)
    }

    /// Current identity, if the session holds tokens and a name.
    pub async fn whoami(&self, session: &SessionId) -> Option<IdentityClaims> {
        self.store.get(session).await?.identity()
    }
}
