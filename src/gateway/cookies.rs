//! Session cookie binding between the browser and a [`SessionId`].

use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};

use crate::session::{SessionId, SessionStore};

/// Session cookie settings
#[derive(Debug, Clone)]
pub struct SessionCookie {
    name: String,
    secure: bool,
}

impl SessionCookie {
    /// Create cookie settings
    pub fn new(name: impl Into<String>, secure: bool) -> Self {
        Self {
            name: name.into(),
            secure,
        }
    }

    /// Session id carried by the request, if any (not checked against the store)
    #[must_use]
    pub fn session_id(&self, jar: &CookieJar) -> Option<SessionId> {
        jar.get(&self.name)
            .map(|cookie| cookie.value())
            .filter(|value| !value.is_empty())
            .map(SessionId::from)
    }

    /// Build the cookie carrying `id`.
    ///
    /// No `Max-Age`: the browser keeps it for its session, the server expires it on idle.
    #[must_use]
    pub fn build(&self, id: &SessionId) -> Cookie<'static> {
        Cookie::build((self.name.clone(), id.to_string()))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .build()
    }

    /// Add a removal cookie to the jar
    #[must_use]
    pub fn clear(&self, jar: CookieJar) -> CookieJar {
        jar.remove(Cookie::build((self.name.clone(), "")).path("/"))
    }

    /// Session bound to the request if it is still live.
    pub async fn lookup(&self, jar: &CookieJar, store: &dyn SessionStore) -> Option<SessionId> {
        let id = self.session_id(jar)?;
        store.get(&id).await.map(|_| id)
    }

    /// Session bound to the request, allocating a new one (and its cookie) when the
    /// request carries none or an id the store no longer knows.
    pub async fn resolve_or_create(
        &self,
        jar: CookieJar,
        store: &dyn SessionStore,
    ) -> (SessionId, CookieJar) {
        if let Some(id) = self.lookup(&jar, store).await {
            return (id, jar);
        }
        let id = store.create().await;
        let jar = jar.add(self.build(&id));
        (id, jar)
    }
}
