//! Server-side session state keyed by an opaque cookie identifier.

pub mod store;

pub use store::{
    InMemorySessionStore, Session, SessionId, SessionStore, SessionTokens, spawn_reaper,
};
