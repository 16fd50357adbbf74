//! BFF gateway: login flow, session cookie binding and the upstream proxy

pub mod cookies;
pub mod flow;
pub mod proxy;
pub mod router;
mod server;

pub use cookies::SessionCookie;
pub use flow::AuthFlow;
pub use proxy::{PROXY_PREFIX, UpstreamProxy};
pub use router::{AppState, create_router};
pub use server::Gateway;
pub(crate) use server::{drain_with_timeout, shutdown_signal};
