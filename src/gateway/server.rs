//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use super::router::{AppState, create_router};
use crate::config::Config;
use crate::session::{InMemorySessionStore, SessionStore, spawn_reaper};
use crate::{Error, Result};

/// BFF gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Session store
    store: Arc<dyn SessionStore>,
}

impl Gateway {
    /// Create a new gateway
    pub fn new(config: Config) -> Result<Self> {
        config.validate_bff()?;
        let store: Arc<dyn SessionStore> =
            Arc::new(InMemorySessionStore::new(config.session.idle_timeout));

        Ok(Self { config, store })
    }

    /// Run the gateway
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        // Create shutdown channel
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        let http_client = reqwest::Client::builder()
            .user_agent(concat!("bff-gateway/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let state = Arc::new(AppState::new(
            &self.config,
            http_client,
            Arc::clone(&self.store),
        ));

        // Create router
        let app = create_router(state);

        // Bind listener
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("BFF GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(issuer = %self.config.identity.issuer_uri, client_id = %self.config.identity.client_id, "Identity provider");
        info!(redirect_uri = %self.config.redirect_uri(), "OAuth callback");
        info!(
            upstream = %self.config.upstream.base_url,
            api_prefix = %self.config.upstream.api_prefix,
            "Proxy target"
        );
        info!(client_url = %self.config.app.client_url, "Client application");
        if !self.config.session.secure_cookie {
            warn!("Session cookie is not marked Secure - use only behind plain-HTTP development setups");
        }
        info!("============================================================");

        // Reap idle sessions
        spawn_reaper(
            Arc::clone(&self.store),
            self.config.session.reap_interval,
            shutdown_tx.subscribe(),
        );

        // Run server with graceful shutdown
        let shutdown_timeout = self.config.server.shutdown_timeout;
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()));

        drain_with_timeout(server, shutdown_tx, shutdown_timeout).await
    }
}

/// Drive `server` to completion, giving in-flight requests at most `timeout`
/// once the shutdown signal fired.
pub(crate) async fn drain_with_timeout<F>(
    server: F,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
    timeout: std::time::Duration,
) -> Result<()>
where
    F: std::future::IntoFuture<Output = std::io::Result<()>>,
{
    let mut shutdown_rx = shutdown_tx.subscribe();
    let server = server.into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            return result.map_err(|e| Error::Internal(e.to_string()));
        }
        _ = shutdown_rx.recv() => {}
    }

    match tokio::time::timeout(timeout, server).await {
        Ok(result) => result.map_err(|e| Error::Internal(e.to_string())),
        Err(_) => {
            warn!(timeout = ?timeout, "Graceful shutdown timed out, dropping open connections");
            Ok(())
        }
    }
}

/// Shutdown signal handler
pub(crate) async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
