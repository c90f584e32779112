//! HTTP server implementation
//!
//! Sets up the Axum HTTP server with:
//! - Repository API routes
//! - Middleware (Basic auth when configured, timeout, tracing)
//! - Plain HTTP or TLS transport
//! - Graceful shutdown

mod tls;

use axum::{middleware, Router};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::auth::{self, CredentialStore};
use crate::config::Config;
use crate::routes;
use crate::storage::StorageBackend;

/// HTTP server for the repository
pub struct Server {
    config: Config,
    storage: Arc<dyn StorageBackend>,
    credentials: Option<Arc<dyn CredentialStore>>,
}

impl Server {
    /// Create a new server instance
    pub fn new(
        config: Config,
        storage: Arc<dyn StorageBackend>,
        credentials: Option<Arc<dyn CredentialStore>>,
    ) -> Self {
        Self {
            config,
            storage,
            credentials,
        }
    }

    /// Build the Axum router with all middleware
    pub fn build_router(&self) -> Router {
        let mut app = routes::create_router(self.storage.clone(), self.config.metrics.enabled);

        if let Some(credentials) = &self.credentials {
            app = app.layer(middleware::from_fn_with_state(
                credentials.clone(),
                auth::require_basic_auth,
            ));
        }

        if let Some(secs) = self.config.server.timeout_secs {
            app = app.layer(TimeoutLayer::new(Duration::from_secs(secs)));
        }

        app.layer(TraceLayer::new_for_http())
    }

    /// Start the server and run until shutdown signal
    pub async fn start<F>(&self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.build_router();
        let address = self.config.server.bind_address;
        let listener = tokio::net::TcpListener::bind(address).await?;

        if self.config.server.tls.enabled {
            let cert = self.config.tls_cert_path();
            let key = self.config.tls_key_path();
            info!(cert = %cert.display(), key = %key.display(), "TLS enabled");
            let acceptor = tls::acceptor(&cert, &key)?;
            info!(address = %address, "Server listening (https)");
            tls::serve(
                listener,
                move |stream| acceptor.accept(stream),
                app,
                shutdown,
            )
            .await?;
        } else {
            info!(address = %address, "Server listening (http)");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await?;
        }

        Ok(())
    }
}
