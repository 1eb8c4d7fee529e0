//! Measurement server
//!
//! [`BufferbloatServer`] owns the process-wide [`StreamAccountant`] and hands
//! it to every request handler. Routes:
//! - `/api/ping-light`, `/api/ping` for latency probes
//! - `/api/download/throttled` and `/api/download/{megabytes}` for downloads
//! - `/api/upload` for uploads
//! - `/api/stats`, `/api/stats/reset` for server-side accounting
//! - `/api/config` for the configured bandwidth caps
//! - `/health`, `/api/health`, `/api/version`, `/api/debug` for information
//!
//! Shutdown cancels a shared token so endless throttled bodies end and the
//! graceful drain can finish.

pub mod accountant;
pub mod download;
pub mod handlers;
pub mod rate_limiter;
pub mod upload;

pub use accountant::{AccountingSnapshot, StreamAccountant, StreamTicket};
pub use download::{DownloadStreamHandle, ThrottledDownloadProducer};
pub use handlers::ServerState;
pub use rate_limiter::RateLimiter;
pub use upload::UploadReceipt;

use crate::error::{AppError, Result};
use crate::logging::StreamLogger;
use crate::models::ServerConfig;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

/// HTTP server exposing the measurement endpoints
#[derive(Debug)]
pub struct BufferbloatServer {
    config: Arc<ServerConfig>,
    accountant: Arc<StreamAccountant>,
    logger: StreamLogger,
    shutdown: CancellationToken,
}

impl BufferbloatServer {
    pub fn new(config: ServerConfig, logger: StreamLogger) -> Self {
        Self {
            config: Arc::new(config),
            accountant: Arc::new(StreamAccountant::new()),
            logger,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token cancelled once shutdown begins; cancelling it stops the server
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Shared accountant, for inspection from tests and the embedding process
    pub fn accountant(&self) -> Arc<StreamAccountant> {
        Arc::clone(&self.accountant)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the router with every endpoint
    pub fn create_router(&self) -> Router {
        Router::new()
            .route("/api/ping-light", get(handlers::ping_light))
            .route("/api/ping", get(handlers::ping))
            .route("/api/download/throttled", get(handlers::download_throttled))
            .route("/api/download/{megabytes}", get(handlers::download_fixed))
            .route("/api/upload", post(handlers::upload))
            .route("/api/config", get(handlers::server_config))
            .route("/api/stats", get(handlers::stats))
            .route("/api/stats/reset", post(handlers::reset_stats))
            .route("/health", get(handlers::health))
            .route("/api/health", get(handlers::health))
            .route("/api/version", get(handlers::version))
            .route("/api/debug", get(handlers::debug))
            .route("/favicon.ico", get(handlers::favicon))
            .layer(DefaultBodyLimit::disable())
            .layer(CorsLayer::very_permissive())
            .with_state(ServerState {
                accountant: Arc::clone(&self.accountant),
                config: Arc::clone(&self.config),
                logger: self.logger.clone(),
                shutdown: self.shutdown.clone(),
            })
    }

    /// Bind the configured address. Port 0 picks an ephemeral port.
    pub async fn bind(&self) -> Result<TcpListener> {
        let address = self.config.bind_address();
        TcpListener::bind(&address)
            .await
            .map_err(|e| AppError::server(format!("Failed to bind to {}: {}", address, e)))
    }

    /// Serve on `listener` until `shutdown` resolves or the shutdown token
    /// is cancelled.
    ///
    /// Open response bodies end as soon as shutdown begins. Connections that
    /// are still open after [`SHUTDOWN_DRAIN_TIMEOUT`](crate::defaults::SHUTDOWN_DRAIN_TIMEOUT)
    /// are abandoned.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local: SocketAddr = listener.local_addr()?;
        let mut entry = self
            .logger
            .logger()
            .info(&format!("Bufferbloat server listening on {}", local))
            .field("download_rate_mbps", self.config.download_rate_mbps());
        if let Some(mbps) = self.config.max_download_mbps {
            entry = entry.field("max_download_mbps", mbps);
        }
        if let Some(mbps) = self.config.max_upload_mbps {
            entry = entry.field("max_upload_mbps", mbps);
        }
        entry.emit();

        let token = self.shutdown.clone();
        let signal = async move {
            tokio::select! {
                _ = shutdown => {}
                _ = token.cancelled() => {}
            }
            token.cancel();
        };

        let server = axum::serve(listener, self.create_router().into_make_service())
            .with_graceful_shutdown(signal)
            .into_future();
        let drain_deadline = async {
            self.shutdown.cancelled().await;
            tokio::time::sleep(crate::defaults::SHUTDOWN_DRAIN_TIMEOUT).await;
        };

        tokio::select! {
            result = server => result.map_err(|e| AppError::server(format!("Server error: {}", e))),
            _ = drain_deadline => {
                crate::log_warn!(
                    self.logger.logger(),
                    "Connections still open {:?} after shutdown; closing them",
                    crate::defaults::SHUTDOWN_DRAIN_TIMEOUT
                );
                Ok(())
            }
        }
    }

    /// Bind and serve until Ctrl-C
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        let logger = self.logger.logger().clone();
        let ctrl_c = async move {
            // If the handler cannot be installed, run until the process is killed
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
            logger.info("Shutdown requested, draining connections").emit();
        };
        self.serve(listener, ctrl_c).await
    }
}
