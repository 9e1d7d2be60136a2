//! HTTP server implementation.

use axum::routing::get;
use axum::{middleware, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::rate_limit;
use crate::error::Result;
use crate::ratelimit::AdmissionGate;

/// Build the service: every path answers `OK`, behind the rate limiter.
pub fn router(gate: Arc<AdmissionGate>) -> Router {
    Router::new()
        .route("/", get(ok))
        .fallback(ok)
        .layer(middleware::from_fn_with_state(gate, rate_limit))
}

async fn ok() -> &'static str {
    "OK"
}

/// HTTP server fronting the admission gate.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The shared admission gate
    gate: Arc<AdmissionGate>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, gate: Arc<AdmissionGate>) -> Self {
        Self { addr, gate }
    }

    /// Bind the listener and serve until `signal` resolves.
    ///
    /// In-flight requests are allowed to finish before this returns.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            e
        })?;

        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            "Starting HTTP server with graceful shutdown"
        );

        let app = router(self.gate);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e
        })?;

        Ok(())
    }
}
