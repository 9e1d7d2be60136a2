//! Rate limiting middleware.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error};

use super::client_addr::client_ip;
use crate::ratelimit::AdmissionGate;

/// Admit or reject a request before it reaches the wrapped handler.
///
/// Requests whose client address cannot be resolved get a 500, rate limited
/// clients get a 429.
pub async fn rate_limit(
    State(gate): State<Arc<AdmissionGate>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let ip = match client_ip(peer, request.headers()) {
        Ok(ip) => ip,
        Err(e) => {
            error!(error = %e, uri = %request.uri(), "Failed to resolve client address");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
        }
    };

    if !gate.check(&ip.to_string()).is_allowed() {
        debug!(client = %ip, uri = %request.uri(), "Rejecting rate limited request");
        return (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests").into_response();
    }

    next.run(request).await
}
