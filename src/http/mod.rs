//! HTTP front for the admission gate.

mod client_addr;
mod middleware;
mod server;

pub use client_addr::client_ip;
pub use middleware::rate_limit;
pub use server::{router, HttpServer};
