//! Tollgate - per-client HTTP admission control
//!
//! This crate throttles requests per client address with lazily refilled
//! token buckets. Client state lives in an in-memory registry that a
//! background reclaimer keeps bounded by evicting idle clients.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
