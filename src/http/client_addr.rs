//! Client address resolution.

use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

use crate::error::{Result, TollgateError};

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Resolve the address a request should be rate limited under.
///
/// The connection peer wins when known. Otherwise the first hop of
/// `X-Forwarded-For` is used, then `X-Real-IP`. A forwarding header whose
/// first hop is empty counts as absent. Header values may carry a port
/// (`203.0.113.7:5100`) or be a bare address.
pub fn client_ip(peer: Option<SocketAddr>, headers: &HeaderMap) -> Result<IpAddr> {
    if let Some(peer) = peer {
        return Ok(peer.ip());
    }

    if let Some(value) = header_str(headers, X_FORWARDED_FOR)? {
        let first = value.split(',').next().unwrap_or_default().trim();
        if !first.is_empty() {
            return parse_addr(first);
        }
    }

    if let Some(value) = header_str(headers, X_REAL_IP)? {
        return parse_addr(value);
    }

    Err(TollgateError::ClientAddress(
        "no peer address and no forwarding headers".to_string(),
    ))
}

/// A header's value, treating an empty value as absent.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => {
            let value = value.to_str().map_err(|_| {
                TollgateError::ClientAddress(format!("{} is not valid ASCII", name))
            })?;
            let value = value.trim();
            Ok((!value.is_empty()).then_some(value))
        }
    }
}

fn parse_addr(value: &str) -> Result<IpAddr> {
    let value = value.trim();
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Ok(addr.ip());
    }
    value
        .parse::<IpAddr>()
        .map_err(|_| TollgateError::ClientAddress(format!("cannot parse {:?} as an address", value)))
}
