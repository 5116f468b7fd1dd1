//! Client address derivation for rate limiting and audit.
//!
//! Precedence: edge-proxy header, then `x-real-ip`, then the first hop of
//! `x-forwarded-for`, then the transport peer, then [`UNKNOWN_CLIENT`].
//! Header values that do not parse as an IP address are skipped.

use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

pub const EDGE_IP_HEADER: &str = "cf-connecting-ip";
pub const REAL_IP_HEADER: &str = "x-real-ip";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const UNKNOWN_CLIENT: &str = "unknown";

fn header_ip(headers: &HeaderMap, name: &str, first_hop: bool) -> Option<IpAddr> {
    let raw = headers.get(name)?.to_str().ok()?;
    let candidate = if first_hop {
        raw.split(',').next()?
    } else {
        raw
    };
    candidate.trim().parse::<IpAddr>().ok()
}

pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    header_ip(headers, EDGE_IP_HEADER, false)
        .or_else(|| header_ip(headers, REAL_IP_HEADER, false))
        .or_else(|| header_ip(headers, FORWARDED_FOR_HEADER, true))
        .or_else(|| peer.map(|addr| addr.ip()))
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> Option<SocketAddr> {
        Some(SocketAddr::from(([10, 0, 0, 9], 51000)))
    }

    #[test]
    fn edge_header_wins_over_everything() {
        let mut headers = HeaderMap::new();
        headers.insert(EDGE_IP_HEADER, HeaderValue::from_static("203.0.113.7"));
        headers.insert(REAL_IP_HEADER, HeaderValue::from_static("198.51.100.1"));
        headers.insert(
            FORWARDED_FOR_HEADER,
            HeaderValue::from_static("192.0.2.1, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, peer()), "203.0.113.7");
    }

    #[test]
    fn real_ip_beats_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(REAL_IP_HEADER, HeaderValue::from_static("198.51.100.1"));
        headers.insert(FORWARDED_FOR_HEADER, HeaderValue::from_static("192.0.2.1"));
        assert_eq!(client_ip(&headers, peer()), "198.51.100.1");
    }

    #[test]
    fn forwarded_for_uses_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            FORWARDED_FOR_HEADER,
            HeaderValue::from_static(" 192.0.2.1 , 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, peer()), "192.0.2.1");
    }

    #[test]
    fn garbage_headers_fall_through_to_peer() {
        let mut headers = HeaderMap::new();
        headers.insert(EDGE_IP_HEADER, HeaderValue::from_static("not-an-ip"));
        assert_eq!(client_ip(&headers, peer()), "10.0.0.9");
    }

    #[test]
    fn unknown_without_any_source() {
        assert_eq!(client_ip(&HeaderMap::new(), None), UNKNOWN_CLIENT);
    }
}
