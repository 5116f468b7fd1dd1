use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, Extensions, HeaderMap},
};
use service_core::middleware::client_ip;
use std::{convert::Infallible, net::SocketAddr};

use crate::models::ClientContext;

pub const DEVICE_ID_HEADER: &str = "x-device-id";
const MAX_DEVICE_ID_LEN: usize = 128;
const MAX_USER_AGENT_LEN: usize = 512;

fn header_value(
    headers: &HeaderMap,
    name: impl header::AsHeaderName,
    max_len: usize,
) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    if value.is_empty() {
        return None;
    }
    Some(value.chars().take(max_len).collect())
}

/// Caller address, user agent and device id for one request.
pub fn client_context(headers: &HeaderMap, extensions: &Extensions) -> ClientContext {
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let mut client = ClientContext::new(client_ip(headers, peer));
    if let Some(user_agent) = header_value(headers, header::USER_AGENT, MAX_USER_AGENT_LEN) {
        client = client.with_user_agent(user_agent);
    }
    if let Some(device_id) = header_value(headers, DEVICE_ID_HEADER, MAX_DEVICE_ID_LEN) {
        client = client.with_device_id(device_id);
    }
    client
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for ClientContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(client_context(&parts.headers, &parts.extensions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn reads_headers_and_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("Mozilla/5.0"));
        headers.insert(DEVICE_ID_HEADER, HeaderValue::from_static("laptop-1"));
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 10], 4000))));

        let client = client_context(&headers, &extensions);
        assert_eq!(client.ip_address, "192.0.2.10");
        assert_eq!(client.user_agent.as_deref(), Some("Mozilla/5.0"));
        assert_eq!(client.device_fingerprint(), "laptop-1");
    }

    #[test]
    fn blank_and_oversized_values() {
        let mut headers = HeaderMap::new();
        headers.insert(DEVICE_ID_HEADER, HeaderValue::from_static("   "));
        let long = "x".repeat(600);
        headers.insert("user-agent", HeaderValue::from_str(&long).unwrap());

        let client = client_context(&headers, &Extensions::new());
        assert!(client.device_id.is_none());
        assert_eq!(client.user_agent.map(|ua| ua.len()), Some(MAX_USER_AGENT_LEN));
        assert_eq!(client.ip_address, "unknown");
    }
}
