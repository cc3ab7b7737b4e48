// src/security.rs
// Loopback-only request filtering. An external collaborator conceptually,
// but implemented here as a thin axum middleware since this crate ships a
// single binary.

use axum::extract::{ConnectInfo, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

fn is_loopback_host(host: &str) -> bool {
    // Strip an optional port.
    let host = host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host);
    matches!(host, "127.0.0.1" | "localhost" | "[::1]" | "::1")
}

/// Rejects any request whose peer address is not loopback, and any request
/// to the tool path that carries an `Origin` header (spec §6, property 9).
pub async fn loopback_only(req: Request, next: Next) -> Response {
    let peer = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
    let ip_ok = match peer {
        Some(addr) => is_loopback_ip(addr.ip()),
        None => true, // no peer info (e.g. in tests) — defer to host check
    };
    if !ip_ok {
        return (StatusCode::FORBIDDEN, "loopback only").into_response();
    }

    if let Some(host) = req.headers().get(axum::http::header::HOST).and_then(|h| h.to_str().ok())
    {
        if !is_loopback_host(host) {
            return (StatusCode::FORBIDDEN, "loopback only").into_response();
        }
    }

    if req.uri().path().starts_with("/mcp") && req.headers().contains_key(axum::http::header::ORIGIN)
    {
        return (StatusCode::FORBIDDEN, "origin header not allowed").into_response();
    }

    next.run(req).await
}

fn is_loopback_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6 == Ipv6Addr::LOCALHOST || v6.to_ipv4_mapped().map(|m| m.is_loopback()).unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_loopback_hosts() {
        assert!(is_loopback_host("127.0.0.1:3790"));
        assert!(is_loopback_host("localhost:3790"));
        assert!(is_loopback_host("[::1]:3790"));
        assert!(!is_loopback_host("example.com:3790"));
    }

    #[test]
    fn recognizes_loopback_ips() {
        assert!(is_loopback_ip(IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1))));
        assert!(is_loopback_ip(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert!(!is_loopback_ip(IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 1))));
    }
}
