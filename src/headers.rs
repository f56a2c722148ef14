//! HTTP header processing: hop-by-hop removal, forwarding header
//! injection, host rewriting, and the gateway's handled marker.
//!
//! Implements the header-level requirements of RFC 7230 Section 6.1
//! (hop-by-hop header handling) and the de-facto `X-Forwarded-*`
//! convention for intermediaries.

use std::net::SocketAddr;

use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::http::uri::Authority;

/// Marker header stamped on every response the gateway synthesized
/// itself (error pages, maintenance pages), so downstream layers can
/// tell them apart from genuine origin responses.
pub const EDGE_HANDLED: &str = "x-edge-handled";

/// Removes all hop-by-hop headers from the given header map.
///
/// Strips the standard set defined in RFC 7230 Section 6.1 (`Connection`,
/// `Keep-Alive`, `Proxy-Authenticate`, `Proxy-Authorization`, `TE`,
/// `Trailers`, `Transfer-Encoding`, `Upgrade`), plus any additional
/// header names declared in the `Connection` header value.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let conn: Vec<HeaderName> = headers
        .get("connection")
        .and_then(|val| val.to_str().ok())
        .map(|val| {
            val.split(',')
                .filter_map(|s| HeaderName::from_bytes(s.trim().as_bytes()).ok())
                .collect()
        })
        .unwrap_or_default();

    conn.iter().for_each(|name| {
        headers.remove(name);
    });

    [
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailers",
        "transfer-encoding",
        "upgrade",
    ]
    .iter()
    .for_each(|name| {
        headers.remove(*name);
    });
}

/// Injects `X-Forwarded-For`, `X-Forwarded-Proto`, and `X-Forwarded-Host`
/// headers into the given header map.
///
/// - `X-Forwarded-For` is appended to any existing value (preserving
///   upstream proxy chains) with the client's socket address.
/// - `X-Forwarded-Proto` is set to `"http"`.
/// - `X-Forwarded-Host` is set to the original `Host` header value, if
///   present.
pub fn inject_forwarding_headers(headers: &mut HeaderMap, client_addr: SocketAddr) {
    let client_ip = client_addr.ip().to_string();

    let xff_value = headers
        .get("x-forwarded-for")
        .and_then(|existing| existing.to_str().ok())
        .map(|existing| format!("{existing}, {client_ip}"))
        .unwrap_or_else(|| client_ip);

    if let Ok(val) = HeaderValue::from_str(&xff_value) {
        headers.insert("x-forwarded-for", val);
    }
    headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
    if let Some(host) = headers.get(hyper::header::HOST) {
        headers.insert("x-forwarded-host", host.clone());
    }
}

/// Rewrites the `Host` header to match the origin authority.
///
/// This ensures the origin receives the correct `Host` value regardless
/// of which public hostname the client used.
pub fn rewrite_host(headers: &mut HeaderMap, origin_auth: &Authority) {
    if let Ok(val) = HeaderValue::from_str(origin_auth.as_str()) {
        headers.insert(hyper::header::HOST, val);
    }
}

/// Stamps the handled marker onto a synthesized response's headers.
pub fn mark_edge_handled(headers: &mut HeaderMap) {
    headers.insert(EDGE_HANDLED, HeaderValue::from_static("true"));
}
