//! Bind address resolution and authority formatting.

use std::{io, net::SocketAddr};

use axum::http::uri::Authority;

/// Resolve `host:port` into the distinct socket addresses to bind, in resolver
/// order.
pub async fn resolve(host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
    let mut addresses: Vec<SocketAddr> = Vec::new();
    for address in tokio::net::lookup_host((host, port)).await? {
        if !addresses.contains(&address) {
            addresses.push(address);
        }
    }
    if addresses.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no addresses found for {host}"),
        ));
    }
    Ok(addresses)
}

/// Format `host:port`, bracketing IPv6 literals.
pub fn format_authority(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Authority to advertise in URLs built for a request.
///
/// Uses the request's `Host` header when it parses, appending `port` if the
/// header carries none; otherwise falls back to the bind host.
pub fn advertised_authority(host_header: Option<&str>, bind_host: &str, port: u16) -> String {
    match host_header.and_then(|header| header.parse::<Authority>().ok()) {
        Some(authority) if authority.port_u16().is_some() => authority.to_string(),
        Some(authority) => format_authority(authority.host(), port),
        None => format_authority(bind_host, port),
    }
}
