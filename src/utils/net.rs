//! Networking helpers

use std::io;

use tokio::net::TcpListener;
use tracing::debug;

/// Bind a TCP listener on `host:port`, resolving host names.
///
/// Every resolved address is tried in order; the first one that binds wins.
/// `localhost` usually resolves to both `::1` and `127.0.0.1`.
pub async fn bind_tcp_listener(host: &str, port: u16) -> io::Result<TcpListener> {
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    let mut last_err = None;

    for addr in tokio::net::lookup_host((host, port)).await? {
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                debug!("Failed to bind {}: {}", addr, e);
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{} did not resolve to any address", host),
        )
    }))
}
