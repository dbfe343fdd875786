use crate::config::ConnectionSettings;

use socket2::{SockRef, TcpKeepalive};
use std::{io, net::SocketAddr, time::Duration};
use tokio::net::{lookup_host, TcpStream};

/// Resolve a `host:port` string, taking the first address it yields.
pub(crate) async fn resolve(address: &str) -> Option<SocketAddr> {
    match lookup_host(address).await {
        Ok(mut addrs) => addrs.next(),
        Err(e) => {
            tracing::debug!("Failed to resolve {}: {}", address, e);
            None
        }
    }
}

/// Apply per-socket options. Failures are logged rather than fatal.
pub(crate) fn configure_stream(stream: &TcpStream, settings: &ConnectionSettings) {
    if let Err(e) = stream.set_nodelay(settings.nodelay) {
        tracing::warn!("Couldn't set TCP_NODELAY: {}", e);
    }
}

pub(crate) fn set_keepalive(stream: &TcpStream, idle: Duration) -> io::Result<()> {
    let keepalive = TcpKeepalive::new().with_time(idle);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}
