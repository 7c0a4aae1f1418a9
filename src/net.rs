//! Picking the address a renderer can reach us on.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::{lookup_host, UdpSocket};

/// Local address of the interface that routes to `host`.
///
/// Connecting a UDP socket sends nothing; it only asks the kernel to pick a
/// route and source address.
pub async fn local_addr_for(host: &str) -> Option<IpAddr> {
    let target: SocketAddr = lookup_host((host, 9)).await.ok()?.next()?;
    let bind: SocketAddr = match target {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };

    let socket = UdpSocket::bind(bind).await.ok()?;
    socket.connect(target).await.ok()?;
    let local = socket.local_addr().ok()?.ip();
    if local.is_unspecified() {
        None
    } else {
        Some(local)
    }
}

/// Host to put into the stream URL handed to a renderer at `renderer_host`.
///
/// An explicit override wins, then the routed local address, then loopback.
pub async fn advertised_host(
    override_host: Option<&str>,
    renderer_host: Option<&str>,
) -> String {
    if let Some(host) = override_host {
        return host.to_string();
    }

    if let Some(renderer_host) = renderer_host {
        if let Some(ip) = local_addr_for(renderer_host).await {
            return match ip {
                IpAddr::V6(v6) => format!("[{v6}]"),
                IpAddr::V4(v4) => v4.to_string(),
            };
        }
        tracing::warn!(
            "No route to renderer at {}, advertising loopback",
            renderer_host
        );
    }

    Ipv4Addr::LOCALHOST.to_string()
}
