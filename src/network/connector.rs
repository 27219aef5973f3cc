/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Transport setup for resolver endpoints
//!
//! The pool never opens sockets itself: it asks a [`Connector`] for a ready
//! datagram socket when an endpoint is added, and for a stream when a
//! truncated answer has to be retried over TCP.

use crate::core::error::{DnsError, Result};
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::fmt::Debug;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

/// Well-known DNS port assumed when an address carries none
pub const DNS_PORT: u16 = 53;

/// Receive buffer requested for endpoint sockets; bursts of answers from a
/// fast resolver otherwise overflow the kernel default.
const RECV_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Capability used by the pool to obtain ready connections
#[async_trait]
pub trait Connector: Send + Sync + Debug + 'static {
    /// Open a datagram socket connected to `addr`
    async fn connect_datagram(&self, addr: SocketAddr) -> Result<UdpSocket>;

    /// Open a stream connection to `addr`, bounded by `limit`
    async fn connect_stream(&self, addr: SocketAddr, limit: Duration) -> Result<TcpStream>;
}

/// Plain UDP/TCP connector
#[derive(Debug, Default, Clone)]
pub struct DefaultConnector;

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect_datagram(&self, addr: SocketAddr) -> Result<UdpSocket> {
        let socket = connect_socket(addr)?;
        debug!(
            local_addr = ?socket.local_addr(),
            remote_addr = %addr,
            "Opened UDP socket to resolver"
        );
        Ok(UdpSocket::from_std(socket)?)
    }

    async fn connect_stream(&self, addr: SocketAddr, limit: Duration) -> Result<TcpStream> {
        match timeout(limit, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                Ok(stream)
            }
            Ok(Err(e)) => Err(DnsError::protocol(format!(
                "TCP connect to {} failed: {}",
                addr, e
            ))),
            Err(_) => Err(DnsError::protocol(format!("TCP connect to {} timed out", addr))),
        }
    }
}

/// Create a non-blocking UDP socket connected to the resolver
///
/// `connect()` pins the peer so the kernel drops datagrams from any other
/// source, and lets the endpoint use `send`/`recv` instead of the `_to`/`_from`
/// variants.
fn connect_socket(addr: SocketAddr) -> Result<std::net::UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    // Best effort; the kernel may clamp or refuse it.
    let _ = socket.set_recv_buffer_size(RECV_BUFFER_SIZE);

    let bind_addr: SocketAddr = if addr.is_ipv4() {
        SocketAddr::new(IpAddr::from([0u8; 4]), 0)
    } else {
        SocketAddr::new(IpAddr::from([0u16; 8]), 0)
    };
    socket.bind(&bind_addr.into())?;
    socket.connect(&addr.into())?;

    Ok(socket.into())
}

/// Normalize a resolver address to a socket address
///
/// Accepts `ip:port`, `[v6]:port`, a bare IP (port 53 assumed) or a host name
/// with or without a port (resolved with the system resolver).
pub async fn resolve_endpoint_addr(addr: &str) -> Result<SocketAddr> {
    let addr = addr.trim();
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        return Ok(socket_addr);
    }
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DNS_PORT));
    }
    let trimmed = addr.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = trimmed.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DNS_PORT));
    }

    let host_port = if has_port(addr) {
        addr.to_string()
    } else {
        format!("{}:{}", addr, DNS_PORT)
    };
    tokio::net::lookup_host(&host_port)
        .await
        .map_err(|e| DnsError::protocol(format!("Failed to resolve '{}': {}", addr, e)))?
        .next()
        .ok_or_else(|| DnsError::protocol(format!("No addresses found for '{}'", addr)))
}

/// Whether a `host[:port]` string ends with a numeric port
fn has_port(addr: &str) -> bool {
    match addr.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
