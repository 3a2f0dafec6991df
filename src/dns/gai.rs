//! System address resolution using getaddrinfo.
//!
//! Used for the one lookup the DoH path cannot do for itself: finding the DoH
//! server's own address when no bootstrap address is configured. Resolution
//! runs in `spawn_blocking` so it never stalls the async runtime.

use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use std::{
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, ToSocketAddrs},
};

/// System address resolver using `getaddrinfo` in a thread pool.
#[derive(Clone, Debug, Default)]
pub struct GaiResolver;

impl GaiResolver {
    /// Creates a new `GaiResolver`.
    pub fn new() -> Self {
        Self
    }

    /// Resolves `host` to IP addresses through the operating system.
    ///
    /// IP literals are returned as-is without a system call.
    pub async fn lookup_ips(&self, host: &str) -> Result<Vec<IpAddr>, NetError> {
        if let Some(addrs) = SocketAddrs::try_parse(host, 0) {
            return Ok(addrs.map(|a| a.ip()).collect());
        }

        let host = host.to_string();
        let domain = host.clone();

        let result = tokio::task::spawn_blocking(move || {
            tracing::debug!(host = %host, "resolving via getaddrinfo");
            (host.as_str(), 0u16)
                .to_socket_addrs()
                .map(|iter| iter.map(|a| a.ip()).collect::<Vec<_>>())
        })
        .await;

        // Handle task join error (cancellation, panic)
        let ips = result
            .map_err(|e| {
                tracing::error!(error = %e, "DNS resolution task failed");
                NetError::NameNotResolved
            })?
            .dns_context(&domain)?;

        if ips.is_empty() {
            return Err(NetError::dns_failed(
                &domain,
                io::Error::new(io::ErrorKind::NotFound, "No addresses returned by getaddrinfo"),
            ));
        }

        tracing::debug!(domain = %domain, count = ips.len(), "DNS resolution complete");
        Ok(ips)
    }
}

/// Utility for parsing IP address strings directly.
///
/// Bypasses DNS resolution if the host is already an IP address.
pub struct SocketAddrs {
    addrs: Vec<SocketAddr>,
}

impl SocketAddrs {
    /// Attempts to parse a host string as an IP address.
    ///
    /// Returns `Some` if the host is a valid IPv4 or IPv6 address (bracketed
    /// IPv6 as found in URI authorities is accepted), `None` if it's a
    /// hostname that requires DNS resolution.
    pub fn try_parse(host: &str, port: u16) -> Option<Self> {
        // Try IPv4
        if let Ok(addr) = host.parse::<Ipv4Addr>() {
            return Some(Self {
                addrs: vec![SocketAddr::V4(SocketAddrV4::new(addr, port))],
            });
        }

        // Try IPv6
        let unbracketed = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if let Ok(addr) = unbracketed.parse::<Ipv6Addr>() {
            return Some(Self {
                addrs: vec![SocketAddr::V6(SocketAddrV6::new(addr, port, 0, 0))],
            });
        }

        None
    }

    /// Returns true if no addresses are available.
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    /// Returns the number of addresses.
    pub fn len(&self) -> usize {
        self.addrs.len()
    }
}

impl Iterator for SocketAddrs {
    type Item = SocketAddr;

    fn next(&mut self) -> Option<Self::Item> {
        if self.addrs.is_empty() {
            None
        } else {
            Some(self.addrs.remove(0))
        }
    }
}

/// Whether `host` is an IP literal rather than a DNS name.
pub fn is_ip_literal(host: &str) -> bool {
    SocketAddrs::try_parse(host, 0).is_some()
}
