use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::dns::SocketAddrs;
use crate::upgrade::Authority;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// Alias for the `Future` type returned by a connector.
pub type Connecting = BoxFuture<'static, Result<TcpStream, NetError>>;

/// Opens the transport connection for a request once its authority is final.
pub trait Connect: Send + Sync {
    fn connect(&self, authority: &Authority) -> Connecting;
}

/// Manages the connection process: address lookup -> TCP.
/// Roughly equivalent to net::TransportConnectJob.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound each connection attempt.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    async fn connect_to(host: String, port: u16, timeout: Option<Duration>) -> Result<TcpStream, NetError> {
        // 1. Address lookup; literals skip it
        let addrs: Vec<SocketAddr> = match SocketAddrs::try_parse(&host, port) {
            Some(addrs) => addrs.collect(),
            None => tokio::net::lookup_host((host.as_str(), port))
                .await
                .dns_context(&host)?
                .collect(),
        };
        if addrs.is_empty() {
            return Err(NetError::NameNotResolved);
        }

        // 2. TCP connect, first address that answers wins
        let mut last_error = NetError::ConnectionFailed;
        for addr in addrs {
            let attempt = TcpStream::connect(addr);
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, attempt).await {
                    Ok(result) => result.connection_context(&host, port),
                    Err(_) => Err(NetError::ConnectionTimedOut),
                },
                None => attempt.await.connection_context(&host, port),
            };

            match result {
                Ok(stream) => {
                    tracing::debug!(host = %host, addr = %addr, "connected");
                    return Ok(stream);
                }
                Err(e) => {
                    tracing::debug!(host = %host, addr = %addr, error = %e, "connect attempt failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

impl Connect for TcpConnector {
    fn connect(&self, authority: &Authority) -> Connecting {
        let target = authority
            .host_port()
            .map(|(host, port)| (host.to_string(), port));
        let timeout = self.timeout;
        async move {
            let (host, port) = target?;
            Self::connect_to(host, port, timeout).await
        }
        .boxed()
    }
}
