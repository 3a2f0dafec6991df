//! Request authority: scheme, host and optional explicit port.

use crate::base::neterror::NetError;
use http::Uri;
use std::fmt;

/// The `(scheme, host, port)` triple a request targets.
///
/// `port` is `None` when the URI relies on the scheme's default port, so an
/// explicit `:80` and an implicit one stay distinguishable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Authority {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
}

impl Authority {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            scheme: scheme.into().to_ascii_lowercase(),
            host: host.into(),
            port,
        }
    }

    /// Extract the authority from an absolute URI.
    pub fn from_uri(uri: &Uri) -> Result<Self, NetError> {
        let scheme = uri.scheme_str().ok_or(NetError::InvalidUrl)?;
        let host = uri
            .host()
            .filter(|host| !host.is_empty())
            .ok_or(NetError::InvalidUrl)?;
        Ok(Self::new(scheme, host, uri.port_u16()))
    }

    pub fn is_http(&self) -> bool {
        self.scheme == "http"
    }

    pub fn is_https(&self) -> bool {
        self.scheme == "https"
    }

    /// Port the connection will actually use.
    pub fn effective_port(&self) -> Option<u16> {
        self.port.or_else(|| default_port(&self.scheme))
    }

    /// Host and effective port for connecting.
    pub fn host_port(&self) -> Result<(&str, u16), NetError> {
        let port = self.effective_port().ok_or(NetError::DisallowedUrlScheme)?;
        Ok((&self.host, port))
    }

    /// `host[:port]` as it appears in a URI.
    pub fn authority_str(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    pub(crate) fn same_host(&self, other: &Authority) -> bool {
        self.host.eq_ignore_ascii_case(&other.host)
    }
}

/// Default port for the schemes this crate connects over.
pub fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority_str())
    }
}
