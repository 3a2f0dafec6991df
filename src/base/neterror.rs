use std::sync::Arc;
use thiserror::Error;

/// Network error codes.
///
/// Codes in the Chromium ranges (-1xx connection, -3xx HTTP) keep their
/// `net_error_list.h` values. Errors specific to HTTPS record upgrades live
/// at -10000 and below so they never collide with a Chromium range.
#[derive(Debug, Error, Clone)]
pub enum NetError {
    // Connection Errors
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Connection to {host}:{port} failed: {source}")]
    ConnectionFailedTo {
        host: String,
        port: u16,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("Connection timed out")]
    ConnectionTimedOut,

    // Resolution Errors
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Name {domain} not resolved: {source}")]
    NameNotResolvedFor {
        domain: String,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("Name resolution failed")]
    NameResolutionFailed,

    // URL Errors
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Disallowed URL scheme")]
    DisallowedUrlScheme,

    // HTTPS record upgrade errors
    #[error("Record TTL must be positive")]
    InvalidTtl,
    #[error("Upgrade invariant violated: {detail}")]
    UpgradeInvariantViolation { detail: String },
    #[error("Redirect rejected by sink")]
    RedirectRejected,
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl NetError {
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::ConnectionRefused => -102,
            NetError::ConnectionFailed | NetError::ConnectionFailedTo { .. } => -104,
            NetError::ConnectionTimedOut => -118,
            NetError::NameNotResolved | NetError::NameNotResolvedFor { .. } => -105,
            NetError::NameResolutionFailed => -137,

            NetError::InvalidUrl => -300,
            NetError::DisallowedUrlScheme => -301,

            // Upgrade errors (custom codes starting at -10000)
            NetError::InvalidTtl => -10001,
            NetError::UpgradeInvariantViolation { .. } => -10002,
            NetError::RedirectRejected => -10003,
            NetError::InvalidConfig { .. } => -10004,
            NetError::Unknown(code) => *code,
        }
    }

    /// Build a connection error carrying the target endpoint.
    pub fn connection_failed_to(host: &str, port: u16, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
            std::io::ErrorKind::TimedOut => NetError::ConnectionTimedOut,
            _ => NetError::ConnectionFailedTo {
                host: host.to_string(),
                port,
                source: Arc::new(source),
            },
        }
    }

    /// Build a resolution error carrying the queried domain.
    pub fn dns_failed(domain: &str, source: std::io::Error) -> Self {
        NetError::NameNotResolvedFor {
            domain: domain.to_string(),
            source: Arc::new(source),
        }
    }

    pub fn invariant(detail: impl Into<String>) -> Self {
        NetError::UpgradeInvariantViolation {
            detail: detail.into(),
        }
    }

    /// Whether the error is an internal consistency fault that must reach the
    /// caller intact instead of degrading to "no upgrade".
    pub fn is_fatal(&self) -> bool {
        matches!(self, NetError::UpgradeInvariantViolation { .. })
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -102 => NetError::ConnectionRefused,
            -104 => NetError::ConnectionFailed,
            -105 => NetError::NameNotResolved,
            -118 => NetError::ConnectionTimedOut,
            -137 => NetError::NameResolutionFailed,

            -300 => NetError::InvalidUrl,
            -301 => NetError::DisallowedUrlScheme,

            -10001 => NetError::InvalidTtl,
            -10003 => NetError::RedirectRejected,
            _ => NetError::Unknown(code),
        }
    }
}
