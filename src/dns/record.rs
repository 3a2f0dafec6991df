//! HTTPS resource record types.
//!
//! [`ServiceRecord`] is what a resolver hands back for one HTTPS RR in
//! ServiceMode; [`UpgradeRecord`] is the cached, expiring form keyed by
//! hostname and isolation partition.

use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

use super::resolve::IsolationKey;

/// One HTTPS-capability record as returned by a resolver.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawServiceRecord")]
pub struct ServiceRecord {
    /// SvcPriority; lower is preferred. Zero (AliasMode) never reaches here.
    pub priority: u16,
    /// The `port` SvcParam, if advertised.
    pub target_port: Option<u16>,
    /// Record TTL.
    pub ttl: Duration,
}

impl ServiceRecord {
    pub fn new(priority: u16, target_port: Option<u16>, ttl: Duration) -> Self {
        Self {
            priority,
            target_port,
            ttl,
        }
    }
}

/// Configuration form of a record: TTL in whole seconds.
#[derive(Deserialize)]
struct RawServiceRecord {
    #[serde(default = "default_priority")]
    priority: u16,
    #[serde(default)]
    target_port: Option<u16>,
    #[serde(default = "default_ttl_secs")]
    ttl_secs: u64,
}

fn default_priority() -> u16 {
    1
}

fn default_ttl_secs() -> u64 {
    300
}

impl From<RawServiceRecord> for ServiceRecord {
    fn from(raw: RawServiceRecord) -> Self {
        Self::new(raw.priority, raw.target_port, Duration::from_secs(raw.ttl_secs))
    }
}

/// A cached HTTPS-capability entry for a hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRecord {
    pub hostname: String,
    pub isolation_key: IsolationKey,
    pub target_port: Option<u16>,
    pub priority: u16,
    /// The record is invalid at or after this instant.
    pub expires_at: Instant,
    /// `false` marks a negative entry: resolution ran, nothing usable.
    pub valid: bool,
}

impl UpgradeRecord {
    pub(crate) fn from_service(
        hostname: &str,
        isolation_key: &IsolationKey,
        record: &ServiceRecord,
        expires_at: Instant,
    ) -> Self {
        Self {
            hostname: hostname.to_string(),
            isolation_key: isolation_key.clone(),
            target_port: record.target_port,
            priority: record.priority,
            expires_at,
            valid: true,
        }
    }

    pub(crate) fn negative(hostname: &str, isolation_key: &IsolationKey, expires_at: Instant) -> Self {
        Self {
            hostname: hostname.to_string(),
            isolation_key: isolation_key.clone(),
            target_port: None,
            priority: u16::MAX,
            expires_at,
            valid: false,
        }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Shortest TTL of a record set, which bounds how long the set may be cached.
pub fn min_ttl(records: &[ServiceRecord]) -> Option<Duration> {
    records.iter().map(|r| r.ttl).min()
}
