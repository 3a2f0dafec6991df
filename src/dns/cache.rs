//! HTTPS record cache with TTL and negative entries.
//!
//! Chromium mapping: net/dns/host_cache.h (HTTPS results only)
//!
//! One authoritative record set is held per (hostname, isolation key). A
//! store replaces the previous set wholesale; expired entries are dropped
//! lazily on lookup.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::record::{ServiceRecord, UpgradeRecord};
use super::resolve::{normalize_host, IsolationKey};
use crate::base::neterror::NetError;

/// Upper bound on how long any entry stays cached. Longer TTLs are clamped.
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Cache key: normalized hostname plus partition.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct CacheKey {
    host: String,
    isolation_key: IsolationKey,
}

impl CacheKey {
    pub fn new(host: &str, isolation_key: &IsolationKey) -> Self {
        Self {
            host: normalize_host(host),
            isolation_key: isolation_key.clone(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn isolation_key(&self) -> &IsolationKey {
        &self.isolation_key
    }
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Fresh, usable records.
    Hit(Arc<[UpgradeRecord]>),
    /// Fresh negative entry: resolution was attempted and found nothing.
    Negative,
    /// Nothing cached, or the entry expired.
    Miss,
}

/// Value handed to [`RecordCache::store`].
#[derive(Debug, Clone)]
pub enum CacheValue {
    Records(Vec<ServiceRecord>),
    Negative,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    records: Arc<[UpgradeRecord]>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_negative(&self) -> bool {
        self.records.iter().all(|r| !r.valid)
    }
}

/// Thread-safe HTTPS record cache.
///
/// Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct RecordCache {
    entries: Arc<DashMap<CacheKey, CacheEntry>>,
}

impl RecordCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the records for a hostname in a partition.
    pub fn lookup(&self, hostname: &str, isolation_key: &IsolationKey) -> CacheLookup {
        self.lookup_key(&CacheKey::new(hostname, isolation_key))
    }

    pub(crate) fn lookup_key(&self, key: &CacheKey) -> CacheLookup {
        let now = Instant::now();
        {
            let Some(entry) = self.entries.get(key) else {
                return CacheLookup::Miss;
            };
            if now < entry.expires_at {
                return if entry.is_negative() {
                    CacheLookup::Negative
                } else {
                    CacheLookup::Hit(entry.records.clone())
                };
            }
        }

        // Only evict if still expired; a concurrent store may have replaced it.
        if self
            .entries
            .remove_if(key, |_, entry| now >= entry.expires_at)
            .is_some()
        {
            tracing::trace!(host = %key.host(), "evicted expired HTTPS record entry");
        }
        CacheLookup::Miss
    }

    /// Store records (or a negative marker) for a hostname, replacing any
    /// existing entry.
    ///
    /// A zero TTL is rejected with [`NetError::InvalidTtl`] and leaves the
    /// existing entry untouched. TTLs above [`MAX_CACHE_TTL`] are clamped.
    /// An empty record list is stored as negative. Returns the stored record
    /// set.
    pub fn store(
        &self,
        hostname: &str,
        isolation_key: &IsolationKey,
        value: CacheValue,
        ttl: Duration,
    ) -> Result<Arc<[UpgradeRecord]>, NetError> {
        if ttl.is_zero() {
            tracing::warn!(host = %hostname, "rejecting HTTPS record with non-positive TTL");
            return Err(NetError::InvalidTtl);
        }

        let ttl = ttl.min(MAX_CACHE_TTL);
        let key = CacheKey::new(hostname, isolation_key);
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or(NetError::InvalidTtl)?;
        let records: Arc<[UpgradeRecord]> = match value {
            CacheValue::Records(records) if !records.is_empty() => records
                .iter()
                .map(|r| UpgradeRecord::from_service(key.host(), isolation_key, r, expires_at))
                .collect(),
            _ => Arc::from(vec![UpgradeRecord::negative(
                key.host(),
                isolation_key,
                expires_at,
            )]),
        };

        tracing::debug!(
            host = %key.host(),
            count = records.len(),
            ttl_secs = ttl.as_secs(),
            "storing HTTPS record entry"
        );
        self.entries.insert(
            key,
            CacheEntry {
                records: records.clone(),
                expires_at,
            },
        );
        Ok(records)
    }

    /// Remove the entry for a hostname in a partition.
    pub fn invalidate(&self, hostname: &str, isolation_key: &IsolationKey) -> bool {
        self.entries
            .remove(&CacheKey::new(hostname, isolation_key))
            .is_some()
    }

    /// Remove every entry. In-flight resolutions are unaffected and will
    /// still write their results.
    pub fn clear_all(&self) {
        self.entries.clear();
    }

    /// Get the number of entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
