//! Core HTTPS record resolution types and traits.
//!
//! This module defines the `ResolveRecords` trait and supporting types that
//! form the foundation of the DNS abstraction layer.

use super::record::ServiceRecord;
use crate::base::neterror::NetError;
use std::{collections::HashMap, fmt, future::Future, pin::Pin, sync::Arc};

/// A domain name to resolve.
///
/// This is a lightweight wrapper around a hostname string that provides
/// a type-safe way to pass domain names to resolvers.
#[derive(Clone, Hash, Eq, PartialEq)]
pub struct Name {
    host: Box<str>,
}

impl Name {
    /// Creates a new [`Name`] from any string-like type.
    #[inline]
    pub fn new(host: impl Into<Box<str>>) -> Self {
        Self { host: host.into() }
    }

    /// View the hostname as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.host
    }

    /// Lowercased hostname without a trailing root dot, as used for cache keys.
    pub fn normalized(&self) -> String {
        normalize_host(&self.host)
    }
}

pub(crate) fn normalize_host(host: &str) -> String {
    host.trim_end_matches('.').to_ascii_lowercase()
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Name::new(value)
    }
}

impl From<String> for Name {
    fn from(value: String) -> Self {
        Name::new(value)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.host, f)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.host, f)
    }
}

/// Opaque network partition key.
///
/// Records resolved under one key are never served to another. The default
/// key is the unpartitioned context.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct IsolationKey(Arc<str>);

impl Default for IsolationKey {
    fn default() -> Self {
        Self(Arc::from(""))
    }
}

impl IsolationKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for IsolationKey {
    fn from(value: &str) -> Self {
        IsolationKey::new(value)
    }
}

/// Which resolver transport a lookup goes over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Operating system / classic UDP+TCP resolution.
    Native,
    /// DNS-over-HTTPS.
    Doh,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Native => f.write_str("native"),
            Transport::Doh => f.write_str("doh"),
        }
    }
}

/// Outcome of a successful HTTPS record query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordLookup {
    /// ServiceMode records, in answer order.
    Records(Vec<ServiceRecord>),
    /// The name does not exist or has no HTTPS records.
    NoRecords,
    /// An answer came back but nothing in it is usable.
    Malformed,
}

impl RecordLookup {
    pub fn is_positive(&self) -> bool {
        matches!(self, RecordLookup::Records(records) if !records.is_empty())
    }
}

/// Alias for the `Future` type returned by a record resolver.
pub type RecordResolving = Pin<Box<dyn Future<Output = Result<RecordLookup, NetError>> + Send>>;

/// Trait for HTTPS record resolution.
///
/// Implementations must be thread-safe. Retries and timeouts are the
/// resolver's own business; callers see one answer per call.
///
/// # Design Notes
///
/// - Uses `&self` for concurrent resolution without mutable access.
/// - Returns boxed futures for trait object compatibility.
pub trait ResolveRecords: Send + Sync {
    /// Queries HTTPS records for `name` over `transport`.
    fn resolve_records(
        &self,
        name: Name,
        isolation_key: IsolationKey,
        transport: Transport,
    ) -> RecordResolving;
}

/// Blanket implementation for Arc-wrapped resolvers.
impl<R: ResolveRecords + ?Sized> ResolveRecords for Arc<R> {
    fn resolve_records(
        &self,
        name: Name,
        isolation_key: IsolationKey,
        transport: Transport,
    ) -> RecordResolving {
        (**self).resolve_records(name, isolation_key, transport)
    }
}

/// Record resolver wrapper that supports hostname overrides.
///
/// This resolver first checks a map of hostname-to-records overrides before
/// falling back to the underlying resolver. Overrides answer on every
/// transport. An empty override list answers `NoRecords`.
///
/// # Example
///
/// ```rust,ignore
/// use httpsrr::dns::{RecordResolverWithOverrides, HickoryRecordResolver, ServiceRecord};
/// use std::collections::HashMap;
/// use std::time::Duration;
///
/// let mut overrides = HashMap::new();
/// overrides.insert(
///     "test.httpssvc.com".to_string(),
///     vec![ServiceRecord::new(1, None, Duration::from_secs(300))],
/// );
///
/// let resolver = RecordResolverWithOverrides::new(
///     Arc::new(HickoryRecordResolver::new()),
///     overrides,
/// );
/// ```
pub struct RecordResolverWithOverrides {
    inner: Arc<dyn ResolveRecords>,
    overrides: Arc<HashMap<String, Vec<ServiceRecord>>>,
}

impl RecordResolverWithOverrides {
    /// Creates a new resolver with the given overrides.
    ///
    /// Override hostnames are matched case-insensitively.
    pub fn new(inner: Arc<dyn ResolveRecords>, overrides: HashMap<String, Vec<ServiceRecord>>) -> Self {
        let overrides = overrides
            .into_iter()
            .map(|(host, records)| (normalize_host(&host), records))
            .collect();
        Self {
            inner,
            overrides: Arc::new(overrides),
        }
    }

    /// Returns the number of configured overrides.
    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }
}

impl ResolveRecords for RecordResolverWithOverrides {
    fn resolve_records(
        &self,
        name: Name,
        isolation_key: IsolationKey,
        transport: Transport,
    ) -> RecordResolving {
        if let Some(records) = self.overrides.get(&name.normalized()) {
            let lookup = if records.is_empty() {
                RecordLookup::NoRecords
            } else {
                RecordLookup::Records(records.clone())
            };
            return Box::pin(std::future::ready(Ok(lookup)));
        }
        self.inner.resolve_records(name, isolation_key, transport)
    }
}

impl fmt::Debug for RecordResolverWithOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordResolverWithOverrides")
            .field("override_count", &self.overrides.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_name_from_str() {
        let name = Name::from("example.com");
        assert_eq!(name.as_str(), "example.com");
        assert_eq!(name.to_string(), "example.com");
    }

    #[test]
    fn test_name_normalized() {
        assert_eq!(Name::new("Test.HTTPSSVC.com.").normalized(), "test.httpssvc.com");
    }

    #[test]
    fn test_name_hash() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(Name::new("example.com"));
        set.insert(Name::new("example.com")); // Duplicate

        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_isolation_key_default_is_distinct() {
        assert_ne!(IsolationKey::default(), IsolationKey::new("partition-a"));
        assert_eq!(IsolationKey::new("a"), IsolationKey::from("a"));
    }

    struct MockResolver;

    impl ResolveRecords for MockResolver {
        fn resolve_records(&self, _: Name, _: IsolationKey, _: Transport) -> RecordResolving {
            Box::pin(async { Err(NetError::NameResolutionFailed) })
        }
    }

    #[tokio::test]
    async fn test_override_resolver_hit() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "Override.Local".to_string(),
            vec![ServiceRecord::new(1, Some(8443), Duration::from_secs(60))],
        );

        let resolver = RecordResolverWithOverrides::new(Arc::new(MockResolver), overrides);
        let lookup = resolver
            .resolve_records(Name::new("override.local"), IsolationKey::default(), Transport::Doh)
            .await
            .unwrap();

        match lookup {
            RecordLookup::Records(records) => assert_eq!(records[0].target_port, Some(8443)),
            other => panic!("unexpected lookup {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_override_resolver_empty_is_negative() {
        let mut overrides = HashMap::new();
        overrides.insert("nothing.local".to_string(), Vec::new());

        let resolver = RecordResolverWithOverrides::new(Arc::new(MockResolver), overrides);
        let lookup = resolver
            .resolve_records(Name::new("nothing.local"), IsolationKey::default(), Transport::Native)
            .await
            .unwrap();

        assert_eq!(lookup, RecordLookup::NoRecords);
    }

    #[tokio::test]
    async fn test_override_resolver_miss() {
        let resolver = RecordResolverWithOverrides::new(Arc::new(MockResolver), HashMap::new());

        let result = resolver
            .resolve_records(Name::new("other.com"), IsolationKey::default(), Transport::Native)
            .await;

        assert!(matches!(result, Err(NetError::NameResolutionFailed)));
        assert_eq!(resolver.override_count(), 0);
    }
}
