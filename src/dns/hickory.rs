//! HTTPS record resolver using hickory-dns.
//!
//! Provides both transports behind one [`ResolveRecords`] implementation:
//! - native: the system DNS configuration, shared through a static `LazyLock`
//! - DoH: a hickory resolver whose only name server is the configured
//!   DNS-over-HTTPS endpoint
//!
//! The DoH endpoint is reached through the bootstrap address when one is set,
//! otherwise its hostname is resolved with getaddrinfo. It is never resolved
//! over DoH itself.

use super::gai::{is_ip_literal, GaiResolver};
use super::mode::ModeController;
use super::record::ServiceRecord;
use super::resolve::{
    normalize_host, IsolationKey, Name, RecordLookup, RecordResolving, ResolveRecords, Transport,
};
use crate::base::neterror::NetError;
use hickory_resolver::{
    config::{NameServerConfigGroup, ResolverConfig},
    lookup::Lookup,
    name_server::TokioConnectionProvider,
    proto::rr::{
        rdata::svcb::{SvcParamValue, SVCB},
        RData, RecordType,
    },
    TokioResolver,
};
use std::{
    fmt,
    net::IpAddr,
    sync::{Arc, LazyLock},
    time::Duration,
};

/// Location of a DNS-over-HTTPS server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DohEndpoint {
    host: String,
    port: u16,
    path: String,
}

impl DohEndpoint {
    /// Parses an `https://` DoH URI such as `https://dns.example:8443/dns-query`.
    pub fn parse(uri: &str) -> Result<Self, NetError> {
        let uri: http::Uri = uri.parse().map_err(|_| NetError::InvalidUrl)?;
        if uri.scheme_str() != Some("https") {
            return Err(NetError::DisallowedUrlScheme);
        }
        let host = uri.host().ok_or(NetError::InvalidUrl)?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        Ok(Self {
            host: normalize_host(host),
            port: uri.port_u16().unwrap_or(443),
            path: uri.path().to_string(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether `name` is the endpoint's own hostname.
    pub fn is_self(&self, name: &Name) -> bool {
        name.normalized() == self.host
    }
}

struct DohTransport {
    endpoint: DohEndpoint,
    controller: Arc<ModeController>,
    // Rebuilt when the bootstrap address changes.
    resolver: tokio::sync::Mutex<Option<(Option<IpAddr>, Arc<TokioResolver>)>>,
}

impl DohTransport {
    async fn resolver(&self) -> Result<Arc<TokioResolver>, NetError> {
        let bootstrap = self.controller.settings().bootstrap_address;
        let mut slot = self.resolver.lock().await;
        if let Some((built_with, resolver)) = slot.as_ref() {
            if *built_with == bootstrap {
                return Ok(resolver.clone());
            }
        }

        let ips = match bootstrap {
            Some(ip) => vec![ip],
            None => {
                if !is_ip_literal(&self.endpoint.host) {
                    tracing::debug!(
                        endpoint = %self.endpoint.host,
                        "no bootstrap address, resolving DoH endpoint natively"
                    );
                }
                GaiResolver::new().lookup_ips(&self.endpoint.host).await?
            }
        };

        let mut group = NameServerConfigGroup::from_ips_https(
            &ips,
            self.endpoint.port,
            self.endpoint.host.clone(),
            true,
        );
        for server in group.iter_mut() {
            server.http_endpoint = Some(self.endpoint.path.clone());
        }
        let config = ResolverConfig::from_parts(None, vec![], group);
        let resolver = Arc::new(
            TokioResolver::builder_with_config(config, TokioConnectionProvider::default()).build(),
        );

        tracing::info!(
            endpoint = %self.endpoint.host,
            port = self.endpoint.port,
            path = %self.endpoint.path,
            servers = ips.len(),
            bootstrap = ?bootstrap,
            "DoH resolver ready"
        );
        *slot = Some((bootstrap, resolver.clone()));
        Ok(resolver)
    }
}

/// HTTPS record resolver backed by hickory-dns.
///
/// The native resolver is lazily initialized on first use and shared across
/// all instances. It automatically configures itself based on the system's
/// DNS settings.
///
/// # Example
///
/// ```rust,ignore
/// use httpsrr::dns::{HickoryRecordResolver, IsolationKey, Name, ResolveRecords, Transport};
///
/// let resolver = HickoryRecordResolver::new();
/// let lookup = resolver
///     .resolve_records(Name::new("example.com"), IsolationKey::default(), Transport::Native)
///     .await?;
/// ```
#[derive(Clone)]
pub struct HickoryRecordResolver {
    native: NativeTransport,
    doh: Option<Arc<DohTransport>>,
}

#[derive(Clone)]
enum NativeTransport {
    System(&'static LazyLock<TokioResolver>),
    Custom(Arc<dyn ResolveRecords>),
}

impl HickoryRecordResolver {
    /// Creates a resolver with the native transport only. DoH queries fail
    /// with `NameResolutionFailed`.
    pub fn new() -> Self {
        static RESOLVER: LazyLock<TokioResolver> = LazyLock::new(|| {
            let builder = match TokioResolver::builder_tokio() {
                Ok(builder) => {
                    tracing::debug!("Using system DNS configuration");
                    builder
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Failed to read system DNS config, using defaults"
                    );
                    TokioResolver::builder_with_config(
                        ResolverConfig::default(),
                        TokioConnectionProvider::default(),
                    )
                }
            };

            builder.build()
        });

        Self {
            native: NativeTransport::System(&RESOLVER),
            doh: None,
        }
    }

    /// Creates a resolver with both transports. The bootstrap address is read
    /// from `controller` each time the DoH resolver is (re)built.
    pub fn with_doh(endpoint: DohEndpoint, controller: Arc<ModeController>) -> Self {
        Self {
            doh: Some(Arc::new(DohTransport {
                endpoint,
                controller,
                resolver: tokio::sync::Mutex::new(None),
            })),
            ..Self::new()
        }
    }

    /// Replaces the system resolver used for native queries, including
    /// queries for the DoH endpoint's own hostname.
    pub fn with_native(mut self, native: Arc<dyn ResolveRecords>) -> Self {
        self.native = NativeTransport::Custom(native);
        self
    }

    pub fn doh_endpoint(&self) -> Option<&DohEndpoint> {
        self.doh.as_ref().map(|doh| &doh.endpoint)
    }
}

impl Default for HickoryRecordResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HickoryRecordResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HickoryRecordResolver")
            .field("doh_endpoint", &self.doh_endpoint())
            .finish_non_exhaustive()
    }
}

impl HickoryRecordResolver {
    async fn query_native(
        &self,
        name: Name,
        isolation_key: IsolationKey,
    ) -> Result<RecordLookup, NetError> {
        match &self.native {
            NativeTransport::System(resolver) => query(resolver, &name, Transport::Native).await,
            NativeTransport::Custom(resolver) => {
                resolver
                    .resolve_records(name, isolation_key, Transport::Native)
                    .await
            }
        }
    }
}

impl ResolveRecords for HickoryRecordResolver {
    fn resolve_records(
        &self,
        name: Name,
        isolation_key: IsolationKey,
        transport: Transport,
    ) -> RecordResolving {
        let resolver = self.clone();
        Box::pin(async move {
            match (transport, resolver.doh.as_ref()) {
                (Transport::Native, _) => resolver.query_native(name, isolation_key).await,
                (Transport::Doh, Some(doh)) if doh.endpoint.is_self(&name) => {
                    // The DoH path must not depend on itself.
                    tracing::debug!(domain = %name, "DoH endpoint queried natively");
                    resolver.query_native(name, isolation_key).await
                }
                (Transport::Doh, Some(doh)) => {
                    let doh_resolver = doh.resolver().await?;
                    query(&doh_resolver, &name, transport).await
                }
                (Transport::Doh, None) => {
                    tracing::debug!(domain = %name, "DoH requested but no endpoint configured");
                    Err(NetError::NameResolutionFailed)
                }
            }
        })
    }
}

async fn query(
    resolver: &TokioResolver,
    name: &Name,
    transport: Transport,
) -> Result<RecordLookup, NetError> {
    tracing::debug!(domain = %name, %transport, "resolving HTTPS record via hickory-dns");

    match resolver.lookup(name.as_str(), RecordType::HTTPS).await {
        Ok(lookup) => {
            let result = records_from_lookup(&lookup);
            tracing::debug!(domain = %name, %transport, result = ?result, "HTTPS lookup complete");
            Ok(result)
        }
        Err(e) if e.is_nx_domain() || e.is_no_records_found() => {
            tracing::debug!(domain = %name, %transport, "no HTTPS records");
            Ok(RecordLookup::NoRecords)
        }
        Err(e) => {
            tracing::debug!(domain = %name, %transport, error = %e, "hickory-dns lookup failed");
            Err(NetError::NameResolutionFailed)
        }
    }
}

fn records_from_lookup(lookup: &Lookup) -> RecordLookup {
    let remaining = lookup
        .valid_until()
        .saturating_duration_since(std::time::Instant::now());
    let ttl = Duration::from_secs(remaining.as_secs());

    let mut saw_https = false;
    let mut records = Vec::new();
    for rdata in lookup.iter() {
        if let RData::HTTPS(https) = rdata {
            saw_https = true;
            if let Some(record) = service_record(&https.0, ttl) {
                records.push(record);
            }
        }
    }

    if !records.is_empty() {
        RecordLookup::Records(records)
    } else if saw_https {
        RecordLookup::Malformed
    } else {
        RecordLookup::NoRecords
    }
}

/// Converts one SVCB rdata into a ServiceMode record. AliasMode (priority 0)
/// and a zero port are not usable for an upgrade.
fn service_record(svcb: &SVCB, ttl: Duration) -> Option<ServiceRecord> {
    let priority = svcb.svc_priority();
    if priority == 0 {
        return None;
    }

    let mut target_port = None;
    for (_, value) in svcb.svc_params() {
        if let SvcParamValue::Port(port) = value {
            if *port == 0 {
                return None;
            }
            target_port = Some(*port);
        }
    }

    Some(ServiceRecord::new(priority, target_port, ttl))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::cache::RecordCache;
    use crate::dns::mode::ResolverSettings;

    #[test]
    fn test_doh_endpoint_parse() {
        let endpoint = DohEndpoint::parse("https://Foo.Example.com:8443/httpssvc_as_altsvc").unwrap();
        assert_eq!(endpoint.host(), "foo.example.com");
        assert_eq!(endpoint.port(), 8443);
        assert_eq!(endpoint.path(), "/httpssvc_as_altsvc");

        let endpoint = DohEndpoint::parse("https://dns.example/dns-query").unwrap();
        assert_eq!(endpoint.port(), 443);
    }

    #[test]
    fn test_doh_endpoint_rejects_plaintext() {
        assert!(matches!(
            DohEndpoint::parse("http://dns.example/dns-query"),
            Err(NetError::DisallowedUrlScheme)
        ));
        assert!(matches!(DohEndpoint::parse("not a uri"), Err(NetError::InvalidUrl)));
    }

    #[test]
    fn test_doh_endpoint_is_self() {
        let endpoint = DohEndpoint::parse("https://foo.example.com/dns-query").unwrap();
        assert!(endpoint.is_self(&Name::new("FOO.example.com.")));
        assert!(!endpoint.is_self(&Name::new("test.httpssvc.com")));
    }

    #[test]
    fn test_hickory_resolver_is_clone() {
        let r1 = HickoryRecordResolver::new();
        let r2 = r1.clone();
        // Both should point to the same static resolver
        match (&r1.native, &r2.native) {
            (NativeTransport::System(a), NativeTransport::System(b)) => assert!(std::ptr::eq(*a, *b)),
            _ => panic!("expected the system resolver"),
        }
        assert!(r1.doh_endpoint().is_none());
    }

    #[tokio::test]
    async fn test_doh_without_endpoint_fails() {
        let resolver = HickoryRecordResolver::new();
        let result = resolver
            .resolve_records(Name::new("example.com"), IsolationKey::default(), Transport::Doh)
            .await;
        assert!(matches!(result, Err(NetError::NameResolutionFailed)));
    }

    #[test]
    fn test_with_doh_keeps_endpoint() {
        let controller = Arc::new(ModeController::new(ResolverSettings::default(), RecordCache::new()));
        let endpoint = DohEndpoint::parse("https://127.0.0.1:8443/dns-query").unwrap();
        let resolver = HickoryRecordResolver::with_doh(endpoint.clone(), controller);
        assert_eq!(resolver.doh_endpoint(), Some(&endpoint));
    }

    /// Native leg that answers with a fixed port and records what it saw.
    #[derive(Default)]
    struct RecordingNative {
        seen: std::sync::Mutex<Vec<(String, Transport)>>,
    }

    impl ResolveRecords for RecordingNative {
        fn resolve_records(&self, name: Name, _: IsolationKey, transport: Transport) -> RecordResolving {
            self.seen
                .lock()
                .unwrap()
                .push((name.as_str().to_string(), transport));
            Box::pin(async {
                Ok(RecordLookup::Records(vec![ServiceRecord::new(
                    1,
                    Some(8443),
                    Duration::from_secs(60),
                )]))
            })
        }
    }

    fn controller() -> Arc<ModeController> {
        Arc::new(ModeController::new(ResolverSettings::default(), RecordCache::new()))
    }

    fn doh_transport(resolver: &HickoryRecordResolver) -> &DohTransport {
        resolver.doh.as_deref().unwrap()
    }

    #[tokio::test]
    async fn test_doh_query_for_endpoint_goes_native() {
        let native = Arc::new(RecordingNative::default());
        let endpoint = DohEndpoint::parse("https://foo.example.com:8443/httpssvc_as_altsvc").unwrap();
        let resolver =
            HickoryRecordResolver::with_doh(endpoint, controller()).with_native(native.clone());

        let lookup = resolver
            .resolve_records(Name::new("Foo.Example.com."), IsolationKey::default(), Transport::Doh)
            .await
            .unwrap();

        assert!(lookup.is_positive());
        assert_eq!(
            *native.seen.lock().unwrap(),
            vec![("Foo.Example.com.".to_string(), Transport::Native)]
        );
        assert!(doh_transport(&resolver).resolver.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_native_query_uses_injected_resolver() {
        let native = Arc::new(RecordingNative::default());
        let resolver = HickoryRecordResolver::new().with_native(native.clone());

        resolver
            .resolve_records(Name::new("test.httpssvc.com"), IsolationKey::default(), Transport::Native)
            .await
            .unwrap();

        assert_eq!(native.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_doh_resolver_uses_endpoint_path() {
        let endpoint = DohEndpoint::parse("https://127.0.0.1:8443/httpssvc_as_altsvc").unwrap();
        let resolver = HickoryRecordResolver::with_doh(endpoint, controller());

        let built = doh_transport(&resolver).resolver().await.unwrap();
        let servers = built.config().name_servers();

        assert!(!servers.is_empty());
        for server in servers {
            assert_eq!(server.http_endpoint.as_deref(), Some("/httpssvc_as_altsvc"));
            assert_eq!(server.socket_addr.port(), 8443);
        }
    }

    #[tokio::test]
    async fn test_doh_resolver_rebuilt_on_bootstrap_change() {
        let controller = controller();
        let endpoint = DohEndpoint::parse("https://dns.example/dns-query").unwrap();
        controller.set_bootstrap_address(Some("192.0.2.53".parse().unwrap()));
        let resolver = HickoryRecordResolver::with_doh(endpoint, controller.clone());
        let doh = doh_transport(&resolver);

        let first = doh.resolver().await.unwrap();
        let again = doh.resolver().await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(
            first.config().name_servers()[0].socket_addr.ip(),
            "192.0.2.53".parse::<IpAddr>().unwrap()
        );

        controller.set_bootstrap_address(Some("192.0.2.54".parse().unwrap()));
        let rebuilt = doh.resolver().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &rebuilt));
        assert_eq!(
            rebuilt.config().name_servers()[0].socket_addr.ip(),
            "192.0.2.54".parse::<IpAddr>().unwrap()
        );
    }
}
