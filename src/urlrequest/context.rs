//! URL Request Context - Central configuration for upgrade-aware requests.
//!
//! Based on Chromium's net::URLRequestContext, provides a centralized
//! configuration point for the record cache, resolver, upgrade engine and
//! connection layer.

use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::base::neterror::NetError;
use crate::dns::{
    ConfirmationPolicy, DohEndpoint, HickoryRecordResolver, ModeController, ModeOptions,
    RecordCache, RecordResolverWithOverrides, ResolutionCoordinator, ResolveRecords,
    ResolverMode, ResolverSettings, ServiceRecord,
};
use crate::dns::validate_negative_ttl;
use crate::socket::{Connect, TcpConnector};
use crate::upgrade::{RedirectNotifier, UpgradeEngine};

/// Configuration options for URLRequestContext.
///
/// Deserializable from JSON; missing fields take their defaults.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    /// Master switch for record-driven upgrades.
    pub upgrade_enabled: bool,

    /// Resolver mode. Accepts a name (`"doh_first"`) or a code (`2`).
    pub mode: ResolverMode,

    /// DNS-over-HTTPS endpoint, e.g. `https://dns.example/dns-query`.
    pub doh_uri: Option<String>,

    /// Fixed address for the DoH endpoint.
    pub bootstrap_address: Option<IpAddr>,

    pub confirmation_policy: ConfirmationPolicy,

    /// Name probed over DoH to confirm it works.
    pub confirmation_name: String,

    /// Drop cached records when the resolver mode changes.
    pub clear_cache_on_mode_change: bool,

    /// How long "no records" and failed lookups are remembered.
    pub negative_ttl_secs: u64,

    /// Static records per hostname, answered before any real resolver.
    pub record_overrides: HashMap<String, Vec<ServiceRecord>>,

    /// Custom record resolver (None = use HickoryRecordResolver).
    #[serde(skip)]
    pub record_resolver: Option<Arc<dyn ResolveRecords>>,

    /// Custom connector (None = use TcpConnector).
    #[serde(skip)]
    pub connector: Option<Arc<dyn Connect>>,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            upgrade_enabled: true,
            mode: ResolverMode::NativeOnly,
            doh_uri: None,
            bootstrap_address: None,
            confirmation_policy: ConfirmationPolicy::SkipConfirm,
            confirmation_name: "example.com".to_string(),
            clear_cache_on_mode_change: true,
            negative_ttl_secs: 60,
            record_overrides: HashMap::new(),
            record_resolver: None,
            connector: None,
        }
    }
}

impl UpgradeConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, NetError> {
        let config: Self = serde_json::from_str(json).map_err(|e| NetError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check field combinations serde cannot.
    pub fn validate(&self) -> Result<(), NetError> {
        validate_negative_ttl(Duration::from_secs(self.negative_ttl_secs))?;
        if self.confirmation_name.trim().is_empty() {
            return Err(NetError::InvalidConfig {
                reason: "confirmation_name must not be empty".to_string(),
            });
        }
        self.doh_endpoint()?;
        Ok(())
    }

    fn doh_endpoint(&self) -> Result<Option<DohEndpoint>, NetError> {
        let Some(uri) = self.doh_uri.as_deref() else {
            // A custom resolver is free to handle DoH however it likes.
            if self.mode.uses_doh() && self.record_resolver.is_none() {
                return Err(NetError::InvalidConfig {
                    reason: format!("resolver mode {:?} needs doh_uri", self.mode),
                });
            }
            return Ok(None);
        };
        DohEndpoint::parse(uri).map(Some).map_err(|e| NetError::InvalidConfig {
            reason: format!("doh_uri {:?}: {}", uri, e),
        })
    }

    fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            mode: self.mode,
            bootstrap_address: self.bootstrap_address,
            confirmation_policy: self.confirmation_policy,
            confirmation_name: self.confirmation_name.clone(),
            upgrade_enabled: self.upgrade_enabled,
            negative_ttl: Duration::from_secs(self.negative_ttl_secs),
        }
    }
}

impl std::fmt::Debug for UpgradeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeConfig")
            .field("upgrade_enabled", &self.upgrade_enabled)
            .field("mode", &self.mode)
            .field("doh_uri", &self.doh_uri)
            .field("bootstrap_address", &self.bootstrap_address)
            .field("confirmation_policy", &self.confirmation_policy)
            .field("confirmation_name", &self.confirmation_name)
            .field("clear_cache_on_mode_change", &self.clear_cache_on_mode_change)
            .field("negative_ttl_secs", &self.negative_ttl_secs)
            .field("record_overrides_count", &self.record_overrides.len())
            .field("record_resolver", &self.record_resolver.is_some())
            .field("connector", &self.connector.is_some())
            .finish()
    }
}

/// Central configuration for upgrade-aware requests.
///
/// Mirrors Chromium's URLRequestContext, bundling together:
/// - HTTPS record cache and resolution coordinator
/// - Resolver mode controller
/// - Upgrade engine and redirect notifier
/// - Connection layer
pub struct URLRequestContext {
    cache: RecordCache,
    controller: Arc<ModeController>,
    coordinator: ResolutionCoordinator,
    engine: UpgradeEngine,
    notifier: RedirectNotifier,
    connector: Arc<dyn Connect>,
    clear_cache_on_mode_change: bool,
}

impl URLRequestContext {
    /// Create a new URLRequestContext with default configuration.
    pub fn new() -> Self {
        Self::build(UpgradeConfig::default(), None)
    }

    /// Create a new URLRequestContext with custom configuration.
    pub fn with_config(config: UpgradeConfig) -> Result<Self, NetError> {
        config.validate()?;
        let doh = config.doh_endpoint()?;
        Ok(Self::build(config, doh))
    }

    fn build(config: UpgradeConfig, doh: Option<DohEndpoint>) -> Self {
        let cache = RecordCache::new();
        let controller = Arc::new(ModeController::new(config.resolver_settings(), cache.clone()));

        // Setup record resolver with optional overrides
        let base_resolver: Arc<dyn ResolveRecords> = match (config.record_resolver.clone(), doh) {
            (Some(resolver), _) => resolver,
            (None, Some(endpoint)) => Arc::new(HickoryRecordResolver::with_doh(endpoint, controller.clone())),
            (None, None) => Arc::new(HickoryRecordResolver::new()),
        };

        let resolver: Arc<dyn ResolveRecords> = if config.record_overrides.is_empty() {
            base_resolver
        } else {
            Arc::new(RecordResolverWithOverrides::new(
                base_resolver,
                config.record_overrides.clone(),
            ))
        };

        let connector = config
            .connector
            .clone()
            .unwrap_or_else(|| Arc::new(TcpConnector::new()));

        tracing::debug!(config = ?config, "URLRequestContext created");

        Self {
            coordinator: ResolutionCoordinator::new(cache.clone(), resolver, controller.clone()),
            engine: UpgradeEngine::new(controller.clone()),
            notifier: RedirectNotifier::new(),
            cache,
            controller,
            connector,
            clear_cache_on_mode_change: config.clear_cache_on_mode_change,
        }
    }

    /// Get the HTTPS record cache.
    pub fn record_cache(&self) -> &RecordCache {
        &self.cache
    }

    /// Get the resolver mode controller.
    pub fn mode_controller(&self) -> &Arc<ModeController> {
        &self.controller
    }

    pub fn coordinator(&self) -> &ResolutionCoordinator {
        &self.coordinator
    }

    pub fn upgrade_engine(&self) -> &UpgradeEngine {
        &self.engine
    }

    /// Get the redirect notifier, for registering sinks.
    pub fn redirect_notifier(&self) -> &RedirectNotifier {
        &self.notifier
    }

    pub fn connector(&self) -> &Arc<dyn Connect> {
        &self.connector
    }

    /// Switch resolver mode, clearing the record cache if configured to.
    pub fn set_mode(&self, mode: ResolverMode) {
        self.controller.set_mode(
            mode,
            ModeOptions {
                clear_cache_on_change: self.clear_cache_on_mode_change,
            },
        );
    }
}

impl Default for URLRequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for URLRequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("URLRequestContext")
            .field("controller", &self.controller)
            .field("coordinator", &self.coordinator)
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{IsolationKey, Name};

    #[test]
    fn test_config_defaults() {
        let config = UpgradeConfig::from_json_str("{}").unwrap();
        assert!(config.upgrade_enabled);
        assert_eq!(config.mode, ResolverMode::NativeOnly);
        assert_eq!(config.confirmation_policy, ConfirmationPolicy::SkipConfirm);
        assert_eq!(config.negative_ttl_secs, 60);
        assert!(config.clear_cache_on_mode_change);
    }

    #[test]
    fn test_config_full() {
        let config = UpgradeConfig::from_json_str(
            r#"{
                "mode": 2,
                "doh_uri": "https://dns.example/dns-query",
                "bootstrap_address": "192.0.2.53",
                "confirmation_policy": "require_confirm",
                "record_overrides": {
                    "test.httpssvc.com": [{ "priority": 1, "target_port": 8443, "ttl_secs": 30 }]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.mode, ResolverMode::DohFirst);
        assert_eq!(config.bootstrap_address, Some("192.0.2.53".parse().unwrap()));
        assert_eq!(config.confirmation_policy, ConfirmationPolicy::RequireConfirm);
        let records = &config.record_overrides["test.httpssvc.com"];
        assert_eq!(records[0].target_port, Some(8443));
        assert_eq!(records[0].ttl, Duration::from_secs(30));
    }

    #[test]
    fn test_config_rejects_bad_input() {
        let bad = [
            r#"{ "mode": 7 }"#,
            r#"{ "negative_ttl_secs": 0 }"#,
            r#"{ "negative_ttl_secs": 18446744073709551615 }"#,
            r#"{ "mode": "doh_only" }"#,
            r#"{ "mode": "doh_only", "doh_uri": "http://dns.example/dns-query" }"#,
            r#"{ "upgrade_enabled": "yes" }"#,
        ];
        for json in bad {
            let err = UpgradeConfig::from_json_str(json).unwrap_err();
            assert!(matches!(err, NetError::InvalidConfig { .. }), "{}: {:?}", json, err);
        }
    }

    #[tokio::test]
    async fn test_override_with_huge_ttl_resolves() {
        let config = UpgradeConfig::from_json_str(
            r#"{ "record_overrides": { "test.httpssvc.com": [{ "target_port": 8443, "ttl_secs": 18446744073709551615 }] } }"#,
        )
        .unwrap();
        let context = URLRequestContext::with_config(config).unwrap();

        let resolution = context
            .coordinator()
            .resolve(Name::new("test.httpssvc.com"), IsolationKey::default())
            .await
            .unwrap();

        assert_eq!(resolution.records()[0].target_port, Some(8443));
        assert_eq!(context.record_cache().len(), 1);
    }

    #[tokio::test]
    async fn test_set_mode_honors_clear_flag() {
        let config = UpgradeConfig {
            clear_cache_on_mode_change: false,
            record_resolver: Some(Arc::new(HickoryRecordResolver::new())),
            ..Default::default()
        };
        let context = URLRequestContext::with_config(config).unwrap();
        context
            .record_cache()
            .store(
                "test.httpssvc.com",
                &Default::default(),
                crate::dns::CacheValue::Negative,
                Duration::from_secs(60),
            )
            .unwrap();

        context.set_mode(ResolverMode::Shadow);

        assert_eq!(context.mode_controller().mode(), ResolverMode::Shadow);
        assert_eq!(context.record_cache().len(), 1);
    }
}
