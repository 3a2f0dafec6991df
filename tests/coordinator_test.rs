//! Resolution coordinator integration tests.
//!
//! Covers:
//! - Coalescing of concurrent lookups
//! - Negative caching
//! - DoH race ordering and mid-flight cache clears
//! - Mode changes through the controller

use futures::future::join_all;
use httpsrr::base::neterror::NetError;
use httpsrr::dns::{
    CacheLookup, IsolationKey, ModeController, ModeOptions, Name, RecordCache, RecordLookup,
    RecordResolving, ResolutionCoordinator, ResolveRecords, ResolverMode, ResolverSettings,
    ServiceRecord, Transport,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const UNIT: Duration = Duration::from_millis(100);

/// Answers every name with one record after a per-transport delay.
struct DelayedResolver {
    native_delay: Duration,
    native_port: Option<u16>,
    doh_delay: Duration,
    doh_port: Option<u16>,
    missing: Vec<&'static str>,
    calls: AtomicUsize,
}

impl DelayedResolver {
    fn new(delay: Duration) -> Self {
        Self {
            native_delay: delay,
            native_port: None,
            doh_delay: delay,
            doh_port: None,
            missing: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ResolveRecords for DelayedResolver {
    fn resolve_records(&self, name: Name, _key: IsolationKey, transport: Transport) -> RecordResolving {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (delay, port) = match transport {
            Transport::Native => (self.native_delay, self.native_port),
            Transport::Doh => (self.doh_delay, self.doh_port),
        };
        let lookup = if self.missing.contains(&name.as_str()) {
            RecordLookup::NoRecords
        } else {
            RecordLookup::Records(vec![ServiceRecord::new(1, port, Duration::from_secs(300))])
        };
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(lookup)
        })
    }
}

fn setup(resolver: Arc<DelayedResolver>, mode: ResolverMode) -> ResolutionCoordinator {
    let cache = RecordCache::new();
    let settings = ResolverSettings {
        mode,
        ..Default::default()
    };
    let controller = Arc::new(ModeController::new(settings, cache.clone()));
    ResolutionCoordinator::new(cache, resolver, controller)
}

#[tokio::test(start_paused = true)]
async fn test_many_concurrent_callers_one_lookup() {
    let resolver = Arc::new(DelayedResolver::new(UNIT));
    let coordinator = setup(resolver.clone(), ResolverMode::NativeOnly);

    let results = join_all((0..50).map(|_| {
        coordinator.resolve(Name::new("test.httpssvc.com"), IsolationKey::default())
    }))
    .await;

    assert_eq!(resolver.calls(), 1);
    let first = results[0].as_ref().unwrap();
    for result in &results {
        assert_eq!(result.as_ref().unwrap(), first);
    }
    assert_eq!(coordinator.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_distinct_hosts_resolve_in_parallel() {
    let resolver = Arc::new(DelayedResolver::new(UNIT));
    let coordinator = setup(resolver.clone(), ResolverMode::NativeOnly);

    let hosts = ["a.example", "b.example", "c.example"];
    let start = tokio::time::Instant::now();
    let results = join_all(
        hosts
            .iter()
            .map(|host| coordinator.resolve(Name::new(*host), IsolationKey::default())),
    )
    .await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(resolver.calls(), 3);
    assert!(start.elapsed() < UNIT * 2);
}

#[tokio::test(start_paused = true)]
async fn test_cached_answer_served_without_lookup() {
    let resolver = Arc::new(DelayedResolver::new(UNIT));
    let coordinator = setup(resolver.clone(), ResolverMode::NativeOnly);

    coordinator
        .resolve(Name::new("test.httpssvc.com"), IsolationKey::default())
        .await
        .unwrap();
    coordinator
        .resolve(Name::new("TEST.httpssvc.com"), IsolationKey::default())
        .await
        .unwrap();

    assert_eq!(resolver.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_negative_answer_cached() {
    let resolver = Arc::new(DelayedResolver {
        missing: vec!["foo.notexisted.com"],
        ..DelayedResolver::new(UNIT)
    });
    let coordinator = setup(resolver.clone(), ResolverMode::NativeOnly);

    for _ in 0..3 {
        let resolution = coordinator
            .resolve(Name::new("foo.notexisted.com"), IsolationKey::default())
            .await
            .unwrap();
        assert!(resolution.is_negative());
    }

    assert_eq!(resolver.calls(), 1);
    assert_eq!(
        coordinator
            .cache()
            .lookup("foo.notexisted.com", &IsolationKey::default()),
        CacheLookup::Negative
    );
}

#[tokio::test(start_paused = true)]
async fn test_race_prefers_first_positive() {
    let resolver = Arc::new(DelayedResolver {
        native_delay: UNIT,
        native_port: None,
        doh_delay: UNIT * 5,
        doh_port: Some(8443),
        ..DelayedResolver::new(UNIT)
    });
    let coordinator = setup(resolver.clone(), ResolverMode::DohRace);

    let resolution = coordinator
        .resolve(Name::new("test.httpssvc.com"), IsolationKey::default())
        .await
        .unwrap();
    assert_eq!(resolution.records()[0].target_port, None);

    // Let the losing DoH leg finish; it must not touch the cache.
    tokio::time::sleep(UNIT * 10).await;
    match coordinator
        .cache()
        .lookup("test.httpssvc.com", &IsolationKey::default())
    {
        CacheLookup::Hit(records) => assert_eq!(records[0].target_port, None),
        other => panic!("expected native result cached, got {:?}", other),
    }
    assert_eq!(resolver.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_clear_all_mid_flight() {
    let resolver = Arc::new(DelayedResolver::new(UNIT * 5));
    let coordinator = setup(resolver.clone(), ResolverMode::NativeOnly);

    let in_flight = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .resolve(Name::new("test.httpssvc.com"), IsolationKey::default())
                .await
        })
    };

    tokio::time::sleep(UNIT).await;
    assert_eq!(coordinator.pending_count(), 1);
    coordinator.cache().clear_all();

    let resolution = in_flight.await.unwrap().unwrap();
    assert_eq!(resolution.records().len(), 1);
    assert!(matches!(
        coordinator
            .cache()
            .lookup("test.httpssvc.com", &IsolationKey::default()),
        CacheLookup::Hit(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_mode_change_keeps_cache_when_asked() {
    let resolver = Arc::new(DelayedResolver::new(UNIT));
    let coordinator = setup(resolver.clone(), ResolverMode::NativeOnly);

    coordinator
        .resolve(Name::new("test.httpssvc.com"), IsolationKey::default())
        .await
        .unwrap();
    coordinator.controller().set_mode(
        ResolverMode::DohFirst,
        ModeOptions {
            clear_cache_on_change: false,
        },
    );
    coordinator
        .resolve(Name::new("test.httpssvc.com"), IsolationKey::default())
        .await
        .unwrap();

    assert_eq!(resolver.calls(), 1);
}

struct FailingResolver;

impl ResolveRecords for FailingResolver {
    fn resolve_records(&self, _: Name, _: IsolationKey, _: Transport) -> RecordResolving {
        Box::pin(async { Err(NetError::NameNotResolved) })
    }
}

#[tokio::test]
async fn test_transport_failure_maps_to_resolution_failed() {
    let cache = RecordCache::new();
    let controller = Arc::new(ModeController::new(ResolverSettings::default(), cache.clone()));
    let coordinator = ResolutionCoordinator::new(cache, Arc::new(FailingResolver), controller);

    let err = coordinator
        .resolve(Name::new("broken.example"), IsolationKey::default())
        .await
        .unwrap_err();

    assert!(matches!(err, NetError::NameResolutionFailed));
    assert_eq!(err.as_i32(), -137);
}
