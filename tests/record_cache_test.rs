//! HTTPS record cache integration tests.

use httpsrr::base::neterror::NetError;
use httpsrr::dns::{CacheLookup, CacheValue, IsolationKey, RecordCache, ServiceRecord};
use std::time::Duration;

fn records(ports: &[Option<u16>]) -> CacheValue {
    CacheValue::Records(
        ports
            .iter()
            .enumerate()
            .map(|(i, port)| ServiceRecord::new(i as u16 + 1, *port, Duration::from_secs(300)))
            .collect(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_entry_valid_until_ttl() {
    let cache = RecordCache::new();
    let key = IsolationKey::default();
    cache
        .store("test.httpssvc.com", &key, records(&[None]), Duration::from_secs(300))
        .unwrap();

    tokio::time::advance(Duration::from_secs(299)).await;
    assert!(matches!(cache.lookup("test.httpssvc.com", &key), CacheLookup::Hit(_)));

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(cache.lookup("test.httpssvc.com", &key), CacheLookup::Miss);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_replaces_expiry() {
    let cache = RecordCache::new();
    let key = IsolationKey::default();
    cache
        .store("test.httpssvc.com", &key, records(&[None]), Duration::from_secs(10))
        .unwrap();

    tokio::time::advance(Duration::from_secs(5)).await;
    cache
        .store("test.httpssvc.com", &key, records(&[Some(8443)]), Duration::from_secs(10))
        .unwrap();

    tokio::time::advance(Duration::from_secs(8)).await;
    match cache.lookup("test.httpssvc.com", &key) {
        CacheLookup::Hit(records) => {
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].target_port, Some(8443));
        }
        other => panic!("expected refreshed entry, got {:?}", other),
    }
}

#[tokio::test]
async fn test_hostname_normalization() {
    let cache = RecordCache::new();
    let key = IsolationKey::default();
    cache
        .store("Test.HttpsSvc.COM.", &key, records(&[None]), Duration::from_secs(60))
        .unwrap();

    match cache.lookup("test.httpssvc.com", &key) {
        CacheLookup::Hit(records) => assert_eq!(records[0].hostname, "test.httpssvc.com"),
        other => panic!("expected hit, got {:?}", other),
    }
}

#[tokio::test]
async fn test_isolation_keys_separate() {
    let cache = RecordCache::new();
    let first_party = IsolationKey::new("https://a.example");
    let third_party = IsolationKey::new("https://b.example");

    cache
        .store("test.httpssvc.com", &first_party, records(&[None]), Duration::from_secs(60))
        .unwrap();
    cache
        .store("test.httpssvc.com", &third_party, CacheValue::Negative, Duration::from_secs(60))
        .unwrap();

    assert!(matches!(
        cache.lookup("test.httpssvc.com", &first_party),
        CacheLookup::Hit(_)
    ));
    assert_eq!(cache.lookup("test.httpssvc.com", &third_party), CacheLookup::Negative);
    assert_eq!(
        cache.lookup("test.httpssvc.com", &IsolationKey::default()),
        CacheLookup::Miss
    );

    assert!(cache.invalidate("test.httpssvc.com", &third_party));
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_zero_ttl_rejected() {
    let cache = RecordCache::new();
    let err = cache
        .store("a.example", &IsolationKey::default(), records(&[None]), Duration::ZERO)
        .unwrap_err();

    assert!(matches!(err, NetError::InvalidTtl));
    assert_eq!(err.as_i32(), -10001);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_clones_share_entries() {
    let cache = RecordCache::new();
    let clone = cache.clone();
    clone
        .store("a.example", &IsolationKey::default(), records(&[None]), Duration::from_secs(60))
        .unwrap();

    assert_eq!(cache.len(), 1);
    cache.clear_all();
    assert!(clone.is_empty());
}
