//! Coalescing HTTPS record resolution.
//!
//! Chromium mapping: net/dns/host_resolver_manager.cc (job attach / dedup)
//!
//! At most one lookup runs per (hostname, isolation key). Callers that arrive
//! while it is running are queued and get the same answer, in arrival order.
//! The lookup itself runs detached from any caller, so a caller going away
//! never cancels it and its result still reaches the cache.

use std::collections::{hash_map::Entry, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use super::cache::{CacheKey, CacheLookup, CacheValue, RecordCache};
use super::mode::{ModeController, ResolverMode, ResolverSettings};
use super::record::{min_ttl, UpgradeRecord};
use super::resolve::{IsolationKey, Name, RecordLookup, ResolveRecords, Transport};
use crate::base::neterror::NetError;

/// What a resolution produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Usable records for the host.
    Records(Arc<[UpgradeRecord]>),
    /// The host has no usable HTTPS records.
    Negative,
}

impl Resolution {
    pub fn records(&self) -> &[UpgradeRecord] {
        match self {
            Resolution::Records(records) => &records[..],
            Resolution::Negative => &[],
        }
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, Resolution::Negative)
    }
}

pub type ResolutionResult = Result<Resolution, NetError>;

struct PendingResolution {
    waiters: Vec<oneshot::Sender<ResolutionResult>>,
}

struct Inner {
    cache: RecordCache,
    resolver: Arc<dyn ResolveRecords>,
    controller: Arc<ModeController>,
    pending: Mutex<HashMap<CacheKey, PendingResolution>>,
}

/// Deduplicates concurrent HTTPS record lookups and commits their results
/// to the [`RecordCache`].
///
/// Clones share the same pending table.
#[derive(Clone)]
pub struct ResolutionCoordinator {
    inner: Arc<Inner>,
}

impl ResolutionCoordinator {
    pub fn new(
        cache: RecordCache,
        resolver: Arc<dyn ResolveRecords>,
        controller: Arc<ModeController>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                resolver,
                controller,
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn cache(&self) -> &RecordCache {
        &self.inner.cache
    }

    pub fn controller(&self) -> &Arc<ModeController> {
        &self.inner.controller
    }

    /// Number of lookups currently in flight.
    pub fn pending_count(&self) -> usize {
        self.inner.lock_pending().len()
    }

    /// Resolve HTTPS records for `name` within `isolation_key`.
    ///
    /// Served from cache when fresh. Otherwise joins the in-flight lookup for
    /// the same key, or starts one.
    pub async fn resolve(&self, name: Name, isolation_key: IsolationKey) -> ResolutionResult {
        let key = CacheKey::new(name.as_str(), &isolation_key);
        if let Some(resolution) = cached(&self.inner.cache, &key) {
            tracing::trace!(domain = %name, "HTTPS record cache hit");
            return Ok(resolution);
        }

        let (tx, rx) = oneshot::channel();
        let leader = {
            let mut pending = self.inner.lock_pending();
            // A lookup may have committed between the first check and the lock.
            if let Some(resolution) = cached(&self.inner.cache, &key) {
                return Ok(resolution);
            }
            match pending.entry(key.clone()) {
                Entry::Occupied(mut entry) => {
                    entry.get_mut().waiters.push(tx);
                    false
                }
                Entry::Vacant(entry) => {
                    entry.insert(PendingResolution { waiters: vec![tx] });
                    true
                }
            }
        };

        if leader {
            tracing::debug!(domain = %name, "starting HTTPS record resolution");
            let completion = Completion {
                inner: self.inner.clone(),
                key,
                done: false,
            };
            tokio::spawn(completion.run(name, isolation_key));
        } else {
            tracing::trace!(domain = %name, "joined in-flight HTTPS record resolution");
        }

        // The sender only disappears if the lookup task died.
        rx.await.unwrap_or(Err(NetError::NameResolutionFailed))
    }
}

impl std::fmt::Debug for ResolutionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionCoordinator")
            .field("cached", &self.inner.cache.len())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

fn cached(cache: &RecordCache, key: &CacheKey) -> Option<Resolution> {
    match cache.lookup_key(key) {
        CacheLookup::Hit(records) => Some(Resolution::Records(records)),
        CacheLookup::Negative => Some(Resolution::Negative),
        CacheLookup::Miss => None,
    }
}

impl Inner {
    fn lock_pending(&self) -> MutexGuard<'_, HashMap<CacheKey, PendingResolution>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn dispatch(
        &self,
        settings: &ResolverSettings,
        name: &Name,
        isolation_key: &IsolationKey,
    ) -> Result<RecordLookup, NetError> {
        let doh_usable = settings.mode.uses_doh() && self.confirm_doh(settings).await;

        match settings.mode {
            ResolverMode::NativeOnly => self.query(name, isolation_key, Transport::Native).await,
            ResolverMode::DohOnly => {
                if !doh_usable {
                    tracing::warn!(domain = %name, "DoH unconfirmed in DoH-only mode");
                    return Err(NetError::NameResolutionFailed);
                }
                self.query(name, isolation_key, Transport::Doh).await
            }
            ResolverMode::DohFirst => {
                if doh_usable {
                    match self.query(name, isolation_key, Transport::Doh).await {
                        Ok(RecordLookup::Malformed) => {
                            tracing::debug!(domain = %name, "malformed DoH answer, falling back to native");
                        }
                        Ok(lookup) => return Ok(lookup),
                        Err(e) => {
                            tracing::debug!(domain = %name, error = %e, "DoH failed, falling back to native");
                        }
                    }
                }
                self.query(name, isolation_key, Transport::Native).await
            }
            ResolverMode::DohRace => {
                if doh_usable {
                    self.race(name, isolation_key).await
                } else {
                    self.query(name, isolation_key, Transport::Native).await
                }
            }
            ResolverMode::Shadow => {
                let shadow = doh_usable.then(|| {
                    tokio::spawn(self.resolver.resolve_records(
                        name.clone(),
                        isolation_key.clone(),
                        Transport::Doh,
                    ))
                });
                let native = self.query(name, isolation_key, Transport::Native).await;
                if let Some(shadow) = shadow {
                    let name = name.clone();
                    let authoritative = native.clone();
                    tokio::spawn(async move {
                        let doh = shadow.await.unwrap_or(Err(NetError::NameResolutionFailed));
                        compare_shadow(&name, &authoritative, &doh);
                    });
                }
                native
            }
        }
    }

    async fn query(
        &self,
        name: &Name,
        isolation_key: &IsolationKey,
        transport: Transport,
    ) -> Result<RecordLookup, NetError> {
        self.resolver
            .resolve_records(name.clone(), isolation_key.clone(), transport)
            .await
    }

    /// Run both transports concurrently. The first positive answer wins and
    /// the other is left to finish on its own.
    async fn race(&self, name: &Name, isolation_key: &IsolationKey) -> Result<RecordLookup, NetError> {
        let (tx, mut rx) = mpsc::channel(2);
        for transport in [Transport::Doh, Transport::Native] {
            let tx = tx.clone();
            let lookup = self
                .resolver
                .resolve_records(name.clone(), isolation_key.clone(), transport);
            tokio::spawn(async move {
                let _ = tx.send((transport, lookup.await)).await;
            });
        }
        drop(tx);

        let mut no_records = false;
        let mut malformed = false;
        let mut last_error = None;
        while let Some((transport, result)) = rx.recv().await {
            match result {
                Ok(lookup) if lookup.is_positive() => {
                    tracing::debug!(domain = %name, winner = %transport, "race settled");
                    return Ok(lookup);
                }
                Ok(RecordLookup::Malformed) => malformed = true,
                Ok(_) => no_records = true,
                Err(e) => {
                    tracing::debug!(domain = %name, transport = %transport, error = %e, "race leg failed");
                    if transport == Transport::Doh || last_error.is_none() {
                        last_error = Some(e);
                    }
                }
            }
        }

        if no_records {
            Ok(RecordLookup::NoRecords)
        } else if malformed {
            Ok(RecordLookup::Malformed)
        } else {
            Err(last_error.unwrap_or(NetError::NameResolutionFailed))
        }
    }

    async fn confirm_doh(&self, settings: &ResolverSettings) -> bool {
        let resolver = self.resolver.clone();
        let probe_name = Name::new(settings.confirmation_name.as_str());
        self.controller
            .ensure_confirmed(move || async move {
                match resolver
                    .resolve_records(probe_name, IsolationKey::default(), Transport::Doh)
                    .await
                {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::warn!(error = %e, "DoH confirmation probe failed");
                        false
                    }
                }
            })
            .await
    }

    fn commit(
        &self,
        key: &CacheKey,
        lookup: Result<RecordLookup, NetError>,
        negative_ttl: Duration,
    ) -> ResolutionResult {
        match lookup {
            Ok(RecordLookup::Records(records)) if !records.is_empty() => {
                let ttl = min_ttl(&records).unwrap_or_default();
                let stored = self.cache.store(
                    key.host(),
                    key.isolation_key(),
                    CacheValue::Records(records),
                    ttl,
                )?;
                Ok(Resolution::Records(stored))
            }
            Ok(RecordLookup::Records(_)) | Ok(RecordLookup::NoRecords) => {
                self.store_negative(key, negative_ttl);
                Ok(Resolution::Negative)
            }
            Ok(RecordLookup::Malformed) => {
                tracing::warn!(host = %key.host(), "malformed HTTPS answer, not cached");
                Ok(Resolution::Negative)
            }
            Err(e) => {
                tracing::debug!(host = %key.host(), error = %e, "HTTPS record resolution failed");
                self.store_negative(key, negative_ttl);
                Err(NetError::NameResolutionFailed)
            }
        }
    }

    fn store_negative(&self, key: &CacheKey, ttl: Duration) {
        if let Err(e) = self
            .cache
            .store(key.host(), key.isolation_key(), CacheValue::Negative, ttl)
        {
            tracing::warn!(host = %key.host(), error = %e, "negative entry not cached");
        }
    }
}

fn compare_shadow(
    name: &Name,
    native: &Result<RecordLookup, NetError>,
    doh: &Result<RecordLookup, NetError>,
) {
    match (native, doh) {
        (Ok(a), Ok(b)) if a == b => {
            tracing::debug!(domain = %name, "shadow DoH answer matches native");
        }
        _ => {
            tracing::info!(
                domain = %name,
                native = ?native,
                doh = ?doh,
                "shadow DoH answer differs from native"
            );
        }
    }
}

/// Owns a pending entry for the lifetime of its lookup task.
///
/// If the task ends without finishing (panic, runtime shutdown) the entry
/// is dropped so waiters see an error instead of hanging.
struct Completion {
    inner: Arc<Inner>,
    key: CacheKey,
    done: bool,
}

impl Completion {
    async fn run(mut self, name: Name, isolation_key: IsolationKey) {
        let settings = self.inner.controller.settings();
        let lookup = self.inner.dispatch(&settings, &name, &isolation_key).await;
        let result = self.inner.commit(&self.key, lookup, settings.negative_ttl);

        // Commit happens before removal, so a caller that misses the pending
        // entry finds the result in the cache.
        let waiters = self
            .inner
            .lock_pending()
            .remove(&self.key)
            .map(|pending| pending.waiters)
            .unwrap_or_default();
        self.done = true;

        tracing::debug!(
            domain = %name,
            waiters = waiters.len(),
            ok = result.is_ok(),
            "HTTPS record resolution finished"
        );
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.done {
            self.inner.lock_pending().remove(&self.key);
        }
    }
}
