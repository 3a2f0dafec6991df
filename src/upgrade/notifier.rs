//! Redirect notification for record-driven upgrades.
//!
//! Before a request switches to its upgraded authority, every sink registered
//! for that kind of redirect gets to look at it. Sinks are scoped: dropping
//! the [`SinkRegistration`] removes the sink.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::authority::Authority;
use crate::base::neterror::NetError;

/// Which flavour of internal redirect an upgrade is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RedirectKind {
    /// Only the scheme changes.
    SchemeUpgrade,
    /// Scheme and port change.
    AlternatePortUpgrade,
}

impl RedirectKind {
    pub fn classify(old: &Authority, new: &Authority) -> Self {
        if old.port == new.port {
            RedirectKind::SchemeUpgrade
        } else {
            RedirectKind::AlternatePortUpgrade
        }
    }
}

/// A sink's answer to a proposed redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectVerdict {
    Confirmed,
    Rejected,
}

/// Observer consulted before an upgrade takes effect.
pub trait RedirectSink: Send + Sync {
    fn on_redirect(&self, old: &Authority, new: &Authority) -> RedirectVerdict;
}

impl<F> RedirectSink for F
where
    F: Fn(&Authority, &Authority) -> RedirectVerdict + Send + Sync,
{
    fn on_redirect(&self, old: &Authority, new: &Authority) -> RedirectVerdict {
        self(old, new)
    }
}

#[derive(Default)]
struct Registry {
    // Ids increase monotonically, so map order is registration order.
    sinks: DashMap<RedirectKind, BTreeMap<u64, Arc<dyn RedirectSink>>>,
    next_id: AtomicU64,
}

/// Dispatches upgrade redirects to registered sinks.
///
/// Clones share the same registry.
#[derive(Clone, Default)]
pub struct RedirectNotifier {
    registry: Arc<Registry>,
}

impl RedirectNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sink` for redirects of `kind`. The sink stays registered
    /// until the returned handle is dropped.
    #[must_use = "dropping the registration unregisters the sink"]
    pub fn register(&self, kind: RedirectKind, sink: Arc<dyn RedirectSink>) -> SinkRegistration {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.sinks.entry(kind).or_default().insert(id, sink);
        tracing::trace!(?kind, id, "redirect sink registered");

        SinkRegistration {
            registry: Arc::downgrade(&self.registry),
            kind,
            id,
        }
    }

    pub fn sink_count(&self, kind: RedirectKind) -> usize {
        self.registry.sinks.get(&kind).map_or(0, |sinks| sinks.len())
    }

    /// Verify and announce an upgrade from `old` to `new`.
    ///
    /// Fails with [`NetError::UpgradeInvariantViolation`] if the pair is not a
    /// same-host http to https move, whatever the sinks would say. Otherwise
    /// sinks run in registration order and the first rejection wins.
    pub fn notify(&self, old: &Authority, new: &Authority) -> Result<RedirectVerdict, NetError> {
        verify(old, new)?;

        let kind = RedirectKind::classify(old, new);
        // Snapshot so a sink may register or unregister from inside its callback.
        let sinks: Vec<Arc<dyn RedirectSink>> = self
            .registry
            .sinks
            .get(&kind)
            .map(|sinks| sinks.values().cloned().collect())
            .unwrap_or_default();

        for sink in &sinks {
            if sink.on_redirect(old, new) == RedirectVerdict::Rejected {
                tracing::debug!(from = %old, to = %new, ?kind, "upgrade redirect rejected by sink");
                return Ok(RedirectVerdict::Rejected);
            }
        }

        tracing::trace!(from = %old, to = %new, ?kind, sinks = sinks.len(), "upgrade redirect confirmed");
        Ok(RedirectVerdict::Confirmed)
    }
}

impl std::fmt::Debug for RedirectNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectNotifier")
            .field("scheme_upgrade_sinks", &self.sink_count(RedirectKind::SchemeUpgrade))
            .field(
                "alternate_port_sinks",
                &self.sink_count(RedirectKind::AlternatePortUpgrade),
            )
            .finish()
    }
}

fn verify(old: &Authority, new: &Authority) -> Result<(), NetError> {
    if !old.same_host(new) {
        return Err(NetError::invariant(format!(
            "upgrade changed host from {} to {}",
            old.host, new.host
        )));
    }
    if !old.is_http() || !new.is_https() {
        return Err(NetError::invariant(format!(
            "upgrade must go from http to https, got {} to {}",
            old.scheme, new.scheme
        )));
    }
    Ok(())
}

/// Keeps a sink registered while alive.
#[derive(Debug)]
pub struct SinkRegistration {
    registry: Weak<Registry>,
    kind: RedirectKind,
    id: u64,
}

impl SinkRegistration {
    pub fn kind(&self) -> RedirectKind {
        self.kind
    }
}

impl Drop for SinkRegistration {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        if let Some(mut sinks) = registry.sinks.get_mut(&self.kind) {
            sinks.remove(&self.id);
        }
        tracing::trace!(kind = ?self.kind, id = self.id, "redirect sink unregistered");
    }
}
