//! HTTPS Record Resolution Module
//!
//! Provides HTTPS (SVCB-class) record resolution with:
//! - Pluggable record resolvers (`ResolveRecords`), native and DoH transports
//! - A TTL cache with negative entries, partitioned by isolation key
//! - A coordinator that coalesces concurrent lookups per key
//! - Process-wide resolver modes (native, DoH race/first/only, shadow)
//!
//! # Architecture
//!
//! This module mirrors the HTTPS-record half of Chromium's `HostResolver`.
//! The `ResolveRecords` trait is the seam where the actual DNS transport
//! lives; everything above it is transport-agnostic.
//!
//! # Example
//!
//! ```rust,ignore
//! use httpsrr::dns::{
//!     HickoryRecordResolver, IsolationKey, ModeController, Name, RecordCache,
//!     ResolutionCoordinator, ResolverSettings,
//! };
//! use std::sync::Arc;
//!
//! let cache = RecordCache::new();
//! let controller = Arc::new(ModeController::new(ResolverSettings::default(), cache.clone()));
//! let coordinator = ResolutionCoordinator::new(
//!     cache,
//!     Arc::new(HickoryRecordResolver::new()),
//!     controller,
//! );
//! let resolution = coordinator
//!     .resolve(Name::new("example.com"), IsolationKey::default())
//!     .await?;
//! ```

mod cache;
mod coordinator;
mod gai;
mod hickory;
mod mode;
mod record;
mod resolve;

pub use cache::{CacheKey, CacheLookup, CacheValue, RecordCache, MAX_CACHE_TTL};
pub use coordinator::{Resolution, ResolutionCoordinator, ResolutionResult};
pub use gai::{is_ip_literal, GaiResolver, SocketAddrs};
pub use hickory::{DohEndpoint, HickoryRecordResolver};
pub use mode::{
    ConfirmationPolicy, ConfirmationState, ModeController, ModeOptions, ResolverMode,
    ResolverSettings,
};
pub(crate) use mode::validate_negative_ttl;
pub use record::{min_ttl, ServiceRecord, UpgradeRecord};
pub use resolve::{
    IsolationKey, Name, RecordLookup, RecordResolverWithOverrides, RecordResolving,
    ResolveRecords, Transport,
};
