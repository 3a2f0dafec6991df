//! Resolver mode selection and process-wide resolver settings.
//!
//! The coordinator reads [`ResolverSettings`] on every lookup, so changes made
//! through [`ModeController`] apply to the next lookup without restarting
//! anything.

use serde::Deserialize;
use std::future::Future;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

use super::cache::{RecordCache, MAX_CACHE_TTL};
use crate::base::neterror::NetError;

/// Strategy for choosing between native and DNS-over-HTTPS resolution.
///
/// Numeric codes follow the classic TRR mode numbering: 0 off, 1 race,
/// 2 DoH first, 3 DoH only, 4 shadow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "RawMode")]
pub enum ResolverMode {
    /// Native resolution only.
    #[default]
    NativeOnly,
    /// DoH and native concurrently; first positive answer wins.
    DohRace,
    /// DoH, falling back to native on failure.
    DohFirst,
    /// DoH exclusively.
    DohOnly,
    /// Native is authoritative; DoH is queried for comparison only.
    Shadow,
}

impl ResolverMode {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ResolverMode::NativeOnly),
            1 => Some(ResolverMode::DohRace),
            2 => Some(ResolverMode::DohFirst),
            3 => Some(ResolverMode::DohOnly),
            4 => Some(ResolverMode::Shadow),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().replace('-', "_").as_str() {
            "native_only" | "native" | "off" => Some(ResolverMode::NativeOnly),
            "doh_race" | "race" => Some(ResolverMode::DohRace),
            "doh_first" | "first" => Some(ResolverMode::DohFirst),
            "doh_only" | "only" => Some(ResolverMode::DohOnly),
            "shadow" => Some(ResolverMode::Shadow),
            _ => None,
        }
    }

    /// Whether lookups in this mode ever touch the DoH transport.
    pub fn uses_doh(self) -> bool {
        !matches!(self, ResolverMode::NativeOnly)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMode {
    Code(u8),
    Name(String),
}

impl TryFrom<RawMode> for ResolverMode {
    type Error = String;

    fn try_from(raw: RawMode) -> Result<Self, Self::Error> {
        match raw {
            RawMode::Code(code) => {
                ResolverMode::from_code(code).ok_or_else(|| format!("unknown resolver mode {}", code))
            }
            RawMode::Name(name) => {
                ResolverMode::from_name(&name).ok_or_else(|| format!("unknown resolver mode {:?}", name))
            }
        }
    }
}

/// Whether DoH must prove it works before it is relied upon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationPolicy {
    RequireConfirm,
    #[default]
    SkipConfirm,
}

/// Options for [`ModeController::set_mode`].
#[derive(Debug, Clone, Copy)]
pub struct ModeOptions {
    /// Drop all cached records when the mode actually changes.
    pub clear_cache_on_change: bool,
}

impl Default for ModeOptions {
    fn default() -> Self {
        Self {
            clear_cache_on_change: true,
        }
    }
}

/// Snapshot of the settings a lookup runs under.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub mode: ResolverMode,
    /// Fixed address of the DoH server, so its hostname never needs resolving.
    pub bootstrap_address: Option<IpAddr>,
    pub confirmation_policy: ConfirmationPolicy,
    /// Name queried over DoH to confirm the DoH server answers.
    pub confirmation_name: String,
    pub upgrade_enabled: bool,
    pub negative_ttl: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            mode: ResolverMode::NativeOnly,
            bootstrap_address: None,
            confirmation_policy: ConfirmationPolicy::SkipConfirm,
            confirmation_name: "example.com".to_string(),
            upgrade_enabled: true,
            negative_ttl: Duration::from_secs(60),
        }
    }
}

/// DoH confirmation outcome for one settings generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationState {
    Pending,
    Confirmed,
    Failed { at: Instant },
}

#[derive(Debug)]
struct Confirmation {
    generation: u64,
    state: ConfirmationState,
}

/// Owns the process-wide resolver settings.
pub struct ModeController {
    settings: RwLock<ResolverSettings>,
    cache: RecordCache,
    // Bumped on every mode change; a confirmation only counts for the
    // generation it ran under.
    generation: AtomicU64,
    confirmation: tokio::sync::Mutex<Confirmation>,
}

impl ModeController {
    pub fn new(settings: ResolverSettings, cache: RecordCache) -> Self {
        Self {
            settings: RwLock::new(settings),
            cache,
            generation: AtomicU64::new(0),
            confirmation: tokio::sync::Mutex::new(Confirmation {
                generation: 0,
                state: ConfirmationState::Pending,
            }),
        }
    }

    /// Current settings snapshot.
    pub fn settings(&self) -> ResolverSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn mode(&self) -> ResolverMode {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .mode
    }

    /// Switch resolver mode.
    ///
    /// Cached records survive unless `options.clear_cache_on_change` is set.
    /// DoH confirmation always restarts.
    pub fn set_mode(&self, mode: ResolverMode, options: ModeOptions) {
        let previous = {
            let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut settings.mode, mode)
        };
        if previous == mode {
            return;
        }

        self.generation.fetch_add(1, Ordering::AcqRel);
        if options.clear_cache_on_change {
            self.cache.clear_all();
        }
        tracing::info!(
            from = ?previous,
            to = ?mode,
            cleared = options.clear_cache_on_change,
            "resolver mode changed"
        );
    }

    pub fn set_upgrade_enabled(&self, enabled: bool) {
        self.update(|s| s.upgrade_enabled = enabled);
    }

    pub fn upgrade_enabled(&self) -> bool {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade_enabled
    }

    pub fn set_bootstrap_address(&self, address: Option<IpAddr>) {
        self.update(|s| s.bootstrap_address = address);
    }

    pub fn set_confirmation_policy(&self, policy: ConfirmationPolicy) {
        self.update(|s| s.confirmation_policy = policy);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Set how long failures and empty answers stay cached.
    ///
    /// Must be positive and at most [`MAX_CACHE_TTL`].
    pub fn set_negative_ttl(&self, ttl: Duration) -> Result<(), NetError> {
        validate_negative_ttl(ttl)?;
        self.update(|s| s.negative_ttl = ttl);
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut ResolverSettings)) {
        let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut settings);
    }

    /// Confirmation state for the current generation, if not being probed
    /// right now.
    pub fn confirmation_state(&self) -> Option<ConfirmationState> {
        let generation = self.generation.load(Ordering::Acquire);
        let confirmation = self.confirmation.try_lock().ok()?;
        Some(if confirmation.generation == generation {
            confirmation.state
        } else {
            ConfirmationState::Pending
        })
    }

    /// Returns whether DoH may be used, running `probe` if the current
    /// generation has not been confirmed yet.
    ///
    /// Concurrent callers wait on a single probe. A failed probe is retried
    /// once the negative TTL has passed.
    pub async fn ensure_confirmed<F, Fut>(&self, probe: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        let settings = self.settings();
        if settings.confirmation_policy == ConfirmationPolicy::SkipConfirm {
            return true;
        }

        let generation = self.generation.load(Ordering::Acquire);
        let mut confirmation = self.confirmation.lock().await;
        if confirmation.generation == generation {
            match confirmation.state {
                ConfirmationState::Confirmed => return true,
                ConfirmationState::Failed { at } if at.elapsed() < settings.negative_ttl => {
                    return false
                }
                _ => {}
            }
        }

        let confirmed = probe().await;
        confirmation.generation = generation;
        confirmation.state = if confirmed {
            ConfirmationState::Confirmed
        } else {
            ConfirmationState::Failed { at: Instant::now() }
        };
        tracing::info!(confirmed, name = %settings.confirmation_name, "DoH confirmation finished");
        confirmed
    }
}

pub(crate) fn validate_negative_ttl(ttl: Duration) -> Result<(), NetError> {
    if ttl.is_zero() || ttl > MAX_CACHE_TTL {
        return Err(NetError::InvalidConfig {
            reason: format!(
                "negative TTL must be between 1s and {}s, got {}s",
                MAX_CACHE_TTL.as_secs(),
                ttl.as_secs()
            ),
        });
    }
    Ok(())
}

impl std::fmt::Debug for ModeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeController")
            .field("settings", &self.settings())
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
