//! HTTP to HTTPS upgrade driven by HTTPS records.
//!
//! - [`UpgradeEngine`] turns a resolved record set into an [`UpgradeDecision`]
//! - [`RedirectNotifier`] verifies the decision and lets registered sinks veto it

mod authority;
mod decision;
mod notifier;

pub use authority::{default_port, Authority};
pub use decision::{select_record, UpgradeDecision, UpgradeEngine};
pub use notifier::{RedirectKind, RedirectNotifier, RedirectSink, RedirectVerdict, SinkRegistration};
