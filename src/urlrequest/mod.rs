//! High-level request API.
//!
//! A [`URLRequest`] resolves HTTPS records for its host, upgrades to HTTPS
//! when a record says so, and connects through the context's connector.

pub mod context;
pub mod job;
pub mod request;

pub use context::{URLRequestContext, UpgradeConfig};
pub use request::URLRequest;
