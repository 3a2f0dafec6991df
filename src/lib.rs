//! # httpsrr
//!
//! HTTPS-record driven HTTP to HTTPS upgrades, modelled on Chromium's
//! network stack.
//!
//! Before a plaintext request connects, `httpsrr` looks up the host's HTTPS
//! (SVCB, type 65) records. If the host advertises HTTPS, the request is
//! upgraded in place, possibly to an alternate port, and redirect sinks get a
//! chance to veto the switch.
//!
//! ## Features
//!
//! - **Record Cache**: TTL-bound, negative entries, partitioned by isolation key
//! - **Coalescing**: one in-flight lookup per host and partition
//! - **Resolver Modes**: native, DoH race / first / only, shadow comparison
//! - **DoH**: hickory-based DNS-over-HTTPS with bootstrap address and confirmation
//! - **Redirect Sinks**: scoped observers that can reject an upgrade
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use httpsrr::urlrequest::{URLRequest, URLRequestContext};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let context = Arc::new(URLRequestContext::new());
//!     let mut request = URLRequest::new("http://example.com/", context).unwrap();
//!     request.start().await.unwrap();
//!     println!("Connected to {}", request.final_uri());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error definitions and request load states
//! - [`dns`] - HTTPS record resolution, caching and resolver modes
//! - [`upgrade`] - Upgrade decisions and redirect notification
//! - [`socket`] - Connection establishment
//! - [`urlrequest`] - High-level request API and configuration

pub mod base;
pub mod dns;
pub mod socket;
pub mod upgrade;
pub mod urlrequest;
