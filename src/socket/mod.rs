//! Socket and connection management.
//!
//! Mirrors the transport half of Chromium's `net/socket/`:
//! - [`connectjob`]: address lookup → TCP connection flow behind the
//!   [`Connect`] seam

pub mod connectjob;

pub use connectjob::{Connect, Connecting, TcpConnector};
