//! HTTP to HTTPS upgrade decisions.
//!
//! Chromium mapping: net/url_request/url_request_http_job.cc (HSTS redirect)
//!
//! Decisions are pure: they look at the requested authority and an already
//! resolved record set and never touch the network.

use http::uri::{Authority as UriAuthority, PathAndQuery, Scheme};
use http::Uri;
use std::sync::Arc;

use super::authority::Authority;
use crate::base::neterror::NetError;
use crate::dns::{is_ip_literal, ModeController, Resolution, UpgradeRecord};

/// Outcome of [`UpgradeEngine::decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeDecision {
    pub should_upgrade: bool,
    pub original: Authority,
    /// Equal to `original` when no upgrade applies.
    pub new: Authority,
    /// The record the upgrade was derived from.
    pub record: Option<UpgradeRecord>,
}

impl UpgradeDecision {
    pub fn no_upgrade(original: Authority) -> Self {
        Self {
            should_upgrade: false,
            new: original.clone(),
            original,
            record: None,
        }
    }

    /// Apply the new authority to `uri`, keeping path and query.
    pub fn rewrite_uri(&self, uri: &Uri) -> Result<Uri, NetError> {
        if !self.should_upgrade {
            return Ok(uri.clone());
        }

        let userinfo = uri
            .authority()
            .and_then(|a| a.as_str().rsplit_once('@'))
            .map(|(userinfo, _)| userinfo);
        let authority = match userinfo {
            Some(userinfo) => format!("{}@{}", userinfo, self.new.authority_str()),
            None => self.new.authority_str(),
        };

        let mut parts = uri.clone().into_parts();
        parts.scheme = Some(
            self.new
                .scheme
                .parse::<Scheme>()
                .map_err(|_| NetError::InvalidUrl)?,
        );
        parts.authority = Some(
            authority
                .parse::<UriAuthority>()
                .map_err(|_| NetError::InvalidUrl)?,
        );
        if parts.path_and_query.is_none() {
            parts.path_and_query = Some(PathAndQuery::from_static("/"));
        }
        Uri::from_parts(parts).map_err(|_| NetError::InvalidUrl)
    }
}

/// Pick the usable record with the lowest priority value.
///
/// Ties go to the record seen first.
pub fn select_record(records: &[UpgradeRecord]) -> Option<&UpgradeRecord> {
    records
        .iter()
        .filter(|record| record.valid)
        .min_by_key(|record| record.priority)
}

/// Decides whether a plaintext request should move to HTTPS.
#[derive(Debug, Clone)]
pub struct UpgradeEngine {
    controller: Arc<ModeController>,
}

impl UpgradeEngine {
    pub fn new(controller: Arc<ModeController>) -> Self {
        Self { controller }
    }

    /// Whether a request to `authority` could be upgraded at all, before any
    /// records are looked up.
    pub fn is_eligible(&self, authority: &Authority) -> bool {
        self.controller.upgrade_enabled() && authority.is_http() && !is_ip_literal(&authority.host)
    }

    pub fn decide(&self, requested: &Authority, resolution: &Resolution) -> UpgradeDecision {
        if !self.is_eligible(requested) {
            tracing::trace!(authority = %requested, "request not eligible for upgrade");
            return UpgradeDecision::no_upgrade(requested.clone());
        }

        let Some(record) = select_record(resolution.records()) else {
            tracing::trace!(authority = %requested, "no usable HTTPS record");
            return UpgradeDecision::no_upgrade(requested.clone());
        };

        // An advertised port wins; otherwise keep whatever the request said,
        // so an implicit port stays implicit.
        let new = Authority::new(
            "https",
            requested.host.clone(),
            record.target_port.or(requested.port),
        );
        tracing::debug!(
            from = %requested,
            to = %new,
            priority = record.priority,
            "upgrading request via HTTPS record"
        );

        UpgradeDecision {
            should_upgrade: true,
            original: requested.clone(),
            new,
            record: Some(record.clone()),
        }
    }
}
