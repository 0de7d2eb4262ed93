//! GatePermissions: keeps granted origins in line with the match patterns.
//!
//! Syntax validation lives with the grammar in `otel_relay_core`; this use
//! case adds the part that needs the runtime's permission API:
//!
//! - which valid patterns have not actually been granted,
//! - revoking patterns that were removed and requesting the current ones.
//!
//! Every permission call is best-effort. A failed or rejected call is logged
//! and turned into an error record; nothing here returns an error to the
//! caller, so a permission prompt the user dismisses never breaks the
//! configuration flow.

use std::sync::Arc;

use async_trait::async_trait;
use otel_relay_core::domain::match_pattern::validate_patterns;
use otel_relay_core::MatchPatternError;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Error raised by a [`PermissionsApi`] call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    /// The runtime refused to process the request (e.g. not user-initiated).
    #[error("permission request rejected: {0}")]
    Rejected(String),

    /// The permission backend could not be reached.
    #[error("permission backend unavailable: {0}")]
    Unavailable(String),
}

/// The runtime's host permission API.
///
/// The infrastructure implementation is backed by the service settings; tests
/// use mocks or recording doubles.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PermissionsApi: Send + Sync {
    /// Returns `true` if `origin` is currently granted.
    async fn contains(&self, origin: String) -> Result<bool, PermissionError>;

    /// Asks for `origins`. `Ok(false)` means the user declined.
    async fn request(&self, origins: Vec<String>) -> Result<bool, PermissionError>;

    /// Gives up `origins`. `Ok(false)` means nothing was removed.
    async fn remove(&self, origins: Vec<String>) -> Result<bool, PermissionError>;
}

/// What [`PermissionGate::sync_permissions`] attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Patterns a revoke was attempted for.
    pub revoked: Vec<String>,
    /// Patterns a grant was requested for.
    pub requested: Vec<String>,
    /// `true` only if the grant request was made and accepted.
    pub granted: bool,
}

/// Result of validating a pattern list against grammar and grants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternReport {
    pub valid: Vec<String>,
    pub errors: Vec<MatchPatternError>,
    pub permission_errors: Vec<MatchPatternError>,
}

pub struct PermissionGate {
    api: Arc<dyn PermissionsApi>,
}

impl PermissionGate {
    pub fn new(api: Arc<dyn PermissionsApi>) -> Self {
        Self { api }
    }

    /// Returns one error record per valid pattern that is not granted, in
    /// input order. Syntactically invalid patterns are skipped; they are
    /// reported by [`validate_patterns`].
    pub async fn validate_pattern_permissions(
        &self,
        patterns: &[String],
    ) -> Vec<MatchPatternError> {
        let (valid, _) = validate_patterns(patterns);
        let mut errors = Vec::new();
        for pattern in valid {
            match self.api.contains(pattern.clone()).await {
                Ok(true) => {}
                Ok(false) => {
                    errors.push(MatchPatternError::new(
                        pattern,
                        "permission has not been granted for this pattern",
                    ));
                }
                Err(e) => {
                    warn!("permission lookup for {pattern:?} failed: {e}");
                    errors.push(MatchPatternError::new(pattern, e));
                }
            }
        }
        errors
    }

    /// Grammar errors and permission errors for `patterns`, together.
    pub async fn check_patterns(&self, patterns: &[String]) -> PatternReport {
        let (valid, errors) = validate_patterns(patterns);
        let permission_errors = self.validate_pattern_permissions(&valid).await;
        PatternReport {
            valid,
            errors,
            permission_errors,
        }
    }

    /// Revokes `prev − next`, then requests every valid pattern of `next`.
    ///
    /// Both steps are best-effort: failures are logged and the other step
    /// still runs. A declined request leaves earlier grants untouched.
    pub async fn sync_permissions(&self, prev: &[String], next: &[String]) -> SyncReport {
        let mut report = SyncReport::default();

        let removed: Vec<String> = prev
            .iter()
            .filter(|p| !next.contains(p))
            .cloned()
            .collect();
        if !removed.is_empty() {
            match self.api.remove(removed.clone()).await {
                Ok(true) => info!("revoked {} origin pattern(s)", removed.len()),
                Ok(false) => debug!("no grants to revoke for {removed:?}"),
                Err(e) => warn!("revoking {removed:?} failed: {e}"),
            }
            report.revoked = removed;
        }

        let (valid, _) = validate_patterns(next);
        if !valid.is_empty() {
            match self.api.request(valid.clone()).await {
                Ok(true) => {
                    info!("granted {} origin pattern(s)", valid.len());
                    report.granted = true;
                }
                Ok(false) => warn!("permission request for {valid:?} was declined"),
                Err(e) => warn!("permission request for {valid:?} failed: {e}"),
            }
            report.requested = valid;
        }

        report
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
