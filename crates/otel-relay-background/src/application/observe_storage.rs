//! ObserveStorage: reacts to configuration writes.
//!
//! Two things happen for every [`StorageChange`]:
//!
//! 1. The new values of the changed keys are broadcast to every registered
//!    bridge as a `StorageChanged` message.
//! 2. If `matchPatterns` changed, permissions are synced with the new list
//!    and the derived `matchPatternErrors` / `matchPatternPermissionErrors`
//!    are recomputed. They are only written back when they differ, so the
//!    resulting write does not trigger another round.

use std::sync::Arc;

use otel_relay_core::domain::configuration::keys;
use otel_relay_core::StorageItems;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::application::gate_permissions::{PatternReport, PermissionGate};
use crate::application::route_telemetry::Router;
use crate::infrastructure::storage::store::{ConfigStore, StorageChange, StoreError};

pub struct StorageObserver {
    store: Arc<ConfigStore>,
    router: Arc<Router>,
    gate: Arc<PermissionGate>,
}

impl StorageObserver {
    pub fn new(store: Arc<ConfigStore>, router: Arc<Router>, gate: Arc<PermissionGate>) -> Self {
        Self {
            store,
            router,
            gate,
        }
    }

    /// Handles one change set.
    pub async fn on_change(&self, change: &StorageChange) {
        let delivered = self.router.broadcast_changes(change.new_values()).await;
        debug!(
            keys = ?change.keys().collect::<Vec<_>>(),
            "broadcast storage change to {delivered} channel(s)"
        );

        if self.sync_patterns(change).await {
            if let Err(e) = self.refresh_pattern_errors().await {
                warn!("could not update pattern errors: {e}");
            }
        }
    }

    /// Settles a change written by another process (the `config` command).
    ///
    /// Permissions follow a `matchPatterns` change as in [`Self::on_change`],
    /// but the derived error lists are recomputed whatever keys changed.
    pub async fn reconcile(&self, change: &StorageChange) -> Result<PatternReport, StoreError> {
        self.sync_patterns(change).await;
        self.refresh_pattern_errors().await
    }

    /// Syncs permissions if `matchPatterns` is part of `change`.
    async fn sync_patterns(&self, change: &StorageChange) -> bool {
        let Some(patterns) = change.get(keys::MATCH_PATTERNS) else {
            return false;
        };
        let prev = pattern_list(patterns.old_value.as_ref());
        let next = pattern_list(patterns.new_value.as_ref());
        self.gate.sync_permissions(&prev, &next).await;
        true
    }

    /// Recomputes the derived error lists from the stored patterns.
    ///
    /// Returns the report that was computed.
    pub async fn refresh_pattern_errors(&self) -> Result<PatternReport, StoreError> {
        let backend = self.store.backend().await?;
        let report = self.gate.check_patterns(&backend.match_patterns).await;

        let mut updates = StorageItems::new();
        if report.errors != backend.match_pattern_errors {
            updates.insert(keys::MATCH_PATTERN_ERRORS.to_string(), to_value(&report.errors));
        }
        if report.permission_errors != backend.match_pattern_permission_errors {
            updates.insert(
                keys::MATCH_PATTERN_PERMISSION_ERRORS.to_string(),
                to_value(&report.permission_errors),
            );
        }
        if !updates.is_empty() {
            info!(
                errors = report.errors.len(),
                permission_errors = report.permission_errors.len(),
                "match pattern errors changed"
            );
            self.store.set(updates).await?;
        }
        Ok(report)
    }

    /// Processes changes until the store is dropped.
    pub async fn run(self, mut changes: broadcast::Receiver<StorageChange>) {
        loop {
            match changes.recv().await {
                Ok(change) => self.on_change(&change).await,
                Err(RecvError::Lagged(skipped)) => {
                    // Bridges may now hold stale values; they catch up on the
                    // next change or reconnect.
                    warn!("storage observer lagged, {skipped} change set(s) skipped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("storage observer stopped");
    }
}

fn pattern_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| serde_json::from_value::<Vec<String>>(v.clone()).ok())
        .unwrap_or_default()
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
