//! InjectScripts: decides which page loads get the relay injected.
//!
//! On every page load the background checks the URL against the stored match
//! patterns. For a match it mints a fresh session id and asks the
//! [`ScriptInjector`] to inject both the bridge relay and the main-context
//! controller into that frame, tagged with the same session id.

use std::sync::Arc;

use async_trait::async_trait;
use otel_relay_core::matches;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::infrastructure::storage::store::ConfigStore;

/// Error raised by a [`ScriptInjector`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InjectError {
    /// The frame went away before the scripts could be injected.
    #[error("frame {tab_id}/{frame_id} is gone")]
    FrameGone { tab_id: i32, frame_id: i32 },

    #[error("injection failed: {0}")]
    Failed(String),
}

/// Where, and under which session, to inject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionTarget {
    pub tab_id: i32,
    pub frame_id: i32,
    pub url: String,
    pub session_id: Uuid,
}

/// Injects the bridge relay and the controller into one frame.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScriptInjector: Send + Sync {
    async fn inject(&self, target: InjectionTarget) -> Result<(), InjectError>;
}

pub struct InjectionPlanner {
    store: Arc<ConfigStore>,
    injector: Arc<dyn ScriptInjector>,
}

impl InjectionPlanner {
    pub fn new(store: Arc<ConfigStore>, injector: Arc<dyn ScriptInjector>) -> Self {
        Self { store, injector }
    }

    /// Injects into `(tab_id, frame_id)` if `url` matches the stored patterns.
    ///
    /// Returns the session id of a successful injection.
    pub async fn on_page_load(&self, tab_id: i32, frame_id: i32, url: &str) -> Option<Uuid> {
        let patterns = match self.store.backend().await {
            Ok(backend) => backend.match_patterns,
            Err(e) => {
                warn!("cannot read match patterns, skipping injection: {e}");
                return None;
            }
        };
        if !matches(url, &patterns) {
            debug!("tab {tab_id} frame {frame_id}: {url} not matched, not injecting");
            return None;
        }

        let session_id = Uuid::new_v4();
        let target = InjectionTarget {
            tab_id,
            frame_id,
            url: url.to_string(),
            session_id,
        };
        match self.injector.inject(target).await {
            Ok(()) => {
                info!("session {session_id}: injected into tab {tab_id} frame {frame_id}");
                Some(session_id)
            }
            Err(e) => {
                warn!("tab {tab_id} frame {frame_id}: {e}");
                None
            }
        }
    }
}
