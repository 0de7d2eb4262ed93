//! Host permissions held by the service itself.
//!
//! A browser asks the user; a headless service has no one to ask. Grants come
//! from the settings file (`[permissions] granted = [...]`). Requests for
//! patterns outside that list are declined unless `auto_grant` is set.

use async_trait::async_trait;
use otel_relay_core::domain::match_pattern::ALL_URLS;
use tokio::sync::Mutex;
use tracing::debug;

use crate::application::gate_permissions::{PermissionError, PermissionsApi};
use crate::infrastructure::storage::settings::PermissionSettings;

pub struct SettingsPermissions {
    granted: Mutex<Vec<String>>,
    auto_grant: bool,
}

impl SettingsPermissions {
    pub fn new(settings: &PermissionSettings) -> Self {
        Self {
            granted: Mutex::new(settings.granted.clone()),
            auto_grant: settings.auto_grant,
        }
    }

    /// Snapshot of the granted patterns.
    pub async fn granted(&self) -> Vec<String> {
        self.granted.lock().await.clone()
    }
}

#[async_trait]
impl PermissionsApi for SettingsPermissions {
    async fn contains(&self, origin: String) -> Result<bool, PermissionError> {
        let granted = self.granted.lock().await;
        Ok(granted.iter().any(|g| *g == origin || g == ALL_URLS))
    }

    async fn request(&self, origins: Vec<String>) -> Result<bool, PermissionError> {
        let mut granted = self.granted.lock().await;
        let missing: Vec<String> = origins
            .into_iter()
            .filter(|o| !granted.iter().any(|g| g == o || g == ALL_URLS))
            .collect();
        if missing.is_empty() {
            return Ok(true);
        }
        if !self.auto_grant {
            debug!("declining permission request for {missing:?}");
            return Ok(false);
        }
        granted.extend(missing);
        Ok(true)
    }

    async fn remove(&self, origins: Vec<String>) -> Result<bool, PermissionError> {
        let mut granted = self.granted.lock().await;
        let before = granted.len();
        granted.retain(|g| !origins.contains(g));
        Ok(granted.len() != before)
    }
}
