//! HTTP delivery of encoded payloads to OTLP collectors.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::application::route_telemetry::{CollectorClient, CollectorError, ExportRequest};

/// [`CollectorClient`] backed by a shared `reqwest` connection pool.
#[derive(Clone)]
pub struct HttpCollectorClient {
    client: reqwest::Client,
}

impl HttpCollectorClient {
    /// Builds a client whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CollectorClient for HttpCollectorClient {
    async fn post(&self, request: ExportRequest) -> Result<(), CollectorError> {
        let ExportRequest {
            kind,
            url,
            headers,
            body,
        } = request;

        let mut builder = self.client.post(&url).body(body);
        for (name, value) in headers.iter() {
            builder = builder.header(name, value);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CollectorError::Transport {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollectorError::Status {
                url,
                status: status.as_u16(),
            });
        }
        debug!("{kind} export accepted by {url} ({status})");
        Ok(())
    }
}
