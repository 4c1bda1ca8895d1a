// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use std::io::Write;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use zstd::stream::write::Encoder;

use crate::config::{Config, Mode};
use crate::envelope::Envelope;
use crate::error::AgentError;
use crate::http_utils::build_client;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub const INGEST_PATH: &str = "/v1/ingest";
pub const RAW_LOGS_PATH: &str = "/v1/logs/raw";

/// Delivers a batch of envelopes under one credential.
#[async_trait]
pub trait Transport: Send + Sync {
    /// A response with status >= 300 is [`AgentError::Transport`]; no response at all is
    /// [`AgentError::Connectivity`].
    async fn send_with_auth(&self, batch: &[Envelope], auth_header: &str)
        -> Result<(), AgentError>;
}

/// Backend endpoint a router delivers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Ingest,
    RawLogs,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Ingest => INGEST_PATH,
            Route::RawLogs => RAW_LOGS_PATH,
        }
    }
}

/// HTTP transport whose destination depends on the operating mode.
///
/// In direct and hub mode batches go to the backend endpoint of the route. In relay mode
/// everything goes to the hub's ingest endpoint, and the hub forwards it on the caller's
/// behalf.
#[derive(Clone)]
pub struct TransportRouter {
    client: reqwest::Client,
    endpoint: String,
    fallback_auth: Option<String>,
    compression_level: Option<i32>,
}

impl TransportRouter {
    pub fn new(config: &Config, route: Route) -> Result<Self, AgentError> {
        let client = build_client(config.proxy_url.as_deref(), SEND_TIMEOUT)?;
        let (endpoint, fallback_auth) = match config.mode {
            Mode::Relay => {
                let endpoint = config.hub_endpoint(INGEST_PATH).ok_or_else(|| {
                    AgentError::Config("HUB_URL is required when AGENT_MODE=relay".to_string())
                })?;
                (endpoint, config.hub_auth_header())
            }
            Mode::Direct | Mode::Hub => (
                config.api_endpoint(route.path()),
                config.default_auth_header(),
            ),
        };
        Ok(Self::with_client(
            client,
            endpoint,
            fallback_auth,
            config.compression_level,
        ))
    }

    pub fn with_client(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        fallback_auth: Option<String>,
        compression_level: Option<i32>,
    ) -> Self {
        TransportRouter {
            client,
            endpoint: endpoint.into(),
            fallback_auth,
            compression_level,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn encode(&self, raw: Vec<u8>) -> Result<(Vec<u8>, bool), AgentError> {
        let Some(level) = self.compression_level else {
            return Ok((raw, false));
        };
        let mut encoder = Encoder::new(Vec::new(), level)?;
        encoder.write_all(&raw)?;
        Ok((encoder.finish()?, true))
    }
}

#[async_trait]
impl Transport for TransportRouter {
    async fn send_with_auth(
        &self,
        batch: &[Envelope],
        auth_header: &str,
    ) -> Result<(), AgentError> {
        let raw = serde_json::to_vec(batch)?;
        let (body, compressed) = self.encode(raw)?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json");
        if compressed {
            request = request.header(CONTENT_ENCODING, "zstd");
        }
        let auth = Some(auth_header)
            .filter(|h| !h.is_empty())
            .or(self.fallback_auth.as_deref());
        if let Some(auth) = auth {
            request = request.header(AUTHORIZATION, auth);
        }

        let start = Instant::now();
        let response = request.body(body).send().await.map_err(|e| {
            warn!(
                endpoint = %self.endpoint,
                "Failed to send {} envelopes after {} ms: {e}",
                batch.len(),
                start.elapsed().as_millis()
            );
            AgentError::Connectivity(e.to_string())
        })?;

        let status = response.status();
        if status.as_u16() >= 300 {
            let body = response.text().await.unwrap_or_default();
            warn!(
                endpoint = %self.endpoint,
                status = status.as_u16(),
                "Batch of {} envelopes rejected: {body}",
                batch.len()
            );
            return Err(AgentError::Transport {
                status: status.as_u16(),
            });
        }
        debug!(
            endpoint = %self.endpoint,
            status = status.as_u16(),
            "Delivered {} envelopes in {} ms",
            batch.len(),
            start.elapsed().as_millis()
        );
        Ok(())
    }
}
