// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::AgentError;
use crate::http_utils::build_client;
use crate::scheduler::Job;

const PING_TIMEOUT: Duration = Duration::from_secs(8);
pub const PING_PATH: &str = "/v1/agent/ping";

#[derive(Debug, Deserialize)]
struct ChallengeResponse {
    #[serde(default)]
    challenge: String,
}

#[derive(Debug, Serialize)]
struct ChallengeAck<'a> {
    challenge: &'a str,
    hostname: &'a str,
    version: &'a str,
    sent_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingOutcome {
    /// The backend had nothing to ask this cycle.
    NoChallenge,
    Acknowledged(String),
}

/// Liveness handshake: fetch a challenge, echo it back.
pub struct PingChallenge {
    client: reqwest::Client,
    endpoint: String,
    auth_header: Option<String>,
    hostname: String,
}

impl PingChallenge {
    pub fn new(config: &Config, hostname: impl Into<String>) -> Result<Self, AgentError> {
        let client = build_client(config.proxy_url.as_deref(), PING_TIMEOUT)?;
        Ok(PingChallenge {
            client,
            endpoint: config.api_endpoint(PING_PATH),
            auth_header: config.default_auth_header(),
            hostname: hostname.into(),
        })
    }

    /// One cycle. Any failure abandons the cycle; the next tick starts over with a new fetch.
    pub async fn ping(&self) -> Result<PingOutcome, AgentError> {
        let Some(challenge) = self.fetch_challenge().await? else {
            debug!("No ping challenge pending");
            return Ok(PingOutcome::NoChallenge);
        };
        self.send_ack(&challenge).await?;
        info!(challenge = %challenge, "Ping challenge acknowledged");
        Ok(PingOutcome::Acknowledged(challenge))
    }

    async fn fetch_challenge(&self) -> Result<Option<String>, AgentError> {
        let mut request = self.client.get(&self.endpoint);
        if let Some(auth) = &self.auth_header {
            request = request.header(AUTHORIZATION, auth);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AgentError::Connectivity(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if status.as_u16() >= 300 {
            return Err(AgentError::Transport {
                status: status.as_u16(),
            });
        }
        let payload: ChallengeResponse = response.json().await?;
        Ok(Some(payload.challenge).filter(|c| !c.is_empty()))
    }

    async fn send_ack(&self, challenge: &str) -> Result<(), AgentError> {
        let ack = ChallengeAck {
            challenge,
            hostname: &self.hostname,
            version: crate::AGENT_VERSION,
            sent_at: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
        };
        let mut request = self.client.post(&self.endpoint).json(&ack);
        if let Some(auth) = &self.auth_header {
            request = request.header(AUTHORIZATION, auth);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AgentError::Connectivity(e.to_string()))?;
        let status = response.status();
        if status.as_u16() >= 300 {
            return Err(AgentError::Transport {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Job for PingChallenge {
    fn name(&self) -> &str {
        "ping"
    }

    async fn run_once(&self) -> Result<(), AgentError> {
        self.ping().await.map(|_| ())
    }
}
