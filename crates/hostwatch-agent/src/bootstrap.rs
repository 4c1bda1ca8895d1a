// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One-time enrollment of the agent's identity with the backend.
//!
//! The state file is the durable proof of enrollment. It is only written after the backend
//! accepted the enrollment, and a later start with the same token skips the network call.
//! A state file holding a different token stops the agent: re-enrolling under a new identity
//! requires the operator to remove the file first.

use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::AgentError;
use crate::host::HostInfo;
use crate::http_utils::build_client;
use crate::persist;

const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(10);
pub const BOOTSTRAP_PATH: &str = "/v1/agent/bootstrap";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapState {
    pub token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host_guid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStatus {
    Unbootstrapped,
    Bootstrapping,
    Bootstrapped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// A matching state file was found; nothing was sent.
    AlreadyBootstrapped,
    Enrolled,
}

#[derive(Serialize)]
struct EnrollRequest<'a> {
    token: &'a str,
    #[serde(flatten)]
    host: &'a HostInfo,
    agent_version: &'a str,
}

pub struct BootstrapProtocol {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    token_path: PathBuf,
    state_path: PathBuf,
    host: HostInfo,
    status: Mutex<BootstrapStatus>,
}

impl BootstrapProtocol {
    pub fn new(config: &Config, host: HostInfo) -> Result<Self, AgentError> {
        let client = build_client(config.proxy_url.as_deref(), BOOTSTRAP_TIMEOUT)?;
        Ok(BootstrapProtocol {
            client,
            endpoint: config.api_endpoint(BOOTSTRAP_PATH),
            token: config.token.clone(),
            token_path: config.token_path.clone(),
            state_path: config.state_path.clone(),
            host,
            status: Mutex::new(BootstrapStatus::Unbootstrapped),
        })
    }

    pub fn status(&self) -> BootstrapStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: BootstrapStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Makes sure the agent is enrolled, enrolling it if needed.
    ///
    /// # Errors
    ///
    /// [`AgentError::ConfigurationMismatch`] when the state file names another token,
    /// [`AgentError::EnrollmentRejected`] when the backend refuses the enrollment, and
    /// [`AgentError::Config`] when no token is configured. All of them are fatal to startup.
    pub async fn ensure_bootstrapped(&self) -> Result<BootstrapOutcome, AgentError> {
        let token = self
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AgentError::Config("missing agent token".to_string()))?;

        if let Some(state) = self.load_state()? {
            if state.token == token {
                info!("Bootstrap skipped, state found at {}", self.state_path.display());
                self.set_status(BootstrapStatus::Bootstrapped);
                return Ok(BootstrapOutcome::AlreadyBootstrapped);
            }
            return Err(AgentError::ConfigurationMismatch {
                path: self.state_path.clone(),
            });
        }

        self.set_status(BootstrapStatus::Bootstrapping);
        match self.enroll(token).await {
            Ok(()) => {
                self.set_status(BootstrapStatus::Bootstrapped);
                info!(hostname = %self.host.hostname, "Agent enrolled");
                Ok(BootstrapOutcome::Enrolled)
            }
            Err(e) => {
                self.set_status(BootstrapStatus::Unbootstrapped);
                Err(e)
            }
        }
    }

    fn load_state(&self) -> Result<Option<BootstrapState>, AgentError> {
        match persist::read_json::<BootstrapState>(&self.state_path) {
            Ok(state) => Ok(state),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!(
                    "Ignoring unreadable bootstrap state at {}: {e}",
                    self.state_path.display()
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn enroll(&self, token: &str) -> Result<(), AgentError> {
        let request = EnrollRequest {
            token,
            host: &self.host,
            agent_version: crate::AGENT_VERSION,
        };
        debug!(endpoint = %self.endpoint, "Enrolling agent");
        let response = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("Token {token}"))
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::Connectivity(e.to_string()))?;

        let status = response.status();
        if status.as_u16() >= 300 {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::EnrollmentRejected {
                status: status.as_u16(),
                body,
            });
        }

        persist::write_atomic(&self.token_path, token.as_bytes())?;
        persist::write_json(
            &self.state_path,
            &BootstrapState {
                token: token.to_string(),
                host_guid: self.host.host_guid.clone(),
            },
        )?;
        Ok(())
    }
}
