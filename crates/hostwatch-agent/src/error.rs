// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

/// Errors surfaced by the agent's jobs and protocols.
///
/// Collection and flush errors are absorbed by the scheduler and retried on the next tick.
/// [`AgentError::EnrollmentRejected`], [`AgentError::ConfigurationMismatch`] and
/// [`AgentError::Config`] are fatal to startup.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// No response was received: timeout, DNS, refused connection.
    #[error("connectivity failure: {0}")]
    Connectivity(String),

    /// The backend (or hub) answered with a non-success status.
    #[error("transport failure: remote responded with status {status}")]
    Transport { status: u16 },

    #[error("enrollment rejected with status {status}: {body}")]
    EnrollmentRejected { status: u16, body: String },

    #[error(
        "bootstrap state mismatch: the token persisted in {} differs from the configured token, remove it to re-enroll",
        path.display()
    )]
    ConfigurationMismatch { path: PathBuf },

    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode failure: {0}")]
    Decode(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("collector {name} failed: {source}")]
    Collect {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

impl AgentError {
    /// Short label used as a structured log field so failures of different classes can be
    /// told apart.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connectivity(_) => "connectivity",
            Self::Transport { .. } => "transport",
            Self::EnrollmentRejected { .. } => "enrollment_rejected",
            Self::ConfigurationMismatch { .. } => "configuration_mismatch",
            Self::Io(_) => "io",
            Self::Decode(_) => "decode",
            Self::Config(_) => "config",
            Self::Collect { .. } => "collect",
        }
    }

    /// Status code of a rejected request, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status } | Self::EnrollmentRejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Transport {
                status: status.as_u16(),
            },
            None if err.is_decode() => Self::Decode(err.to_string()),
            None => Self::Connectivity(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
