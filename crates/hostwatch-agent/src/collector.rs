// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::envelope::{Envelope, Kind};
use crate::error::AgentError;
use crate::outbox::OutboxRepo;
use crate::scheduler::Job;

/// A source of one category of host telemetry.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Used as the envelope `sub` and in logs.
    fn name(&self) -> &str;

    fn interval(&self) -> Duration;

    /// Produces a JSON document describing the current state. An empty result means there is
    /// nothing to report this round.
    ///
    /// The output must be valid JSON: it becomes the envelope `body` as-is, and anything else
    /// is rejected with [`AgentError::Decode`] without buffering.
    async fn collect(&self) -> anyhow::Result<Vec<u8>>;
}

/// Runs a collector once and buffers its output as a metric envelope.
pub struct CollectAndBuffer {
    collector: Arc<dyn Collector>,
    outbox: Arc<dyn OutboxRepo>,
    agent_id: String,
    job_name: String,
}

impl CollectAndBuffer {
    pub fn new(
        collector: Arc<dyn Collector>,
        outbox: Arc<dyn OutboxRepo>,
        agent_id: impl Into<String>,
    ) -> Self {
        let job_name = format!("collect:{}", collector.name());
        CollectAndBuffer {
            collector,
            outbox,
            agent_id: agent_id.into(),
            job_name,
        }
    }

    pub fn interval(&self) -> Duration {
        self.collector.interval()
    }

    /// Returns the id of the buffered envelope, or `None` when the collector had nothing to
    /// report. Nothing is appended on any error.
    pub async fn collect_and_buffer(&self) -> Result<Option<String>, AgentError> {
        let name = self.collector.name().to_string();
        let raw = self
            .collector
            .collect()
            .await
            .map_err(|source| AgentError::Collect {
                name: name.clone(),
                source,
            })?;
        if raw.is_empty() {
            debug!(collector = %name, "Collector returned no data");
            return Ok(None);
        }

        let body: serde_json::Value = serde_json::from_slice(&raw).map_err(|e| {
            AgentError::Decode(format!("collector {name} produced invalid JSON: {e}"))
        })?;
        let envelope = Envelope::new(Kind::Metric, self.agent_id.as_str(), body).with_sub(name);
        let id = envelope.id.clone();
        self.outbox.append(envelope)?;
        debug!(collector = %self.collector.name(), envelope_id = %id, "Buffered collector output");
        Ok(Some(id))
    }
}

#[async_trait]
impl Job for CollectAndBuffer {
    fn name(&self) -> &str {
        &self.job_name
    }

    async fn run_once(&self) -> Result<(), AgentError> {
        self.collect_and_buffer().await.map(|_| ())
    }
}
