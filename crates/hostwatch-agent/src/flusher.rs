// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::AckPolicy;
use crate::envelope::Envelope;
use crate::error::AgentError;
use crate::outbox::OutboxRepo;
use crate::scheduler::Job;
use crate::transport::Transport;

/// Upper bound on envelopes read per flush.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Envelopes of one batch that share a credential, in their original relative order.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub auth_header: String,
    pub envelopes: Vec<Envelope>,
}

/// Groups `batch` by the credential each envelope must be delivered under. Envelopes without
/// their own credential fall under `default_auth`. Partitions appear in order of first
/// occurrence.
pub fn partition_by_auth(batch: &[Envelope], default_auth: &str) -> Vec<Partition> {
    let mut partitions: Vec<Partition> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for envelope in batch {
        let auth = envelope
            .auth_header
            .as_deref()
            .filter(|h| !h.is_empty())
            .unwrap_or(default_auth);
        let slot = *index.entry(auth).or_insert_with(|| {
            partitions.push(Partition {
                auth_header: auth.to_string(),
                envelopes: Vec::new(),
            });
            partitions.len() - 1
        });
        partitions[slot].envelopes.push(envelope.clone());
    }
    partitions
}

/// Drains one outbox through a transport.
pub struct FlushOutbox {
    name: String,
    outbox: Arc<dyn OutboxRepo>,
    transport: Arc<dyn Transport>,
    default_auth: String,
    batch_size: usize,
    ack_policy: AckPolicy,
}

impl FlushOutbox {
    pub fn new(
        name: impl Into<String>,
        outbox: Arc<dyn OutboxRepo>,
        transport: Arc<dyn Transport>,
        default_auth: impl Into<String>,
    ) -> Self {
        FlushOutbox {
            name: name.into(),
            outbox,
            transport,
            default_auth: default_auth.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            ack_policy: AckPolicy::WholeBatch,
        }
    }

    #[must_use]
    pub fn with_ack_policy(mut self, ack_policy: AckPolicy) -> Self {
        self.ack_policy = ack_policy;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Sends the oldest batch and acknowledges what was delivered. Returns the number of
    /// envelopes acknowledged.
    ///
    /// With [`AckPolicy::WholeBatch`] a failure of any partition leaves the whole batch queued,
    /// at the price of re-sending partitions that already went through. With
    /// [`AckPolicy::PerPartition`] each delivered partition is acknowledged on its own. Either
    /// way the first failure is returned.
    pub async fn flush(&self) -> Result<usize, AgentError> {
        let batch = self.outbox.read_batch(self.batch_size)?;
        if batch.is_empty() {
            return Ok(0);
        }

        let partitions = partition_by_auth(&batch, &self.default_auth);
        debug!(
            outbox = %self.name,
            "Flushing {} envelopes in {} partitions",
            batch.len(),
            partitions.len()
        );

        let mut delivered: HashSet<String> = HashSet::new();
        let mut first_error: Option<AgentError> = None;
        for partition in &partitions {
            match self
                .transport
                .send_with_auth(&partition.envelopes, &partition.auth_header)
                .await
            {
                Ok(()) => delivered.extend(partition.envelopes.iter().map(|e| e.id.clone())),
                Err(e) => {
                    warn!(
                        outbox = %self.name,
                        kind = e.kind(),
                        "Failed to deliver partition of {} envelopes: {e}",
                        partition.envelopes.len()
                    );
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                    if self.ack_policy == AckPolicy::WholeBatch {
                        break;
                    }
                }
            }
        }

        let acked = match (&first_error, self.ack_policy) {
            (Some(_), AckPolicy::WholeBatch) => 0,
            _ => {
                self.outbox.ack(&delivered)?;
                delivered.len()
            }
        };

        match first_error {
            Some(e) => Err(e),
            None => {
                debug!(outbox = %self.name, "Acknowledged {acked} envelopes");
                Ok(acked)
            }
        }
    }
}

#[async_trait]
impl Job for FlushOutbox {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_once(&self) -> Result<(), AgentError> {
        self.flush().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Kind;
    use crate::outbox::Outbox;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every call; fails for the credentials listed in `failing`.
    #[derive(Default)]
    struct FakeTransport {
        calls: Mutex<Vec<(String, Vec<String>)>>,
        failing: HashSet<String>,
    }

    impl FakeTransport {
        fn failing_for(headers: &[&str]) -> Self {
            FakeTransport {
                calls: Mutex::new(Vec::new()),
                failing: headers.iter().map(|h| h.to_string()).collect(),
            }
        }

        fn calls(&self) -> Vec<(String, Vec<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send_with_auth(
            &self,
            batch: &[Envelope],
            auth_header: &str,
        ) -> Result<(), AgentError> {
            self.calls.lock().unwrap().push((
                auth_header.to_string(),
                batch.iter().map(|e| e.id.clone()).collect(),
            ));
            if self.failing.contains(auth_header) {
                return Err(AgentError::Transport { status: 500 });
            }
            Ok(())
        }
    }

    fn envelope(auth: Option<&str>) -> Envelope {
        let mut envelope = Envelope::new(Kind::Metric, "host-a", json!({}));
        envelope.auth_header = auth.map(str::to_string);
        envelope
    }

    fn setup(
        envelopes: &[Envelope],
        transport: FakeTransport,
        policy: AckPolicy,
    ) -> (FlushOutbox, Arc<Outbox>, Arc<FakeTransport>) {
        let outbox = Arc::new(Outbox::new());
        for e in envelopes {
            outbox.append(e.clone()).unwrap();
        }
        let transport = Arc::new(transport);
        let flusher = FlushOutbox::new("telemetry", outbox.clone(), transport.clone(), "Token own")
            .with_ack_policy(policy);
        (flusher, outbox, transport)
    }

    #[test]
    fn test_partition_is_disjoint_and_complete() {
        let batch = vec![
            envelope(Some("Token h1")),
            envelope(None),
            envelope(Some("Token h2")),
            envelope(Some("Token h1")),
            envelope(Some("")),
        ];
        let partitions = partition_by_auth(&batch, "Token own");

        let headers: Vec<&str> = partitions.iter().map(|p| p.auth_header.as_str()).collect();
        assert_eq!(headers, vec!["Token h1", "Token own", "Token h2"]);

        let mut union: Vec<String> = partitions
            .iter()
            .flat_map(|p| p.envelopes.iter().map(|e| e.id.clone()))
            .collect();
        assert_eq!(union.len(), batch.len());
        union.sort();
        let mut expected: Vec<String> = batch.iter().map(|e| e.id.clone()).collect();
        expected.sort();
        assert_eq!(union, expected);

        // relative order within a partition is kept
        assert_eq!(
            partitions[0].envelopes,
            vec![batch[0].clone(), batch[3].clone()]
        );
        assert_eq!(
            partitions[1].envelopes,
            vec![batch[1].clone(), batch[4].clone()]
        );
    }

    #[tokio::test]
    async fn test_empty_outbox_makes_no_calls() {
        let (flusher, _, transport) =
            setup(&[], FakeTransport::default(), AckPolicy::WholeBatch);
        assert_eq!(flusher.flush().await.unwrap(), 0);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_success_acks_everything() {
        let envelopes = vec![envelope(None), envelope(Some("Token abc")), envelope(None)];
        let (flusher, outbox, transport) =
            setup(&envelopes, FakeTransport::default(), AckPolicy::WholeBatch);

        assert_eq!(flusher.flush().await.unwrap(), 3);
        assert!(outbox.is_empty());
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_keeps_batch_intact_for_next_flush() {
        let envelopes = vec![envelope(None), envelope(None)];
        let (flusher, outbox, transport) = setup(
            &envelopes,
            FakeTransport::failing_for(&["Token own"]),
            AckPolicy::WholeBatch,
        );

        assert!(flusher.flush().await.is_err());
        assert_eq!(outbox.read_batch(10).unwrap(), envelopes);

        assert!(flusher.flush().await.is_err());
        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
    }

    #[tokio::test]
    async fn test_whole_batch_policy_acks_nothing_on_partial_failure() {
        let envelopes = vec![envelope(Some("Token a")), envelope(Some("Token b"))];
        let (flusher, outbox, _) = setup(
            &envelopes,
            FakeTransport::failing_for(&["Token b"]),
            AckPolicy::WholeBatch,
        );

        let err = flusher.flush().await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(outbox.len().0, 2);
    }

    #[tokio::test]
    async fn test_per_partition_policy_acks_successful_partitions() {
        let envelopes = vec![
            envelope(Some("Token b")),
            envelope(Some("Token a")),
            envelope(Some("Token b")),
        ];
        let (flusher, outbox, transport) = setup(
            &envelopes,
            FakeTransport::failing_for(&["Token b"]),
            AckPolicy::PerPartition,
        );

        assert!(flusher.flush().await.is_err());
        // both partitions were attempted despite the first failing
        assert_eq!(transport.calls().len(), 2);
        let remaining = outbox.read_batch(10).unwrap();
        assert_eq!(remaining, vec![envelopes[0].clone(), envelopes[2].clone()]);
    }

    #[tokio::test]
    async fn test_batch_size_bounds_each_flush() {
        let envelopes: Vec<Envelope> = (0..7).map(|_| envelope(None)).collect();
        let (flusher, outbox, _) =
            setup(&envelopes, FakeTransport::default(), AckPolicy::WholeBatch);
        let flusher = flusher.with_batch_size(5);

        assert_eq!(flusher.flush().await.unwrap(), 5);
        assert_eq!(outbox.read_batch(10).unwrap(), envelopes[5..].to_vec());
        assert_eq!(flusher.flush().await.unwrap(), 2);
        assert!(outbox.is_empty());
    }
}
