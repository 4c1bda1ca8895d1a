// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::envelope::Envelope;
use crate::error::AgentError;

/// Append/peek/acknowledge queue of envelopes awaiting delivery.
///
/// `read_batch` never removes anything: entries leave the queue only through `ack`, after
/// the caller has confirmed delivery. A failed delivery therefore leaves the batch in place
/// for the next flush, giving at-least-once semantics.
pub trait OutboxRepo: Send + Sync {
    /// Adds an envelope at the tail.
    fn append(&self, envelope: Envelope) -> Result<(), AgentError>;

    /// Returns up to `max_count` of the oldest entries, oldest first, without removing them.
    fn read_batch(&self, max_count: usize) -> Result<Vec<Envelope>, AgentError>;

    /// Removes exactly the entries whose id is in `ids`. Unknown ids are ignored and the
    /// relative order of the remaining entries is preserved.
    fn ack(&self, ids: &HashSet<String>) -> Result<(), AgentError>;

    /// Queue depth as `(count, approximate serialized bytes)`.
    fn len(&self) -> (usize, u64);

    fn is_empty(&self) -> bool {
        self.len().0 == 0
    }
}

struct Entry {
    envelope: Envelope,
    approx_bytes: u64,
}

#[derive(Default)]
struct Queue {
    entries: VecDeque<Entry>,
    bytes: u64,
}

/// In-memory outbox shared between the collection path and the flush/hub paths of one
/// process. All operations are serialized by an internal mutex and never await while
/// holding it.
#[derive(Default)]
pub struct Outbox {
    queue: Mutex<Queue>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Queue>, AgentError> {
        self.queue
            .lock()
            .map_err(|_| AgentError::Io(std::io::Error::other("outbox lock poisoned")))
    }
}

impl OutboxRepo for Outbox {
    fn append(&self, envelope: Envelope) -> Result<(), AgentError> {
        let approx_bytes = approximate_size(&envelope);
        let mut queue = self.lock()?;
        queue.bytes = queue.bytes.saturating_add(approx_bytes);
        queue.entries.push_back(Entry {
            envelope,
            approx_bytes,
        });
        Ok(())
    }

    fn read_batch(&self, max_count: usize) -> Result<Vec<Envelope>, AgentError> {
        let queue = self.lock()?;
        Ok(queue
            .entries
            .iter()
            .take(max_count)
            .map(|entry| entry.envelope.clone())
            .collect())
    }

    fn ack(&self, ids: &HashSet<String>) -> Result<(), AgentError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut queue = self.lock()?;
        let mut released = 0u64;
        queue.entries.retain(|entry| {
            if ids.contains(&entry.envelope.id) {
                released = released.saturating_add(entry.approx_bytes);
                false
            } else {
                true
            }
        });
        queue.bytes = queue.bytes.saturating_sub(released);
        Ok(())
    }

    fn len(&self) -> (usize, u64) {
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        (queue.entries.len(), queue.bytes)
    }
}

fn approximate_size(envelope: &Envelope) -> u64 {
    serde_json::to_vec(envelope)
        .map(|raw| raw.len() as u64)
        .unwrap_or_default()
}
