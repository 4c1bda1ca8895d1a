// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current shape of envelope bodies produced by this agent.
pub const SCHEMA_VERSION: u32 = 1;

/// Meta key stamped on every envelope relayed through a hub.
pub const META_VIA: &str = "via";

static LAST_ID_NANOS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Metric,
    Event,
    Detection,
    Heartbeat,
}

/// One telemetry record. Envelopes are immutable once appended to an outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "envelope_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub kind: Kind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    pub ts_unix_ms: i64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, String>,
    #[serde(default)]
    pub body: serde_json::Value,
    /// Credential of the agent that handed this envelope to a hub. Never part of the wire
    /// format: it is set from the ingest request's `Authorization` header.
    #[serde(skip)]
    pub auth_header: Option<String>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl Envelope {
    pub fn new(kind: Kind, agent_id: impl Into<String>, body: serde_json::Value) -> Self {
        let ts_unix_ms = now_unix_ms();
        Envelope {
            id: next_id(),
            tenant_id: None,
            agent_id: agent_id.into(),
            schema_version: SCHEMA_VERSION,
            kind,
            sub: None,
            ts_unix_ms,
            meta: HashMap::new(),
            body,
            auth_header: None,
        }
    }

    pub fn with_sub(mut self, sub: impl Into<String>) -> Self {
        self.sub = Some(sub.into());
        self
    }
}

/// Generates a new envelope id.
///
/// Ids are nanosecond timestamps rendered as fixed-width decimal strings, so lexical order
/// equals creation order. Two calls within the same nanosecond are disambiguated by bumping
/// the later one, which keeps ids strictly increasing within this process.
pub fn next_id() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or_default();
    let mut last = LAST_ID_NANOS.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(last.saturating_add(1));
        match LAST_ID_NANOS.compare_exchange_weak(
            last,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return format!("{candidate:020}"),
            Err(observed) => last = observed,
        }
    }
}

pub fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
