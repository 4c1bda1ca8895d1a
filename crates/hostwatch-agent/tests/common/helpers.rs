// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

#![allow(dead_code)]

use hostwatch_agent::config::{Config, Mode};
use hostwatch_agent::envelope::{Envelope, Kind};
use hostwatch_agent::hub::HubRelay;
use hostwatch_agent::outbox::OutboxRepo;
use hostwatch_agent::prefs::CollectPrefs;
use serde_json::json;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Configuration pointing every backend call at `api_base_url`, with state files under `dir`
/// and no timer firing on its own during a test.
pub fn test_config(api_base_url: &str, dir: &Path) -> Config {
    Config {
        token: Some("own-token".to_string()),
        token_path: dir.join("agent.token"),
        state_path: dir.join("bootstrap.ok"),
        prefs_path: dir.join("collect_prefs.json"),
        api_base_url: api_base_url.to_string(),
        skip_bootstrap: true,
        mode: Mode::Direct,
        hub_listen_addr: "127.0.0.1:0".to_string(),
        collect_interval: Duration::from_secs(3600),
        flush_interval: Duration::from_secs(3600),
        ping_interval: Duration::from_secs(3600),
        config_sync_interval: Duration::from_secs(3600),
        ..Default::default()
    }
}

/// Preferences with only the agent section on, so host collection stays cheap.
pub fn agent_only_prefs() -> CollectPrefs {
    CollectPrefs {
        version: "test".to_string(),
        cpu: false,
        memory: false,
        disk: false,
        network: false,
        net_active: false,
        host: false,
        sensors: false,
        power: false,
        sanity: false,
        gpu: false,
        services: false,
        time_sync: false,
        logs: false,
        updates: false,
        agent: true,
        processes: false,
    }
}

pub fn create_test_batch(agent_id: &str, count: usize) -> Vec<Envelope> {
    (0..count)
        .map(|i| Envelope::new(Kind::Event, agent_id, json!({ "seq": i })))
        .collect()
}

/// Starts a hub listener on an ephemeral local port.
pub async fn start_hub(
    config: &Config,
    outbox: Arc<dyn OutboxRepo>,
) -> (SocketAddr, CancellationToken) {
    let relay = Arc::new(HubRelay::new(config, outbox).expect("hub relay"));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let cancel = CancellationToken::new();
    tokio::spawn(relay.serve(listener, cancel.clone()));
    (addr, cancel)
}
