// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hub listener driven over real HTTP, with a mock backend behind it.

mod common;

use common::helpers::{create_test_batch, start_hub, test_config};
use hostwatch_agent::app::outbound_auth;
use hostwatch_agent::config::Mode;
use hostwatch_agent::envelope::{Envelope, Kind, META_VIA};
use hostwatch_agent::flusher::FlushOutbox;
use hostwatch_agent::outbox::{Outbox, OutboxRepo};
use hostwatch_agent::transport::{Route, TransportRouter};
use mockito::Server;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_relayed_batch_is_flushed_under_its_own_credential() {
    let mut backend = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&backend.url(), dir.path());
    let outbox = Arc::new(Outbox::new());
    let (addr, cancel) = start_hub(&config, outbox.clone()).await;

    let batch = create_test_batch("edge-1", 3);
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/v1/ingest"))
        .header("Authorization", "Token abc")
        .json(&batch)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 202);

    let buffered = outbox.read_batch(10).unwrap();
    assert_eq!(buffered.len(), 3);
    for (sent, stored) in batch.iter().zip(&buffered) {
        assert_eq!(stored.id, sent.id);
        assert_eq!(stored.meta.get(META_VIA).map(String::as_str), Some("hub"));
        assert_eq!(stored.auth_header.as_deref(), Some("Token abc"));
    }

    let ingest = backend
        .mock("POST", "/v1/ingest")
        .match_header("authorization", "Token abc")
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let flush = FlushOutbox::new(
        "flush",
        outbox.clone(),
        Arc::new(TransportRouter::new(&config, Route::Ingest).unwrap()),
        "Token own-token",
    );
    assert_eq!(flush.flush().await.unwrap(), 3);
    assert!(outbox.is_empty());
    ingest.assert_async().await;
    cancel.cancel();
}

#[tokio::test]
async fn test_relay_agent_reaches_backend_under_its_own_identity() {
    let mut backend = Server::new_async().await;
    let relayed = backend
        .mock("POST", "/v1/ingest")
        .match_header("authorization", "Token relay-token")
        .with_status(202)
        .expect(1)
        .create_async()
        .await;
    let hub_own = backend
        .mock("POST", "/v1/ingest")
        .match_header("authorization", "Token own-token")
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let hub_dir = tempfile::tempdir().unwrap();
    let hub_config = test_config(&backend.url(), hub_dir.path());
    let hub_outbox = Arc::new(Outbox::new());
    let (addr, cancel) = start_hub(&hub_config, hub_outbox.clone()).await;

    // no HUB_TOKEN: the relay agent's own credential is all the hub sees
    let relay_dir = tempfile::tempdir().unwrap();
    let mut relay_config = test_config("http://127.0.0.1:1", relay_dir.path());
    relay_config.mode = Mode::Relay;
    relay_config.token = Some("relay-token".to_string());
    relay_config.hub_url = Some(format!("http://{addr}"));
    relay_config.hub_token = None;

    let relay_outbox = Arc::new(Outbox::new());
    for envelope in create_test_batch("edge-1", 2) {
        relay_outbox.append(envelope).unwrap();
    }
    let relay_flush = FlushOutbox::new(
        "flush",
        relay_outbox.clone(),
        Arc::new(TransportRouter::new(&relay_config, Route::Ingest).unwrap()),
        outbound_auth(&relay_config),
    );
    assert_eq!(relay_flush.flush().await.unwrap(), 2);
    assert!(relay_outbox.is_empty());

    let buffered = hub_outbox.read_batch(10).unwrap();
    assert_eq!(buffered.len(), 2);
    assert!(buffered
        .iter()
        .all(|e| e.auth_header.as_deref() == Some("Token relay-token")));

    hub_outbox
        .append(Envelope::new(Kind::Metric, "hub-1", json!({ "cpu": 1 })))
        .unwrap();
    let hub_flush = FlushOutbox::new(
        "flush",
        hub_outbox.clone(),
        Arc::new(TransportRouter::new(&hub_config, Route::Ingest).unwrap()),
        outbound_auth(&hub_config),
    );
    assert_eq!(hub_flush.flush().await.unwrap(), 3);
    assert!(hub_outbox.is_empty());

    relayed.assert_async().await;
    hub_own.assert_async().await;
    cancel.cancel();
}

#[tokio::test]
async fn test_ingest_requires_authorization() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("http://127.0.0.1:1", dir.path());
    let outbox = Arc::new(Outbox::new());
    let (addr, cancel) = start_hub(&config, outbox.clone()).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/v1/ingest"))
        .json(&create_test_batch("edge-1", 1))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
    assert!(outbox.is_empty());
    cancel.cancel();
}

#[tokio::test]
async fn test_malformed_batch_is_rejected_whole() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("http://127.0.0.1:1", dir.path());
    let outbox = Arc::new(Outbox::new());
    let (addr, cancel) = start_hub(&config, outbox.clone()).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/v1/ingest"))
        .header("Authorization", "Token abc")
        .header("Content-Type", "application/json")
        .body("[{\"envelope_id\": 1}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    assert!(outbox.is_empty());
    cancel.cancel();
}

#[tokio::test]
async fn test_oversized_batch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config("http://127.0.0.1:1", dir.path());
    config.max_request_content_length = 64;
    let outbox = Arc::new(Outbox::new());
    let (addr, cancel) = start_hub(&config, outbox.clone()).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/v1/ingest"))
        .header("Authorization", "Token abc")
        .json(&create_test_batch("edge-1", 5))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 413);
    assert!(outbox.is_empty());
    cancel.cancel();
}

#[tokio::test]
async fn test_compressed_batch_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("http://127.0.0.1:1", dir.path());
    let outbox = Arc::new(Outbox::new());
    let (addr, cancel) = start_hub(&config, outbox.clone()).await;

    let raw = serde_json::to_vec(&create_test_batch("edge-1", 2)).unwrap();
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/v1/ingest"))
        .header("Authorization", "Token abc")
        .header("Content-Encoding", "zstd")
        .body(zstd::encode_all(raw.as_slice(), 3).unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 202);
    assert_eq!(outbox.len().0, 2);
    cancel.cancel();
}

#[tokio::test]
async fn test_config_request_is_proxied_with_caller_credential() {
    let mut backend = Server::new_async().await;
    let upstream = backend
        .mock("GET", "/v1/agent/config")
        .match_header("authorization", "Token abc")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"version":"7","collect":{"cpu":false}}"#)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&backend.url(), dir.path());
    let (addr, cancel) = start_hub(&config, Arc::new(Outbox::new())).await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/v1/agent/config"))
        .header("Authorization", "Token abc")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.text().await.unwrap(),
        r#"{"version":"7","collect":{"cpu":false}}"#
    );
    upstream.assert_async().await;
    cancel.cancel();
}

#[tokio::test]
async fn test_config_proxy_reports_unreachable_backend() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("http://127.0.0.1:1", dir.path());
    let (addr, cancel) = start_hub(&config, Arc::new(Outbox::new())).await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/v1/agent/config"))
        .header("Authorization", "Token abc")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 502);
    cancel.cancel();
}

#[tokio::test]
async fn test_unknown_routes() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("http://127.0.0.1:1", dir.path());
    let (addr, cancel) = start_hub(&config, Arc::new(Outbox::new())).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{addr}/v1/ingest"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 405);

    let response = client
        .get(format!("http://{addr}/v1/unknown"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    cancel.cancel();
}
