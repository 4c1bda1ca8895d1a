// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::AgentError;
use crate::http_utils::build_client;
use crate::prefs::{CollectPrefs, PrefsStore};
use crate::scheduler::Job;

const CONFIG_SYNC_TIMEOUT: Duration = Duration::from_secs(8);
pub const AGENT_CONFIG_PATH: &str = "/v1/agent/config";

#[derive(Debug, Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    version: String,
    #[serde(default)]
    collect: CollectPrefs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The backend answered 204.
    NotModified,
    /// Same version as the cached preferences.
    Unchanged,
    Updated(String),
}

/// Pulls collection preferences from the backend into the local store.
pub struct ConfigSync {
    client: reqwest::Client,
    endpoint: String,
    auth_header: Option<String>,
    store: Arc<PrefsStore>,
}

impl ConfigSync {
    pub fn new(config: &Config, store: Arc<PrefsStore>) -> Result<Self, AgentError> {
        let client = build_client(config.proxy_url.as_deref(), CONFIG_SYNC_TIMEOUT)?;
        Ok(ConfigSync {
            client,
            endpoint: config.api_endpoint(AGENT_CONFIG_PATH),
            auth_header: config.default_auth_header(),
            store,
        })
    }

    /// A document whose version equals the cached one is ignored, unless both are empty: an
    /// unversioned document always replaces the cache.
    pub async fn sync(&self) -> Result<SyncOutcome, AgentError> {
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
            debug!("Collect preferences not modified");
            return Ok(SyncOutcome::NotModified);
        }
        if status.as_u16() >= 300 {
            return Err(AgentError::Transport {
                status: status.as_u16(),
            });
        }

        let document: ConfigDocument = response.json().await?;
        let mut prefs = document.collect;
        prefs.version = document.version;

        let current = self.store.version();
        if !prefs.version.is_empty() && prefs.version == current {
            debug!(version = %current, "Collect preferences unchanged");
            return Ok(SyncOutcome::Unchanged);
        }

        let version = prefs.version.clone();
        self.store.update(prefs)?;
        info!(version = %version, "Collect preferences updated");
        Ok(SyncOutcome::Updated(version))
    }
}

#[async_trait]
impl Job for ConfigSync {
    fn name(&self) -> &str {
        "config_sync"
    }

    async fn run_once(&self) -> Result<(), AgentError> {
        self.sync().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn syncer(base_url: String, dir: &tempfile::TempDir) -> (ConfigSync, Arc<PrefsStore>) {
        let config = Config {
            token: Some("abc".to_string()),
            api_base_url: base_url,
            ..Default::default()
        };
        let store = Arc::new(PrefsStore::load(dir.path().join("prefs.json")));
        (ConfigSync::new(&config, store.clone()).unwrap(), store)
    }

    #[tokio::test]
    async fn test_no_content_is_no_op() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", AGENT_CONFIG_PATH)
            .with_status(204)
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let (sync, store) = syncer(server.url(), &dir);

        assert_eq!(sync.sync().await.unwrap(), SyncOutcome::NotModified);
        assert_eq!(*store.get(), CollectPrefs::default());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_new_version_is_persisted_and_visible() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", AGENT_CONFIG_PATH)
            .match_header("authorization", "Token abc")
            .with_status(200)
            .with_body(r#"{"version":"v2","collect":{"gpu":false,"processes":false}}"#)
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let (sync, store) = syncer(server.url(), &dir);

        assert_eq!(
            sync.sync().await.unwrap(),
            SyncOutcome::Updated("v2".to_string())
        );
        mock.assert_async().await;

        let prefs = store.get();
        assert_eq!(prefs.version, "v2");
        assert!(!prefs.gpu);
        assert!(!prefs.processes);
        assert!(prefs.cpu);

        let reloaded = PrefsStore::load(store.path());
        assert_eq!(*reloaded.get(), *prefs);
    }

    #[tokio::test]
    async fn test_same_version_is_unchanged() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", AGENT_CONFIG_PATH)
            .with_status(200)
            .with_body(r#"{"version":"v2","collect":{"gpu":true}}"#)
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let (sync, store) = syncer(server.url(), &dir);
        store
            .update(CollectPrefs {
                version: "v2".to_string(),
                gpu: false,
                ..Default::default()
            })
            .unwrap();

        assert_eq!(sync.sync().await.unwrap(), SyncOutcome::Unchanged);
        assert!(!store.get().gpu);
    }

    #[tokio::test]
    async fn test_unversioned_document_always_applies() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", AGENT_CONFIG_PATH)
            .with_status(200)
            .with_body(r#"{"collect":{"logs":false}}"#)
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let (sync, store) = syncer(server.url(), &dir);

        assert_eq!(
            sync.sync().await.unwrap(),
            SyncOutcome::Updated(String::new())
        );
        assert!(!store.get().logs);
    }

    #[tokio::test]
    async fn test_rejection_keeps_cached_prefs() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", AGENT_CONFIG_PATH)
            .with_status(503)
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let (sync, store) = syncer(server.url(), &dir);

        let err = sync.sync().await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert_eq!(*store.get(), CollectPrefs::default());
    }
}
