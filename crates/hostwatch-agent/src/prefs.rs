// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Collection preferences pushed by the backend.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::persist;

/// Which collector sections are enabled. Missing fields mean enabled, so a backend that does
/// not know about a section never switches it off by accident.
///
/// `net_active`, `sensors`, `power`, `sanity`, `gpu`, `services`, `time_sync` and `updates`
/// have no built-in collector; they are kept and persisted for collectors registered outside
/// this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectPrefs {
    pub version: String,
    pub cpu: bool,
    pub memory: bool,
    pub disk: bool,
    pub network: bool,
    pub net_active: bool,
    pub host: bool,
    pub sensors: bool,
    pub power: bool,
    pub sanity: bool,
    pub gpu: bool,
    pub services: bool,
    pub time_sync: bool,
    pub logs: bool,
    pub updates: bool,
    pub agent: bool,
    pub processes: bool,
}

impl Default for CollectPrefs {
    fn default() -> Self {
        CollectPrefs {
            version: String::new(),
            cpu: true,
            memory: true,
            disk: true,
            network: true,
            net_active: true,
            host: true,
            sensors: true,
            power: true,
            sanity: true,
            gpu: true,
            services: true,
            time_sync: true,
            logs: true,
            updates: true,
            agent: true,
            processes: true,
        }
    }
}

impl CollectPrefs {
    /// Looks a section up by name. Unknown sections are enabled.
    pub fn is_enabled(&self, section: &str) -> bool {
        match section {
            "cpu" => self.cpu,
            "memory" => self.memory,
            "disk" => self.disk,
            "network" => self.network,
            "net_active" => self.net_active,
            "host" => self.host,
            "sensors" => self.sensors,
            "power" => self.power,
            "sanity" => self.sanity,
            "gpu" => self.gpu,
            "services" => self.services,
            "time_sync" => self.time_sync,
            "logs" => self.logs,
            "updates" => self.updates,
            "agent" => self.agent,
            "processes" => self.processes,
            _ => true,
        }
    }
}

/// Current preferences, readable from any task without locking. Updates are persisted before
/// they become visible.
pub struct PrefsStore {
    path: PathBuf,
    current: ArcSwap<CollectPrefs>,
}

impl PrefsStore {
    /// Loads the persisted preferences. A missing or unreadable file falls back to defaults.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let prefs = match persist::read_json::<CollectPrefs>(&path) {
            Ok(Some(prefs)) => {
                debug!(version = %prefs.version, "Loaded collect preferences from {}", path.display());
                prefs
            }
            Ok(None) => CollectPrefs::default(),
            Err(e) => {
                warn!("Ignoring unreadable collect preferences at {}: {e}", path.display());
                CollectPrefs::default()
            }
        };
        PrefsStore {
            path,
            current: ArcSwap::from_pointee(prefs),
        }
    }

    pub fn get(&self) -> Arc<CollectPrefs> {
        self.current.load_full()
    }

    pub fn version(&self) -> String {
        self.current.load().version.clone()
    }

    /// Persists `prefs` and makes them current. On a write failure the previous preferences
    /// stay in effect.
    pub fn update(&self, prefs: CollectPrefs) -> Result<(), AgentError> {
        persist::write_json(&self.path, &prefs)?;
        self.current.store(Arc::new(prefs));
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_default_to_enabled() {
        let prefs: CollectPrefs = serde_json::from_str(r#"{"version":"3","gpu":false}"#).unwrap();
        assert_eq!(prefs.version, "3");
        assert!(!prefs.gpu);
        assert!(prefs.cpu);
        assert!(prefs.logs);
        assert!(!prefs.is_enabled("gpu"));
        assert!(prefs.is_enabled("something_new"));
    }

    #[test]
    fn test_sections_without_builtin_collector_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        let store = PrefsStore::load(&path);
        store
            .update(CollectPrefs {
                version: "9".to_string(),
                sensors: false,
                time_sync: false,
                ..Default::default()
            })
            .unwrap();

        let reloaded = PrefsStore::load(&path).get();
        assert!(!reloaded.is_enabled("sensors"));
        assert!(!reloaded.is_enabled("time_sync"));
        assert!(reloaded.is_enabled("updates"));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = PrefsStore::load(dir.path().join("prefs.json"));
        assert_eq!(*store.get(), CollectPrefs::default());
        assert_eq!(store.version(), "");
    }

    #[test]
    fn test_load_corrupt_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "not json").unwrap();
        let store = PrefsStore::load(&path);
        assert_eq!(*store.get(), CollectPrefs::default());
    }

    #[test]
    fn test_update_persists_and_swaps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/prefs.json");
        let store = PrefsStore::load(&path);
        let before = store.get();

        let prefs = CollectPrefs {
            version: "9".to_string(),
            processes: false,
            ..Default::default()
        };
        store.update(prefs.clone()).unwrap();

        assert_eq!(*store.get(), prefs);
        // readers holding the old snapshot keep a consistent view
        assert!(before.processes);

        let reloaded = PrefsStore::load(&path);
        assert_eq!(*reloaded.get(), prefs);
    }
}
