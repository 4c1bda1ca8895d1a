// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use sysinfo::{Disks, Networks, ProcessesToUpdate, System};

use crate::collector::Collector;
use crate::outbox::OutboxRepo;
use crate::prefs::{CollectPrefs, PrefsStore};

const TOP_PROCESSES: usize = 10;

#[derive(Debug, Default, Serialize)]
pub struct HostSnapshot {
    pub capabilities: BTreeMap<&'static str, bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemorySection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<Vec<DiskSection>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<Vec<NetworkSection>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<HostSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processes: Option<Vec<ProcessSection>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentSection>,
}

impl HostSnapshot {
    fn has_sections(&self) -> bool {
        self.cpu.is_some()
            || self.memory.is_some()
            || self.disk.is_some()
            || self.network.is_some()
            || self.host.is_some()
            || self.processes.is_some()
            || self.agent.is_some()
    }
}

#[derive(Debug, Serialize)]
pub struct CpuSection {
    pub percent_total: f32,
    pub percent_per_cpu: Vec<f32>,
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
    pub cores_logical: usize,
}

#[derive(Debug, Serialize)]
pub struct MemorySection {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub used_percent: f64,
    pub swap_total_bytes: u64,
    pub swap_used_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct DiskSection {
    pub mount_point: String,
    pub file_system: String,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_percent: f64,
}

#[derive(Debug, Serialize)]
pub struct NetworkSection {
    pub interface: String,
    pub bytes_recv: u64,
    pub bytes_sent: u64,
}

#[derive(Debug, Serialize)]
pub struct HostSection {
    pub hostname: String,
    pub os: String,
    pub os_version: String,
    pub kernel_version: String,
    pub uptime_secs: u64,
    pub boot_time: u64,
}

#[derive(Debug, Serialize)]
pub struct ProcessSection {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f32,
    pub memory_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct AgentSection {
    pub version: &'static str,
    pub queue_items: usize,
    pub queue_bytes: u64,
}

/// Host self-telemetry. Sections switched off in the collect preferences are left out.
pub struct HostCollector {
    system: Arc<Mutex<System>>,
    prefs: Arc<PrefsStore>,
    outbox: Arc<dyn OutboxRepo>,
    interval: Duration,
}

impl HostCollector {
    pub fn new(prefs: Arc<PrefsStore>, outbox: Arc<dyn OutboxRepo>, interval: Duration) -> Self {
        HostCollector {
            system: Arc::new(Mutex::new(System::new())),
            prefs,
            outbox,
            interval,
        }
    }
}

/// Gathers the sections enabled in `prefs`. Blocking: reads from the OS.
pub fn take_snapshot(
    system: &Mutex<System>,
    prefs: &CollectPrefs,
    queue: (usize, u64),
) -> HostSnapshot {
    let mut system = system.lock().unwrap_or_else(PoisonError::into_inner);
    let mut snapshot = HostSnapshot::default();

    for section in ["cpu", "memory", "disk", "network", "host", "processes", "agent"] {
        snapshot.capabilities.insert(section, prefs.is_enabled(section));
    }

    if prefs.cpu {
        system.refresh_cpu_usage();
        let load = System::load_average();
        snapshot.cpu = Some(CpuSection {
            percent_total: system.global_cpu_usage(),
            percent_per_cpu: system.cpus().iter().map(|c| c.cpu_usage()).collect(),
            load1: load.one,
            load5: load.five,
            load15: load.fifteen,
            cores_logical: system.cpus().len(),
        });
    }

    if prefs.memory {
        system.refresh_memory();
        let total = system.total_memory();
        let used = system.used_memory();
        snapshot.memory = Some(MemorySection {
            total_bytes: total,
            used_bytes: used,
            available_bytes: system.available_memory(),
            used_percent: percent(used, total),
            swap_total_bytes: system.total_swap(),
            swap_used_bytes: system.used_swap(),
        });
    }

    if prefs.disk {
        let disks = Disks::new_with_refreshed_list();
        snapshot.disk = Some(
            disks
                .list()
                .iter()
                .map(|disk| {
                    let total = disk.total_space();
                    let free = disk.available_space();
                    DiskSection {
                        mount_point: disk.mount_point().display().to_string(),
                        file_system: disk.file_system().to_string_lossy().into_owned(),
                        total_bytes: total,
                        free_bytes: free,
                        used_percent: percent(total.saturating_sub(free), total),
                    }
                })
                .collect(),
        );
    }

    if prefs.network {
        let networks = Networks::new_with_refreshed_list();
        let mut interfaces: Vec<NetworkSection> = networks
            .iter()
            .map(|(name, data)| NetworkSection {
                interface: name.clone(),
                bytes_recv: data.total_received(),
                bytes_sent: data.total_transmitted(),
            })
            .collect();
        interfaces.sort_by(|a, b| a.interface.cmp(&b.interface));
        snapshot.network = Some(interfaces);
    }

    if prefs.host {
        snapshot.host = Some(HostSection {
            hostname: crate::host::hostname(),
            os: System::name().unwrap_or_default(),
            os_version: System::os_version().unwrap_or_default(),
            kernel_version: System::kernel_version().unwrap_or_default(),
            uptime_secs: System::uptime(),
            boot_time: System::boot_time(),
        });
    }

    if prefs.processes {
        system.refresh_processes(ProcessesToUpdate::All, true);
        let mut processes: Vec<ProcessSection> = system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessSection {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().into_owned(),
                cpu_percent: process.cpu_usage(),
                memory_bytes: process.memory(),
            })
            .collect();
        processes.sort_by(|a, b| {
            b.cpu_percent
                .total_cmp(&a.cpu_percent)
                .then(b.memory_bytes.cmp(&a.memory_bytes))
        });
        processes.truncate(TOP_PROCESSES);
        snapshot.processes = Some(processes);
    }

    if prefs.agent {
        let (queue_items, queue_bytes) = queue;
        snapshot.agent = Some(AgentSection {
            version: crate::AGENT_VERSION,
            queue_items,
            queue_bytes,
        });
    }

    snapshot
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64) * 100.0
}

#[async_trait]
impl Collector for HostCollector {
    fn name(&self) -> &str {
        "host"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn collect(&self) -> anyhow::Result<Vec<u8>> {
        let prefs = self.prefs.get();
        let queue = self.outbox.len();
        let system = Arc::clone(&self.system);
        let snapshot =
            tokio::task::spawn_blocking(move || take_snapshot(&system, &prefs, queue)).await?;
        if !snapshot.has_sections() {
            return Ok(Vec::new());
        }
        Ok(serde_json::to_vec(&snapshot)?)
    }
}
