// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Host identity used by enrollment and as the envelope `agent_id`.

use serde::Serialize;
use std::env;
use std::fs;
use std::net::IpAddr;
use sysinfo::{Networks, System};
use tracing::warn;

/// Identity facts reported when the agent enrolls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostInfo {
    pub hostname: String,
    pub os: String,
    pub platform: String,
    pub platform_version: String,
    pub arch: String,
    pub ip_address: String,
    pub host_guid: String,
}

impl HostInfo {
    pub fn detect() -> Self {
        HostInfo {
            hostname: hostname(),
            os: env::consts::OS.to_string(),
            platform: System::name().unwrap_or_else(|| env::consts::OS.to_string()),
            platform_version: System::os_version().unwrap_or_default(),
            arch: env::consts::ARCH.to_string(),
            ip_address: primary_ipv4().unwrap_or_default(),
            host_guid: host_guid().unwrap_or_default(),
        }
    }
}

/// Get the system hostname
///
/// Tries, in order:
/// 1. HOSTWATCH_HOSTNAME environment variable
/// 2. HOSTNAME environment variable
/// 3. System hostname via nix::unistd::gethostname() on unix
/// 4. COMPUTERNAME environment variable
/// 5. "unknown"
#[must_use]
pub fn hostname() -> String {
    for key in ["HOSTWATCH_HOSTNAME", "HOSTNAME"] {
        if let Ok(hostname) = env::var(key) {
            if !hostname.is_empty() {
                return hostname;
            }
        }
    }

    #[cfg(unix)]
    match nix::unistd::gethostname() {
        Ok(hostname) => {
            if let Some(hostname) = hostname.to_str().filter(|h| !h.is_empty()) {
                return hostname.to_string();
            }
        }
        Err(e) => warn!("Failed to get system hostname: {}", e),
    }

    if let Ok(hostname) = env::var("COMPUTERNAME") {
        if !hostname.is_empty() {
            return hostname;
        }
    }

    warn!("Could not determine hostname, using 'unknown'");
    "unknown".to_string()
}

/// First non-loopback IPv4 address, picking interfaces in name order so the answer is stable
/// between runs.
pub fn primary_ipv4() -> Option<String> {
    let networks = Networks::new_with_refreshed_list();
    let mut interfaces: Vec<_> = networks.iter().collect();
    interfaces.sort_by(|(a, _), (b, _)| a.cmp(b));
    interfaces
        .into_iter()
        .flat_map(|(_, data)| data.ip_networks().iter().map(|net| net.addr))
        .find_map(|addr| match addr {
            IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_unspecified() => Some(v4.to_string()),
            _ => None,
        })
}

/// Stable machine identifier, if the platform exposes one.
pub fn host_guid() -> Option<String> {
    ["/etc/machine-id", "/var/lib/dbus/machine-id", "/sys/class/dmi/id/product_uuid"]
        .iter()
        .filter_map(|path| fs::read_to_string(path).ok())
        .map(|raw| raw.trim().to_string())
        .find(|id| !id.is_empty())
}
