// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AgentError;

const DEFAULT_API_BASE_URL: &str = "https://api.hostwatch.io";
const DEFAULT_TOKEN_PATH: &str = "./data/agent.token";
const DEFAULT_STATE_PATH: &str = "./data/bootstrap.ok";
const DEFAULT_PREFS_PATH: &str = "./data/collect_prefs.json";
const DEFAULT_OSLOG_CURSOR_PATH: &str = "./data/oslog_cursor.json";
const DEFAULT_HUB_LISTEN_ADDR: &str = "0.0.0.0:9090";

const DEFAULT_COLLECT_INTERVAL_SECS: u64 = 10;
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 15;
const DEFAULT_PING_INTERVAL_SECS: u64 = 5;
const DEFAULT_CONFIG_SYNC_INTERVAL_SECS: u64 = 30;
const DEFAULT_OSLOG_INTERVAL_SECS: u64 = 10;
const DEFAULT_OSLOG_BATCH_LINES: usize = 200;
const DEFAULT_OSLOG_MAX_BYTES: usize = 4096;

/// How the agent reaches the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Talk to the backend directly with the agent's own credential.
    #[default]
    Direct,
    /// Forward every batch to a hub, which talks to the backend on our behalf.
    Relay,
    /// Direct mode plus a listener accepting batches from relay agents.
    Hub,
}

impl FromStr for Mode {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "direct" => Ok(Mode::Direct),
            "relay" => Ok(Mode::Relay),
            "hub" => Ok(Mode::Hub),
            other => Err(AgentError::Config(format!(
                "unknown agent mode '{other}', expected direct, relay or hub"
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Direct => write!(f, "direct"),
            Mode::Relay => write!(f, "relay"),
            Mode::Hub => write!(f, "hub"),
        }
    }
}

/// What a flush acknowledges when some credential partitions fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckPolicy {
    /// Any failed partition leaves the whole batch queued.
    #[default]
    WholeBatch,
    /// Successful partitions are acknowledged even if another partition failed.
    PerPartition,
}

impl FromStr for AckPolicy {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "batch" => Ok(AckPolicy::WholeBatch),
            "partition" => Ok(AckPolicy::PerPartition),
            other => Err(AgentError::Config(format!(
                "unknown flush ack policy '{other}', expected batch or partition"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsLogConfig {
    pub enabled: bool,
    pub files: Vec<PathBuf>,
    pub interval: Duration,
    pub batch_lines: usize,
    /// Lines longer than this are truncated.
    pub max_bytes: usize,
    pub cursor_path: PathBuf,
}

impl Default for OsLogConfig {
    fn default() -> Self {
        OsLogConfig {
            enabled: false,
            files: Vec::new(),
            interval: Duration::from_secs(DEFAULT_OSLOG_INTERVAL_SECS),
            batch_lines: DEFAULT_OSLOG_BATCH_LINES,
            max_bytes: DEFAULT_OSLOG_MAX_BYTES,
            cursor_path: PathBuf::from(DEFAULT_OSLOG_CURSOR_PATH),
        }
    }
}

impl OsLogConfig {
    pub fn is_active(&self) -> bool {
        self.enabled && !self.files.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Enrollment token, from `AGENT_TOKEN` or the token file.
    pub token: Option<String>,
    pub token_path: PathBuf,
    pub state_path: PathBuf,
    pub api_base_url: String,
    pub api_key: Option<String>,
    /// 0 disables the health endpoint.
    pub health_port: u16,
    pub collect_interval: Duration,
    pub flush_interval: Duration,
    pub ping_interval: Duration,
    pub config_sync_interval: Duration,
    pub prefs_path: PathBuf,
    pub mode: Mode,
    pub hub_listen_addr: String,
    pub hub_url: Option<String>,
    pub hub_token: Option<String>,
    pub skip_bootstrap: bool,
    pub os_log: OsLogConfig,
    pub ack_policy: AckPolicy,
    /// zstd level for outbound batches; `None` sends them uncompressed.
    pub compression_level: Option<i32>,
    pub max_request_content_length: usize,
    pub proxy_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            token: None,
            token_path: PathBuf::from(DEFAULT_TOKEN_PATH),
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: None,
            health_port: 0,
            collect_interval: Duration::from_secs(DEFAULT_COLLECT_INTERVAL_SECS),
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECS),
            config_sync_interval: Duration::from_secs(DEFAULT_CONFIG_SYNC_INTERVAL_SECS),
            prefs_path: PathBuf::from(DEFAULT_PREFS_PATH),
            mode: Mode::Direct,
            hub_listen_addr: DEFAULT_HUB_LISTEN_ADDR.to_string(),
            hub_url: None,
            hub_token: None,
            skip_bootstrap: false,
            os_log: OsLogConfig::default(),
            ack_policy: AckPolicy::WholeBatch,
            compression_level: None,
            max_request_content_length: 10 * 1024 * 1024, // 10MB in Bytes
            proxy_url: None,
        }
    }
}

impl Config {
    /// Builds the configuration from the process environment.
    pub fn new() -> Result<Config, AgentError> {
        let token_path = env::var("AGENT_TOKEN_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_TOKEN_PATH));
        let token = non_empty_var("AGENT_TOKEN").or_else(|| read_token_file(&token_path));

        let api_base_url = non_empty_var("API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let mode = match env::var("AGENT_MODE") {
            Ok(val) => val.parse::<Mode>()?,
            Err(_) => Mode::Direct,
        };
        let ack_policy = match env::var("FLUSH_ACK_POLICY") {
            Ok(val) => val.parse::<AckPolicy>()?,
            Err(_) => AckPolicy::WholeBatch,
        };

        let compression_level = match non_empty_var("COMPRESSION_LEVEL") {
            Some(val) => Some(val.trim().parse::<i32>().map_err(|_| {
                AgentError::Config(format!("COMPRESSION_LEVEL must be an integer, got '{val}'"))
            })?),
            None => None,
        };

        let os_log = OsLogConfig {
            enabled: bool_var("OSLOG_ENABLED"),
            files: non_empty_var("OSLOG_FILES")
                .map(|files| {
                    files
                        .split(',')
                        .map(str::trim)
                        .filter(|f| !f.is_empty())
                        .map(PathBuf::from)
                        .collect()
                })
                .unwrap_or_default(),
            interval: secs_var("OSLOG_INTERVAL", DEFAULT_OSLOG_INTERVAL_SECS),
            batch_lines: positive_var("OSLOG_BATCH_LINES", DEFAULT_OSLOG_BATCH_LINES),
            max_bytes: positive_var("OSLOG_MAX_BYTES", DEFAULT_OSLOG_MAX_BYTES),
            cursor_path: non_empty_var("OSLOG_CURSOR_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OSLOG_CURSOR_PATH)),
        };

        let config = Config {
            token,
            token_path,
            state_path: non_empty_var("AGENT_STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH)),
            api_base_url,
            api_key: non_empty_var("API_KEY"),
            health_port: env::var("HEALTH_PORT")
                .ok()
                .and_then(|port| port.parse::<u16>().ok())
                .unwrap_or(0),
            collect_interval: secs_var("COLLECT_INTERVAL", DEFAULT_COLLECT_INTERVAL_SECS),
            flush_interval: secs_var("FLUSH_INTERVAL", DEFAULT_FLUSH_INTERVAL_SECS),
            ping_interval: secs_var("PING_INTERVAL", DEFAULT_PING_INTERVAL_SECS),
            config_sync_interval: secs_var(
                "CONFIG_SYNC_INTERVAL",
                DEFAULT_CONFIG_SYNC_INTERVAL_SECS,
            ),
            prefs_path: non_empty_var("PREFS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PREFS_PATH)),
            mode,
            hub_listen_addr: non_empty_var("HUB_LISTEN_ADDR")
                .unwrap_or_else(|| DEFAULT_HUB_LISTEN_ADDR.to_string()),
            hub_url: non_empty_var("HUB_URL").map(|url| url.trim_end_matches('/').to_string()),
            hub_token: non_empty_var("HUB_TOKEN"),
            skip_bootstrap: bool_var("SKIP_BOOTSTRAP"),
            os_log,
            ack_policy,
            compression_level,
            proxy_url: non_empty_var("HOSTWATCH_PROXY_HTTPS").or_else(|| non_empty_var("HTTPS_PROXY")),
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AgentError> {
        if self.mode == Mode::Relay && self.hub_url.is_none() {
            return Err(AgentError::Config(
                "HUB_URL is required when AGENT_MODE=relay".to_string(),
            ));
        }
        let can_skip_token = self.skip_bootstrap && self.api_key.is_some();
        if self.token.is_none() && !can_skip_token {
            return Err(AgentError::Config(
                "AGENT_TOKEN is required (set it or provide AGENT_TOKEN_PATH)".to_string(),
            ));
        }
        Ok(())
    }

    /// Absolute backend URL for an API path such as `/v1/ingest`.
    pub fn api_endpoint(&self, path: &str) -> String {
        join_url(&self.api_base_url, path)
    }

    /// Absolute hub URL for an API path, in relay mode.
    pub fn hub_endpoint(&self, path: &str) -> Option<String> {
        self.hub_url.as_deref().map(|base| join_url(base, path))
    }

    /// The agent's own credential: `Token <token>` when enrolled with a token, otherwise
    /// `Bearer <api key>`.
    pub fn default_auth_header(&self) -> Option<String> {
        if let Some(token) = &self.token {
            Some(format!("Token {token}"))
        } else {
            self.api_key.as_ref().map(|key| format!("Bearer {key}"))
        }
    }

    /// Credential presented to the hub in relay mode.
    pub fn hub_auth_header(&self) -> Option<String> {
        self.hub_token.as_ref().map(|token| format!("Token {token}"))
    }
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|val| !val.trim().is_empty())
}

fn bool_var(key: &str) -> bool {
    env::var(key)
        .map(|val| matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Reads a number of seconds; missing, malformed or non-positive values use the default.
fn secs_var(key: &str, default_secs: u64) -> Duration {
    let secs = env::var(key)
        .ok()
        .and_then(|val| val.trim().parse::<i64>().ok())
        .filter(|secs| *secs > 0)
        .map(|secs| secs.unsigned_abs())
        .unwrap_or(default_secs);
    Duration::from_secs(secs)
}

fn positive_var(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|val| val.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}

fn read_token_file(path: &std::path::Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|token| !token.is_empty())
}
