// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wires the components for the configured mode and runs them until cancelled.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bootstrap::BootstrapProtocol;
use crate::collector::CollectAndBuffer;
use crate::collectors::{HostCollector, OsLogCollector};
use crate::config::{Config, Mode};
use crate::config_sync::ConfigSync;
use crate::error::AgentError;
use crate::flusher::FlushOutbox;
use crate::health;
use crate::host::HostInfo;
use crate::hub::HubRelay;
use crate::outbox::{Outbox, OutboxRepo};
use crate::ping::PingChallenge;
use crate::prefs::PrefsStore;
use crate::scheduler::Scheduler;
use crate::transport::{Route, TransportRouter};

/// Everything a running agent is made of, built but not started.
pub struct Agent {
    scheduler: Scheduler,
    hub: Option<(Arc<HubRelay>, TcpListener)>,
    health: Option<TcpListener>,
    outbox: Arc<Outbox>,
}

impl Agent {
    /// Enrolls the agent if needed, then builds the jobs and binds the listeners. Every error
    /// returned here is fatal to startup.
    pub async fn build(config: &Config) -> Result<Agent, AgentError> {
        let host = HostInfo::detect();
        let hostname = host.hostname.clone();

        if config.skip_bootstrap {
            info!("Bootstrap skipped by configuration");
        } else {
            let outcome = BootstrapProtocol::new(config, host)?
                .ensure_bootstrapped()
                .await?;
            debug!(?outcome, "Bootstrap complete");
        }

        let prefs = Arc::new(PrefsStore::load(&config.prefs_path));
        let outbox = Arc::new(Outbox::new());
        let default_auth = outbound_auth(config);
        let mut scheduler = Scheduler::new();

        let host_collector = Arc::new(CollectAndBuffer::new(
            Arc::new(HostCollector::new(
                prefs.clone(),
                outbox.clone(),
                config.collect_interval,
            )),
            outbox.clone(),
            hostname.as_str(),
        ));
        let interval = host_collector.interval();
        scheduler.add(host_collector, interval);

        let flush = FlushOutbox::new(
            "flush",
            outbox.clone(),
            Arc::new(TransportRouter::new(config, Route::Ingest)?),
            default_auth.as_str(),
        )
        .with_ack_policy(config.ack_policy);
        scheduler.add_with_final_run(Arc::new(flush), config.flush_interval);

        if config.mode == Mode::Relay {
            info!("Relay mode: ping and config sync disabled");
        } else {
            scheduler.add(
                Arc::new(PingChallenge::new(config, hostname.as_str())?),
                config.ping_interval,
            );
            scheduler.add(
                Arc::new(ConfigSync::new(config, prefs.clone())?),
                config.config_sync_interval,
            );
        }

        if config.os_log.is_active() {
            let log_outbox = Arc::new(Outbox::new());
            let log_collector = Arc::new(CollectAndBuffer::new(
                Arc::new(OsLogCollector::new(
                    &config.os_log,
                    prefs.clone(),
                    hostname.as_str(),
                )),
                log_outbox.clone(),
                hostname.as_str(),
            ));
            let interval = log_collector.interval();
            scheduler.add(log_collector, interval);

            let log_flush = FlushOutbox::new(
                "flush:logs",
                log_outbox,
                Arc::new(TransportRouter::new(config, Route::RawLogs)?),
                default_auth.as_str(),
            )
            .with_ack_policy(config.ack_policy);
            scheduler.add_with_final_run(Arc::new(log_flush), config.flush_interval);
        }

        let hub = if config.mode == Mode::Hub {
            let relay = Arc::new(HubRelay::new(config, outbox.clone())?);
            let listener = TcpListener::bind(&config.hub_listen_addr).await?;
            info!("Hub listener on {}", listener.local_addr()?);
            Some((relay, listener))
        } else {
            None
        };

        let health = if config.health_port > 0 {
            let listener =
                TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], config.health_port))).await?;
            info!("Health endpoint on {}", listener.local_addr()?);
            Some(listener)
        } else {
            None
        };

        info!(
            mode = %config.mode,
            jobs = ?scheduler.job_names(),
            "Agent ready"
        );
        Ok(Agent {
            scheduler,
            hub,
            health,
            outbox,
        })
    }

    pub fn job_names(&self) -> Vec<String> {
        self.scheduler.job_names()
    }

    /// The outbox shared by the host collector, the main flush and the hub listener.
    pub fn outbox(&self) -> Arc<Outbox> {
        self.outbox.clone()
    }

    pub fn hub_addr(&self) -> Option<SocketAddr> {
        self.hub
            .as_ref()
            .and_then(|(_, listener)| listener.local_addr().ok())
    }

    /// Runs the listeners and the scheduler until `cancel` fires. Flush jobs get one last run
    /// before this returns.
    pub async fn run(self, cancel: CancellationToken) {
        let mut listeners = JoinSet::new();
        if let Some((relay, listener)) = self.hub {
            listeners.spawn(relay.serve(listener, cancel.clone()));
        }
        if let Some(listener) = self.health {
            listeners.spawn(health::serve(listener, cancel.clone()));
        }

        self.scheduler.run(cancel.clone()).await;

        while let Some(finished) = listeners.join_next().await {
            match finished {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Listener stopped with error: {e}"),
                Err(e) => error!("Listener task failed: {:?}", e),
            }
        }
        let (items, bytes) = self.outbox.len();
        if items > 0 {
            info!("Shutting down with {items} envelopes ({bytes} bytes) undelivered");
        }
    }
}

/// Builds the agent for `config` and runs it until `cancel` fires.
pub async fn run(config: &Config, cancel: CancellationToken) -> Result<(), AgentError> {
    let agent = Agent::build(config).await?;
    agent.run(cancel).await;
    Ok(())
}

/// Credential applied to the agent's own envelopes, in every mode. A hub forwards relayed
/// envelopes under the header they arrived with, so a relay agent still reaches the backend
/// under the identity it enrolled with. When empty, the transport falls back to its own
/// credential (`HUB_TOKEN` in relay mode).
pub fn outbound_auth(config: &Config) -> String {
    config.default_auth_header().unwrap_or_default()
}
