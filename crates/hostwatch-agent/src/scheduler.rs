// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::AgentError;

/// A periodic action driven by the scheduler.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    async fn run_once(&self) -> Result<(), AgentError>;
}

struct Entry {
    job: Arc<dyn Job>,
    period: Duration,
    run_on_shutdown: bool,
}

/// Drives every registered job on its own timer.
///
/// Each job gets a worker task, so a slow or hung job delays only its own next tick. Failures
/// are logged and retried on the next tick; nothing is retried within a tick. Cancellation is
/// observed between ticks: a run already in progress finishes first, bounded by the
/// timeouts of the calls it makes.
#[derive(Default)]
pub struct Scheduler {
    entries: Vec<Entry>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `job` every `period`, first one `period` after start.
    pub fn add(&mut self, job: Arc<dyn Job>, period: Duration) -> &mut Self {
        self.entries.push(Entry {
            job,
            period,
            run_on_shutdown: false,
        });
        self
    }

    /// Like [`Scheduler::add`], plus one last run when cancellation is observed.
    pub fn add_with_final_run(&mut self, job: Arc<dyn Job>, period: Duration) -> &mut Self {
        self.entries.push(Entry {
            job,
            period,
            run_on_shutdown: true,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn job_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.job.name().to_string()).collect()
    }

    /// Returns once `cancel` fired and every worker stopped.
    pub async fn run(self, cancel: CancellationToken) {
        let mut workers = JoinSet::new();
        for entry in self.entries {
            workers.spawn(run_worker(entry, cancel.clone()));
        }
        info!("Scheduler started with {} jobs", workers.len());

        while let Some(finished) = workers.join_next().await {
            if let Err(e) = finished {
                if e.is_panic() {
                    error!("Scheduled job panicked: {:?}", e);
                }
            }
        }
        info!("Scheduler stopped");
    }
}

async fn run_worker(entry: Entry, cancel: CancellationToken) {
    let Entry {
        job,
        period,
        run_on_shutdown,
    } = entry;
    let period = period.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                if run_on_shutdown {
                    debug!(job = job.name(), "Final run before shutdown");
                    run_logged(job.as_ref()).await;
                }
                debug!(job = job.name(), "Job stopped");
                break;
            }
            _ = ticker.tick() => {
                run_logged(job.as_ref()).await;
            }
        }
    }
}

async fn run_logged(job: &dyn Job) {
    match job.run_once().await {
        Ok(()) => debug!(job = job.name(), "Job run completed"),
        Err(e) => warn!(job = job.name(), kind = e.kind(), "Job run failed: {e}"),
    }
}
