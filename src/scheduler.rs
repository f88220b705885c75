// src/scheduler.rs
//! Bounded-concurrency driver for one scan job

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{self, JoinSet};
use tracing::{error, info};

use crate::database::DatabaseBackend;
use crate::job::JobTracker;
use crate::probe::{DEFAULT_TIMEOUT, TlsProbe, Transport};
use crate::progress::ProgressIndicator;
use crate::recorder::ChainRecorder;
use crate::stats::ScanStats;
use crate::targets::{JobDescription, SniMap, TargetEnumerator};
use crate::types::{ProbeOutcome, RunSummary, Target};

/// Runs every target of a job with at most `parallelism` probes in flight
///
/// Completions are handled one at a time by the run loop, which is the only
/// code touching the enumerator, the tracker and the database.
pub struct ConnectionScheduler {
    job_name: String,
    backend: Arc<dyn DatabaseBackend>,
    job: JobDescription,
    sni: SniMap,
    parallelism: usize,
    timeout: Duration,
    transport: Option<Arc<dyn Transport>>,
    stats: ScanStats,
    show_progress: bool,
}

impl ConnectionScheduler {
    pub fn new(
        job_name: impl Into<String>,
        backend: Arc<dyn DatabaseBackend>,
        job: JobDescription,
        sni: SniMap,
        parallelism: usize,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            backend,
            job,
            sni,
            parallelism: parallelism.max(1),
            timeout: DEFAULT_TIMEOUT,
            transport: None,
            stats: ScanStats::new(),
            show_progress: false,
        }
    }

    /// Use this transport instead of a [`TlsProbe`]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Connect and handshake timeout of the default TLS transport
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_stats(mut self, stats: ScanStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    /// Scan every target once and finish the job run
    ///
    /// Probe failures are recorded and counted. Database errors abort the run,
    /// leaving the job run without an end time.
    pub async fn run(&self) -> Result<RunSummary> {
        let total = TargetEnumerator::count_targets(&self.job, &self.sni);
        let mut tracker = JobTracker::start(Arc::clone(&self.backend), &self.job_name, total).await?;
        if total == 0 {
            tracker.finish().await?;
            return Ok(RunSummary::no_targets(&self.job_name));
        }

        let transport: Arc<dyn Transport> = match self.transport {
            Some(ref transport) => Arc::clone(transport),
            None => Arc::new(TlsProbe::new(self.timeout).context("Failed to set up TLS client")?),
        };
        let recorder = ChainRecorder::new(Arc::clone(&self.backend)).with_stats(self.stats.clone());
        let progress = ProgressIndicator::new(self.show_progress, total, &self.job_name);

        info!(
            "[{}] scanning {} targets with up to {} connections",
            self.job_name, total, self.parallelism
        );

        let mut targets = TargetEnumerator::new(&self.job, &self.sni);
        let mut in_flight = InFlight::default();
        for target in targets.by_ref().take(self.parallelism) {
            in_flight.launch(&transport, target);
        }

        let mut summary = RunSummary {
            job_name: self.job_name.clone(),
            job_run_id: tracker.job_run_id(),
            total_targets: total,
            ..RunSummary::default()
        };

        while let Some(joined) = in_flight.join_next().await {
            if let Some(target) = targets.next() {
                in_flight.launch(&transport, target);
            }

            let recorded = match joined {
                Ok(outcome) => recorder.record(outcome).await?.is_snapshot(),
                Err((target, e)) => {
                    error!("[{}] connection task for {} failed: {}", self.job_name, target, e);
                    let _ = recorder.record_failure(&target).await?;
                    false
                }
            };
            if recorded {
                summary.succeeded += 1;
                self.stats.record_success();
            } else {
                summary.failed += 1;
                self.stats.record_failure();
            }

            tracker.tick().await?;
            progress.inc();
            if progress.is_enabled() {
                progress.set_message(self.stats.format_stats());
            }
        }

        progress.finish();
        tracker.finish().await?;
        info!("{}", summary);
        Ok(summary)
    }
}

/// Connection tasks in flight, each keyed to its target
#[derive(Default)]
struct InFlight {
    tasks: JoinSet<ProbeOutcome>,
    targets: HashMap<task::Id, Target>,
}

impl InFlight {
    fn launch(&mut self, transport: &Arc<dyn Transport>, target: Target) {
        let transport = Arc::clone(transport);
        let probed = target.clone();
        let handle = self.tasks.spawn(async move {
            let result = transport.fetch_chain(&probed).await;
            ProbeOutcome::from_result(probed, result)
        });
        self.targets.insert(handle.id(), target);
    }

    /// Next finished task; one that panicked or was cancelled yields its target with the join error
    async fn join_next(&mut self) -> Option<Result<ProbeOutcome, (Target, task::JoinError)>> {
        loop {
            match self.tasks.join_next_with_id().await? {
                Ok((id, outcome)) => {
                    self.targets.remove(&id);
                    return Some(Ok(outcome));
                }
                Err(e) => {
                    if let Some(target) = self.targets.remove(&e.id()) {
                        return Some(Err((target, e)));
                    }
                    error!("Connection task {} finished for an unknown target: {}", e.id(), e);
                }
            }
        }
    }
}
