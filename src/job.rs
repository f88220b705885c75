// src/job.rs
//! Job run bookkeeping with throttled progress persistence

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

use crate::database::{DatabaseBackend, JobRunId};

/// Tracks one run of a named job
///
/// A tracker started with zero targets never touches the database.
pub struct JobTracker {
    backend: Arc<dyn DatabaseBackend>,
    name: String,
    job_run_id: Option<JobRunId>,
    total: u64,
    finished: u64,
    flush_every: u64,
}

impl JobTracker {
    /// Create the job run record for `total` targets
    pub async fn start(backend: Arc<dyn DatabaseBackend>, name: &str, total: u64) -> Result<Self> {
        let job_run_id = if total == 0 {
            info!("[{}] no targets", name);
            None
        } else {
            let id = backend
                .insert_job_run(name, total)
                .await
                .with_context(|| format!("Failed to create job run for '{}'", name))?;
            info!("[{}] started job run {} with {} targets", name, id, total);
            Some(id)
        };

        Ok(Self {
            backend,
            name: name.to_string(),
            job_run_id,
            total,
            finished: 0,
            flush_every: Self::flush_interval(total),
        })
    }

    /// Persist progress every `ceil(total / 100)` completed targets
    pub fn flush_interval(total: u64) -> u64 {
        total.div_ceil(100).max(1)
    }

    pub fn job_run_id(&self) -> Option<JobRunId> {
        self.job_run_id
    }

    /// Count one completed target
    pub async fn tick(&mut self) -> Result<()> {
        let Some(id) = self.job_run_id else {
            return Ok(());
        };

        self.finished += 1;
        if self.finished % self.flush_every == 0 {
            debug!("[{}] {}/{} targets finished", self.name, self.finished, self.total);
            self.backend
                .update_job_run(id, self.finished, false)
                .await
                .with_context(|| format!("Failed to update job run {}", id))?;
        }
        Ok(())
    }

    /// Stamp the end time and write the final count
    pub async fn finish(self) -> Result<()> {
        let Some(id) = self.job_run_id else {
            return Ok(());
        };

        self.backend
            .update_job_run(id, self.finished, true)
            .await
            .with_context(|| format!("Failed to finish job run {}", id))?;
        info!("[{}] finished job run {} ({}/{})", self.name, id, self.finished, self.total);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MemoryBackend, StoreTransaction};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Remembers every job run update it forwards
    #[derive(Default)]
    struct RecordingBackend {
        inner: MemoryBackend,
        updates: Mutex<Vec<(u64, bool)>>,
    }

    #[async_trait]
    impl DatabaseBackend for RecordingBackend {
        async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
            self.inner.begin().await
        }

        async fn insert_job_run(&self, name: &str, total_targets: u64) -> Result<JobRunId> {
            self.inner.insert_job_run(name, total_targets).await
        }

        async fn update_job_run(&self, id: JobRunId, finished_targets: u64, finished: bool) -> Result<()> {
            self.updates.lock().unwrap().push((finished_targets, finished));
            self.inner.update_job_run(id, finished_targets, finished).await
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_flush_interval() {
        assert_eq!(JobTracker::flush_interval(1), 1);
        assert_eq!(JobTracker::flush_interval(100), 1);
        assert_eq!(JobTracker::flush_interval(101), 2);
        assert_eq!(JobTracker::flush_interval(250), 3);
        assert_eq!(JobTracker::flush_interval(10_000), 100);
    }

    #[tokio::test]
    async fn test_progress_flushed_every_third_tick() {
        let backend = Arc::new(RecordingBackend::default());
        let mut tracker = JobTracker::start(backend.clone(), "dmz", 250).await.unwrap();

        for _ in 0..250 {
            tracker.tick().await.unwrap();
        }
        tracker.finish().await.unwrap();

        let updates = backend.updates.lock().unwrap().clone();
        assert_eq!(updates.len(), 83 + 1);
        assert_eq!(updates[0], (3, false));
        assert_eq!(updates[82], (249, false));
        assert_eq!(updates[83], (250, true));
        assert!(updates.windows(2).all(|w| w[0].0 <= w[1].0));

        let runs = backend.inner.snapshot().await.job_runs;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].total_targets, 250);
        assert_eq!(runs[0].finished_targets, 250);
        assert!(runs[0].end_time.is_some());
    }

    #[tokio::test]
    async fn test_zero_targets_creates_no_job_run() {
        let backend = Arc::new(RecordingBackend::default());
        let mut tracker = JobTracker::start(backend.clone(), "empty", 0).await.unwrap();
        assert_eq!(tracker.job_run_id(), None);

        tracker.tick().await.unwrap();
        tracker.finish().await.unwrap();

        assert!(backend.updates.lock().unwrap().is_empty());
        assert!(backend.inner.snapshot().await.job_runs.is_empty());
    }

    #[tokio::test]
    async fn test_unfinished_run_has_no_end_time() {
        let backend = Arc::new(MemoryBackend::new());
        let mut tracker = JobTracker::start(backend.clone(), "dmz", 10).await.unwrap();
        for _ in 0..4 {
            tracker.tick().await.unwrap();
        }
        drop(tracker);

        let runs = backend.snapshot().await.job_runs;
        assert_eq!(runs[0].finished_targets, 4);
        assert!(runs[0].end_time.is_none());
    }
}
