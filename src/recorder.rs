// src/recorder.rs
//! Persists probe outcomes as chain snapshots

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::database::{ChainId, DatabaseBackend};
use crate::error::EncodingError;
use crate::stats::ScanStats;
use crate::store::CertificateStore;
use crate::types::{ProbeOutcome, Target};

/// What happened to a probe outcome once it was persisted
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    /// A new snapshot is now the target's latest
    Snapshot { chain_id: ChainId, new_certificates: usize },
    /// The target's latest snapshot was cleared
    Cleared,
    /// The chain held an undecodable certificate; nothing of it was kept and
    /// the target was cleared instead
    Rejected(EncodingError),
}

impl Recorded {
    pub fn is_snapshot(&self) -> bool {
        matches!(self, Recorded::Snapshot { .. })
    }
}

/// Writes each outcome in its own transaction
#[derive(Clone)]
pub struct ChainRecorder {
    backend: Arc<dyn DatabaseBackend>,
    stats: Option<ScanStats>,
}

impl ChainRecorder {
    pub fn new(backend: Arc<dyn DatabaseBackend>) -> Self {
        Self { backend, stats: None }
    }

    pub fn with_stats(mut self, stats: ScanStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Route an outcome to the success or failure path
    pub async fn record(&self, outcome: ProbeOutcome) -> Result<Recorded> {
        match outcome {
            ProbeOutcome::Succeeded { target, chain } => self.record_success(&target, &chain).await,
            ProbeOutcome::Failed { target, error } => {
                debug!("Connection to {} failed: {}", target, error);
                self.record_failure(&target).await
            }
        }
    }

    /// Store the chain leaf first and make it the target's latest snapshot.
    /// Either everything becomes visible or nothing does.
    pub async fn record_success(&self, target: &Target, chain: &[Vec<u8>]) -> Result<Recorded> {
        let mut tx = self.backend.begin().await?;

        let target_id = tx
            .upsert_target(target)
            .await
            .with_context(|| format!("Failed to upsert target {}", target))?;
        let chain_id = tx.insert_chain(target_id, chain.len()).await?;

        let mut new_certificates = 0;
        for (order, der) in chain.iter().enumerate() {
            let result = CertificateStore::find_or_insert(tx.as_mut(), der).await;
            let stored = match result {
                Ok(stored) => stored,
                Err(err) => match err.downcast::<EncodingError>() {
                    Ok(encoding) => {
                        // Roll back the partial snapshot before touching the target again
                        drop(tx);
                        warn!("Discarding chain from {}: {}", target, encoding);
                        self.clear(target).await?;
                        return Ok(Recorded::Rejected(encoding));
                    }
                    Err(err) => return Err(err),
                },
            };
            if stored.inserted {
                new_certificates += 1;
            }
            tx.insert_chain_link(chain_id, order, stored.id).await?;
        }

        tx.set_latest_chain(target_id, Some(chain_id)).await?;
        tx.commit()
            .await
            .with_context(|| format!("Failed to commit chain for {}", target))?;

        info!("Recorded {} certificate(s) from {}", chain.len(), target);
        if let Some(ref stats) = self.stats {
            for _ in 0..new_certificates {
                stats.record_new_certificate();
            }
        }
        Ok(Recorded::Snapshot { chain_id, new_certificates })
    }

    /// Clear the target's latest snapshot, creating the target if needed
    pub async fn record_failure(&self, target: &Target) -> Result<Recorded> {
        self.clear(target).await?;
        Ok(Recorded::Cleared)
    }

    async fn clear(&self, target: &Target) -> Result<()> {
        let mut tx = self.backend.begin().await?;
        let target_id = tx
            .upsert_target(target)
            .await
            .with_context(|| format!("Failed to upsert target {}", target))?;
        tx.set_latest_chain(target_id, None).await?;
        tx.commit()
            .await
            .with_context(|| format!("Failed to clear latest chain of {}", target))
    }
}
