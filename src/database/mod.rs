// src/database/mod.rs
use anyhow::Result;
use async_trait::async_trait;

use crate::types::{CertificateRecord, Target};

pub mod memory;
pub mod postgres;

pub use memory::MemoryBackend;
pub use postgres::PostgresBackend;

pub type CertificateId = i64;
pub type TargetId = i64;
pub type ChainId = i64;
pub type JobRunId = i64;

/// One unit of work against the inventory tables
///
/// Nothing written through a transaction is visible to others until
/// [`StoreTransaction::commit`]; dropping it without committing rolls back.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Insert the target if unknown and return its id
    async fn upsert_target(&mut self, target: &Target) -> Result<TargetId>;

    /// Point the target at its latest chain snapshot, or clear it with `None`
    async fn set_latest_chain(&mut self, target_id: TargetId, chain_id: Option<ChainId>) -> Result<()>;

    async fn insert_chain(&mut self, target_id: TargetId, length: usize) -> Result<ChainId>;

    async fn insert_chain_link(&mut self, chain_id: ChainId, order: usize, certificate_id: CertificateId) -> Result<()>;

    async fn find_certificate(&mut self, fingerprint: &[u8]) -> Result<Option<CertificateId>>;

    /// Insert the certificate row only; `None` when the fingerprint already exists
    async fn insert_certificate(&mut self, cert: &CertificateRecord) -> Result<Option<CertificateId>>;

    /// Insert issuer and subject components followed by subject alternative names
    async fn insert_certificate_names(&mut self, certificate_id: CertificateId, cert: &CertificateRecord) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Database backend for the certificate inventory
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Start a transaction
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    /// Create a job run with zero finished targets, started now
    async fn insert_job_run(&self, name: &str, total_targets: u64) -> Result<JobRunId>;

    /// Persist progress; `finished` also stamps the end time
    async fn update_job_run(&self, id: JobRunId, finished_targets: u64, finished: bool) -> Result<()>;

    /// Health check
    async fn ping(&self) -> Result<()>;
}
