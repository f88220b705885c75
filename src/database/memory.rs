// src/database/memory.rs
//! In-process backend with the same uniqueness and transaction semantics as
//! the PostgreSQL schema. Used for dry runs and tests.

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    CertificateId, ChainId, DatabaseBackend, JobRunId, StoreTransaction, TargetId,
};
use crate::types::{CertificateRecord, DnComponent, SubjectAltName, Target};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRow {
    pub id: CertificateId,
    pub record: CertificateRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRow {
    pub id: TargetId,
    pub target: Target,
    pub latest_chain_id: Option<ChainId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainRow {
    pub id: ChainId,
    pub target_id: TargetId,
    pub length: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLinkRow {
    pub chain_id: ChainId,
    pub order: usize,
    pub certificate_id: CertificateId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnRow {
    pub certificate_id: CertificateId,
    pub component: DnComponent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectAltNameRow {
    pub certificate_id: CertificateId,
    pub san: SubjectAltName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRunRow {
    pub id: JobRunId,
    pub name: String,
    pub total_targets: u64,
    pub finished_targets: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Every table of the inventory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tables {
    pub certificates: Vec<CertificateRow>,
    pub dn_components: Vec<DnRow>,
    pub subject_alt_names: Vec<SubjectAltNameRow>,
    pub targets: Vec<TargetRow>,
    pub chains: Vec<ChainRow>,
    pub chain_links: Vec<ChainLinkRow>,
    pub job_runs: Vec<JobRunRow>,
    last_id: i64,
    certificate_index: HashMap<Vec<u8>, usize>,
    target_index: HashMap<Target, usize>,
    target_positions: HashMap<TargetId, usize>,
    link_index: HashSet<(ChainId, usize)>,
}

/// Table sizes and id counter when a transaction began
#[derive(Debug, Clone, Copy)]
struct Savepoint {
    certificates: usize,
    dn_components: usize,
    subject_alt_names: usize,
    targets: usize,
    chains: usize,
    chain_links: usize,
    last_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    pub fn certificate_by_fingerprint(&self, fingerprint: &[u8]) -> Option<&CertificateRow> {
        self.certificate_index
            .get(fingerprint)
            .map(|&position| &self.certificates[position])
    }

    pub fn target(&self, target: &Target) -> Option<&TargetRow> {
        self.target_index.get(target).map(|&position| &self.targets[position])
    }

    fn push_target(&mut self, row: TargetRow) {
        let position = self.targets.len();
        self.target_index.insert(row.target.clone(), position);
        self.target_positions.insert(row.id, position);
        self.targets.push(row);
    }

    fn push_certificate(&mut self, row: CertificateRow) {
        self.certificate_index
            .insert(row.record.fingerprint.clone(), self.certificates.len());
        self.certificates.push(row);
    }

    fn savepoint(&self) -> Savepoint {
        Savepoint {
            certificates: self.certificates.len(),
            dn_components: self.dn_components.len(),
            subject_alt_names: self.subject_alt_names.len(),
            targets: self.targets.len(),
            chains: self.chains.len(),
            chain_links: self.chain_links.len(),
            last_id: self.last_id,
        }
    }

    /// Undo everything written since `savepoint`
    ///
    /// Rows are only ever appended, so truncating restores them. Latest chain
    /// pointers of older targets are put back from `latest_changes`, newest first.
    fn rollback_to(&mut self, savepoint: &Savepoint, latest_changes: &[(usize, Option<ChainId>)]) {
        for &(position, previous) in latest_changes.iter().rev() {
            self.targets[position].latest_chain_id = previous;
        }
        for row in self.certificates.drain(savepoint.certificates..) {
            self.certificate_index.remove(&row.record.fingerprint);
        }
        for row in self.targets.drain(savepoint.targets..) {
            self.target_index.remove(&row.target);
            self.target_positions.remove(&row.id);
        }
        for link in self.chain_links.drain(savepoint.chain_links..) {
            self.link_index.remove(&(link.chain_id, link.order));
        }
        self.dn_components.truncate(savepoint.dn_components);
        self.subject_alt_names.truncate(savepoint.subject_alt_names);
        self.chains.truncate(savepoint.chains);
        self.last_id = savepoint.last_id;
    }

    /// Links of a chain ordered leaf first
    pub fn links_of(&self, chain_id: ChainId) -> Vec<&ChainLinkRow> {
        let mut links: Vec<&ChainLinkRow> = self
            .chain_links
            .iter()
            .filter(|link| link.chain_id == chain_id)
            .collect();
        links.sort_by_key(|link| link.order);
        links
    }
}

/// Memory-backed database
#[derive(Clone, Default)]
pub struct MemoryBackend {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed state
    pub async fn snapshot(&self) -> Tables {
        self.tables.lock().await.clone()
    }
}

/// Writes straight into the tables and undoes them on drop unless committed
///
/// Holding the guard for the transaction's lifetime serializes writers and
/// hides uncommitted rows from readers.
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    savepoint: Savepoint,
    latest_changes: Vec<(usize, Option<ChainId>)>,
    committed: bool,
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.committed {
            self.guard.rollback_to(&self.savepoint, &self.latest_changes);
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn upsert_target(&mut self, target: &Target) -> Result<TargetId> {
        if let Some(row) = self.guard.target(target) {
            return Ok(row.id);
        }
        let id = self.guard.next_id();
        self.guard.push_target(TargetRow {
            id,
            target: target.clone(),
            latest_chain_id: None,
        });
        Ok(id)
    }

    async fn set_latest_chain(&mut self, target_id: TargetId, chain_id: Option<ChainId>) -> Result<()> {
        let Some(&position) = self.guard.target_positions.get(&target_id) else {
            return Ok(());
        };
        let row = &mut self.guard.targets[position];
        if position < self.savepoint.targets {
            self.latest_changes.push((position, row.latest_chain_id));
        }
        row.latest_chain_id = chain_id;
        Ok(())
    }

    async fn insert_chain(&mut self, target_id: TargetId, length: usize) -> Result<ChainId> {
        if !self.guard.target_positions.contains_key(&target_id) {
            bail!("foreign key violation: unknown target {}", target_id);
        }
        let id = self.guard.next_id();
        self.guard.chains.push(ChainRow {
            id,
            target_id,
            length,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn insert_chain_link(&mut self, chain_id: ChainId, order: usize, certificate_id: CertificateId) -> Result<()> {
        if !self.guard.link_index.insert((chain_id, order)) {
            bail!("duplicate chain link {} for chain {}", order, chain_id);
        }
        self.guard.chain_links.push(ChainLinkRow {
            chain_id,
            order,
            certificate_id,
        });
        Ok(())
    }

    async fn find_certificate(&mut self, fingerprint: &[u8]) -> Result<Option<CertificateId>> {
        Ok(self.guard.certificate_by_fingerprint(fingerprint).map(|row| row.id))
    }

    async fn insert_certificate(&mut self, cert: &CertificateRecord) -> Result<Option<CertificateId>> {
        if self.guard.certificate_by_fingerprint(&cert.fingerprint).is_some() {
            return Ok(None);
        }
        let id = self.guard.next_id();
        self.guard.push_certificate(CertificateRow {
            id,
            record: cert.clone(),
        });
        Ok(Some(id))
    }

    async fn insert_certificate_names(&mut self, certificate_id: CertificateId, cert: &CertificateRecord) -> Result<()> {
        self.guard
            .dn_components
            .extend(cert.dn_components().map(|component| DnRow {
                certificate_id,
                component: component.clone(),
            }));
        self.guard
            .subject_alt_names
            .extend(cert.subject_alt_names.iter().map(|san| SubjectAltNameRow {
                certificate_id,
                san: san.clone(),
            }));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.committed = true;
        Ok(())
    }
}

#[async_trait]
impl DatabaseBackend for MemoryBackend {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let savepoint = guard.savepoint();
        Ok(Box::new(MemoryTransaction {
            guard,
            savepoint,
            latest_changes: Vec::new(),
            committed: false,
        }))
    }

    async fn insert_job_run(&self, name: &str, total_targets: u64) -> Result<JobRunId> {
        let mut tables = self.tables.lock().await;
        let id = tables.next_id();
        tables.job_runs.push(JobRunRow {
            id,
            name: name.to_string(),
            total_targets,
            finished_targets: 0,
            start_time: Utc::now(),
            end_time: None,
        });
        Ok(id)
    }

    async fn update_job_run(&self, id: JobRunId, finished_targets: u64, finished: bool) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let Some(row) = tables.job_runs.iter_mut().find(|row| row.id == id) else {
            bail!("unknown job run {}", id);
        };
        row.finished_targets = finished_targets;
        if finished {
            row.end_time = Some(Utc::now());
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert_parser::CertificateParser;

    const LEAF: &[u8] = include_bytes!("../../tests/data/leaf.der");

    fn target() -> Target {
        Target::new("192.0.2.1".parse().unwrap(), 443, "")
    }

    #[tokio::test]
    async fn test_uncommitted_transaction_is_rolled_back() {
        let backend = MemoryBackend::new();

        {
            let mut tx = backend.begin().await.unwrap();
            let target_id = tx.upsert_target(&target()).await.unwrap();
            tx.insert_chain(target_id, 2).await.unwrap();
            // dropped without commit
        }

        let tables = backend.snapshot().await;
        assert!(tables.targets.is_empty());
        assert!(tables.chains.is_empty());
    }

    #[tokio::test]
    async fn test_rollback_restores_committed_rows() {
        let backend = MemoryBackend::new();
        let record = CertificateParser::parse(LEAF).unwrap();

        let mut tx = backend.begin().await.unwrap();
        let target_id = tx.upsert_target(&target()).await.unwrap();
        let chain_id = tx.insert_chain(target_id, 1).await.unwrap();
        tx.set_latest_chain(target_id, Some(chain_id)).await.unwrap();
        tx.commit().await.unwrap();
        let committed = backend.snapshot().await;

        {
            let mut tx = backend.begin().await.unwrap();
            tx.set_latest_chain(target_id, None).await.unwrap();
            let other = Target::new("192.0.2.2".parse().unwrap(), 443, "");
            let other_id = tx.upsert_target(&other).await.unwrap();
            let other_chain = tx.insert_chain(other_id, 1).await.unwrap();
            let certificate_id = tx.insert_certificate(&record).await.unwrap().unwrap();
            tx.insert_certificate_names(certificate_id, &record).await.unwrap();
            tx.insert_chain_link(other_chain, 0, certificate_id).await.unwrap();
            tx.set_latest_chain(target_id, Some(other_chain)).await.unwrap();
        }

        assert_eq!(backend.snapshot().await, committed);

        // Lookups see none of the discarded rows and ids are handed out again
        let mut tx = backend.begin().await.unwrap();
        assert_eq!(tx.find_certificate(&record.fingerprint).await.unwrap(), None);
        assert_eq!(tx.upsert_target(&target()).await.unwrap(), target_id);
        let other = Target::new("192.0.2.2".parse().unwrap(), 443, "");
        assert_eq!(tx.upsert_target(&other).await.unwrap(), chain_id + 1);
        let certificate_id = tx.insert_certificate(&record).await.unwrap().unwrap();
        tx.insert_chain_link(chain_id, 0, certificate_id).await.unwrap();
        tx.commit().await.unwrap();

        let tables = backend.snapshot().await;
        assert_eq!(tables.targets.len(), 2);
        assert_eq!(tables.target(&target()).unwrap().latest_chain_id, Some(chain_id));
        assert_eq!(tables.certificate_by_fingerprint(&record.fingerprint).unwrap().id, certificate_id);
    }

    #[tokio::test]
    async fn test_many_transactions_keep_tables_consistent() {
        let backend = MemoryBackend::new();

        for host in 0..5_000u32 {
            let target = Target::new(std::net::Ipv4Addr::from(0x0a00_0000 + host).into(), 443, "");
            let mut tx = backend.begin().await.unwrap();
            let target_id = tx.upsert_target(&target).await.unwrap();
            tx.set_latest_chain(target_id, None).await.unwrap();
            if host % 2 == 0 {
                tx.commit().await.unwrap();
            }
        }

        let tables = backend.snapshot().await;
        assert_eq!(tables.targets.len(), 2_500);
        let last = Target::new("10.0.19.134".parse().unwrap(), 443, "");
        assert_eq!(tables.target(&last).unwrap().id, 2_500);
        let skipped = Target::new("10.0.19.135".parse().unwrap(), 443, "");
        assert!(tables.target(&skipped).is_none());
    }

    #[tokio::test]
    async fn test_commit_publishes_changes() {
        let backend = MemoryBackend::new();

        let mut tx = backend.begin().await.unwrap();
        let target_id = tx.upsert_target(&target()).await.unwrap();
        let chain_id = tx.insert_chain(target_id, 1).await.unwrap();
        tx.set_latest_chain(target_id, Some(chain_id)).await.unwrap();
        tx.commit().await.unwrap();

        let tables = backend.snapshot().await;
        assert_eq!(tables.target(&target()).unwrap().latest_chain_id, Some(chain_id));
        assert_eq!(tables.chains.len(), 1);
    }

    #[tokio::test]
    async fn test_target_upsert_is_idempotent() {
        let backend = MemoryBackend::new();
        let mut tx = backend.begin().await.unwrap();
        let first = tx.upsert_target(&target()).await.unwrap();
        let second = tx.upsert_target(&target()).await.unwrap();
        assert_eq!(first, second);

        let with_sni = Target::new("192.0.2.1".parse().unwrap(), 443, "www.example.com");
        assert_ne!(tx.upsert_target(&with_sni).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_certificate_fingerprint_is_unique() {
        let backend = MemoryBackend::new();
        let record = CertificateParser::parse(LEAF).unwrap();

        let mut tx = backend.begin().await.unwrap();
        let id = tx.insert_certificate(&record).await.unwrap();
        assert!(id.is_some());
        assert_eq!(tx.insert_certificate(&record).await.unwrap(), None);
        assert_eq!(tx.find_certificate(&record.fingerprint).await.unwrap(), id);
    }

    #[tokio::test]
    async fn test_chain_requires_known_target() {
        let backend = MemoryBackend::new();
        let mut tx = backend.begin().await.unwrap();
        assert!(tx.insert_chain(42, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_job_run_lifecycle() {
        let backend = MemoryBackend::new();
        let id = backend.insert_job_run("dmz", 10).await.unwrap();

        backend.update_job_run(id, 5, false).await.unwrap();
        let run = backend.snapshot().await.job_runs[0].clone();
        assert_eq!(run.finished_targets, 5);
        assert!(run.end_time.is_none());

        backend.update_job_run(id, 10, true).await.unwrap();
        let run = backend.snapshot().await.job_runs[0].clone();
        assert_eq!(run.finished_targets, 10);
        assert!(run.end_time.is_some());

        assert!(backend.update_job_run(id + 100, 1, false).await.is_err());
    }
}
