// src/store.rs
//! Certificate deduplication by SHA-256 fingerprint

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::cert_parser::CertificateParser;
use crate::database::{CertificateId, StoreTransaction};

/// Result of storing one certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredCertificate {
    pub id: CertificateId,
    /// False when the certificate was already known
    pub inserted: bool,
}

pub struct CertificateStore;

impl CertificateStore {
    /// Return the id of the certificate with this DER encoding, inserting it
    /// together with its names when it has never been seen.
    ///
    /// Fails with [`crate::error::EncodingError`] (inside the `anyhow::Error`)
    /// when an unknown certificate cannot be parsed.
    pub async fn find_or_insert(tx: &mut dyn StoreTransaction, der: &[u8]) -> Result<StoredCertificate> {
        let fingerprint = CertificateParser::fingerprint(der);

        if let Some(id) = tx.find_certificate(&fingerprint).await? {
            return Ok(StoredCertificate { id, inserted: false });
        }

        let record = CertificateParser::parse(der)?;

        let Some(id) = tx.insert_certificate(&record).await? else {
            // Lost a race against another writer; the row is there now
            debug!("Certificate {} inserted concurrently", record.fingerprint_hex());
            let id = tx
                .find_certificate(&fingerprint)
                .await?
                .ok_or_else(|| anyhow!("certificate {} vanished after conflict", record.fingerprint_hex()))?;
            return Ok(StoredCertificate { id, inserted: false });
        };

        tx.insert_certificate_names(id, &record)
            .await
            .with_context(|| format!("Failed to store names of certificate {}", record.fingerprint_hex()))?;

        debug!("Stored new certificate {}", record.fingerprint_hex());
        Ok(StoredCertificate { id, inserted: true })
    }
}
