// src/database/postgres.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info};

use super::{
    CertificateId, ChainId, DatabaseBackend, JobRunId, StoreTransaction, TargetId,
};
use crate::types::{CertificateRecord, Target};

const SCHEMA: &[(&str, &str)] = &[
    (
        "x509_job_run",
        r#"
        CREATE TABLE IF NOT EXISTS x509_job_run (
            id BIGSERIAL PRIMARY KEY,
            name TEXT NOT NULL,
            total_targets BIGINT NOT NULL,
            finished_targets BIGINT NOT NULL DEFAULT 0,
            start_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            end_time TIMESTAMPTZ
        )
        "#,
    ),
    (
        "x509_certificate",
        r#"
        CREATE TABLE IF NOT EXISTS x509_certificate (
            id BIGSERIAL PRIMARY KEY,
            fingerprint BYTEA NOT NULL UNIQUE,
            certificate BYTEA NOT NULL,
            version INTEGER NOT NULL,
            pubkey_algo TEXT NOT NULL CHECK (pubkey_algo IN ('unknown', 'RSA', 'DSA', 'DH', 'EC')),
            pubkey_bits INTEGER NOT NULL,
            signature_algo TEXT NOT NULL,
            signature_hash_algo TEXT NOT NULL,
            valid_start BIGINT NOT NULL,
            valid_end BIGINT NOT NULL,
            ctime TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "x509_dn",
        r#"
        CREATE TABLE IF NOT EXISTS x509_dn (
            certificate_id BIGINT NOT NULL REFERENCES x509_certificate(id) ON DELETE CASCADE,
            type TEXT NOT NULL CHECK (type IN ('issuer', 'subject')),
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            "order" INTEGER NOT NULL,
            PRIMARY KEY (certificate_id, type, "order")
        )
        "#,
    ),
    (
        "x509_certificate_subject_alt_name",
        r#"
        CREATE TABLE IF NOT EXISTS x509_certificate_subject_alt_name (
            id BIGSERIAL PRIMARY KEY,
            certificate_id BIGINT NOT NULL REFERENCES x509_certificate(id) ON DELETE CASCADE,
            type TEXT NOT NULL,
            value TEXT NOT NULL
        )
        "#,
    ),
    (
        "x509_target",
        r#"
        CREATE TABLE IF NOT EXISTS x509_target (
            id BIGSERIAL PRIMARY KEY,
            ip TEXT NOT NULL,
            port INTEGER NOT NULL,
            sni_name TEXT NOT NULL DEFAULT '',
            latest_certificate_chain_id BIGINT,
            UNIQUE (ip, port, sni_name)
        )
        "#,
    ),
    (
        "x509_certificate_chain",
        r#"
        CREATE TABLE IF NOT EXISTS x509_certificate_chain (
            id BIGSERIAL PRIMARY KEY,
            target_id BIGINT NOT NULL REFERENCES x509_target(id) ON DELETE CASCADE,
            length INTEGER NOT NULL,
            ctime TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "x509_certificate_chain_link",
        r#"
        CREATE TABLE IF NOT EXISTS x509_certificate_chain_link (
            certificate_chain_id BIGINT NOT NULL REFERENCES x509_certificate_chain(id) ON DELETE CASCADE,
            "order" INTEGER NOT NULL,
            certificate_id BIGINT NOT NULL REFERENCES x509_certificate(id),
            PRIMARY KEY (certificate_chain_id, "order")
        )
        "#,
    ),
];

/// PostgreSQL database backend
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Create new PostgreSQL backend
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        info!("Connecting to PostgreSQL database");

        // sqlx 0.8.x doesn't recognize the 'channel_binding' parameter some hosted providers add
        let cleaned_url = Self::clean_connection_string(database_url);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(&cleaned_url)
            .await
            .context("Failed to connect to PostgreSQL database")?;

        info!("Connected to PostgreSQL successfully");

        Ok(Self { pool })
    }

    /// Remove connection string parameters sqlx would warn about
    fn clean_connection_string(url_str: &str) -> String {
        use url::Url;

        let Ok(mut url) = Url::parse(url_str) else {
            return url_str.to_string();
        };

        let unsupported_params = ["channel_binding"];

        let cleaned_pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !unsupported_params.contains(&key.as_ref()))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        if cleaned_pairs.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(cleaned_pairs);
        }

        url.to_string()
    }

    /// Create the inventory tables if they don't exist yet
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations");

        for (table, ddl) in SCHEMA {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to create {} table", table))?;
        }

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_x509_chain_target
            ON x509_certificate_chain(target_id)
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create index on certificate chain target")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_x509_certificate_valid_end
            ON x509_certificate(valid_end)
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create index on certificate expiry")?;

        info!("Database migrations completed successfully");

        Ok(())
    }

    /// Close the database connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// A transaction on the PostgreSQL pool; rolled back by sqlx when dropped uncommitted
pub struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn upsert_target(&mut self, target: &Target) -> Result<TargetId> {
        // The no-op update makes RETURNING yield the id of an existing row too
        let row = sqlx::query(
            r#"
            INSERT INTO x509_target (ip, port, sni_name)
            VALUES ($1, $2, $3)
            ON CONFLICT (ip, port, sni_name)
            DO UPDATE SET ip = EXCLUDED.ip
            RETURNING id
            "#,
        )
        .bind(target.ip.to_string())
        .bind(i32::from(target.port))
        .bind(&target.sni_hostname)
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to upsert target")?;

        Ok(row.get::<i64, _>("id"))
    }

    async fn set_latest_chain(&mut self, target_id: TargetId, chain_id: Option<ChainId>) -> Result<()> {
        sqlx::query("UPDATE x509_target SET latest_certificate_chain_id = $1 WHERE id = $2")
            .bind(chain_id)
            .bind(target_id)
            .execute(&mut *self.tx)
            .await
            .context("Failed to update latest certificate chain")?;

        Ok(())
    }

    async fn insert_chain(&mut self, target_id: TargetId, length: usize) -> Result<ChainId> {
        let row = sqlx::query(
            "INSERT INTO x509_certificate_chain (target_id, length) VALUES ($1, $2) RETURNING id",
        )
        .bind(target_id)
        .bind(length as i32)
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to insert certificate chain")?;

        Ok(row.get::<i64, _>("id"))
    }

    async fn insert_chain_link(&mut self, chain_id: ChainId, order: usize, certificate_id: CertificateId) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO x509_certificate_chain_link (certificate_chain_id, "order", certificate_id)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(chain_id)
        .bind(order as i32)
        .bind(certificate_id)
        .execute(&mut *self.tx)
        .await
        .context("Failed to insert certificate chain link")?;

        Ok(())
    }

    async fn find_certificate(&mut self, fingerprint: &[u8]) -> Result<Option<CertificateId>> {
        let row = sqlx::query("SELECT id FROM x509_certificate WHERE fingerprint = $1")
            .bind(fingerprint)
            .fetch_optional(&mut *self.tx)
            .await
            .context("Failed to look up certificate")?;

        Ok(row.map(|r| r.get::<i64, _>("id")))
    }

    async fn insert_certificate(&mut self, cert: &CertificateRecord) -> Result<Option<CertificateId>> {
        let row = sqlx::query(
            r#"
            INSERT INTO x509_certificate (
                fingerprint, certificate, version, pubkey_algo, pubkey_bits,
                signature_algo, signature_hash_algo, valid_start, valid_end
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (fingerprint) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&cert.fingerprint)
        .bind(&cert.der)
        .bind(cert.version as i32)
        .bind(cert.public_key_algorithm.as_str())
        .bind(cert.public_key_bits as i32)
        .bind(&cert.signature_algorithm)
        .bind(&cert.signature_hash_algorithm)
        .bind(cert.valid_from)
        .bind(cert.valid_to)
        .fetch_optional(&mut *self.tx)
        .await
        .context("Failed to insert certificate")?;

        Ok(row.map(|r| r.get::<i64, _>("id")))
    }

    async fn insert_certificate_names(&mut self, certificate_id: CertificateId, cert: &CertificateRecord) -> Result<()> {
        for component in cert.dn_components() {
            sqlx::query(
                r#"
                INSERT INTO x509_dn (certificate_id, type, key, value, "order")
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(certificate_id)
            .bind(component.dn_type.as_str())
            .bind(&component.key)
            .bind(&component.value)
            .bind(component.order as i32)
            .execute(&mut *self.tx)
            .await
            .context("Failed to insert distinguished name component")?;
        }

        for san in &cert.subject_alt_names {
            sqlx::query(
                r#"
                INSERT INTO x509_certificate_subject_alt_name (certificate_id, type, value)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(certificate_id)
            .bind(&san.kind)
            .bind(&san.value)
            .execute(&mut *self.tx)
            .await
            .context("Failed to insert subject alternative name")?;
        }

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.context("Failed to commit transaction")?;
        Ok(())
    }
}

#[async_trait]
impl DatabaseBackend for PostgresBackend {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await.context("Failed to begin transaction")?;
        Ok(Box::new(PgStoreTransaction { tx }))
    }

    async fn insert_job_run(&self, name: &str, total_targets: u64) -> Result<JobRunId> {
        let row = sqlx::query(
            r#"
            INSERT INTO x509_job_run (name, total_targets, finished_targets)
            VALUES ($1, $2, 0)
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(total_targets as i64)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert job run")?;

        let id = row.get::<i64, _>("id");
        debug!("Created job run {} for {}", id, name);

        Ok(id)
    }

    async fn update_job_run(&self, id: JobRunId, finished_targets: u64, finished: bool) -> Result<()> {
        let sql = if finished {
            "UPDATE x509_job_run SET finished_targets = $1, end_time = NOW() WHERE id = $2"
        } else {
            "UPDATE x509_job_run SET finished_targets = $1 WHERE id = $2"
        };

        sqlx::query(sql)
            .bind(finished_targets as i64)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update job run")?;

        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database ping failed")?;

        Ok(())
    }
}
