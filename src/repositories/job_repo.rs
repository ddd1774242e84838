use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::job_model::{BridgeJob, JobStatus};

#[async_trait]
pub trait JobRepoTrait: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<BridgeJob>>;
    async fn upsert(&self, job: &BridgeJob) -> Result<()>;
    /// Jobs whose source transaction may be on chain without a final status.
    async fn list_in_flight(&self) -> Result<Vec<BridgeJob>>;
}

#[derive(Clone)]
pub struct PgJobRepo {
    pool: PgPool,
}

impl PgJobRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_job(&self, row: &PgRow) -> Result<BridgeJob> {
        let status: String = row.try_get("status").context("Failed to get status")?;
        Ok(BridgeJob {
            id: row.try_get("id").context("Failed to get id")?,
            wallet_index: row.get("wallet_index"),
            status: JobStatus::from_str(&status)?,
            step: row.get("step"),
            amount: row.get("amount"),
            source_tx_hash: row.get("source_tx_hash"),
            destination_tx_hash: row.get("destination_tx_hash"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl JobRepoTrait for PgJobRepo {
    async fn get(&self, id: &str) -> Result<Option<BridgeJob>> {
        let row = sqlx::query("SELECT * FROM bridge_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| self.row_to_job(&row)).transpose()
    }

    async fn upsert(&self, job: &BridgeJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bridge_jobs (id, wallet_index, status, step, amount, source_tx_hash, destination_tx_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id)
            DO UPDATE SET
                status = EXCLUDED.status,
                step = EXCLUDED.step,
                source_tx_hash = EXCLUDED.source_tx_hash,
                destination_tx_hash = EXCLUDED.destination_tx_hash,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&job.id)
        .bind(job.wallet_index)
        .bind(job.status.as_str())
        .bind(&job.step)
        .bind(job.amount)
        .bind(&job.source_tx_hash)
        .bind(&job.destination_tx_hash)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert bridge job {}", job.id))?;

        Ok(())
    }

    async fn list_in_flight(&self) -> Result<Vec<BridgeJob>> {
        let rows = sqlx::query(
            "SELECT * FROM bridge_jobs WHERE status IN ($1, $2) ORDER BY created_at ASC",
        )
        .bind(JobStatus::Submitting.as_str())
        .bind(JobStatus::SourceSubmitted.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.row_to_job(row)).collect()
    }
}

/// Process-local job store, used when no database is configured.
#[derive(Default)]
pub struct InMemoryJobRepo {
    jobs: Mutex<HashMap<String, BridgeJob>>,
}

impl InMemoryJobRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepoTrait for InMemoryJobRepo {
    async fn get(&self, id: &str) -> Result<Option<BridgeJob>> {
        let jobs = self
            .jobs
            .lock()
            .map_err(|_| anyhow::anyhow!("job store lock poisoned"))?;
        Ok(jobs.get(id).cloned())
    }

    async fn upsert(&self, job: &BridgeJob) -> Result<()> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| anyhow::anyhow!("job store lock poisoned"))?;
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn list_in_flight(&self) -> Result<Vec<BridgeJob>> {
        let jobs = self
            .jobs
            .lock()
            .map_err(|_| anyhow::anyhow!("job store lock poisoned"))?;
        let mut in_flight: Vec<BridgeJob> =
            jobs.values().filter(|job| job.may_have_sent()).cloned().collect();
        in_flight.sort_by_key(|job| job.created_at);
        Ok(in_flight)
    }
}
