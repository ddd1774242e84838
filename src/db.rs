use anyhow::{Context, Result};
use log::info;
use sqlx::postgres::{PgPool, PgPoolOptions};

pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("Failed to connect to Postgres")?;
    initialize_job_database(&pool).await?;
    info!("Connected to job database");
    Ok(pool)
}

pub async fn initialize_job_database(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS bridge_jobs (
            id TEXT PRIMARY KEY,
            wallet_index INTEGER NOT NULL,
            status TEXT NOT NULL,
            step TEXT NOT NULL,
            amount BIGINT NOT NULL,
            source_tx_hash TEXT,
            destination_tx_hash TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS bridge_jobs_status_idx ON bridge_jobs (status)")
        .execute(pool)
        .await?;

    Ok(())
}
