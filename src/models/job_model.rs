use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    /// Persisted right before the source transaction is sent. A job found in
    /// this state without a hash may or may not have reached the chain.
    Submitting,
    SourceSubmitted,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Submitting => "submitting",
            JobStatus::SourceSubmitted => "source_submitted",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "submitting" => Ok(JobStatus::Submitting),
            "source_submitted" => Ok(JobStatus::SourceSubmitted),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(anyhow!("Invalid job status: {}", s)),
        }
    }
}

/// One bridge transfer. `id` is derived from the wallet and amount so a
/// retried run finds the job it left behind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeJob {
    pub id: String,
    pub wallet_index: i32,
    pub status: JobStatus,
    pub step: String,
    pub amount: i64,
    pub source_tx_hash: Option<String>,
    pub destination_tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BridgeJob {
    pub fn new(id: String, wallet_index: u32, amount: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            wallet_index: wallet_index as i32,
            status: JobStatus::Pending,
            step: "quote".to_string(),
            amount: amount as i64,
            source_tx_hash: None,
            destination_tx_hash: None,
            created_at: now,
            updated_at: now,
        }
    }

    // Scoped to the UTC day so the same amount can be bridged again later.
    pub fn job_id(wallet_index: u32, amount: u64, from_chain: u64, to_chain: u64) -> String {
        format!(
            "bridge-{}-{}-{}-{}-{}",
            wallet_index,
            from_chain,
            to_chain,
            amount,
            Utc::now().format("%Y%m%d")
        )
    }

    pub fn advance(&mut self, status: JobStatus, step: &str) {
        self.status = status;
        self.step = step.to_string();
        self.updated_at = Utc::now();
    }

    /// A source transaction was sent and the transfer has not been given up on.
    pub fn is_in_flight(&self) -> bool {
        self.may_have_sent() && self.source_tx_hash.is_some()
    }

    /// Sending was started but its result was never recorded. Resending
    /// could bridge the funds twice.
    pub fn needs_reconciliation(&self) -> bool {
        self.status == JobStatus::Submitting && self.source_tx_hash.is_none()
    }

    pub fn may_have_sent(&self) -> bool {
        matches!(self.status, JobStatus::Submitting | JobStatus::SourceSubmitted)
    }
}
