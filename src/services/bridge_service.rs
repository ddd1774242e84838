use alloy::primitives::Address;
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_retry::Retry;

use crate::api::evm_api::{parse_address, EvmExecutor};
use crate::api::lifi_api::{BridgeApi, BridgeRoute, RouteRequest, TransferStatus};
use crate::config::{AppConfig, LIFI_SOLANA_CHAIN_ID};
use crate::models::job_model::{BridgeJob, JobStatus};
use crate::models::wallet_model::Wallet;
use crate::repositories::job_repo::JobRepoTrait;
use crate::utils::error::BridgeError;
use crate::utils::retry::{
    backoff_delays, constants::MAX_RETRIES, exponential_strategy, retry_transient,
};

pub mod constants {
    pub const MAX_POLL_DELAY_SECS: u64 = 60;
    pub const BRIDGE_SLIPPAGE: f64 = 0.005;
}

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub from_chain: u64,
    pub to_chain: u64,
    pub from_token: String,
    pub to_token: String,
    pub preferred_bridge: Option<String>,
    pub max_fee_pct: f64,
    pub timeout: Duration,
}

impl BridgeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            from_chain: config.evm_chain_id,
            to_chain: LIFI_SOLANA_CHAIN_ID,
            from_token: config.evm_usdc_address.clone(),
            to_token: config.usdc_mint.to_string(),
            preferred_bridge: config.bridge_preferred.clone(),
            max_fee_pct: config.bridge_max_fee_pct,
            timeout: Duration::from_secs(config.bridge_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BridgeOutcome {
    pub success: bool,
    pub dry_run: bool,
    pub job_id: String,
    pub tool: Option<String>,
    pub amount_in: u64,
    pub expected_amount_out: Option<u64>,
    pub fee_pct: Option<f64>,
    pub source_tx_hash: Option<String>,
    pub destination_tx_hash: Option<String>,
}

/// What a start-up pass over jobs left in flight found.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResumeReport {
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub pending: Vec<String>,
    /// Jobs that started sending but never recorded a source transaction.
    pub unreconciled: Vec<String>,
}

/// Cheapest route, restricted to the preferred bridge when one offers a
/// route, and rejected outright if its fees exceed `max_fee_pct`.
pub fn select_route(
    routes: Vec<BridgeRoute>,
    preferred: Option<&str>,
    max_fee_pct: f64,
) -> Result<BridgeRoute, BridgeError> {
    if routes.is_empty() {
        return Err(BridgeError::NoRoute("aggregator returned no routes".to_string()));
    }

    let (preferred_routes, others): (Vec<_>, Vec<_>) = routes
        .into_iter()
        .partition(|route| preferred.map_or(true, |tool| route.uses_tool(tool)));
    let candidates = if preferred_routes.is_empty() {
        warn!(
            "No route via preferred bridge {:?}, considering all {} routes",
            preferred,
            others.len()
        );
        others
    } else {
        preferred_routes
    };

    let best = candidates
        .into_iter()
        .min_by(|a, b| a.fee_pct().total_cmp(&b.fee_pct()))
        .ok_or_else(|| BridgeError::NoRoute("no candidate routes".to_string()))?;

    let fee_pct = best.fee_pct();
    if fee_pct > max_fee_pct {
        return Err(BridgeError::FeeTooHigh {
            fee_pct,
            max_fee_pct,
        });
    }
    Ok(best)
}

pub struct BridgeService {
    api: Arc<dyn BridgeApi>,
    evm: Arc<dyn EvmExecutor>,
    jobs: Arc<dyn JobRepoTrait>,
    settings: BridgeSettings,
}

impl BridgeService {
    pub fn new(
        api: Arc<dyn BridgeApi>,
        evm: Arc<dyn EvmExecutor>,
        jobs: Arc<dyn JobRepoTrait>,
        settings: BridgeSettings,
    ) -> Self {
        Self {
            api,
            evm,
            jobs,
            settings,
        }
    }

    async fn save(&self, job: &BridgeJob) -> Result<(), BridgeError> {
        self.jobs
            .upsert(job)
            .await
            .map_err(|e| BridgeError::Failed(format!("failed to persist job {}: {:#}", job.id, e)))
    }

    fn outcome(&self, job: &BridgeJob, dry_run: bool) -> BridgeOutcome {
        BridgeOutcome {
            success: job.status == JobStatus::Completed,
            dry_run,
            job_id: job.id.clone(),
            tool: None,
            amount_in: job.amount as u64,
            expected_amount_out: None,
            fee_pct: None,
            source_tx_hash: job.source_tx_hash.clone(),
            destination_tx_hash: job.destination_tx_hash.clone(),
        }
    }

    /// Bridges `amount` USDC base units from the wallet's EVM address to its
    /// Solana address. Safe to call again after a crash or timeout: a job
    /// that already sent its source transaction is resumed, never resent.
    pub async fn bridge(
        &self,
        wallet: &Wallet,
        amount: u64,
        dry_run: bool,
    ) -> Result<BridgeOutcome, BridgeError> {
        let job_id = BridgeJob::job_id(
            wallet.index,
            amount,
            self.settings.from_chain,
            self.settings.to_chain,
        );
        let existing = self
            .jobs
            .get(&job_id)
            .await
            .map_err(|e| BridgeError::Failed(format!("failed to load job {}: {:#}", job_id, e)))?;

        let mut job = match existing {
            Some(job) if job.status == JobStatus::Completed => {
                info!("Bridge job {} already completed", job.id);
                return Ok(self.outcome(&job, dry_run));
            }
            Some(job) if job.needs_reconciliation() => {
                return Err(BridgeError::NeedsReconciliation { job_id: job.id });
            }
            Some(job) if job.is_in_flight() => {
                info!("Resuming bridge job {} at step {}", job.id, job.step);
                if dry_run {
                    return Ok(self.outcome(&job, dry_run));
                }
                return self.await_completion(job, None).await;
            }
            Some(job) => job,
            None => BridgeJob::new(job_id, wallet.index, amount),
        };

        let from_token = parse_address(&self.settings.from_token)?;
        let balance = retry_transient(
            "EVM balance read",
            exponential_strategy(MAX_RETRIES),
            || self.evm.token_balance(from_token, wallet.evm_address()),
        )
        .await?;
        if balance < amount && !dry_run {
            return Err(BridgeError::InsufficientBalance(format!(
                "wallet {} holds {} of {} USDC base units",
                wallet.index, balance, amount
            )));
        }

        let request = RouteRequest {
            from_chain: self.settings.from_chain,
            to_chain: self.settings.to_chain,
            from_token: self.settings.from_token.clone(),
            to_token: self.settings.to_token.clone(),
            from_amount: amount,
            from_address: wallet.evm_address().to_string(),
            to_address: wallet.solana_address().to_string(),
            slippage: constants::BRIDGE_SLIPPAGE,
            preferred_bridge: self.settings.preferred_bridge.clone(),
        };
        let routes = retry_transient("LI.FI routes", exponential_strategy(MAX_RETRIES), || {
            self.api.routes(&request)
        })
        .await?;
        let route = select_route(
            routes,
            self.settings.preferred_bridge.as_deref(),
            self.settings.max_fee_pct,
        )?;
        info!(
            "Wallet {}: route {} via {:?}, fee {:.3}%, min out {}",
            wallet.index,
            route.id,
            route.tools,
            route.fee_pct(),
            route.to_amount_min
        );

        if dry_run {
            let mut outcome = self.outcome(&job, dry_run);
            outcome.success = true;
            outcome.tool = route.tools.first().cloned();
            outcome.expected_amount_out = Some(route.to_amount);
            outcome.fee_pct = Some(route.fee_pct());
            return Ok(outcome);
        }

        let step = route
            .steps
            .first()
            .ok_or_else(|| BridgeError::Failed(format!("route {} has no steps", route.id)))?;
        let transaction = retry_transient(
            "LI.FI step transaction",
            exponential_strategy(MAX_RETRIES),
            || self.api.step_transaction(step),
        )
        .await?;

        if let Some(spender) = &transaction.approval_address {
            self.ensure_allowance(wallet, from_token, spender, amount)
                .await?;
        }

        job.advance(JobStatus::Submitting, "submit");
        self.save(&job).await?;

        let tx_hash = match self.evm.send_transaction(&wallet.evm, &transaction).await {
            Ok(hash) => hash,
            Err(BridgeError::SourceUnconfirmed { tx_hash, reason }) => {
                warn!(
                    "Wallet {}: source tx {} has no receipt yet ({}), tracking it",
                    wallet.index, tx_hash, reason
                );
                tx_hash
            }
            Err(e) => {
                job.advance(JobStatus::Failed, "submit");
                self.save(&job).await?;
                return Err(e);
            }
        };
        info!("Wallet {}: bridge source tx {}", wallet.index, tx_hash);

        job.source_tx_hash = Some(tx_hash.clone());
        job.advance(JobStatus::SourceSubmitted, "poll");
        let saved = Retry::spawn(exponential_strategy(MAX_RETRIES), || self.jobs.upsert(&job)).await;
        if let Err(e) = saved {
            return Err(BridgeError::Unrecorded {
                job_id: job.id,
                tx_hash,
                reason: format!("{:#}", e),
            });
        }

        let mut outcome = self.await_completion(job, route.tools.first().cloned()).await?;
        outcome.expected_amount_out = Some(route.to_amount);
        outcome.fee_pct = Some(route.fee_pct());
        Ok(outcome)
    }

    /// One status check for every job an earlier run left in flight. Jobs
    /// that may have sent without recording a hash are reported, never resent.
    pub async fn resume_in_flight(&self, dry_run: bool) -> Result<ResumeReport, BridgeError> {
        let jobs = self
            .jobs
            .list_in_flight()
            .await
            .map_err(|e| BridgeError::Failed(format!("failed to list in-flight jobs: {:#}", e)))?;

        let mut report = ResumeReport::default();
        for mut job in jobs {
            let source_tx_hash = match job.source_tx_hash.clone() {
                Some(hash) => hash,
                None => {
                    warn!(
                        "Bridge job {} (wallet {}) may have sent {} base units without a recorded tx",
                        job.id, job.wallet_index, job.amount
                    );
                    report.unreconciled.push(job.id);
                    continue;
                }
            };

            let status = self
                .api
                .status(
                    &source_tx_hash,
                    self.settings.from_chain,
                    self.settings.to_chain,
                    None,
                )
                .await;
            match status {
                Ok(TransferStatus::Done { receiving_tx_hash }) => {
                    info!("Bridge job {} landed: {:?}", job.id, receiving_tx_hash);
                    if !dry_run {
                        job.destination_tx_hash = receiving_tx_hash;
                        job.advance(JobStatus::Completed, "done");
                        self.save(&job).await?;
                    }
                    report.completed.push(job.id);
                }
                Ok(TransferStatus::Failed(reason)) => {
                    warn!("Bridge job {} failed: {}", job.id, reason);
                    if !dry_run {
                        job.advance(JobStatus::Failed, "poll");
                        self.save(&job).await?;
                    }
                    report.failed.push(job.id);
                }
                Ok(TransferStatus::Pending) | Ok(TransferStatus::NotFound) => {
                    report.pending.push(job.id);
                }
                Err(e) => {
                    warn!("Bridge job {} status check failed: {}", job.id, e);
                    report.pending.push(job.id);
                }
            }
        }
        Ok(report)
    }

    async fn ensure_allowance(
        &self,
        wallet: &Wallet,
        token: Address,
        spender: &str,
        amount: u64,
    ) -> Result<(), BridgeError> {
        let spender = parse_address(spender)?;
        let allowance = retry_transient(
            "ERC-20 allowance read",
            exponential_strategy(MAX_RETRIES),
            || self.evm.allowance(token, wallet.evm_address(), spender),
        )
        .await?;

        if allowance < amount {
            let hash = self.evm.approve(&wallet.evm, token, spender, amount).await?;
            info!("Wallet {}: approval tx {}", wallet.index, hash);
        }
        Ok(())
    }

    async fn await_completion(
        &self,
        mut job: BridgeJob,
        tool: Option<String>,
    ) -> Result<BridgeOutcome, BridgeError> {
        let source_tx_hash = job
            .source_tx_hash
            .clone()
            .ok_or_else(|| BridgeError::Failed(format!("job {} has no source tx", job.id)))?;

        match self
            .wait_for_arrival(&source_tx_hash, tool.as_deref())
            .await
        {
            Ok(destination) => {
                job.destination_tx_hash = destination;
                job.advance(JobStatus::Completed, "done");
                self.save(&job).await?;
                let mut outcome = self.outcome(&job, false);
                outcome.tool = tool;
                Ok(outcome)
            }
            Err(e @ BridgeError::Timeout { .. }) => {
                // Left in flight so the next run resumes polling.
                warn!("Bridge job {} still pending: {}", job.id, e);
                Err(e)
            }
            Err(e) => {
                job.advance(JobStatus::Failed, "poll");
                self.save(&job).await?;
                Err(e)
            }
        }
    }

    /// Polls transfer status with exponential backoff until the destination
    /// side lands or the configured timeout elapses.
    pub async fn wait_for_arrival(
        &self,
        source_tx_hash: &str,
        tool: Option<&str>,
    ) -> Result<Option<String>, BridgeError> {
        let deadline = Instant::now() + self.settings.timeout;
        let mut delays = backoff_delays(Duration::from_secs(constants::MAX_POLL_DELAY_SECS));

        loop {
            match self
                .api
                .status(
                    source_tx_hash,
                    self.settings.from_chain,
                    self.settings.to_chain,
                    tool,
                )
                .await
            {
                Ok(TransferStatus::Done { receiving_tx_hash }) => return Ok(receiving_tx_hash),
                Ok(TransferStatus::Failed(reason)) => return Err(BridgeError::Failed(reason)),
                Ok(TransferStatus::Pending) | Ok(TransferStatus::NotFound) => {}
                Err(e) if e.is_retryable() => warn!("Bridge status poll failed: {}", e),
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(BridgeError::Timeout {
                    timeout_secs: self.settings.timeout.as_secs(),
                });
            }
            let delay = delays
                .next()
                .unwrap_or(Duration::from_secs(constants::MAX_POLL_DELAY_SECS));
            sleep(delay.min(deadline - now)).await;
        }
    }
}
