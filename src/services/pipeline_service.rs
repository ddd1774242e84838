use alloy::primitives::Address;
use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use log::{error, info, warn};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::api::evm_api::{parse_address, AlloyEvmExecutor, EvmExecutor};
use crate::api::jupiter_api::JupiterApi;
use crate::api::lifi_api::LifiApi;
use crate::api::rpc_api::{lamports_to_sol, JsonRpcApi, SolanaRpc};
use crate::config::AppConfig;
use crate::models::wallet_model::{Wallet, WalletBalances};
use crate::repositories::job_repo::JobRepoTrait;
use crate::services::bridge_service::{BridgeService, BridgeSettings, ResumeReport};
use crate::services::liquidity_service::{LiquidityService, OpenPositionRequest};
use crate::services::swap_service::SwapService;
use crate::services::withdrawal_service::WithdrawalService;
use crate::utils::decode::decode_mint_decimals;
use crate::utils::error::{BridgeError, ExchangeError, LiquidityError, PipelineError};
use crate::utils::price_calcs::{share_of, to_base_units, to_ui_amount};
use crate::utils::retry::backoff_delays;

pub mod constants {
    pub const USDC_DECIMALS: u8 = 6;
    /// Share of the bridged USDC swapped into the pool's other token.
    pub const SWAP_SHARE_BPS: u64 = 5_000;
    /// Share of the USDC left after the swap offered as deposit input.
    pub const DEPOSIT_SHARE_BPS: u64 = 9_000;
    pub const MAX_FUNDS_POLL_SECS: u64 = 60;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Withdraw,
    Bridge,
    Swap,
    Liquidity,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step: PipelineStep,
    pub success: bool,
    pub skipped: bool,
    pub retryable: bool,
    pub error: Option<String>,
    pub detail: Value,
}

impl StepResult {
    fn new(step: PipelineStep, success: bool, error: Option<String>, detail: &impl Serialize) -> Self {
        Self {
            step,
            success,
            skipped: false,
            retryable: false,
            error,
            detail: serde_json::to_value(detail).unwrap_or(Value::Null),
        }
    }

    fn skipped(step: PipelineStep, reason: &str) -> Self {
        Self {
            step,
            success: true,
            skipped: true,
            retryable: false,
            error: None,
            detail: Value::String(reason.to_string()),
        }
    }

    fn failed(step: PipelineStep, error: &PipelineError) -> Self {
        Self {
            step,
            success: false,
            skipped: false,
            retryable: error.is_retryable(),
            error: Some(error.to_string()),
            detail: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletRunResult {
    pub wallet_index: u32,
    pub solana_address: String,
    pub evm_address: String,
    pub success: bool,
    pub steps: Vec<StepResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub wallets: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub resumed_bridges: Option<ResumeReport>,
    pub results: Vec<WalletRunResult>,
}

/// The configured pool and which of its sides is USDC.
#[derive(Debug, Clone)]
pub struct PoolContext {
    pub address: Pubkey,
    pub usdc_mint: Pubkey,
    pub target_mint: Pubkey,
    pub target_decimals: u8,
    pub tick_current_index: i32,
    /// USDC per target token at the pool's current sqrt price.
    pub price: f64,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub pool: Pubkey,
    pub usdc_mint: Pubkey,
    pub evm_usdc: String,
    pub lower_pct: f64,
    pub upper_pct: f64,
    pub enable_cex: bool,
    pub concurrency: usize,
    pub delay_min_secs: u64,
    pub delay_max_secs: u64,
    pub funds_timeout: Duration,
    /// Amount quoted in dry runs when the source wallet is empty.
    pub dry_run_amount: u64,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let pool = config
            .pool_address()
            .ok_or_else(|| anyhow!("No pool address configured for {:?}", config.target_pool))?;

        Ok(Self {
            pool,
            usdc_mint: config.usdc_mint,
            evm_usdc: config.evm_usdc_address.clone(),
            lower_pct: config.lp_lower_pct,
            upper_pct: config.lp_upper_pct,
            enable_cex: config.enable_cex,
            concurrency: config.wallet_concurrency,
            delay_min_secs: config.wallet_delay_min_secs,
            delay_max_secs: config.wallet_delay_max_secs,
            funds_timeout: Duration::from_secs(config.bridge_timeout_secs),
            dry_run_amount: to_base_units(config.withdraw_min_usdc, constants::USDC_DECIMALS),
        })
    }
}

pub struct PipelineService {
    withdrawals: WithdrawalService,
    bridge: BridgeService,
    swap: SwapService,
    liquidity: LiquidityService,
    rpc: Arc<dyn SolanaRpc>,
    evm: Arc<dyn EvmExecutor>,
    settings: PipelineSettings,
}

impl PipelineService {
    pub fn new(
        withdrawals: WithdrawalService,
        bridge: BridgeService,
        swap: SwapService,
        liquidity: LiquidityService,
        rpc: Arc<dyn SolanaRpc>,
        evm: Arc<dyn EvmExecutor>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            withdrawals,
            bridge,
            swap,
            liquidity,
            rpc,
            evm,
            settings,
        }
    }

    pub fn from_config(config: &AppConfig, jobs: Arc<dyn JobRepoTrait>) -> anyhow::Result<Self> {
        let rpc: Arc<dyn SolanaRpc> = Arc::new(JsonRpcApi::new(&config.solana_rpc_url));
        let evm: Arc<dyn EvmExecutor> = Arc::new(
            AlloyEvmExecutor::new(&config.evm_rpc_url).context("EVM_RPC_URL is not a valid URL")?,
        );

        let bridge = BridgeService::new(
            Arc::new(LifiApi::new(config.lifi_api_key.clone())),
            evm.clone(),
            jobs,
            BridgeSettings::from_config(config),
        );
        let swap = SwapService::new(
            Arc::new(JupiterApi::new(config.jupiter_api_key.clone())),
            rpc.clone(),
            config.slippage_bps,
        );

        Ok(Self::new(
            WithdrawalService::from_config(config),
            bridge,
            swap,
            LiquidityService::from_config(config, rpc.clone()),
            rpc,
            evm,
            PipelineSettings::from_config(config)?,
        ))
    }

    pub fn withdrawals(&self) -> &WithdrawalService {
        &self.withdrawals
    }

    pub fn bridge(&self) -> &BridgeService {
        &self.bridge
    }

    pub fn swap(&self) -> &SwapService {
        &self.swap
    }

    pub fn liquidity(&self) -> &LiquidityService {
        &self.liquidity
    }

    pub fn rpc(&self) -> &dyn SolanaRpc {
        self.rpc.as_ref()
    }

    pub async fn pool_context(&self) -> Result<PoolContext, PipelineError> {
        let pool = self.liquidity.fetch_pool(&self.settings.pool).await?;
        let whirlpool = &pool.whirlpool;

        let target_mint = if whirlpool.token_mint_a == self.settings.usdc_mint {
            whirlpool.token_mint_b
        } else if whirlpool.token_mint_b == self.settings.usdc_mint {
            whirlpool.token_mint_a
        } else {
            return Err(PipelineError::Config(format!(
                "pool {} does not pair USDC",
                pool.address
            )));
        };

        let mint_data = self
            .rpc
            .get_account(&target_mint)
            .await?
            .into_data()
            .ok_or_else(|| PipelineError::Config(format!("mint {} not found", target_mint)))?;
        let target_decimals = decode_mint_decimals(&mint_data)
            .map_err(|e| LiquidityError::Decode(format!("{:#}", e)))?;

        let price = if whirlpool.token_mint_a == target_mint {
            whirlpool.price(target_decimals, constants::USDC_DECIMALS)
        } else {
            let inverse = whirlpool.price(constants::USDC_DECIMALS, target_decimals);
            if inverse > 0.0 {
                1.0 / inverse
            } else {
                0.0
            }
        };

        Ok(PoolContext {
            address: pool.address,
            usdc_mint: self.settings.usdc_mint,
            target_mint,
            target_decimals,
            tick_current_index: whirlpool.tick_current_index,
            price,
        })
    }

    fn evm_usdc(&self) -> Result<Address, PipelineError> {
        Ok(parse_address(&self.settings.evm_usdc)?)
    }

    pub async fn read_balances(
        &self,
        wallet: &Wallet,
        pool: &PoolContext,
    ) -> Result<WalletBalances, PipelineError> {
        let owner = wallet.solana_address();

        let lamports = self.rpc.get_balance(&owner).await?;
        let usdc = self.rpc.get_token_balance(&owner, &pool.usdc_mint).await?;
        let target = self.rpc.get_token_balance(&owner, &pool.target_mint).await?;
        let evm_usdc = self
            .evm
            .token_balance(self.evm_usdc()?, wallet.evm_address())
            .await?;
        let positions = self
            .liquidity
            .list_positions(&owner, Some(&pool.address))
            .await?;

        Ok(WalletBalances {
            sol: lamports_to_sol(lamports),
            usdc: to_ui_amount(usdc, constants::USDC_DECIMALS),
            evm_usdc: to_ui_amount(evm_usdc, constants::USDC_DECIMALS),
            target_token: to_ui_amount(target, pool.target_decimals),
            open_positions: positions.len(),
            positions_out_of_range: positions
                .iter()
                .filter(|live| !live.position.is_in_range(pool.tick_current_index))
                .count(),
        })
    }

    /// Runs the chain for one wallet starting at `from`. Failures stop the
    /// chain for this wallet only and are reported in the result.
    pub async fn run_wallet(
        &self,
        wallet: &Wallet,
        from: PipelineStep,
        dry_run: bool,
    ) -> WalletRunResult {
        let mut result = WalletRunResult {
            wallet_index: wallet.index,
            solana_address: wallet.solana_address().to_string(),
            evm_address: wallet.evm_address().to_string(),
            success: false,
            steps: Vec::new(),
        };
        info!("Wallet {}: starting at {:?}", wallet.index, from);

        let outcome = match self.pool_context().await {
            Ok(pool) => self.execute(wallet, &pool, from, dry_run, &mut result.steps).await,
            Err(e) => {
                result.steps.push(StepResult::failed(from, &e));
                Err(e)
            }
        };

        match outcome {
            Ok(()) => {
                info!("Wallet {}: pipeline complete", wallet.index);
                result.success = true;
            }
            Err(e) => error!("Wallet {}: pipeline stopped: {}", wallet.index, e),
        }
        result
    }

    async fn execute(
        &self,
        wallet: &Wallet,
        pool: &PoolContext,
        from: PipelineStep,
        dry_run: bool,
        steps: &mut Vec<StepResult>,
    ) -> Result<(), PipelineError> {
        let owner = wallet.solana_address();

        if from <= PipelineStep::Withdraw {
            if self.settings.enable_cex {
                self.withdraw(wallet, dry_run, steps).await?;
            } else {
                steps.push(StepResult::skipped(PipelineStep::Withdraw, "ENABLE_CEX is off"));
            }
        }

        let mut usdc_available = None;
        if from <= PipelineStep::Bridge {
            let amount = match self.source_amount(wallet, dry_run).await {
                Ok(amount) => amount,
                Err(e) => return Err(fail(steps, PipelineStep::Bridge, e)),
            };
            let outcome = match self.bridge.bridge(wallet, amount, dry_run).await {
                Ok(outcome) => outcome,
                Err(e) => return Err(fail(steps, PipelineStep::Bridge, e.into())),
            };
            if !outcome.success {
                let error = BridgeError::Failed(format!("bridge job {} has not completed", outcome.job_id));
                return Err(fail(steps, PipelineStep::Bridge, error.into()));
            }
            steps.push(StepResult::new(PipelineStep::Bridge, true, None, &outcome));
            if dry_run {
                usdc_available = Some(outcome.expected_amount_out.unwrap_or(amount));
            }
        }

        let usdc = match usdc_available {
            Some(amount) => amount,
            None => match self.rpc.get_token_balance(&owner, &pool.usdc_mint).await {
                Ok(balance) => balance,
                Err(e) => return Err(fail(steps, PipelineStep::Swap, e.into())),
            },
        };

        let swap_amount = share_of(usdc, constants::SWAP_SHARE_BPS);
        if from <= PipelineStep::Swap {
            let outcome = match self
                .swap
                .swap(wallet, &pool.usdc_mint, &pool.target_mint, swap_amount, dry_run)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => return Err(fail(steps, PipelineStep::Swap, e.into())),
            };
            steps.push(StepResult::new(PipelineStep::Swap, outcome.success, None, &outcome));
        }

        let remaining = if dry_run && from <= PipelineStep::Swap {
            usdc.saturating_sub(swap_amount)
        } else {
            match self.rpc.get_token_balance(&owner, &pool.usdc_mint).await {
                Ok(balance) => balance,
                Err(e) => return Err(fail(steps, PipelineStep::Liquidity, e.into())),
            }
        };
        let request = OpenPositionRequest {
            pool: pool.address,
            input_mint: pool.usdc_mint,
            input_amount: share_of(remaining, constants::DEPOSIT_SHARE_BPS),
            lower_pct: self.settings.lower_pct,
            upper_pct: self.settings.upper_pct,
        };
        let outcome = match self.liquidity.open_position(wallet, &request, dry_run).await {
            Ok(outcome) => outcome,
            Err(e) => return Err(fail(steps, PipelineStep::Liquidity, e.into())),
        };
        steps.push(StepResult::new(
            PipelineStep::Liquidity,
            outcome.success,
            outcome.error.clone(),
            &outcome,
        ));
        if !outcome.success {
            return Err(LiquidityError::Incomplete {
                stage: format!("{:?}", outcome.failed_step.unwrap_or(outcome.stage)),
                reason: outcome.error.unwrap_or_default(),
            }
            .into());
        }
        Ok(())
    }

    async fn withdraw(
        &self,
        wallet: &Wallet,
        dry_run: bool,
        steps: &mut Vec<StepResult>,
    ) -> Result<(), PipelineError> {
        let token = self.evm_usdc()?;
        let baseline = match self.evm.token_balance(token, wallet.evm_address()).await {
            Ok(balance) => balance,
            Err(e) => return Err(fail(steps, PipelineStep::Withdraw, e.into())),
        };

        let outcome = self
            .withdrawals
            .withdraw_random(&wallet.evm_address().to_string(), dry_run)
            .await;
        let error = (!outcome.success).then(|| outcome.errors.join("; "));
        steps.push(StepResult::new(
            PipelineStep::Withdraw,
            outcome.success,
            error.clone(),
            &outcome,
        ));
        if let Some(error) = error {
            return Err(ExchangeError::AllFailed(error).into());
        }

        if !dry_run {
            self.wait_for_source_funds(wallet, token, baseline).await?;
        }
        Ok(())
    }

    /// Waits until the withdrawal lands on the source chain.
    async fn wait_for_source_funds(
        &self,
        wallet: &Wallet,
        token: Address,
        baseline: u64,
    ) -> Result<u64, PipelineError> {
        let deadline = Instant::now() + self.settings.funds_timeout;
        let mut delays = backoff_delays(Duration::from_secs(constants::MAX_FUNDS_POLL_SECS));

        loop {
            match self.evm.token_balance(token, wallet.evm_address()).await {
                Ok(balance) if balance > baseline => {
                    info!(
                        "Wallet {}: withdrawal arrived, {} USDC on source chain",
                        wallet.index,
                        to_ui_amount(balance, constants::USDC_DECIMALS)
                    );
                    return Ok(balance);
                }
                Ok(_) => {}
                Err(e) if e.is_retryable() => warn!("Source balance poll failed: {}", e),
                Err(e) => return Err(e.into()),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ExchangeError::ArrivalTimeout {
                    timeout_secs: self.settings.funds_timeout.as_secs(),
                }
                .into());
            }
            let delay = delays
                .next()
                .unwrap_or(Duration::from_secs(constants::MAX_FUNDS_POLL_SECS));
            sleep(delay.min(deadline - now)).await;
        }
    }

    async fn source_amount(&self, wallet: &Wallet, dry_run: bool) -> Result<u64, PipelineError> {
        let balance = self
            .evm
            .token_balance(self.evm_usdc()?, wallet.evm_address())
            .await?;
        match balance {
            0 if dry_run => Ok(self.settings.dry_run_amount),
            0 => Err(BridgeError::InsufficientBalance(format!(
                "wallet {} holds no USDC on the source chain",
                wallet.index
            ))
            .into()),
            balance => Ok(balance),
        }
    }

    async fn inter_wallet_delay(&self) {
        let (min, max) = (self.settings.delay_min_secs, self.settings.delay_max_secs);
        let secs = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        if secs > 0 {
            info!("Sleeping {}s before the next wallet", secs);
            sleep(Duration::from_secs(secs)).await;
        }
    }

    /// Runs every wallet, one after another with randomized delays, or
    /// fanned out `concurrency` at a time.
    /// Settles bridge jobs an earlier run left in flight before new work starts.
    pub async fn resume_bridges(&self, dry_run: bool) -> Option<ResumeReport> {
        match self.bridge.resume_in_flight(dry_run).await {
            Ok(report) => {
                if !report.unreconciled.is_empty() {
                    warn!(
                        "Bridge jobs need manual reconciliation: {}",
                        report.unreconciled.join(", ")
                    );
                }
                Some(report)
            }
            Err(e) => {
                warn!("Could not check in-flight bridge jobs: {}", e);
                None
            }
        }
    }

    pub async fn run(&self, wallets: &[Wallet], from: PipelineStep, dry_run: bool) -> RunSummary {
        let started_at = Utc::now();
        let resumed_bridges = self.resume_bridges(dry_run).await;

        let mut results = if self.settings.concurrency <= 1 {
            let mut results = Vec::with_capacity(wallets.len());
            for (i, wallet) in wallets.iter().enumerate() {
                if i > 0 && !dry_run {
                    self.inter_wallet_delay().await;
                }
                results.push(self.run_wallet(wallet, from, dry_run).await);
            }
            results
        } else {
            stream::iter(wallets)
                .map(|wallet| self.run_wallet(wallet, from, dry_run))
                .buffer_unordered(self.settings.concurrency)
                .collect::<Vec<_>>()
                .await
        };
        results.sort_by_key(|result| result.wallet_index);

        let succeeded = results.iter().filter(|result| result.success).count();
        RunSummary {
            dry_run,
            started_at,
            finished_at: Utc::now(),
            wallets: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            resumed_bridges,
            results,
        }
    }
}

fn fail(steps: &mut Vec<StepResult>, step: PipelineStep, error: PipelineError) -> PipelineError {
    warn!("{:?} failed: {}", step, error);
    steps.push(StepResult::failed(step, &error));
    error
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::api::exchange_api::ExchangeKind;
    use crate::api::lifi_api::TransferStatus;
    use crate::api::rpc_api::tests::MockRpc;
    use crate::api::rpc_api::TokenAccountInfo;
    use crate::config::tests::{test_config, TEST_MNEMONIC};
    use crate::config::LIFI_SOLANA_CHAIN_ID;
    use crate::models::job_model::{BridgeJob, JobStatus};
    use crate::repositories::job_repo::InMemoryJobRepo;
    use crate::services::bridge_service::tests::{route, MockBridge, MockEvm};
    use crate::services::liquidity_service::tests::{program_id, whirlpool};
    use crate::services::liquidity_service::ClmmQuoter;
    use crate::services::swap_service::tests::MockJupiter;
    use crate::services::wallet_service::derive_wallet_range;
    use crate::services::withdrawal_service::tests::MockExchange;
    use crate::utils::decode::tests::encode_whirlpool;
    use std::sync::Mutex;

    pub struct Harness {
        pub rpc: Arc<MockRpc>,
        pub evm: Arc<MockEvm>,
        pub jobs: Arc<InMemoryJobRepo>,
        pub pipeline: PipelineService,
    }

    pub fn harness(bridge_fee_usd: f64, enable_cex: bool) -> Harness {
        let mut config = test_config();
        config.enable_cex = enable_cex;

        let mut pool = whirlpool(-20000);
        pool.token_mint_b = config.usdc_mint;
        let pool_address = Pubkey::new_unique();
        config.usdc_pengu_pool = Some(pool_address);

        let mut mint = vec![0u8; 82];
        mint[44] = 6;
        let rpc = MockRpc::default()
            .with_account(pool_address, encode_whirlpool(&pool))
            .with_account(pool.token_mint_a, mint);
        rpc.token_accounts.lock().unwrap().push(TokenAccountInfo {
            address: Pubkey::new_unique(),
            mint: config.usdc_mint,
            amount: 100_000_000,
            decimals: 6,
        });
        *rpc.lamports.lock().unwrap() = 200_000_000;
        let rpc = Arc::new(rpc);

        let evm = Arc::new(MockEvm::default());
        let jobs = Arc::new(InMemoryJobRepo::new());
        let mut bridge_settings = BridgeSettings::from_config(&config);
        bridge_settings.timeout = Duration::from_secs(5);
        let bridge = BridgeService::new(
            Arc::new(MockBridge {
                routes: vec![route("mayan", bridge_fee_usd)],
                statuses: Mutex::new(vec![TransferStatus::Done {
                    receiving_tx_hash: Some("5sol".to_string()),
                }]),
            }),
            evm.clone(),
            jobs.clone(),
            bridge_settings,
        );

        let withdrawals = WithdrawalService::new(
            vec![Arc::new(MockExchange::new(ExchangeKind::Bybit, None))],
            50.0,
            100.0,
            false,
        );
        let swap = SwapService::new(Arc::new(MockJupiter), rpc.clone(), 100);
        let liquidity =
            LiquidityService::new(rpc.clone(), Arc::new(ClmmQuoter), program_id(), 100, false);

        let pipeline = PipelineService::new(
            withdrawals,
            bridge,
            swap,
            liquidity,
            rpc.clone(),
            evm.clone(),
            PipelineSettings::from_config(&config).unwrap(),
        );
        Harness {
            rpc,
            evm,
            jobs,
            pipeline,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_chain_runs_every_step_in_order() {
        let harness = harness(0.5, false);
        let wallets = derive_wallet_range(TEST_MNEMONIC, 0, 1).unwrap();

        let summary = harness
            .pipeline
            .run(&wallets, PipelineStep::Withdraw, false)
            .await;

        assert_eq!((summary.succeeded, summary.failed), (1, 0));
        let steps: Vec<_> = summary.results[0].steps.iter().map(|s| s.step).collect();
        assert_eq!(
            steps,
            vec![
                PipelineStep::Withdraw,
                PipelineStep::Bridge,
                PipelineStep::Swap,
                PipelineStep::Liquidity
            ]
        );
        assert!(summary.results[0].steps[0].skipped);
        assert_eq!(harness.evm.sends.load(std::sync::atomic::Ordering::SeqCst), 1);
        // Swap, position mint, position funding.
        assert_eq!(harness.rpc.sent_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bridge_failure_stops_the_wallet() {
        let harness = harness(5.0, false);
        let wallets = derive_wallet_range(TEST_MNEMONIC, 0, 2).unwrap();

        let summary = harness
            .pipeline
            .run(&wallets, PipelineStep::Bridge, false)
            .await;

        assert_eq!((summary.succeeded, summary.failed), (0, 2));
        for result in &summary.results {
            let last = result.steps.last().unwrap();
            assert_eq!(last.step, PipelineStep::Bridge);
            assert!(!last.success && !last.retryable);
            assert!(last.error.as_deref().unwrap().contains("exceeds ceiling"));
        }
        assert_eq!(harness.rpc.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_with_exchange_sends_nothing() {
        let harness = harness(0.5, true);
        let wallets = derive_wallet_range(TEST_MNEMONIC, 0, 1).unwrap();

        let summary = harness
            .pipeline
            .run(&wallets, PipelineStep::Withdraw, true)
            .await;

        assert!(summary.dry_run);
        assert_eq!(summary.succeeded, 1);
        let withdraw = &summary.results[0].steps[0];
        assert!(withdraw.success && !withdraw.skipped);
        assert_eq!(withdraw.detail["exchange_used"], "bybit");
        assert_eq!(harness.rpc.sent_count(), 0);
        assert_eq!(harness.evm.sends.load(std::sync::atomic::Ordering::SeqCst), 0);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["results"][0]["steps"][3]["step"], "liquidity");
    }

    #[tokio::test]
    async fn test_balances_cover_both_chains() {
        let harness = harness(0.5, false);
        let wallet = derive_wallet_range(TEST_MNEMONIC, 0, 1).unwrap().remove(0);

        let pool = harness.pipeline.pool_context().await.unwrap();
        let balances = harness.pipeline.read_balances(&wallet, &pool).await.unwrap();

        assert_eq!(pool.target_decimals, 6);
        assert_eq!(balances.sol, 0.2);
        assert_eq!(balances.usdc, 100.0);
        assert_eq!(balances.evm_usdc, 500.0);
        assert_eq!(balances.open_positions, 0);
    }

    #[tokio::test]
    async fn test_unfinished_bridge_stops_before_swap() {
        let harness = harness(0.5, false);
        let wallets = derive_wallet_range(TEST_MNEMONIC, 0, 1).unwrap();
        let config = test_config();

        // Left in flight by an earlier run for the same wallet and amount.
        let mut job = BridgeJob::new(
            BridgeJob::job_id(0, 500_000_000, config.evm_chain_id, LIFI_SOLANA_CHAIN_ID),
            0,
            500_000_000,
        );
        job.source_tx_hash = Some("0xearlier".to_string());
        job.advance(JobStatus::SourceSubmitted, "poll");
        harness.jobs.upsert(&job).await.unwrap();

        let summary = harness
            .pipeline
            .run(&wallets, PipelineStep::Bridge, true)
            .await;

        assert_eq!((summary.succeeded, summary.failed), (0, 1));
        let steps = &summary.results[0].steps;
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].step, PipelineStep::Bridge);
        assert!(!steps[0].success);
        assert_eq!(
            summary.resumed_bridges.unwrap().completed,
            vec![job.id.clone()]
        );
    }
}
