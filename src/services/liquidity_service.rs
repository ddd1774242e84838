use log::{debug, info, warn};
use solana_sdk::instruction::Instruction;
use solana_sdk::program_pack::Pack;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use spl_associated_token_account::get_associated_token_address;
use std::sync::Arc;
use std::time::Duration;

use crate::api::rpc_api::{
    build_signed_transaction, confirm_transaction, constants::CONFIRM_TIMEOUT_SECS,
    send_and_confirm, AccountLookup, SolanaRpc,
};
use crate::config::AppConfig;
use crate::models::pool_model::{PoolState, Whirlpool};
use crate::models::positions_model::{LivePosition, PositionOpenOutcome, PositionStage};
use crate::models::quote_model::{LiquidityQuote, QuoteConfidence};
use crate::models::wallet_model::Wallet;
use crate::utils::decode::{decode_position, decode_whirlpool};
use crate::utils::error::{LiquidityError, PriceCalcError, RpcError};
use crate::utils::instructions::{
    create_position_mint_ixs, increase_liquidity_ix, initialize_tick_array_ix, open_position_ix,
    position_address, resolve_tick_arrays, DepositAccounts, PositionAccounts, TickArrayPair,
};
use crate::utils::price_calcs::{apply_slippage_ceiling, calculate_deposit, tick_to_sqrt_price_u256, U256};
use crate::utils::retry::{constants::MAX_RETRIES, exponential_strategy, retry_transient};
use crate::utils::tick_math::{calculate_tick_range, validate_tick_range, TickRange};

pub mod constants {
    pub const MINT_TX_ATTEMPTS: usize = 3;
}

/// Turns a single-sided input amount into an `increase_liquidity` quote.
pub trait DepositQuoter: Send + Sync {
    fn quote(
        &self,
        pool: &Whirlpool,
        input_mint: &Pubkey,
        input_amount: u64,
        range: &TickRange,
        slippage_bps: u16,
    ) -> Result<LiquidityQuote, LiquidityError>;
}

/// Exact CLMM deposit math on the pool's current sqrt price.
pub struct ClmmQuoter;

impl DepositQuoter for ClmmQuoter {
    fn quote(
        &self,
        pool: &Whirlpool,
        input_mint: &Pubkey,
        input_amount: u64,
        range: &TickRange,
        slippage_bps: u16,
    ) -> Result<LiquidityQuote, LiquidityError> {
        let input_is_a = input_side(pool, input_mint)?;

        let deposit = calculate_deposit(
            input_amount,
            input_is_a,
            U256::from(pool.sqrt_price),
            tick_to_sqrt_price_u256(range.tick_lower),
            tick_to_sqrt_price_u256(range.tick_upper),
        )?;

        Ok(LiquidityQuote {
            liquidity_amount: deposit.liquidity,
            token_max_a: apply_slippage_ceiling(deposit.token_a, slippage_bps)?,
            token_max_b: apply_slippage_ceiling(deposit.token_b, slippage_bps)?,
            confidence: QuoteConfidence::Exact,
        })
    }
}

fn input_side(pool: &Whirlpool, input_mint: &Pubkey) -> Result<bool, LiquidityError> {
    if *input_mint == pool.token_mint_a {
        Ok(true)
    } else if *input_mint == pool.token_mint_b {
        Ok(false)
    } else {
        Err(LiquidityError::MintNotInPool(input_mint.to_string()))
    }
}

/// Crude estimate used when the quoter fails.
pub fn approximate_quote(input_amount: u64) -> LiquidityQuote {
    LiquidityQuote {
        liquidity_amount: (input_amount / 2) as u128,
        token_max_a: input_amount,
        token_max_b: input_amount,
        confidence: QuoteConfidence::Approximate,
    }
}

pub fn build_liquidity_quote(
    quoter: &dyn DepositQuoter,
    pool: &Whirlpool,
    input_mint: &Pubkey,
    input_amount: u64,
    range: &TickRange,
    slippage_bps: u16,
) -> LiquidityQuote {
    match quoter.quote(pool, input_mint, input_amount, range, slippage_bps) {
        Ok(quote) => quote,
        Err(e) => {
            warn!("Deposit quote failed, falling back to an approximate quote: {}", e);
            approximate_quote(input_amount)
        }
    }
}

/// Initializer instructions for whichever of the range's tick arrays are
/// missing. Only a confirmed `NotFound` produces one; read errors that
/// survive the retries are returned.
pub async fn ensure_tick_arrays(
    rpc: &dyn SolanaRpc,
    program_id: &Pubkey,
    whirlpool: &Pubkey,
    funder: &Pubkey,
    tick_arrays: &TickArrayPair,
) -> Result<Vec<Instruction>, RpcError> {
    let mut instructions = Vec::new();

    for boundary in tick_arrays.distinct() {
        let lookup = retry_transient(
            "tick array read",
            exponential_strategy(MAX_RETRIES),
            || rpc.get_account(&boundary.address),
        )
        .await?;

        match lookup {
            AccountLookup::Found(_) => {
                debug!("Tick array {} already exists", boundary.start_tick_index);
            }
            AccountLookup::NotFound => {
                info!(
                    "Tick array {} ({}) missing, will initialize",
                    boundary.start_tick_index, boundary.address
                );
                instructions.push(initialize_tick_array_ix(
                    program_id, whirlpool, funder, &boundary,
                ));
            }
        }
    }
    Ok(instructions)
}

#[derive(Debug, Clone)]
pub struct OpenPositionRequest {
    pub pool: Pubkey,
    pub input_mint: Pubkey,
    pub input_amount: u64,
    pub lower_pct: f64,
    pub upper_pct: f64,
}

pub struct LiquidityService {
    rpc: Arc<dyn SolanaRpc>,
    quoter: Arc<dyn DepositQuoter>,
    program_id: Pubkey,
    slippage_bps: u16,
    allow_approximate_quote: bool,
    confirm_timeout: Duration,
}

impl LiquidityService {
    pub fn new(
        rpc: Arc<dyn SolanaRpc>,
        quoter: Arc<dyn DepositQuoter>,
        program_id: Pubkey,
        slippage_bps: u16,
        allow_approximate_quote: bool,
    ) -> Self {
        Self {
            rpc,
            quoter,
            program_id,
            slippage_bps,
            allow_approximate_quote,
            confirm_timeout: Duration::from_secs(CONFIRM_TIMEOUT_SECS),
        }
    }

    pub fn from_config(config: &AppConfig, rpc: Arc<dyn SolanaRpc>) -> Self {
        Self::new(
            rpc,
            Arc::new(ClmmQuoter),
            config.whirlpool_program_id,
            config.slippage_bps,
            config.allow_approximate_quote,
        )
    }

    pub async fn fetch_pool(&self, address: &Pubkey) -> Result<PoolState, LiquidityError> {
        let lookup = retry_transient("pool read", exponential_strategy(MAX_RETRIES), || {
            self.rpc.get_account(address)
        })
        .await?;

        let data = lookup
            .into_data()
            .ok_or_else(|| LiquidityError::Decode(format!("pool {} not found", address)))?;
        let whirlpool =
            decode_whirlpool(&data).map_err(|e| LiquidityError::Decode(format!("{:#}", e)))?;
        if whirlpool.tick_spacing == 0 {
            return Err(LiquidityError::Decode(format!(
                "pool {} reports zero tick spacing",
                address
            )));
        }

        Ok(PoolState {
            address: *address,
            whirlpool,
        })
    }

    pub fn plan_range(
        &self,
        pool: &Whirlpool,
        lower_pct: f64,
        upper_pct: f64,
    ) -> Result<TickRange, LiquidityError> {
        let range = calculate_tick_range(
            pool.tick_current_index,
            pool.tick_spacing,
            lower_pct,
            upper_pct,
        );
        validate_tick_range(&range, pool.tick_spacing)?;
        Ok(range)
    }

    /// Sends the position-mint transaction, retrying with a fresh blockhash
    /// when sending or confirmation times out.
    async fn submit_mint_transaction(
        &self,
        instructions: &[Instruction],
        signers: &[&Keypair],
        position_mint: &Pubkey,
    ) -> Result<Signature, RpcError> {
        let rpc = self.rpc.as_ref();
        let mut last_error = None;
        // Every attempt that may have reached the cluster, oldest first.
        let mut attempted: Vec<Signature> = Vec::new();

        for attempt in 1..=constants::MINT_TX_ATTEMPTS {
            let transaction = match build_signed_transaction(rpc, instructions, signers).await {
                Ok(transaction) => transaction,
                Err(e) if e.is_retryable() => {
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return self.recover_earlier_mint(position_mint, &attempted, e).await,
            };
            let earlier = attempted.len();
            attempted.extend(transaction.signatures.first().copied());

            let signature = match rpc.send_transaction(&transaction).await {
                Ok(signature) => signature,
                Err(e) if e.is_retryable() => {
                    last_error = Some(e);
                    continue;
                }
                Err(e) => {
                    return self
                        .recover_earlier_mint(position_mint, &attempted[..earlier], e)
                        .await
                }
            };

            match confirm_transaction(rpc, &signature, self.confirm_timeout).await {
                Ok(()) => return Ok(signature),
                Err(e @ RpcError::ConfirmationTimeout { .. }) => {
                    // A late landing shows up as an existing mint account.
                    if let Ok(AccountLookup::Found(_)) = rpc.get_account(position_mint).await {
                        return Ok(signature);
                    }
                    warn!(
                        "Position mint tx attempt {}/{} unconfirmed: {}",
                        attempt,
                        constants::MINT_TX_ATTEMPTS,
                        e
                    );
                    last_error = Some(e);
                }
                Err(e) => {
                    return self
                        .recover_earlier_mint(position_mint, &attempted[..earlier], e)
                        .await
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            RpcError::Transport("position mint transaction was never sent".to_string())
        }))
    }

    /// A resend is rejected once an earlier attempt has created the mint. In
    /// that case the earlier attempt is the one that counts.
    async fn recover_earlier_mint(
        &self,
        position_mint: &Pubkey,
        earlier: &[Signature],
        error: RpcError,
    ) -> Result<Signature, RpcError> {
        if let Some(first) = earlier.first() {
            if let Ok(AccountLookup::Found(_)) = self.rpc.get_account(position_mint).await {
                warn!(
                    "Position mint {} was created by an earlier attempt {}; resend failed: {}",
                    position_mint, first, error
                );
                return Ok(*first);
            }
        }
        Err(error)
    }

    /// Opens and funds a position in two transactions. Failures after the
    /// range and quote are fixed come back as an `Ok` outcome that names the
    /// failed stage; the mint and position address are set as soon as they
    /// exist.
    pub async fn open_position(
        &self,
        wallet: &Wallet,
        request: &OpenPositionRequest,
        dry_run: bool,
    ) -> Result<PositionOpenOutcome, LiquidityError> {
        let owner = wallet.solana_address();
        let pool = self.fetch_pool(&request.pool).await?;
        let whirlpool = &pool.whirlpool;

        input_side(whirlpool, &request.input_mint)?;
        let range = self.plan_range(whirlpool, request.lower_pct, request.upper_pct)?;
        let quote = build_liquidity_quote(
            self.quoter.as_ref(),
            whirlpool,
            &request.input_mint,
            request.input_amount,
            &range,
            self.slippage_bps,
        );
        info!(
            "Wallet {}: range [{}, {}] at tick {}, liquidity {} ({:?})",
            wallet.index,
            range.tick_lower,
            range.tick_upper,
            whirlpool.tick_current_index,
            quote.liquidity_amount,
            quote.confidence
        );

        if !quote.is_exact() && !self.allow_approximate_quote && !dry_run {
            return Err(LiquidityError::ApproximateQuoteRefused);
        }

        if !dry_run {
            let balance = retry_transient("token balance read", exponential_strategy(MAX_RETRIES), || {
                self.rpc.get_token_balance(&owner, &request.input_mint)
            })
            .await?;
            if balance < request.input_amount {
                return Err(LiquidityError::InsufficientBalance(format!(
                    "wallet {} holds {} of {} base units of {}",
                    wallet.index, balance, request.input_amount, request.input_mint
                )));
            }
        }

        // Unfunded
        let position_mint = Keypair::new();
        let accounts =
            PositionAccounts::derive(&self.program_id, pool.address, owner, position_mint.pubkey());
        let tick_arrays =
            resolve_tick_arrays(&self.program_id, &pool.address, &range, whirlpool.tick_spacing);

        let mut outcome = PositionOpenOutcome::new(range);
        outcome.dry_run = dry_run;
        outcome.liquidity = quote.liquidity_amount;
        outcome.position_mint = Some(accounts.position_mint.to_string());
        outcome.position_address = Some(accounts.position.to_string());

        if dry_run {
            info!(
                "[dry-run] would open position {} with tick arrays {} / {}",
                accounts.position, tick_arrays.lower.start_tick_index, tick_arrays.upper.start_tick_index
            );
            outcome.success = true;
            return Ok(outcome);
        }

        // MintPending
        outcome.stage = PositionStage::MintPending;
        let mint_instructions = match self.mint_instructions(&owner, &accounts.position_mint).await {
            Ok(instructions) => instructions,
            Err(e) => return Ok(outcome.fail(PositionStage::MintPending, e)),
        };
        match self
            .submit_mint_transaction(
                &mint_instructions,
                &[&wallet.solana, &position_mint],
                &accounts.position_mint,
            )
            .await
        {
            Ok(signature) => {
                info!("Wallet {}: position mint confirmed {}", wallet.index, signature);
                outcome.mint_signature = Some(signature.to_string());
                outcome.stage = PositionStage::MintConfirmed;
            }
            Err(e) => return Ok(outcome.fail(PositionStage::MintPending, e)),
        }

        // MintConfirmed
        let mut instructions = match ensure_tick_arrays(
            self.rpc.as_ref(),
            &self.program_id,
            &pool.address,
            &owner,
            &tick_arrays,
        )
        .await
        {
            Ok(instructions) => instructions,
            Err(e) => return Ok(outcome.fail(PositionStage::MintConfirmed, e)),
        };

        // LiquidityPending
        outcome.stage = PositionStage::LiquidityPending;
        let deposit = DepositAccounts {
            token_owner_account_a: get_associated_token_address(&owner, &whirlpool.token_mint_a),
            token_owner_account_b: get_associated_token_address(&owner, &whirlpool.token_mint_b),
            token_vault_a: whirlpool.token_vault_a,
            token_vault_b: whirlpool.token_vault_b,
        };
        instructions.push(open_position_ix(&self.program_id, &accounts, &range));
        instructions.push(increase_liquidity_ix(
            &self.program_id,
            &accounts,
            &deposit,
            &tick_arrays,
            &quote,
        ));

        let result = match build_signed_transaction(
            self.rpc.as_ref(),
            &instructions,
            &[&wallet.solana, &position_mint],
        )
        .await
        {
            Ok(transaction) => {
                send_and_confirm(self.rpc.as_ref(), &transaction, self.confirm_timeout).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(signature) => {
                info!(
                    "Wallet {}: position {} funded in {}",
                    wallet.index, accounts.position, signature
                );
                outcome.liquidity_signature = Some(signature.to_string());
                outcome.stage = PositionStage::Funded;
                outcome.success = true;
                Ok(outcome)
            }
            Err(e) => {
                warn!(
                    "Wallet {}: position mint {} exists but liquidity failed: {}",
                    wallet.index, accounts.position_mint, e
                );
                Ok(outcome.fail(PositionStage::LiquidityPending, e))
            }
        }
    }

    async fn mint_instructions(
        &self,
        owner: &Pubkey,
        position_mint: &Pubkey,
    ) -> Result<Vec<Instruction>, LiquidityError> {
        let rent = retry_transient("rent exemption read", exponential_strategy(MAX_RETRIES), || {
            self.rpc
                .get_minimum_balance_for_rent_exemption(spl_token::state::Mint::LEN)
        })
        .await?;
        create_position_mint_ixs(owner, owner, position_mint, rent)
            .map_err(|e| LiquidityError::Math(PriceCalcError(format!("mint instruction: {}", e))))
    }

    /// Whirlpool positions held by `owner`, optionally limited to one pool.
    pub async fn list_positions(
        &self,
        owner: &Pubkey,
        pool: Option<&Pubkey>,
    ) -> Result<Vec<LivePosition>, LiquidityError> {
        let token_accounts = retry_transient(
            "token accounts read",
            exponential_strategy(MAX_RETRIES),
            || self.rpc.get_token_accounts_by_owner(owner),
        )
        .await?;

        let mut positions = Vec::new();
        for account in token_accounts
            .iter()
            .filter(|account| account.amount == 1 && account.decimals == 0)
        {
            let (address, _) = position_address(&self.program_id, &account.mint);
            let lookup = retry_transient("position read", exponential_strategy(MAX_RETRIES), || {
                self.rpc.get_account(&address)
            })
            .await?;

            let Some(data) = lookup.into_data() else {
                continue;
            };
            let position = match decode_position(&data) {
                Ok(position) => position,
                Err(e) => {
                    debug!("Skipping {}: {:#}", address, e);
                    continue;
                }
            };
            if pool.map_or(true, |pool| position.whirlpool == *pool) {
                positions.push(LivePosition { address, position });
            }
        }
        Ok(positions)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::api::rpc_api::tests::MockRpc;
    use crate::api::rpc_api::TokenAccountInfo;
    use crate::config::tests::TEST_MNEMONIC;
    use crate::models::positions_model::{Position, PositionRewardInfo};
    use crate::services::wallet_service::derive_wallet;
    use crate::utils::decode::decode_increase_liquidity_data;
    use crate::utils::decode::tests::{encode_position, encode_whirlpool};
    use std::str::FromStr;
    use std::sync::atomic::Ordering;

    pub fn program_id() -> Pubkey {
        Pubkey::from_str("whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc").unwrap()
    }

    pub fn whirlpool(tick_current_index: i32) -> Whirlpool {
        Whirlpool {
            whirlpools_config: Pubkey::new_unique(),
            whirlpool_bump: [255],
            tick_spacing: 64,
            tick_spacing_seed: [64, 0],
            fee_rate: 3000,
            protocol_fee_rate: 1300,
            liquidity: 1_000_000_000,
            sqrt_price: tick_to_sqrt_price_u256(tick_current_index).as_u128(),
            tick_current_index,
            protocol_fee_owed_a: 0,
            protocol_fee_owed_b: 0,
            token_mint_a: Pubkey::new_unique(),
            token_vault_a: Pubkey::new_unique(),
            fee_growth_global_a: 0,
            token_mint_b: Pubkey::new_unique(),
            token_vault_b: Pubkey::new_unique(),
            fee_growth_global_b: 0,
        }
    }

    struct FailingQuoter;

    impl DepositQuoter for FailingQuoter {
        fn quote(
            &self,
            _pool: &Whirlpool,
            _input_mint: &Pubkey,
            _input_amount: u64,
            _range: &TickRange,
            _slippage_bps: u16,
        ) -> Result<LiquidityQuote, LiquidityError> {
            Err(LiquidityError::Network("quoter unavailable".to_string()))
        }
    }

    struct Fixture {
        rpc: Arc<MockRpc>,
        pool_address: Pubkey,
        pool: Whirlpool,
        wallet: Wallet,
    }

    fn fixture(tick_current_index: i32) -> Fixture {
        let pool = whirlpool(tick_current_index);
        let pool_address = Pubkey::new_unique();
        let rpc = MockRpc::default().with_account(pool_address, encode_whirlpool(&pool));
        rpc.token_accounts.lock().unwrap().push(TokenAccountInfo {
            address: Pubkey::new_unique(),
            mint: pool.token_mint_b,
            amount: 10_000_000,
            decimals: 6,
        });
        Fixture {
            rpc: Arc::new(rpc),
            pool_address,
            pool,
            wallet: derive_wallet(TEST_MNEMONIC, 0).unwrap(),
        }
    }

    impl Fixture {
        fn service(&self, quoter: Arc<dyn DepositQuoter>, allow_approximate: bool) -> LiquidityService {
            LiquidityService::new(self.rpc.clone(), quoter, program_id(), 100, allow_approximate)
        }

        fn request(&self) -> OpenPositionRequest {
            OpenPositionRequest {
                pool: self.pool_address,
                input_mint: self.pool.token_mint_b,
                input_amount: 10_000_000,
                lower_pct: 15.0,
                upper_pct: 15.0,
            }
        }
    }

    #[tokio::test]
    async fn test_open_position_funds_in_two_transactions() {
        let fx = fixture(-20000);
        let service = fx.service(Arc::new(ClmmQuoter), false);

        let outcome = service
            .open_position(&fx.wallet, &fx.request(), false)
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.stage, PositionStage::Funded);
        assert_eq!((outcome.tick_lower, outcome.tick_upper), (-23040, -17024));
        assert!(outcome.mint_signature.is_some() && outcome.liquidity_signature.is_some());

        let sent = fx.rpc.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        let keys = sent[1].message.static_account_keys();
        let instructions = sent[1].message.instructions();
        // Two tick array initializers, open_position, increase_liquidity.
        assert_eq!(instructions.len(), 4);
        let increase = decode_increase_liquidity_data(&instructions[3].data).unwrap();
        assert_eq!(increase.liquidity_amount, outcome.liquidity);
        let position_key = keys[instructions[3].accounts[3] as usize];
        assert_eq!(position_key.to_string(), outcome.position_address.unwrap());
    }

    #[tokio::test]
    async fn test_liquidity_failure_surfaces_mint_and_position() {
        let fx = fixture(-20000);
        {
            let mut outcomes = fx.rpc.send_outcomes.lock().unwrap();
            outcomes.push_back(Ok(()));
            outcomes.push_back(Err(RpcError::TransactionFailed {
                signature: "sig".to_string(),
                reason: "custom program error: 0x177f".to_string(),
            }));
        }
        let service = fx.service(Arc::new(ClmmQuoter), false);

        let outcome = service
            .open_position(&fx.wallet, &fx.request(), false)
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.stage, PositionStage::Failed);
        assert_eq!(outcome.failed_step, Some(PositionStage::LiquidityPending));
        assert!(outcome.position_mint.is_some());
        assert!(outcome.position_address.is_some());
        assert!(outcome.mint_signature.is_some());
        assert!(outcome.needs_reconciliation());
    }

    #[tokio::test]
    async fn test_mint_failure_reports_no_nft() {
        let fx = fixture(-20000);
        fx.rpc
            .send_outcomes
            .lock()
            .unwrap()
            .push_back(Err(RpcError::Response {
                code: -32002,
                message: "insufficient lamports".to_string(),
            }));
        let service = fx.service(Arc::new(ClmmQuoter), false);

        let outcome = service
            .open_position(&fx.wallet, &fx.request(), false)
            .await
            .unwrap();

        assert_eq!(outcome.failed_step, Some(PositionStage::MintPending));
        assert!(outcome.mint_signature.is_none());
        assert!(!outcome.needs_reconciliation());
        assert_eq!(fx.rpc.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_late_landing_mint_is_not_reported_as_missing() {
        let fx = fixture(-20000);
        fx.rpc.land_failed_sends.store(true, Ordering::SeqCst);
        {
            let mut outcomes = fx.rpc.send_outcomes.lock().unwrap();
            outcomes.push_back(Err(RpcError::Transport("request timed out".to_string())));
            outcomes.push_back(Err(RpcError::Response {
                code: -32002,
                message: "Allocate: account already in use".to_string(),
            }));
        }
        let service = fx.service(Arc::new(ClmmQuoter), false);

        let outcome = service
            .open_position(&fx.wallet, &fx.request(), false)
            .await
            .unwrap();

        let first_attempt = fx.rpc.sent.lock().unwrap()[0].signatures[0];
        assert!(outcome.success);
        assert_eq!(outcome.mint_signature, Some(first_attempt.to_string()));
        // Two mint attempts, then the funding transaction.
        assert_eq!(fx.rpc.sent_count(), 3);
    }

    #[tokio::test]
    async fn test_dry_run_plans_without_sending() {
        let fx = fixture(-20000);
        let service = fx.service(Arc::new(ClmmQuoter), false);

        let outcome = service
            .open_position(&fx.wallet, &fx.request(), true)
            .await
            .unwrap();

        assert!(outcome.success && outcome.dry_run);
        assert_eq!(outcome.stage, PositionStage::Unfunded);
        assert!(outcome.position_address.is_some());
        assert_eq!(fx.rpc.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_tick_range_is_rejected_before_sending() {
        let fx = fixture(0);
        let service = fx.service(Arc::new(ClmmQuoter), false);

        let result = service.open_position(&fx.wallet, &fx.request(), false).await;

        assert!(matches!(result, Err(LiquidityError::InvalidTickRange(_))));
        assert_eq!(fx.rpc.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_approximate_quote_is_refused_by_default() {
        let fx = fixture(-20000);

        let refused = fx
            .service(Arc::new(FailingQuoter), false)
            .open_position(&fx.wallet, &fx.request(), false)
            .await;
        assert!(matches!(refused, Err(LiquidityError::ApproximateQuoteRefused)));
        assert_eq!(fx.rpc.sent_count(), 0);

        let allowed = fx
            .service(Arc::new(FailingQuoter), true)
            .open_position(&fx.wallet, &fx.request(), false)
            .await
            .unwrap();
        assert!(allowed.success);
        assert_eq!(allowed.liquidity, 5_000_000);
    }

    #[test]
    fn test_quote_fallback_is_tagged_approximate() {
        let pool = whirlpool(-20000);
        let range = TickRange {
            tick_lower: -23040,
            tick_upper: -17024,
        };

        let fallback =
            build_liquidity_quote(&FailingQuoter, &pool, &pool.token_mint_b, 1_000, &range, 100);
        assert_eq!(fallback, approximate_quote(1_000));
        assert_eq!(fallback.liquidity_amount, 500);
        assert_eq!((fallback.token_max_a, fallback.token_max_b), (1_000, 1_000));
        assert!(!fallback.is_exact());

        let exact =
            build_liquidity_quote(&ClmmQuoter, &pool, &pool.token_mint_b, 1_000_000, &range, 100);
        assert!(exact.is_exact());
        assert!(exact.token_max_b >= 1_000_000 && exact.token_max_b <= 1_010_000);
        assert!(exact.token_max_a > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_retries_transient_reads_without_initializing() {
        let fx = fixture(-20000);
        let range = TickRange {
            tick_lower: 64,
            tick_upper: 640,
        };
        let pair = resolve_tick_arrays(&program_id(), &fx.pool_address, &range, 64);
        let rpc = MockRpc::default().with_account(pair.lower.address, vec![0u8; 16]);
        rpc.transient_read_failures.store(2, Ordering::SeqCst);

        let instructions =
            ensure_tick_arrays(&rpc, &program_id(), &fx.pool_address, &Pubkey::new_unique(), &pair)
                .await
                .unwrap();

        assert!(instructions.is_empty());
        assert_eq!(rpc.account_reads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_ensure_initializes_only_missing_arrays() {
        let pool = Pubkey::new_unique();
        let funder = Pubkey::new_unique();

        let shared = resolve_tick_arrays(
            &program_id(),
            &pool,
            &TickRange {
                tick_lower: 64,
                tick_upper: 640,
            },
            64,
        );
        let rpc = MockRpc::default();
        let instructions = ensure_tick_arrays(&rpc, &program_id(), &pool, &funder, &shared)
            .await
            .unwrap();
        assert_eq!(instructions.len(), 1);

        let split = resolve_tick_arrays(
            &program_id(),
            &pool,
            &TickRange {
                tick_lower: -23040,
                tick_upper: -17024,
            },
            64,
        );
        let rpc = MockRpc::default().with_account(split.upper.address, vec![0u8; 16]);
        let instructions = ensure_tick_arrays(&rpc, &program_id(), &pool, &funder, &split)
            .await
            .unwrap();
        assert_eq!(instructions.len(), 1);
        assert_eq!(instructions[0].accounts[2].pubkey, split.lower.address);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_propagates_exhausted_read_errors() {
        let pair = resolve_tick_arrays(
            &program_id(),
            &Pubkey::new_unique(),
            &TickRange {
                tick_lower: 64,
                tick_upper: 640,
            },
            64,
        );
        let rpc = MockRpc::default();
        rpc.transient_read_failures.store(100, Ordering::SeqCst);

        let result = ensure_tick_arrays(
            &rpc,
            &program_id(),
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            &pair,
        )
        .await;

        assert!(matches!(result, Err(RpcError::Transport(_))));
    }

    #[tokio::test]
    async fn test_list_positions_decodes_owned_position_nfts() {
        let pool_address = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let position = Position {
            whirlpool: pool_address,
            position_mint: mint,
            liquidity: 42,
            tick_lower_index: -23040,
            tick_upper_index: -17024,
            fee_growth_checkpoint_a: 0,
            fee_owed_a: 7,
            fee_growth_checkpoint_b: 0,
            fee_owed_b: 9,
            reward_infos: [PositionRewardInfo {
                growth_inside_checkpoint: 0,
                amount_owed: 0,
            }; 3],
        };
        let (address, _) = position_address(&program_id(), &mint);
        let rpc = MockRpc::default().with_account(address, encode_position(&position));
        {
            let mut accounts = rpc.token_accounts.lock().unwrap();
            accounts.push(TokenAccountInfo {
                address: Pubkey::new_unique(),
                mint,
                amount: 1,
                decimals: 0,
            });
            accounts.push(TokenAccountInfo {
                address: Pubkey::new_unique(),
                mint: Pubkey::new_unique(),
                amount: 5_000_000,
                decimals: 6,
            });
        }
        let service =
            LiquidityService::new(Arc::new(rpc), Arc::new(ClmmQuoter), program_id(), 100, false);

        let positions = service
            .list_positions(&Pubkey::new_unique(), Some(&pool_address))
            .await
            .unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].address, address);
        assert_eq!(positions[0].position, position);

        let other_pool = service
            .list_positions(&Pubkey::new_unique(), Some(&Pubkey::new_unique()))
            .await
            .unwrap();
        assert!(other_pool.is_empty());
    }
}
