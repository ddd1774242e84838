use log::info;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use std::time::Duration;

use crate::api::jupiter_api::SwapApi;
use crate::api::rpc_api::{constants::CONFIRM_TIMEOUT_SECS, send_and_confirm, SolanaRpc};
use crate::models::wallet_model::Wallet;
use crate::utils::error::{RpcError, SwapError};
use crate::utils::retry::{constants::MAX_RETRIES, exponential_strategy, retry_transient};

// Jupiter's SlippageToleranceExceeded custom program error.
const SLIPPAGE_ERROR_CODES: [&str; 2] = ["0x1771", "6001"];

#[derive(Debug, Clone, Serialize)]
pub struct SwapOutcome {
    pub success: bool,
    pub dry_run: bool,
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: u64,
    pub expected_out: u64,
    pub min_out: u64,
    pub price_impact_pct: f64,
    pub signature: Option<String>,
}

fn classify_rpc_failure(error: RpcError) -> SwapError {
    match &error {
        RpcError::TransactionFailed { reason, .. } | RpcError::Response { message: reason, .. }
            if SLIPPAGE_ERROR_CODES.iter().any(|code| reason.contains(code)) =>
        {
            SwapError::Slippage(reason.clone())
        }
        RpcError::Response { message, .. } if message.contains("insufficient") => {
            SwapError::InsufficientBalance(message.clone())
        }
        _ => SwapError::Rpc(error),
    }
}

pub struct SwapService {
    api: Arc<dyn SwapApi>,
    rpc: Arc<dyn SolanaRpc>,
    slippage_bps: u16,
    confirm_timeout: Duration,
}

impl SwapService {
    pub fn new(api: Arc<dyn SwapApi>, rpc: Arc<dyn SolanaRpc>, slippage_bps: u16) -> Self {
        Self {
            api,
            rpc,
            slippage_bps,
            confirm_timeout: Duration::from_secs(CONFIRM_TIMEOUT_SECS),
        }
    }

    /// Swaps `amount` base units of `input_mint` held by the wallet into
    /// `output_mint`.
    pub async fn swap(
        &self,
        wallet: &Wallet,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: u64,
        dry_run: bool,
    ) -> Result<SwapOutcome, SwapError> {
        if amount == 0 {
            return Err(SwapError::InsufficientBalance("nothing to swap".to_string()));
        }
        let owner = wallet.solana_address();

        let balance = retry_transient("token balance read", exponential_strategy(MAX_RETRIES), || {
            self.rpc.get_token_balance(&owner, input_mint)
        })
        .await?;
        if balance < amount && !dry_run {
            return Err(SwapError::InsufficientBalance(format!(
                "wallet {} holds {} of {} base units of {}",
                wallet.index, balance, amount, input_mint
            )));
        }

        let quote = retry_transient("Jupiter quote", exponential_strategy(MAX_RETRIES), || {
            self.api.quote(input_mint, output_mint, amount, self.slippage_bps)
        })
        .await?;
        info!(
            "Wallet {}: quote {} -> {} (min {}, impact {:.4}%)",
            wallet.index,
            quote.in_amount,
            quote.out_amount,
            quote.other_amount_threshold,
            quote.price_impact_pct
        );

        let mut outcome = SwapOutcome {
            success: false,
            dry_run,
            input_mint: input_mint.to_string(),
            output_mint: output_mint.to_string(),
            in_amount: quote.in_amount,
            expected_out: quote.out_amount,
            min_out: quote.other_amount_threshold,
            price_impact_pct: quote.price_impact_pct,
            signature: None,
        };
        if dry_run {
            outcome.success = true;
            return Ok(outcome);
        }

        let unsigned = retry_transient(
            "Jupiter swap transaction",
            exponential_strategy(MAX_RETRIES),
            || self.api.swap_transaction(&quote, &owner),
        )
        .await?;
        let signed = VersionedTransaction::try_new(unsigned.message, &[&wallet.solana])
            .map_err(|e| SwapError::InvalidTransaction(format!("signing failed: {}", e)))?;

        let signature = send_and_confirm(self.rpc.as_ref(), &signed, self.confirm_timeout)
            .await
            .map_err(classify_rpc_failure)?;
        info!("Wallet {}: swap confirmed {}", wallet.index, signature);

        outcome.success = true;
        outcome.signature = Some(signature.to_string());
        Ok(outcome)
    }
}
