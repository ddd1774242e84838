use serde::Serialize;
use solana_sdk::pubkey::Pubkey;

use crate::utils::tick_math::TickRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionRewardInfo {
    pub growth_inside_checkpoint: u128,
    pub amount_owed: u64,
}

// Copied from Orcas source program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub whirlpool: Pubkey,
    pub position_mint: Pubkey,
    pub liquidity: u128,
    pub tick_lower_index: i32,
    pub tick_upper_index: i32,
    pub fee_growth_checkpoint_a: u128,
    pub fee_owed_a: u64,
    pub fee_growth_checkpoint_b: u128,
    pub fee_owed_b: u64,
    pub reward_infos: [PositionRewardInfo; 3],
}

impl Position {
    pub fn is_in_range(&self, current_tick: i32) -> bool {
        self.tick_lower_index <= current_tick && current_tick < self.tick_upper_index
    }
}

/// A decoded position together with its on-chain address.
#[derive(Debug, Clone)]
pub struct LivePosition {
    pub address: Pubkey,
    pub position: Position,
}

/// Stages of opening a position. The two transactions are split between
/// `MintPending` and `LiquidityPending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PositionStage {
    Unfunded,
    MintPending,
    MintConfirmed,
    LiquidityPending,
    Funded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionOpenOutcome {
    pub success: bool,
    pub dry_run: bool,
    pub stage: PositionStage,
    /// Stage that failed, when `stage == Failed`.
    pub failed_step: Option<PositionStage>,
    pub position_mint: Option<String>,
    pub position_address: Option<String>,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub liquidity: u128,
    pub mint_signature: Option<String>,
    pub liquidity_signature: Option<String>,
    pub error: Option<String>,
}

impl PositionOpenOutcome {
    pub fn new(range: TickRange) -> Self {
        Self {
            success: false,
            dry_run: false,
            stage: PositionStage::Unfunded,
            failed_step: None,
            position_mint: None,
            position_address: None,
            tick_lower: range.tick_lower,
            tick_upper: range.tick_upper,
            liquidity: 0,
            mint_signature: None,
            liquidity_signature: None,
            error: None,
        }
    }

    pub fn fail(mut self, step: PositionStage, error: impl ToString) -> Self {
        self.success = false;
        self.failed_step = Some(step);
        self.stage = PositionStage::Failed;
        self.error = Some(error.to_string());
        self
    }

    /// An NFT exists on-chain but holds no liquidity.
    pub fn needs_reconciliation(&self) -> bool {
        !self.success && self.mint_signature.is_some() && self.liquidity_signature.is_none()
    }
}
