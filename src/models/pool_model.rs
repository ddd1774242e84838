use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::utils::price_calcs::sqrt_price_to_price;

// Copied from Orcas source program
#[derive(Debug, Clone)]
pub struct Whirlpool {
    pub whirlpools_config: Pubkey,
    pub whirlpool_bump: [u8; 1],
    pub tick_spacing: u16,
    pub tick_spacing_seed: [u8; 2],
    pub fee_rate: u16,
    pub protocol_fee_rate: u16,
    pub liquidity: u128,
    pub sqrt_price: u128,
    pub tick_current_index: i32,
    pub protocol_fee_owed_a: u64,
    pub protocol_fee_owed_b: u64,
    pub token_mint_a: Pubkey,
    pub token_vault_a: Pubkey,
    pub fee_growth_global_a: u128,
    pub token_mint_b: Pubkey,
    pub token_vault_b: Pubkey,
    pub fee_growth_global_b: u128,
}

impl Whirlpool {
    pub fn price(&self, decimals_a: u8, decimals_b: u8) -> f64 {
        sqrt_price_to_price(self.sqrt_price, decimals_a, decimals_b)
    }
}

/// A pool read fresh from chain, with its address.
#[derive(Debug, Clone)]
pub struct PoolState {
    pub address: Pubkey,
    pub whirlpool: Whirlpool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolTokenInfo {
    pub address: String,
    #[serde(default)]
    pub symbol: String,
    pub decimals: u8,
}

/// Pool metadata from Orca's public REST listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolInfo {
    pub address: String,
    pub tick_spacing: u16,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub tvl_usdc: Option<String>,
    pub token_a: PoolTokenInfo,
    pub token_b: PoolTokenInfo,
}

impl PoolInfo {
    pub fn name(&self) -> String {
        format!("{}/{}", self.token_a.symbol, self.token_b.symbol)
    }
}
