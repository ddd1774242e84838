use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::program_pack::Pack;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::{system_instruction, system_program, sysvar};
use spl_associated_token_account::get_associated_token_address;
use spl_associated_token_account::instruction::create_associated_token_account;

use super::decode::{
    encode_increase_liquidity_data, encode_initialize_tick_array_data, encode_open_position_data,
};
use super::tick_math::{tick_array_start_index, TickRange};
use crate::models::quote_model::LiquidityQuote;

pub const POSITION_SEED: &[u8] = b"position";
pub const TICK_ARRAY_SEED: &[u8] = b"tick_array";

pub fn position_address(program_id: &Pubkey, position_mint: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[POSITION_SEED, position_mint.as_ref()], program_id)
}

// Orca seeds tick arrays with the start index rendered as a decimal string.
pub fn tick_array_address(program_id: &Pubkey, whirlpool: &Pubkey, start_tick_index: i32) -> Pubkey {
    let start = start_tick_index.to_string();
    Pubkey::find_program_address(
        &[TICK_ARRAY_SEED, whirlpool.as_ref(), start.as_bytes()],
        program_id,
    )
    .0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickArrayBoundary {
    pub start_tick_index: i32,
    pub address: Pubkey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickArrayPair {
    pub lower: TickArrayBoundary,
    pub upper: TickArrayBoundary,
}

impl TickArrayPair {
    pub fn is_shared(&self) -> bool {
        self.lower.start_tick_index == self.upper.start_tick_index
    }

    /// Distinct arrays backing the range, lower first.
    pub fn distinct(&self) -> Vec<TickArrayBoundary> {
        if self.is_shared() {
            vec![self.lower]
        } else {
            vec![self.lower, self.upper]
        }
    }
}

pub fn resolve_tick_arrays(
    program_id: &Pubkey,
    whirlpool: &Pubkey,
    range: &TickRange,
    tick_spacing: u16,
) -> TickArrayPair {
    let boundary = |tick: i32| {
        let start_tick_index = tick_array_start_index(tick, tick_spacing);
        TickArrayBoundary {
            start_tick_index,
            address: tick_array_address(program_id, whirlpool, start_tick_index),
        }
    };

    TickArrayPair {
        lower: boundary(range.tick_lower),
        upper: boundary(range.tick_upper),
    }
}

pub fn initialize_tick_array_ix(
    program_id: &Pubkey,
    whirlpool: &Pubkey,
    funder: &Pubkey,
    tick_array: &TickArrayBoundary,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new_readonly(*whirlpool, false),
            AccountMeta::new(*funder, true),
            AccountMeta::new(tick_array.address, false),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data: encode_initialize_tick_array_data(tick_array.start_tick_index),
    }
}

/// Transaction 1 of a position open: a fresh 0-decimal mint plus the
/// owner's associated token account for it.
pub fn create_position_mint_ixs(
    funder: &Pubkey,
    owner: &Pubkey,
    position_mint: &Pubkey,
    mint_rent_lamports: u64,
) -> Result<Vec<Instruction>, solana_sdk::program_error::ProgramError> {
    Ok(vec![
        system_instruction::create_account(
            funder,
            position_mint,
            mint_rent_lamports,
            spl_token::state::Mint::LEN as u64,
            &spl_token::id(),
        ),
        spl_token::instruction::initialize_mint2(
            &spl_token::id(),
            position_mint,
            owner,
            None,
            0,
        )?,
        create_associated_token_account(funder, owner, position_mint, &spl_token::id()),
    ])
}

pub struct PositionAccounts {
    pub whirlpool: Pubkey,
    pub funder: Pubkey,
    pub owner: Pubkey,
    pub position: Pubkey,
    pub position_bump: u8,
    pub position_mint: Pubkey,
    pub position_token_account: Pubkey,
}

impl PositionAccounts {
    pub fn derive(program_id: &Pubkey, whirlpool: Pubkey, owner: Pubkey, position_mint: Pubkey) -> Self {
        let (position, position_bump) = position_address(program_id, &position_mint);
        Self {
            whirlpool,
            funder: owner,
            owner,
            position,
            position_bump,
            position_mint,
            position_token_account: get_associated_token_address(&owner, &position_mint),
        }
    }
}

pub fn open_position_ix(
    program_id: &Pubkey,
    accounts: &PositionAccounts,
    range: &TickRange,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(accounts.funder, true),
            AccountMeta::new_readonly(accounts.owner, false),
            AccountMeta::new(accounts.position, false),
            AccountMeta::new(accounts.position_mint, true),
            AccountMeta::new(accounts.position_token_account, false),
            AccountMeta::new_readonly(accounts.whirlpool, false),
            AccountMeta::new_readonly(spl_token::id(), false),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(sysvar::rent::id(), false),
            AccountMeta::new_readonly(spl_associated_token_account::id(), false),
        ],
        data: encode_open_position_data(accounts.position_bump, range.tick_lower, range.tick_upper),
    }
}

pub struct DepositAccounts {
    pub token_owner_account_a: Pubkey,
    pub token_owner_account_b: Pubkey,
    pub token_vault_a: Pubkey,
    pub token_vault_b: Pubkey,
}

// The `position` account is the position PDA, never the mint.
pub fn increase_liquidity_ix(
    program_id: &Pubkey,
    accounts: &PositionAccounts,
    deposit: &DepositAccounts,
    tick_arrays: &TickArrayPair,
    quote: &LiquidityQuote,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(accounts.whirlpool, false),
            AccountMeta::new_readonly(spl_token::id(), false),
            AccountMeta::new_readonly(accounts.owner, true),
            AccountMeta::new(accounts.position, false),
            AccountMeta::new_readonly(accounts.position_token_account, false),
            AccountMeta::new(deposit.token_owner_account_a, false),
            AccountMeta::new(deposit.token_owner_account_b, false),
            AccountMeta::new(deposit.token_vault_a, false),
            AccountMeta::new(deposit.token_vault_b, false),
            AccountMeta::new(tick_arrays.lower.address, false),
            AccountMeta::new(tick_arrays.upper.address, false),
        ],
        data: encode_increase_liquidity_data(
            quote.liquidity_amount,
            quote.token_max_a,
            quote.token_max_b,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::quote_model::QuoteConfidence;
    use std::str::FromStr;

    fn program_id() -> Pubkey {
        Pubkey::from_str("whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc").unwrap()
    }

    #[test]
    fn test_tick_arrays_for_range_inside_one_segment_are_shared() {
        let pool = Pubkey::new_unique();
        let range = TickRange {
            tick_lower: 64,
            tick_upper: 640,
        };

        let pair = resolve_tick_arrays(&program_id(), &pool, &range, 64);

        assert!(pair.is_shared());
        assert_eq!(pair.lower.address, pair.upper.address);
        assert_eq!(pair.distinct().len(), 1);
    }

    #[test]
    fn test_tick_arrays_for_wide_range_differ() {
        let pool = Pubkey::new_unique();
        let range = TickRange {
            tick_lower: -23040,
            tick_upper: -17024,
        };

        let pair = resolve_tick_arrays(&program_id(), &pool, &range, 64);

        assert_eq!(pair.lower.start_tick_index, -28160);
        assert_eq!(pair.upper.start_tick_index, -22528);
        assert_ne!(pair.lower.address, pair.upper.address);
        assert_eq!(
            pair.lower.address,
            tick_array_address(&program_id(), &pool, -28160)
        );
        assert_eq!(pair.distinct().len(), 2);
    }

    #[test]
    fn test_increase_liquidity_targets_position_pda_not_mint() {
        let owner = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let pool = Pubkey::new_unique();
        let accounts = PositionAccounts::derive(&program_id(), pool, owner, mint);
        let range = TickRange {
            tick_lower: -23040,
            tick_upper: -17024,
        };
        let tick_arrays = resolve_tick_arrays(&program_id(), &pool, &range, 64);
        let deposit = DepositAccounts {
            token_owner_account_a: Pubkey::new_unique(),
            token_owner_account_b: Pubkey::new_unique(),
            token_vault_a: Pubkey::new_unique(),
            token_vault_b: Pubkey::new_unique(),
        };
        let quote = LiquidityQuote {
            liquidity_amount: 1_000,
            token_max_a: 10,
            token_max_b: 20,
            confidence: QuoteConfidence::Exact,
        };

        let ix = increase_liquidity_ix(&program_id(), &accounts, &deposit, &tick_arrays, &quote);

        assert_eq!(ix.accounts[3].pubkey, position_address(&program_id(), &mint).0);
        assert_ne!(ix.accounts[3].pubkey, mint);
        assert!(ix.accounts[2].is_signer);
        assert_eq!(ix.accounts[9].pubkey, tick_arrays.lower.address);
        assert_eq!(ix.accounts[10].pubkey, tick_arrays.upper.address);
    }

    #[test]
    fn test_position_mint_transaction_shape() {
        let owner = Pubkey::new_unique();
        let mint = Pubkey::new_unique();

        let ixs = create_position_mint_ixs(&owner, &owner, &mint, 1_461_600).unwrap();

        assert_eq!(ixs.len(), 3);
        assert_eq!(ixs[0].program_id, system_program::id());
        assert_eq!(ixs[1].program_id, spl_token::id());
        assert_eq!(ixs[2].program_id, spl_associated_token_account::id());
    }
}
