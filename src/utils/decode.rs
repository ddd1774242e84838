use anyhow::{anyhow, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use std::io::{Cursor, Read};

use crate::models::pool_model::Whirlpool;
use crate::models::positions_model::{Position, PositionRewardInfo};

pub const POSITION_ACCOUNT_LEN: usize = 216;
pub const SPL_MINT_DECIMALS_OFFSET: usize = 44;

#[derive(Debug, PartialEq)]
pub struct IncreaseLiquidityData {
    pub liquidity_amount: u128,
    pub token_max_a: u64,
    pub token_max_b: u64,
}

pub fn read_pubkey(rdr: &mut Cursor<&[u8]>) -> Result<Pubkey> {
    let mut buf = [0u8; 32];
    rdr.read_exact(&mut buf)?;
    Ok(Pubkey::new_from_array(buf))
}

fn check_discriminator(rdr: &mut Cursor<&[u8]>, account_name: &str) -> Result<()> {
    let mut actual = [0u8; 8];
    rdr.read_exact(&mut actual)?;

    if actual != account_discriminator(account_name) {
        return Err(anyhow!("Invalid account discriminator for {}", account_name));
    }
    Ok(())
}

pub fn decode_whirlpool(data: &[u8]) -> Result<Whirlpool> {
    let mut rdr = Cursor::new(data);
    check_discriminator(&mut rdr, "Whirlpool")?;

    Ok(Whirlpool {
        whirlpools_config: read_pubkey(&mut rdr)?,
        whirlpool_bump: [rdr.read_u8()?],
        tick_spacing: rdr.read_u16::<LittleEndian>()?,
        tick_spacing_seed: [rdr.read_u8()?, rdr.read_u8()?],
        fee_rate: rdr.read_u16::<LittleEndian>()?,
        protocol_fee_rate: rdr.read_u16::<LittleEndian>()?,
        liquidity: rdr.read_u128::<LittleEndian>()?,
        sqrt_price: rdr.read_u128::<LittleEndian>()?,
        tick_current_index: rdr.read_i32::<LittleEndian>()?,
        protocol_fee_owed_a: rdr.read_u64::<LittleEndian>()?,
        protocol_fee_owed_b: rdr.read_u64::<LittleEndian>()?,
        token_mint_a: read_pubkey(&mut rdr)?,
        token_vault_a: read_pubkey(&mut rdr)?,
        fee_growth_global_a: rdr.read_u128::<LittleEndian>()?,
        token_mint_b: read_pubkey(&mut rdr)?,
        token_vault_b: read_pubkey(&mut rdr)?,
        fee_growth_global_b: rdr.read_u128::<LittleEndian>()?,
    })
}

pub fn decode_position(data: &[u8]) -> Result<Position> {
    if data.len() < POSITION_ACCOUNT_LEN {
        return Err(anyhow!(
            "Position account too short: {} bytes",
            data.len()
        ));
    }

    let mut rdr = Cursor::new(data);
    check_discriminator(&mut rdr, "Position")?;

    Ok(Position {
        whirlpool: read_pubkey(&mut rdr)?,
        position_mint: read_pubkey(&mut rdr)?,
        liquidity: rdr.read_u128::<LittleEndian>()?,
        tick_lower_index: rdr.read_i32::<LittleEndian>()?,
        tick_upper_index: rdr.read_i32::<LittleEndian>()?,
        fee_growth_checkpoint_a: rdr.read_u128::<LittleEndian>()?,
        fee_owed_a: rdr.read_u64::<LittleEndian>()?,
        fee_growth_checkpoint_b: rdr.read_u128::<LittleEndian>()?,
        fee_owed_b: rdr.read_u64::<LittleEndian>()?,
        reward_infos: [
            read_position_reward_info(&mut rdr)?,
            read_position_reward_info(&mut rdr)?,
            read_position_reward_info(&mut rdr)?,
        ],
    })
}

fn read_position_reward_info(rdr: &mut Cursor<&[u8]>) -> Result<PositionRewardInfo> {
    Ok(PositionRewardInfo {
        growth_inside_checkpoint: rdr.read_u128::<LittleEndian>()?,
        amount_owed: rdr.read_u64::<LittleEndian>()?,
    })
}

pub fn decode_mint_decimals(data: &[u8]) -> Result<u8> {
    data.get(SPL_MINT_DECIMALS_OFFSET)
        .copied()
        .ok_or_else(|| anyhow!("Mint account too short: {} bytes", data.len()))
}

/// Anchor account discriminator: first 8 bytes of sha256("account:<Name>").
pub fn account_discriminator(name: &str) -> [u8; 8] {
    discriminator("account", name)
}

/// Anchor instruction discriminator: first 8 bytes of sha256("global:<name>").
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    discriminator("global", name)
}

fn discriminator(namespace: &str, name: &str) -> [u8; 8] {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b":");
    hasher.update(name.as_bytes());
    let result = hasher.finalize();
    let mut discriminator = [0u8; 8];
    discriminator.copy_from_slice(&result[..8]);
    discriminator
}

pub fn encode_open_position_data(position_bump: u8, tick_lower: i32, tick_upper: i32) -> Vec<u8> {
    let mut data = instruction_discriminator("open_position").to_vec();
    data.push(position_bump);
    // Writes into a Vec cannot fail.
    let _ = data.write_i32::<LittleEndian>(tick_lower);
    let _ = data.write_i32::<LittleEndian>(tick_upper);
    data
}

pub fn encode_increase_liquidity_data(
    liquidity_amount: u128,
    token_max_a: u64,
    token_max_b: u64,
) -> Vec<u8> {
    let mut data = instruction_discriminator("increase_liquidity").to_vec();
    let _ = data.write_u128::<LittleEndian>(liquidity_amount);
    let _ = data.write_u64::<LittleEndian>(token_max_a);
    let _ = data.write_u64::<LittleEndian>(token_max_b);
    data
}

pub fn encode_initialize_tick_array_data(start_tick_index: i32) -> Vec<u8> {
    let mut data = instruction_discriminator("initialize_tick_array").to_vec();
    let _ = data.write_i32::<LittleEndian>(start_tick_index);
    data
}

pub fn decode_increase_liquidity_data(data: &[u8]) -> Result<IncreaseLiquidityData> {
    let mut rdr = Cursor::new(data);

    let mut actual = [0u8; 8];
    rdr.read_exact(&mut actual)?;
    if actual != instruction_discriminator("increase_liquidity") {
        return Err(anyhow!("Not an increase_liquidity instruction"));
    }

    Ok(IncreaseLiquidityData {
        liquidity_amount: rdr.read_u128::<LittleEndian>()?,
        token_max_a: rdr.read_u64::<LittleEndian>()?,
        token_max_b: rdr.read_u64::<LittleEndian>()?,
    })
}

#[cfg(test)]
pub mod tests {
    use super::*;

    pub fn encode_whirlpool(whirlpool: &Whirlpool) -> Vec<u8> {
        let mut data = account_discriminator("Whirlpool").to_vec();
        data.extend_from_slice(whirlpool.whirlpools_config.as_ref());
        data.push(whirlpool.whirlpool_bump[0]);
        data.write_u16::<LittleEndian>(whirlpool.tick_spacing).unwrap();
        data.extend_from_slice(&whirlpool.tick_spacing_seed);
        data.write_u16::<LittleEndian>(whirlpool.fee_rate).unwrap();
        data.write_u16::<LittleEndian>(whirlpool.protocol_fee_rate).unwrap();
        data.write_u128::<LittleEndian>(whirlpool.liquidity).unwrap();
        data.write_u128::<LittleEndian>(whirlpool.sqrt_price).unwrap();
        data.write_i32::<LittleEndian>(whirlpool.tick_current_index).unwrap();
        data.write_u64::<LittleEndian>(whirlpool.protocol_fee_owed_a).unwrap();
        data.write_u64::<LittleEndian>(whirlpool.protocol_fee_owed_b).unwrap();
        data.extend_from_slice(whirlpool.token_mint_a.as_ref());
        data.extend_from_slice(whirlpool.token_vault_a.as_ref());
        data.write_u128::<LittleEndian>(whirlpool.fee_growth_global_a).unwrap();
        data.extend_from_slice(whirlpool.token_mint_b.as_ref());
        data.extend_from_slice(whirlpool.token_vault_b.as_ref());
        data.write_u128::<LittleEndian>(whirlpool.fee_growth_global_b).unwrap();
        // Reward infos and the rest of the 653-byte account are not read.
        data.resize(653, 0);
        data
    }

    pub fn encode_position(position: &Position) -> Vec<u8> {
        let mut data = account_discriminator("Position").to_vec();
        data.extend_from_slice(position.whirlpool.as_ref());
        data.extend_from_slice(position.position_mint.as_ref());
        data.write_u128::<LittleEndian>(position.liquidity).unwrap();
        data.write_i32::<LittleEndian>(position.tick_lower_index).unwrap();
        data.write_i32::<LittleEndian>(position.tick_upper_index).unwrap();
        data.write_u128::<LittleEndian>(position.fee_growth_checkpoint_a).unwrap();
        data.write_u64::<LittleEndian>(position.fee_owed_a).unwrap();
        data.write_u128::<LittleEndian>(position.fee_growth_checkpoint_b).unwrap();
        data.write_u64::<LittleEndian>(position.fee_owed_b).unwrap();
        for reward in &position.reward_infos {
            data.write_u128::<LittleEndian>(reward.growth_inside_checkpoint).unwrap();
            data.write_u64::<LittleEndian>(reward.amount_owed).unwrap();
        }
        data
    }

    #[test]
    fn test_increase_liquidity_matches_onchain_payload() {
        // Instruction data of a real increase_liquidity call on mainnet.
        let onchain = "3KLKPPgnNhbLEPrG4SnAHuz32CMyh9PqNtR4MvzWpxA9qgnNNVYKU6K";

        let encoded = encode_increase_liquidity_data(761851408, 374597936, 1230032);

        assert_eq!(bs58::encode(&encoded).into_string(), onchain);

        let decoded =
            decode_increase_liquidity_data(&bs58::decode(onchain).into_vec().unwrap()).unwrap();
        assert_eq!(
            decoded,
            IncreaseLiquidityData {
                liquidity_amount: 761851408,
                token_max_a: 374597936,
                token_max_b: 1230032,
            }
        );
    }

    #[test]
    fn test_instruction_discriminators() {
        assert_eq!(
            instruction_discriminator("open_position"),
            [135, 128, 47, 77, 15, 152, 240, 49]
        );
        assert_eq!(
            instruction_discriminator("initialize_tick_array"),
            [11, 188, 193, 214, 141, 91, 149, 184]
        );
        assert_eq!(
            account_discriminator("Position"),
            [170, 188, 143, 228, 122, 64, 247, 208]
        );
    }

    #[test]
    fn test_open_position_layout() {
        let data = encode_open_position_data(254, -20328, -19732);

        assert_eq!(data.len(), 8 + 1 + 4 + 4);
        assert_eq!(data[8], 254);
        assert_eq!(i32::from_le_bytes(data[9..13].try_into().unwrap()), -20328);
        assert_eq!(i32::from_le_bytes(data[13..17].try_into().unwrap()), -19732);
    }

    #[test]
    fn test_decode_whirlpool() {
        let whirlpool = Whirlpool {
            whirlpools_config: Pubkey::new_unique(),
            whirlpool_bump: [255],
            tick_spacing: 64,
            tick_spacing_seed: [64, 0],
            fee_rate: 3000,
            protocol_fee_rate: 1300,
            liquidity: 123_456_789,
            sqrt_price: 6787344857950480093,
            tick_current_index: -19998,
            protocol_fee_owed_a: 1,
            protocol_fee_owed_b: 2,
            token_mint_a: Pubkey::new_unique(),
            token_vault_a: Pubkey::new_unique(),
            fee_growth_global_a: 3,
            token_mint_b: Pubkey::new_unique(),
            token_vault_b: Pubkey::new_unique(),
            fee_growth_global_b: 4,
        };

        let decoded = decode_whirlpool(&encode_whirlpool(&whirlpool)).unwrap();

        assert_eq!(decoded.tick_spacing, 64);
        assert_eq!(decoded.tick_current_index, -19998);
        assert_eq!(decoded.sqrt_price, 6787344857950480093);
        assert_eq!(decoded.token_mint_b, whirlpool.token_mint_b);
        assert_eq!(decoded.token_vault_a, whirlpool.token_vault_a);
    }

    #[test]
    fn test_decode_position_rejects_foreign_accounts() {
        let mut data = vec![0u8; POSITION_ACCOUNT_LEN];
        data[..8].copy_from_slice(&account_discriminator("TickArray"));

        assert!(decode_position(&data).is_err());
        assert!(decode_position(&data[..100]).is_err());
    }
}
