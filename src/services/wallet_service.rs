use alloy::signers::local::{coins_bip39::English, MnemonicBuilder};
use anyhow::{anyhow, Context, Result};
use log::debug;
use solana_sdk::derivation_path::DerivationPath;
use solana_sdk::signer::keypair::{
    generate_seed_from_seed_phrase_and_passphrase, keypair_from_seed_and_derivation_path,
};

use crate::models::wallet_model::Wallet;

/// Derives wallet `index`: Solana at m/44'/501'/{index}'/0', EVM at
/// m/44'/60'/0'/0/{index}.
pub fn derive_wallet(mnemonic: &str, index: u32) -> Result<Wallet> {
    let evm = MnemonicBuilder::<English>::default()
        .phrase(mnemonic)
        .index(index)
        .context("Invalid EVM derivation index")?
        .build()
        .context("Failed to derive EVM signer from WALLET_MNEMONIC")?;

    let seed = generate_seed_from_seed_phrase_and_passphrase(mnemonic, "");
    let path = DerivationPath::new_bip44(Some(index), Some(0));
    let solana = keypair_from_seed_and_derivation_path(&seed, Some(path))
        .map_err(|e| anyhow!("Failed to derive Solana keypair {}: {}", index, e))?;

    let wallet = Wallet { index, solana, evm };
    debug!("Derived {:?}", wallet);
    Ok(wallet)
}

/// Derives only the wallets in `[start, end)`.
pub fn derive_wallet_range(mnemonic: &str, start: u32, end: u32) -> Result<Vec<Wallet>> {
    if start >= end {
        return Err(anyhow!("Empty wallet range {}..{}", start, end));
    }
    (start..end)
        .map(|index| derive_wallet(mnemonic, index))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::TEST_MNEMONIC;
    use std::collections::HashSet;

    #[test]
    fn test_evm_derivation_matches_well_known_account() {
        let wallet = derive_wallet(TEST_MNEMONIC, 0).unwrap();
        assert_eq!(
            wallet.evm_address().to_string(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );

        let wallet = derive_wallet(TEST_MNEMONIC, 1).unwrap();
        assert_eq!(
            wallet.evm_address().to_string(),
            "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"
        );
    }

    #[test]
    fn test_derivation_is_deterministic_and_distinct() {
        let first = derive_wallet_range(TEST_MNEMONIC, 0, 3).unwrap();
        let second = derive_wallet_range(TEST_MNEMONIC, 0, 3).unwrap();

        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.solana_address(), b.solana_address());
            assert_eq!(a.evm_address(), b.evm_address());
        }

        let solana: HashSet<_> = first.iter().map(|w| w.solana_address()).collect();
        assert_eq!(solana.len(), 3);
    }

    #[test]
    fn test_invalid_mnemonic_is_rejected() {
        assert!(derive_wallet("not a real phrase at all", 0).is_err());
        assert!(derive_wallet_range(TEST_MNEMONIC, 5, 5).is_err());
    }
}
