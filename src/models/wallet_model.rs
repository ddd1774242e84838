use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::fmt;

pub struct Wallet {
    pub index: u32,
    pub solana: Keypair,
    pub evm: PrivateKeySigner,
}

impl Wallet {
    pub fn solana_address(&self) -> Pubkey {
        self.solana.pubkey()
    }

    pub fn evm_address(&self) -> Address {
        self.evm.address()
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("index", &self.index)
            .field("solana", &self.solana_address())
            .field("evm", &self.evm_address())
            .finish()
    }
}

/// One wallet's holdings as seen by a monitor tick. Token amounts are in
/// whole units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WalletBalances {
    pub sol: f64,
    pub usdc: f64,
    /// USDC still on the bridge source chain.
    pub evm_usdc: f64,
    pub target_token: f64,
    pub open_positions: usize,
    pub positions_out_of_range: usize,
}
