use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::transports::http::reqwest::Url;
use async_trait::async_trait;
use log::info;
use std::str::FromStr;

use super::lifi_api::SourceTransaction;
use crate::utils::error::BridgeError;

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }
}

/// Source-chain side of a bridge transfer.
#[async_trait]
pub trait EvmExecutor: Send + Sync {
    async fn token_balance(&self, token: Address, owner: Address) -> Result<u64, BridgeError>;
    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<u64, BridgeError>;
    async fn approve(
        &self,
        signer: &PrivateKeySigner,
        token: Address,
        spender: Address,
        amount: u64,
    ) -> Result<String, BridgeError>;
    /// Sends and waits for the receipt. Returns the transaction hash.
    async fn send_transaction(
        &self,
        signer: &PrivateKeySigner,
        transaction: &SourceTransaction,
    ) -> Result<String, BridgeError>;
}

pub fn parse_address(raw: &str) -> Result<Address, BridgeError> {
    Address::from_str(raw).map_err(|e| BridgeError::SourceChain(format!("bad address {}: {}", raw, e)))
}

fn parse_hex_u64(raw: &str) -> Option<u64> {
    match raw.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

fn read_error(e: impl std::fmt::Display) -> BridgeError {
    BridgeError::Network(e.to_string())
}

fn send_error(e: impl std::fmt::Display) -> BridgeError {
    let message = e.to_string();
    if message.to_lowercase().contains("insufficient funds") {
        BridgeError::InsufficientBalance(message)
    } else {
        BridgeError::SourceChain(message)
    }
}

fn to_u64(value: U256) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

pub struct AlloyEvmExecutor {
    rpc_url: Url,
}

impl AlloyEvmExecutor {
    pub fn new(rpc_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            rpc_url: rpc_url.parse()?,
        })
    }
}

#[async_trait]
impl EvmExecutor for AlloyEvmExecutor {
    async fn token_balance(&self, token: Address, owner: Address) -> Result<u64, BridgeError> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        let erc20 = IERC20::new(token, provider);
        let balance = erc20.balanceOf(owner).call().await.map_err(read_error)?._0;
        Ok(to_u64(balance))
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<u64, BridgeError> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        let erc20 = IERC20::new(token, provider);
        let allowance = erc20
            .allowance(owner, spender)
            .call()
            .await
            .map_err(read_error)?
            ._0;
        Ok(to_u64(allowance))
    }

    async fn approve(
        &self,
        signer: &PrivateKeySigner,
        token: Address,
        spender: Address,
        amount: u64,
    ) -> Result<String, BridgeError> {
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(EthereumWallet::from(signer.clone()))
            .on_http(self.rpc_url.clone());
        let erc20 = IERC20::new(token, provider);

        let receipt = erc20
            .approve(spender, U256::from(amount))
            .send()
            .await
            .map_err(send_error)?
            .get_receipt()
            .await
            .map_err(send_error)?;
        if !receipt.status() {
            return Err(BridgeError::SourceChain(format!(
                "approve {} reverted",
                receipt.transaction_hash
            )));
        }

        info!("Approved {} for {} on {}", amount, spender, token);
        Ok(receipt.transaction_hash.to_string())
    }

    async fn send_transaction(
        &self,
        signer: &PrivateKeySigner,
        transaction: &SourceTransaction,
    ) -> Result<String, BridgeError> {
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(EthereumWallet::from(signer.clone()))
            .on_http(self.rpc_url.clone());

        let data = Bytes::from_str(&transaction.data)
            .map_err(|e| BridgeError::SourceChain(format!("bad calldata: {}", e)))?;
        let value = U256::from_str(&transaction.value)
            .map_err(|e| BridgeError::SourceChain(format!("bad value: {}", e)))?;

        let mut request = TransactionRequest::default()
            .with_to(parse_address(&transaction.to)?)
            .with_input(data)
            .with_value(value);
        if let Some(gas_limit) = transaction.gas_limit.as_deref().and_then(parse_hex_u64) {
            request = request.with_gas_limit(gas_limit);
        }

        let pending = provider
            .send_transaction(request)
            .await
            .map_err(send_error)?;
        let tx_hash = pending.tx_hash().to_string();
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| BridgeError::SourceUnconfirmed {
                tx_hash: tx_hash.clone(),
                reason: e.to_string(),
            })?;
        if !receipt.status() {
            return Err(BridgeError::SourceChain(format!(
                "bridge transaction {} reverted",
                receipt.transaction_hash
            )));
        }

        Ok(receipt.transaction_hash.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gas_limit_parsing() {
        assert_eq!(parse_hex_u64("0x1e8480"), Some(2_000_000));
        assert_eq!(parse_hex_u64("21000"), Some(21_000));
        assert_eq!(parse_hex_u64("0xzz"), None);
    }

    #[test]
    fn test_insufficient_funds_is_classified() {
        assert!(matches!(
            send_error("insufficient funds for gas * price + value"),
            BridgeError::InsufficientBalance(_)
        ));
        assert!(matches!(
            send_error("nonce too low"),
            BridgeError::SourceChain(_)
        ));
    }
}
