use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use log::{debug, warn};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::{Transaction, VersionedTransaction};
use std::str::FromStr;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::utils::error::RpcError;

pub mod constants {
    pub const CONFIRM_TIMEOUT_SECS: u64 = 60;
    pub const CONFIRM_POLL_MS: u64 = 1_000;
    pub const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;
    pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGMPFXZaAGjAfxpMJQtUvLS";
}

/// Result of an account read. A missing account is a normal answer,
/// not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountLookup {
    Found(Vec<u8>),
    NotFound,
}

impl AccountLookup {
    pub fn into_data(self) -> Option<Vec<u8>> {
        match self {
            AccountLookup::Found(data) => Some(data),
            AccountLookup::NotFound => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAccountInfo {
    pub address: Pubkey,
    pub mint: Pubkey,
    pub amount: u64,
    pub decimals: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureState {
    #[serde(default)]
    pub confirmation_status: Option<String>,
    #[serde(default)]
    pub err: Option<Value>,
}

impl SignatureState {
    pub fn is_confirmed(&self) -> bool {
        matches!(
            self.confirmation_status.as_deref(),
            Some("confirmed") | Some("finalized")
        )
    }
}

#[async_trait]
pub trait SolanaRpc: Send + Sync {
    async fn get_account(&self, address: &Pubkey) -> Result<AccountLookup, RpcError>;
    async fn get_latest_blockhash(&self) -> Result<Hash, RpcError>;
    async fn send_transaction(&self, transaction: &VersionedTransaction) -> Result<Signature, RpcError>;
    async fn get_signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureState>, RpcError>;
    async fn get_balance(&self, address: &Pubkey) -> Result<u64, RpcError>;
    async fn get_token_accounts_by_owner(
        &self,
        owner: &Pubkey,
    ) -> Result<Vec<TokenAccountInfo>, RpcError>;
    async fn get_minimum_balance_for_rent_exemption(&self, data_len: usize) -> Result<u64, RpcError>;
    async fn health(&self) -> Result<(), RpcError>;

    /// Sum of all the owner's token accounts for `mint`, in base units.
    async fn get_token_balance(&self, owner: &Pubkey, mint: &Pubkey) -> Result<u64, RpcError> {
        Ok(self
            .get_token_accounts_by_owner(owner)
            .await?
            .iter()
            .filter(|account| account.mint == *mint)
            .map(|account| account.amount)
            .sum())
    }
}

#[derive(Deserialize, Debug)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize, Debug)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize, Debug)]
struct WithContext<T> {
    value: T,
}

#[derive(Deserialize, Debug)]
struct AccountValue {
    data: (String, String),
}

#[derive(Deserialize, Debug)]
struct BlockhashValue {
    blockhash: String,
}

pub struct JsonRpcApi {
    client: reqwest::Client,
    url: String,
}

impl JsonRpcApi {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        debug!("RPC {} {}", method, params);

        let response = self
            .client
            .post(&self.url)
            .header("accept", "application/json")
            .header("content-type", "application/json")
            .json(&serde_json::json!({
                "id": 1,
                "jsonrpc": "2.0",
                "method": method,
                "params": params
            }))
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(RpcError::RateLimited);
        }
        if response.status().is_server_error() {
            return Err(RpcError::Transport(format!(
                "{} returned HTTP {}",
                method,
                response.status()
            )));
        }

        let body: RpcResponse<T> = response.json().await?;
        if let Some(error) = body.error {
            return Err(RpcError::Response {
                code: error.code,
                message: error.message,
            });
        }
        body.result
            .ok_or_else(|| RpcError::Decode(format!("{} returned no result", method)))
    }
}

fn parse_pubkey(raw: &str) -> Result<Pubkey, RpcError> {
    Pubkey::from_str(raw).map_err(|e| RpcError::Decode(format!("bad pubkey {}: {}", raw, e)))
}

fn parse_token_account(entry: &Value) -> Result<TokenAccountInfo, RpcError> {
    let address = entry["pubkey"]
        .as_str()
        .ok_or_else(|| RpcError::Decode("token account without pubkey".to_string()))?;
    let info = &entry["account"]["data"]["parsed"]["info"];
    let mint = info["mint"]
        .as_str()
        .ok_or_else(|| RpcError::Decode(format!("token account {} without mint", address)))?;
    let amount = info["tokenAmount"]["amount"]
        .as_str()
        .and_then(|raw| raw.parse::<u64>().ok())
        .ok_or_else(|| RpcError::Decode(format!("token account {} without amount", address)))?;
    let decimals = info["tokenAmount"]["decimals"]
        .as_u64()
        .ok_or_else(|| RpcError::Decode(format!("token account {} without decimals", address)))?;

    Ok(TokenAccountInfo {
        address: parse_pubkey(address)?,
        mint: parse_pubkey(mint)?,
        amount,
        decimals: decimals as u8,
    })
}

#[async_trait]
impl SolanaRpc for JsonRpcApi {
    async fn get_account(&self, address: &Pubkey) -> Result<AccountLookup, RpcError> {
        let response: WithContext<Option<AccountValue>> = self
            .call(
                "getAccountInfo",
                serde_json::json!([address.to_string(), {"encoding": "base64", "commitment": "confirmed"}]),
            )
            .await?;

        match response.value {
            Some(account) => general_purpose::STANDARD
                .decode(&account.data.0)
                .map(AccountLookup::Found)
                .map_err(|e| RpcError::Decode(e.to_string())),
            None => Ok(AccountLookup::NotFound),
        }
    }

    async fn get_latest_blockhash(&self) -> Result<Hash, RpcError> {
        let response: WithContext<BlockhashValue> = self
            .call(
                "getLatestBlockhash",
                serde_json::json!([{"commitment": "confirmed"}]),
            )
            .await?;
        Hash::from_str(&response.value.blockhash).map_err(|e| RpcError::Decode(e.to_string()))
    }

    async fn send_transaction(&self, transaction: &VersionedTransaction) -> Result<Signature, RpcError> {
        let bytes = bincode::serialize(transaction).map_err(|e| RpcError::Decode(e.to_string()))?;
        let encoded = general_purpose::STANDARD.encode(bytes);

        let signature: String = self
            .call(
                "sendTransaction",
                serde_json::json!([encoded, {
                    "encoding": "base64",
                    "preflightCommitment": "confirmed",
                    "maxRetries": 3
                }]),
            )
            .await?;
        Signature::from_str(&signature).map_err(|e| RpcError::Decode(e.to_string()))
    }

    async fn get_signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureState>, RpcError> {
        let mut response: WithContext<Vec<Option<SignatureState>>> = self
            .call(
                "getSignatureStatuses",
                serde_json::json!([[signature.to_string()], {"searchTransactionHistory": false}]),
            )
            .await?;
        Ok(response.value.pop().flatten())
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64, RpcError> {
        let response: WithContext<u64> = self
            .call(
                "getBalance",
                serde_json::json!([address.to_string(), {"commitment": "confirmed"}]),
            )
            .await?;
        Ok(response.value)
    }

    async fn get_token_accounts_by_owner(
        &self,
        owner: &Pubkey,
    ) -> Result<Vec<TokenAccountInfo>, RpcError> {
        let response: WithContext<Vec<Value>> = self
            .call(
                "getTokenAccountsByOwner",
                serde_json::json!([
                    owner.to_string(),
                    {"programId": constants::TOKEN_PROGRAM_ID},
                    {"encoding": "jsonParsed", "commitment": "confirmed"}
                ]),
            )
            .await?;

        response.value.iter().map(parse_token_account).collect()
    }

    async fn get_minimum_balance_for_rent_exemption(&self, data_len: usize) -> Result<u64, RpcError> {
        self.call(
            "getMinimumBalanceForRentExemption",
            serde_json::json!([data_len]),
        )
        .await
    }

    async fn health(&self) -> Result<(), RpcError> {
        let status: String = self.call("getHealth", serde_json::json!([])).await?;
        if status == "ok" {
            Ok(())
        } else {
            Err(RpcError::Response {
                code: 0,
                message: format!("node unhealthy: {}", status),
            })
        }
    }
}

/// Polls signature status until confirmed, failed, or `timeout` elapses.
pub async fn confirm_transaction(
    rpc: &dyn SolanaRpc,
    signature: &Signature,
    timeout: Duration,
) -> Result<(), RpcError> {
    let deadline = Instant::now() + timeout;

    loop {
        match rpc.get_signature_status(signature).await {
            Ok(Some(state)) => {
                if let Some(err) = state.err {
                    return Err(RpcError::TransactionFailed {
                        signature: signature.to_string(),
                        reason: err.to_string(),
                    });
                }
                if state.is_confirmed() {
                    return Ok(());
                }
            }
            Ok(None) => {}
            Err(e) if e.is_retryable() => {
                warn!("Status poll for {} failed, will poll again: {}", signature, e);
            }
            Err(e) => return Err(e),
        }

        if Instant::now() >= deadline {
            return Err(RpcError::ConfirmationTimeout {
                signature: signature.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
        sleep(Duration::from_millis(constants::CONFIRM_POLL_MS)).await;
    }
}

/// Signs `instructions` against a fresh blockhash with `signers[0]` as fee
/// payer.
pub async fn build_signed_transaction(
    rpc: &dyn SolanaRpc,
    instructions: &[Instruction],
    signers: &[&Keypair],
) -> Result<VersionedTransaction, RpcError> {
    let payer = signers
        .first()
        .ok_or_else(|| RpcError::Signing("no fee payer".to_string()))?;
    let blockhash = rpc.get_latest_blockhash().await?;

    let mut transaction = Transaction::new_with_payer(instructions, Some(&payer.pubkey()));
    transaction
        .try_sign(signers, blockhash)
        .map_err(|e| RpcError::Signing(e.to_string()))?;
    Ok(VersionedTransaction::from(transaction))
}

pub async fn send_and_confirm(
    rpc: &dyn SolanaRpc,
    transaction: &VersionedTransaction,
    timeout: Duration,
) -> Result<Signature, RpcError> {
    let signature = rpc.send_transaction(transaction).await?;
    debug!("Sent transaction {}", signature);
    confirm_transaction(rpc, &signature, timeout).await?;
    Ok(signature)
}

pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / constants::LAMPORTS_PER_SOL
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory chain used by service tests.
    #[derive(Default)]
    pub struct MockRpc {
        pub accounts: Mutex<HashMap<Pubkey, Vec<u8>>>,
        pub token_accounts: Mutex<Vec<TokenAccountInfo>>,
        pub lamports: Mutex<u64>,
        /// Account reads that fail with a transport error before serving.
        pub transient_read_failures: AtomicUsize,
        /// Per-send outcomes, consumed in order. Empty means success.
        pub send_outcomes: Mutex<VecDeque<Result<(), RpcError>>>,
        pub sent: Mutex<Vec<VersionedTransaction>>,
        pub failed_signatures: Mutex<Vec<Signature>>,
        pub account_reads: AtomicUsize,
        /// Sends that report an error still create the accounts they sign for.
        pub land_failed_sends: AtomicBool,
    }

    impl MockRpc {
        pub fn with_account(self, address: Pubkey, data: Vec<u8>) -> Self {
            self.accounts.lock().unwrap().insert(address, data);
            self
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SolanaRpc for MockRpc {
        async fn get_account(&self, address: &Pubkey) -> Result<AccountLookup, RpcError> {
            self.account_reads.fetch_add(1, Ordering::SeqCst);
            let remaining = self.transient_read_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.transient_read_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(RpcError::Transport("connection reset".to_string()));
            }
            Ok(match self.accounts.lock().unwrap().get(address) {
                Some(data) => AccountLookup::Found(data.clone()),
                None => AccountLookup::NotFound,
            })
        }

        async fn get_latest_blockhash(&self) -> Result<Hash, RpcError> {
            Ok(Hash::new_unique())
        }

        async fn send_transaction(
            &self,
            transaction: &VersionedTransaction,
        ) -> Result<Signature, RpcError> {
            let signature = transaction.signatures[0];
            self.sent.lock().unwrap().push(transaction.clone());
            match self.send_outcomes.lock().unwrap().pop_front() {
                Some(Err(e)) => {
                    if self.land_failed_sends.load(Ordering::SeqCst) {
                        let signers = transaction.message.header().num_required_signatures as usize;
                        let mut accounts = self.accounts.lock().unwrap();
                        for key in transaction.message.static_account_keys().iter().take(signers).skip(1) {
                            accounts.entry(*key).or_insert_with(|| vec![0u8; 82]);
                        }
                    }
                    Err(e)
                }
                Some(Ok(())) | None => Ok(signature),
            }
        }

        async fn get_signature_status(
            &self,
            signature: &Signature,
        ) -> Result<Option<SignatureState>, RpcError> {
            let failed = self.failed_signatures.lock().unwrap().contains(signature);
            Ok(Some(SignatureState {
                confirmation_status: Some("confirmed".to_string()),
                err: failed.then(|| serde_json::json!({"InstructionError": [0, {"Custom": 6001}]})),
            }))
        }

        async fn get_balance(&self, _address: &Pubkey) -> Result<u64, RpcError> {
            Ok(*self.lamports.lock().unwrap())
        }

        async fn get_token_accounts_by_owner(
            &self,
            _owner: &Pubkey,
        ) -> Result<Vec<TokenAccountInfo>, RpcError> {
            Ok(self.token_accounts.lock().unwrap().clone())
        }

        async fn get_minimum_balance_for_rent_exemption(
            &self,
            _data_len: usize,
        ) -> Result<u64, RpcError> {
            Ok(1_461_600)
        }

        async fn health(&self) -> Result<(), RpcError> {
            Ok(())
        }
    }

    #[test]
    fn test_parse_json_parsed_token_account() {
        let entry = serde_json::json!({
            "pubkey": "7YttLkHDoNj9wyDur5pM1ejNaAvT9X4eqaYcHQqtj2G5",
            "account": {"data": {"parsed": {"info": {
                "mint": "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
                "tokenAmount": {"amount": "12500000", "decimals": 6, "uiAmount": 12.5}
            }}}}
        });

        let account = parse_token_account(&entry).unwrap();

        assert_eq!(account.amount, 12_500_000);
        assert_eq!(account.decimals, 6);
        assert_eq!(
            account.mint.to_string(),
            "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"
        );
    }

    #[tokio::test]
    async fn test_confirm_reports_on_chain_failure() {
        let rpc = MockRpc::default();
        let signature = Signature::new_unique();
        rpc.failed_signatures.lock().unwrap().push(signature);

        let result = confirm_transaction(&rpc, &signature, Duration::from_secs(1)).await;

        assert!(matches!(result, Err(RpcError::TransactionFailed { .. })));
    }

    #[tokio::test]
    async fn test_token_balance_sums_accounts_of_one_mint() {
        let rpc = MockRpc::default();
        let owner = Pubkey::new_unique();
        let usdc = Pubkey::new_unique();
        {
            let mut accounts = rpc.token_accounts.lock().unwrap();
            for (mint, amount) in [(usdc, 5), (usdc, 7), (Pubkey::new_unique(), 100)] {
                accounts.push(TokenAccountInfo {
                    address: Pubkey::new_unique(),
                    mint,
                    amount,
                    decimals: 6,
                });
            }
        }

        assert_eq!(rpc.get_token_balance(&owner, &usdc).await.unwrap(), 12);
    }
}
