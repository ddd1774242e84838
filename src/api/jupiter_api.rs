use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use log::debug;
use reqwest::StatusCode;
use serde_json::Value;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;

use crate::utils::error::SwapError;

const JUPITER_V6_API: &str = "https://quote-api.jup.ag/v6";
const JUPITER_KEYED_API: &str = "https://api.jup.ag/swap/v1";

#[derive(Debug, Clone)]
pub struct SwapQuote {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub in_amount: u64,
    pub out_amount: u64,
    pub other_amount_threshold: u64,
    pub price_impact_pct: f64,
    /// The quote exactly as returned; the swap endpoint wants it back.
    pub raw: Value,
}

#[async_trait]
pub trait SwapApi: Send + Sync {
    async fn quote(
        &self,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<SwapQuote, SwapError>;

    /// Unsigned transaction for `quote`, with `user` as fee payer.
    async fn swap_transaction(
        &self,
        quote: &SwapQuote,
        user: &Pubkey,
    ) -> Result<VersionedTransaction, SwapError>;
}

fn amount(raw: &Value, key: &str) -> Result<u64, SwapError> {
    raw[key]
        .as_str()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| SwapError::InvalidTransaction(format!("quote missing {}", key)))
}

pub fn parse_quote(input_mint: Pubkey, output_mint: Pubkey, raw: Value) -> Result<SwapQuote, SwapError> {
    Ok(SwapQuote {
        input_mint,
        output_mint,
        in_amount: amount(&raw, "inAmount")?,
        out_amount: amount(&raw, "outAmount")?,
        other_amount_threshold: amount(&raw, "otherAmountThreshold")?,
        price_impact_pct: raw["priceImpactPct"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0),
        raw,
    })
}

pub fn decode_swap_transaction(encoded: &str) -> Result<VersionedTransaction, SwapError> {
    let bytes = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| SwapError::InvalidTransaction(format!("bad base64: {}", e)))?;
    bincode::deserialize(&bytes)
        .map_err(|e| SwapError::InvalidTransaction(format!("bad transaction bytes: {}", e)))
}

pub struct JupiterApi {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl JupiterApi {
    pub fn new(api_key: Option<String>) -> Self {
        let base_url = if api_key.is_some() {
            JUPITER_KEYED_API
        } else {
            JUPITER_V6_API
        };
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
            api_key,
        }
    }

    fn with_key(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("x-api-key", key),
            None => builder,
        }
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, SwapError> {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(SwapError::Network(format!("Jupiter returned HTTP {}", status)));
        }
        let body: Value = response.json().await?;
        if !status.is_success() || body.get("error").is_some() {
            let message = body["error"].as_str().unwrap_or("unknown error").to_string();
            let code = body["errorCode"].as_str().unwrap_or_default();
            return Err(match code {
                "INSUFFICIENT_BALANCE" => SwapError::InsufficientBalance(message),
                "SLIPPAGE_TOLERANCE_EXCEEDED" => SwapError::Slippage(message),
                _ => SwapError::InvalidTransaction(format!("{} {}", code, message)),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl SwapApi for JupiterApi {
    async fn quote(
        &self,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<SwapQuote, SwapError> {
        let response = self
            .with_key(self.client.get(format!("{}/quote", self.base_url)))
            .query(&[
                ("inputMint", input_mint.to_string()),
                ("outputMint", output_mint.to_string()),
                ("amount", amount.to_string()),
                ("slippageBps", slippage_bps.to_string()),
            ])
            .send()
            .await?;
        let body = Self::read_json(response).await?;
        debug!("Jupiter quote: {}", body);

        parse_quote(*input_mint, *output_mint, body)
    }

    async fn swap_transaction(
        &self,
        quote: &SwapQuote,
        user: &Pubkey,
    ) -> Result<VersionedTransaction, SwapError> {
        let response = self
            .with_key(self.client.post(format!("{}/swap", self.base_url)))
            .json(&serde_json::json!({
                "quoteResponse": quote.raw,
                "userPublicKey": user.to_string(),
                "wrapAndUnwrapSol": true,
                "dynamicComputeUnitLimit": true,
                "prioritizationFeeLamports": "auto"
            }))
            .send()
            .await?;
        let body = Self::read_json(response).await?;

        let encoded = body["swapTransaction"]
            .as_str()
            .ok_or_else(|| SwapError::InvalidTransaction("no swapTransaction in response".into()))?;
        decode_swap_transaction(encoded)
    }
}
