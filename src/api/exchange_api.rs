use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::fmt;

use crate::utils::error::ExchangeError;

pub mod constants {
    pub const RECV_WINDOW_MS: u64 = 5_000;
    pub const WITHDRAW_COIN: &str = "USDC";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Bybit,
    Binance,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExchangeKind::Bybit => write!(f, "bybit"),
            ExchangeKind::Binance => write!(f, "binance"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalRequest {
    pub coin: String,
    pub address: String,
    pub amount: f64,
}

impl WithdrawalRequest {
    /// Amount as the exchanges expect it: two decimals, no exponent.
    pub fn amount_str(&self) -> String {
        format!("{:.2}", self.amount)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WithdrawalReceipt {
    pub exchange: ExchangeKind,
    pub withdrawal_id: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiKeyPermissions {
    pub can_withdraw: bool,
    pub ip_restricted: bool,
}

#[async_trait]
pub trait ExchangeApi: Send + Sync {
    fn kind(&self) -> ExchangeKind;
    async fn api_key_permissions(&self) -> Result<ApiKeyPermissions, ExchangeError>;
    async fn withdraw(&self, request: &WithdrawalRequest) -> Result<WithdrawalReceipt, ExchangeError>;
}

/// Lower-case hex HMAC-SHA256, the signature both exchanges accept.
pub fn sign_hmac_sha256(secret: &str, payload: &str) -> Result<String, ExchangeError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Unauthorized(format!("unusable API secret: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
