use reqwest::StatusCode;
use std::error::Error;
use std::fmt;
use thiserror::Error;

#[derive(Debug)]
pub struct PriceCalcError(pub String);

impl fmt::Display for PriceCalcError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Price calculation error: {}", self.0)
    }
}

impl Error for PriceCalcError {}

/// Failures of the Solana JSON-RPC layer.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("RPC transport error: {0}")]
    Transport(String),
    #[error("RPC rate limit hit")]
    RateLimited,
    #[error("RPC error {code}: {message}")]
    Response { code: i64, message: String },
    #[error("Failed to decode RPC payload: {0}")]
    Decode(String),
    #[error("Transaction {signature} not confirmed within {timeout_secs}s")]
    ConfirmationTimeout { signature: String, timeout_secs: u64 },
    #[error("Transaction {signature} failed on-chain: {reason}")]
    TransactionFailed { signature: String, reason: String },
    #[error("Failed to sign transaction: {0}")]
    Signing(String),
}

impl RpcError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::Transport(_) | RpcError::RateLimited)
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(StatusCode::TOO_MANY_REQUESTS) => RpcError::RateLimited,
            _ if error.is_decode() => RpcError::Decode(error.to_string()),
            _ => RpcError::Transport(error.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Insufficient exchange balance: {0}")]
    InsufficientBalance(String),
    #[error("Exchange rate limit hit: {0}")]
    RateLimited(String),
    #[error("Exchange rejected credentials: {0}")]
    Unauthorized(String),
    #[error("Exchange rejected request: {0}")]
    Validation(String),
    #[error("Exchange account failed security check: {0}")]
    SecurityCheck(String),
    #[error("Exchange network error: {0}")]
    Network(String),
    #[error("Exchange not configured: {0}")]
    NotConfigured(String),
    #[error("Every exchange failed: {0}")]
    AllFailed(String),
    #[error("Withdrawal not observed on the source chain within {timeout_secs}s")]
    ArrivalTimeout { timeout_secs: u64 },
}

impl ExchangeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExchangeError::RateLimited(_) | ExchangeError::Network(_))
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(StatusCode::TOO_MANY_REQUESTS) => ExchangeError::RateLimited(error.to_string()),
            Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN) => {
                ExchangeError::Unauthorized(error.to_string())
            }
            Some(status) if status.is_client_error() => {
                ExchangeError::Validation(error.to_string())
            }
            _ => ExchangeError::Network(error.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Bridge network error: {0}")]
    Network(String),
    #[error("Insufficient balance for bridge: {0}")]
    InsufficientBalance(String),
    #[error("Bridge slippage or price moved: {0}")]
    Slippage(String),
    #[error("No bridge route found: {0}")]
    NoRoute(String),
    #[error("Bridge fee {fee_pct:.3}% exceeds ceiling {max_fee_pct:.3}%")]
    FeeTooHigh { fee_pct: f64, max_fee_pct: f64 },
    #[error("Bridge transfer failed: {0}")]
    Failed(String),
    #[error("Bridge arrival not observed within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
    #[error("Source chain transaction error: {0}")]
    SourceChain(String),
    #[error("Source tx {tx_hash} was broadcast but not confirmed: {reason}")]
    SourceUnconfirmed { tx_hash: String, reason: String },
    #[error("Bridge job {job_id} may have sent its source transaction; reconcile it before retrying")]
    NeedsReconciliation { job_id: String },
    #[error("Bridge source tx {tx_hash} was sent but job {job_id} was not saved: {reason}")]
    Unrecorded {
        job_id: String,
        tx_hash: String,
        reason: String,
    },
}

impl BridgeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::Network(_))
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS => {
                BridgeError::NoRoute(error.to_string())
            }
            _ => BridgeError::Network(error.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("Swap slippage exceeded: {0}")]
    Slippage(String),
    #[error("Insufficient balance for swap: {0}")]
    InsufficientBalance(String),
    #[error("Swap network error: {0}")]
    Network(String),
    #[error("Swap aggregator returned an unusable transaction: {0}")]
    InvalidTransaction(String),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl SwapError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SwapError::Network(_) => true,
            SwapError::Rpc(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SwapError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS => {
                SwapError::InvalidTransaction(error.to_string())
            }
            _ => SwapError::Network(error.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum LiquidityError {
    #[error("Invalid tick range: {0}")]
    InvalidTickRange(String),
    #[error("Insufficient balance for deposit: {0}")]
    InsufficientBalance(String),
    #[error("Liquidity network error: {0}")]
    Network(String),
    #[error("Refusing to submit a transaction built on an approximate quote")]
    ApproximateQuoteRefused,
    #[error("Failed to decode pool account: {0}")]
    Decode(String),
    #[error("Mint {0} is not one of the pool's tokens")]
    MintNotInPool(String),
    #[error("Position open stopped at {stage}: {reason}")]
    Incomplete { stage: String, reason: String },
    #[error(transparent)]
    Math(#[from] PriceCalcError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl LiquidityError {
    pub fn is_retryable(&self) -> bool {
        match self {
            LiquidityError::Network(_) => true,
            LiquidityError::Rpc(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Any step of the per-wallet pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Swap(#[from] SwapError),
    #[error(transparent)]
    Liquidity(#[from] LiquidityError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Config(_) => false,
            PipelineError::Exchange(e) => e.is_retryable(),
            PipelineError::Bridge(e) => e.is_retryable(),
            PipelineError::Swap(e) => e.is_retryable(),
            PipelineError::Liquidity(e) => e.is_retryable(),
            PipelineError::Rpc(e) => e.is_retryable(),
        }
    }
}
