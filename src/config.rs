use anyhow::{anyhow, Context, Result};
use regex::Regex;
use solana_sdk::pubkey::Pubkey;
use std::env;
use std::str::FromStr;

pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
pub const WHIRLPOOL_PROGRAM_ID: &str = "whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc";
pub const LIFI_SOLANA_CHAIN_ID: u64 = 1151111081099710;
pub const ARBITRUM_CHAIN_ID: u64 = 42161;
pub const ARBITRUM_USDC: &str = "0xaf88d065e77c8cC2239327C5EDb3A432268e5831";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPool {
    UsdcPengu,
    UsdcWsol,
}

impl TargetPool {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pengu" | "usdc_pengu" => Ok(TargetPool::UsdcPengu),
            "wsol" | "sol" | "usdc_wsol" => Ok(TargetPool::UsdcWsol),
            _ => Err(anyhow!("Invalid target pool: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExchangeCredentials {
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub solana_rpc_url: String,
    pub solana_ws_url: String,
    pub whirlpool_program_id: Pubkey,
    pub usdc_mint: Pubkey,
    pub usdc_pengu_pool: Option<Pubkey>,
    pub usdc_wsol_pool: Option<Pubkey>,
    pub target_pool: TargetPool,
    pub slippage_bps: u16,
    pub lp_lower_pct: f64,
    pub lp_upper_pct: f64,
    pub allow_approximate_quote: bool,
    pub dry_run: bool,

    pub wallet_mnemonic: String,
    pub wallet_count: u32,
    pub wallet_concurrency: usize,
    pub wallet_delay_min_secs: u64,
    pub wallet_delay_max_secs: u64,

    pub enable_cex: bool,
    pub bybit: Option<ExchangeCredentials>,
    pub binance: Option<ExchangeCredentials>,
    pub allow_unrestricted_api_keys: bool,
    pub withdraw_min_usdc: f64,
    pub withdraw_max_usdc: f64,
    pub bybit_withdraw_chain: String,
    pub binance_withdraw_network: String,

    pub evm_rpc_url: String,
    pub evm_chain_id: u64,
    pub evm_usdc_address: String,
    pub lifi_api_key: Option<String>,
    pub bridge_preferred: Option<String>,
    pub bridge_max_fee_pct: f64,
    pub bridge_timeout_secs: u64,

    pub jupiter_api_key: Option<String>,

    pub monitor_interval_secs: u64,
    pub alert_cooldown_secs: u64,
    pub min_sol_balance: f64,
    pub min_usdc_to_deploy: f64,
    pub alert_webhook_url: Option<String>,

    pub database_url: Option<String>,
}

fn required(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("{} must be set", key))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Failed to parse {}", key)),
        None => Ok(default),
    }
}

fn parse_pubkey(key: &str) -> Result<Option<Pubkey>> {
    optional(key)
        .map(|raw| {
            Pubkey::from_str(raw.trim()).with_context(|| format!("{} is not a valid address", key))
        })
        .transpose()
}

fn credentials(key_var: &str, secret_var: &str) -> Option<ExchangeCredentials> {
    match (optional(key_var), optional(secret_var)) {
        (Some(api_key), Some(api_secret)) => Some(ExchangeCredentials {
            api_key,
            api_secret,
        }),
        _ => None,
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let solana_rpc_url = required("SOLANA_RPC_URL")?;
        let solana_ws_url = optional("SOLANA_WS_URL").unwrap_or_else(|| {
            solana_rpc_url
                .replacen("https://", "wss://", 1)
                .replacen("http://", "ws://", 1)
        });

        let config = Self {
            solana_rpc_url,
            solana_ws_url,
            whirlpool_program_id: Pubkey::from_str(WHIRLPOOL_PROGRAM_ID)?,
            usdc_mint: Pubkey::from_str(USDC_MINT)?,
            usdc_pengu_pool: parse_pubkey("ORCA_USDC_PENGU_POOL")?,
            usdc_wsol_pool: parse_pubkey("ORCA_USDC_WSOL_POOL")?,
            target_pool: TargetPool::from_str(
                &optional("TARGET_POOL").unwrap_or_else(|| "pengu".to_string()),
            )?,
            slippage_bps: parse_or("SLIPPAGE_BPS", 100)?,
            lp_lower_pct: parse_or("LP_LOWER_PCT", 15.0)?,
            lp_upper_pct: parse_or("LP_UPPER_PCT", 15.0)?,
            allow_approximate_quote: parse_or("ALLOW_APPROXIMATE_QUOTE", false)?,
            dry_run: parse_or("DRY_RUN", false)?,

            wallet_mnemonic: required("WALLET_MNEMONIC")?,
            wallet_count: parse_or("WALLET_COUNT", 100)?,
            wallet_concurrency: parse_or("WALLET_CONCURRENCY", 1)?,
            wallet_delay_min_secs: parse_or("WALLET_DELAY_MIN_SECS", 30)?,
            wallet_delay_max_secs: parse_or("WALLET_DELAY_MAX_SECS", 120)?,

            enable_cex: parse_or("ENABLE_CEX", false)?,
            bybit: credentials("BYBIT_API_KEY", "BYBIT_API_SECRET"),
            binance: credentials("BINANCE_API_KEY", "BINANCE_API_SECRET"),
            allow_unrestricted_api_keys: parse_or("ALLOW_UNRESTRICTED_API_KEYS", false)?,
            withdraw_min_usdc: parse_or("WITHDRAW_MIN_USDC", 50.0)?,
            withdraw_max_usdc: parse_or("WITHDRAW_MAX_USDC", 100.0)?,
            bybit_withdraw_chain: optional("BYBIT_WITHDRAW_CHAIN")
                .unwrap_or_else(|| "ARBI".to_string()),
            binance_withdraw_network: optional("BINANCE_WITHDRAW_NETWORK")
                .unwrap_or_else(|| "ARBITRUM".to_string()),

            evm_rpc_url: optional("EVM_RPC_URL")
                .unwrap_or_else(|| "https://arb1.arbitrum.io/rpc".to_string()),
            evm_chain_id: parse_or("EVM_CHAIN_ID", ARBITRUM_CHAIN_ID)?,
            evm_usdc_address: optional("EVM_USDC_ADDRESS")
                .unwrap_or_else(|| ARBITRUM_USDC.to_string()),
            lifi_api_key: optional("LIFI_API_KEY"),
            bridge_preferred: Some(
                optional("BRIDGE_PREFERRED").unwrap_or_else(|| "mayan".to_string()),
            )
            .filter(|b| b != "any"),
            bridge_max_fee_pct: parse_or("BRIDGE_MAX_FEE_PCT", 1.0)?,
            bridge_timeout_secs: parse_or("BRIDGE_TIMEOUT_SECS", 1800)?,

            jupiter_api_key: optional("JUPITER_API_KEY"),

            monitor_interval_secs: parse_or("MONITOR_INTERVAL_SECS", 300)?,
            alert_cooldown_secs: parse_or("ALERT_COOLDOWN_SECS", 3600)?,
            min_sol_balance: parse_or("MIN_SOL_BALANCE", 0.05)?,
            min_usdc_to_deploy: parse_or("MIN_USDC_TO_DEPLOY", 10.0)?,
            alert_webhook_url: optional("ALERT_WEBHOOK_URL"),

            database_url: optional("DATABASE_URL"),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_address().is_none() {
            return Err(anyhow!(
                "No pool address configured for {:?}; set ORCA_USDC_PENGU_POOL or ORCA_USDC_WSOL_POOL",
                self.target_pool
            ));
        }
        if self.slippage_bps > 10_000 {
            return Err(anyhow!("SLIPPAGE_BPS must be at most 10000"));
        }
        for (name, pct) in [
            ("LP_LOWER_PCT", self.lp_lower_pct),
            ("LP_UPPER_PCT", self.lp_upper_pct),
            ("BRIDGE_MAX_FEE_PCT", self.bridge_max_fee_pct),
        ] {
            if !(0.0..=100.0).contains(&pct) {
                return Err(anyhow!("{} must be within 0..=100, got {}", name, pct));
            }
        }
        if self.wallet_count == 0 {
            return Err(anyhow!("WALLET_COUNT must be positive"));
        }
        if self.wallet_concurrency == 0 {
            return Err(anyhow!("WALLET_CONCURRENCY must be positive"));
        }
        if self.wallet_mnemonic.split_whitespace().count() < 12 {
            return Err(anyhow!("WALLET_MNEMONIC must contain at least 12 words"));
        }
        if self.withdraw_min_usdc <= 0.0 || self.withdraw_min_usdc > self.withdraw_max_usdc {
            return Err(anyhow!(
                "Withdrawal bounds must satisfy 0 < min <= max, got {}..{}",
                self.withdraw_min_usdc,
                self.withdraw_max_usdc
            ));
        }
        if self.wallet_delay_min_secs > self.wallet_delay_max_secs {
            return Err(anyhow!("WALLET_DELAY_MIN_SECS exceeds WALLET_DELAY_MAX_SECS"));
        }
        if !is_evm_address(&self.evm_usdc_address) {
            return Err(anyhow!(
                "EVM_USDC_ADDRESS is not a valid address: {}",
                self.evm_usdc_address
            ));
        }
        if self.enable_cex && self.bybit.is_none() && self.binance.is_none() {
            return Err(anyhow!(
                "ENABLE_CEX is set but neither Bybit nor Binance credentials are configured"
            ));
        }
        Ok(())
    }

    pub fn pool_address(&self) -> Option<Pubkey> {
        match self.target_pool {
            TargetPool::UsdcPengu => self.usdc_pengu_pool,
            TargetPool::UsdcWsol => self.usdc_wsol_pool,
        }
    }
}

pub fn is_evm_address(address: &str) -> bool {
    Regex::new(r"^0x[0-9a-fA-F]{40}$")
        .map(|re| re.is_match(address))
        .unwrap_or(false)
}
