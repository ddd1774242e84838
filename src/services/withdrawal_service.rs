use log::{info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use tokio_retry::RetryIf;

use crate::api::binance_api::BinanceApi;
use crate::api::bybit_api::BybitApi;
use crate::api::exchange_api::{
    constants::WITHDRAW_COIN, ExchangeApi, ExchangeKind, WithdrawalRequest,
};
use crate::config::{is_evm_address, AppConfig};
use crate::utils::error::ExchangeError;
use crate::utils::retry::{constants::MAX_RETRIES, exponential_strategy, retry_transient};

#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalOutcome {
    pub success: bool,
    pub dry_run: bool,
    pub exchange_used: Option<ExchangeKind>,
    pub amount: f64,
    pub withdrawal_id: Option<String>,
    /// One entry per exchange that was tried and failed.
    pub errors: Vec<String>,
}

pub struct WithdrawalService {
    exchanges: Vec<Arc<dyn ExchangeApi>>,
    min_amount: f64,
    max_amount: f64,
    allow_unrestricted_keys: bool,
}

/// Uniform in `[min, max]`, rounded to cents and kept inside the bounds.
pub fn random_amount(min: f64, max: f64) -> f64 {
    let raw = if max > min {
        rand::thread_rng().gen_range(min..=max)
    } else {
        min
    };
    ((raw * 100.0).round() / 100.0).clamp(min, max)
}

impl WithdrawalService {
    pub fn new(
        exchanges: Vec<Arc<dyn ExchangeApi>>,
        min_amount: f64,
        max_amount: f64,
        allow_unrestricted_keys: bool,
    ) -> Self {
        Self {
            exchanges,
            min_amount,
            max_amount,
            allow_unrestricted_keys,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let mut exchanges: Vec<Arc<dyn ExchangeApi>> = Vec::new();
        if let Some(credentials) = &config.bybit {
            exchanges.push(Arc::new(BybitApi::new(
                credentials.clone(),
                &config.bybit_withdraw_chain,
            )));
        }
        if let Some(credentials) = &config.binance {
            exchanges.push(Arc::new(BinanceApi::new(
                credentials.clone(),
                &config.binance_withdraw_network,
            )));
        }

        Self::new(
            exchanges,
            config.withdraw_min_usdc,
            config.withdraw_max_usdc,
            config.allow_unrestricted_api_keys,
        )
    }

    async fn check_security(&self, exchange: &dyn ExchangeApi) -> Result<(), ExchangeError> {
        let permissions = retry_transient(
            &format!("{} key check", exchange.kind()),
            exponential_strategy(MAX_RETRIES),
            || exchange.api_key_permissions(),
        )
        .await?;

        if !permissions.can_withdraw {
            return Err(ExchangeError::SecurityCheck(
                "API key lacks withdrawal permission".to_string(),
            ));
        }
        if !permissions.ip_restricted && !self.allow_unrestricted_keys {
            return Err(ExchangeError::SecurityCheck(
                "API key is not IP-restricted".to_string(),
            ));
        }
        Ok(())
    }

    async fn withdraw_from(
        &self,
        exchange: &dyn ExchangeApi,
        request: &WithdrawalRequest,
        dry_run: bool,
    ) -> Result<Option<String>, ExchangeError> {
        self.check_security(exchange).await?;

        if dry_run {
            info!(
                "[dry-run] would withdraw {} {} from {} to {}",
                request.amount_str(),
                request.coin,
                exchange.kind(),
                request.address
            );
            return Ok(None);
        }

        // Only rate-limit rejections are retried: a network error after the
        // request left may already have created a withdrawal.
        let receipt = RetryIf::spawn(
            exponential_strategy(MAX_RETRIES),
            || exchange.withdraw(request),
            |e: &ExchangeError| matches!(e, ExchangeError::RateLimited(_)),
        )
        .await?;
        Ok(Some(receipt.withdrawal_id))
    }

    /// Picks an exchange at random and falls back to the others in turn.
    pub async fn withdraw_random(&self, address: &str, dry_run: bool) -> WithdrawalOutcome {
        let amount = random_amount(self.min_amount, self.max_amount);
        let mut outcome = WithdrawalOutcome {
            success: false,
            dry_run,
            exchange_used: None,
            amount,
            withdrawal_id: None,
            errors: Vec::new(),
        };

        if !is_evm_address(address) {
            outcome
                .errors
                .push(format!("invalid withdrawal address {}", address));
            return outcome;
        }
        if self.exchanges.is_empty() {
            outcome
                .errors
                .push(ExchangeError::NotConfigured("no exchange credentials".into()).to_string());
            return outcome;
        }

        let request = WithdrawalRequest {
            coin: WITHDRAW_COIN.to_string(),
            address: address.to_string(),
            amount,
        };

        let mut order: Vec<&Arc<dyn ExchangeApi>> = self.exchanges.iter().collect();
        order.shuffle(&mut rand::thread_rng());

        for exchange in order {
            match self.withdraw_from(exchange.as_ref(), &request, dry_run).await {
                Ok(withdrawal_id) => {
                    info!(
                        "Withdrawal of {:.2} USDC via {} accepted",
                        amount,
                        exchange.kind()
                    );
                    outcome.success = true;
                    outcome.exchange_used = Some(exchange.kind());
                    outcome.withdrawal_id = withdrawal_id;
                    return outcome;
                }
                Err(e) => {
                    warn!("Withdrawal via {} failed: {}", exchange.kind(), e);
                    outcome.errors.push(format!("{}: {}", exchange.kind(), e));
                }
            }
        }
        outcome
    }
}
