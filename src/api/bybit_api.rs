use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use serde_json::Value;

use super::exchange_api::{
    constants::RECV_WINDOW_MS, sign_hmac_sha256, timestamp_ms, ApiKeyPermissions, ExchangeApi,
    ExchangeKind, WithdrawalReceipt, WithdrawalRequest,
};
use crate::config::ExchangeCredentials;
use crate::utils::error::ExchangeError;

const BYBIT_API_URL: &str = "https://api.bybit.com";

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct BybitResponse {
    ret_code: i64,
    ret_msg: String,
    #[serde(default)]
    result: Value,
}

pub struct BybitApi {
    client: reqwest::Client,
    base_url: String,
    credentials: ExchangeCredentials,
    chain: String,
}

/// Maps Bybit v5 `retCode` values onto the exchange error taxonomy.
pub fn classify_ret_code(code: i64, message: &str) -> ExchangeError {
    let detail = format!("bybit {}: {}", code, message);
    match code {
        10006 | 10018 => ExchangeError::RateLimited(detail),
        10003 | 10004 | 10005 | 10007 | 10010 => ExchangeError::Unauthorized(detail),
        131212 | 131214 => ExchangeError::InsufficientBalance(detail),
        10016 => ExchangeError::Network(detail),
        _ => ExchangeError::Validation(detail),
    }
}

impl BybitApi {
    pub fn new(credentials: ExchangeCredentials, chain: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: BYBIT_API_URL.to_string(),
            credentials,
            chain: chain.to_string(),
        }
    }

    fn signed_headers(&self, payload: &str) -> Result<reqwest::header::HeaderMap, ExchangeError> {
        let timestamp = timestamp_ms().to_string();
        let recv_window = RECV_WINDOW_MS.to_string();
        let signature = sign_hmac_sha256(
            &self.credentials.api_secret,
            &format!(
                "{}{}{}{}",
                timestamp, self.credentials.api_key, recv_window, payload
            ),
        )?;

        let mut headers = reqwest::header::HeaderMap::new();
        for (name, value) in [
            ("x-bapi-api-key", self.credentials.api_key.as_str()),
            ("x-bapi-sign", signature.as_str()),
            ("x-bapi-timestamp", timestamp.as_str()),
            ("x-bapi-recv-window", recv_window.as_str()),
        ] {
            let value = value
                .parse::<reqwest::header::HeaderValue>()
                .map_err(|_| ExchangeError::Unauthorized(format!("invalid {} header", name)))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    async fn unwrap_response(response: reqwest::Response) -> Result<Value, ExchangeError> {
        let response = response.error_for_status()?;
        let body: BybitResponse = response.json().await?;
        if body.ret_code != 0 {
            return Err(classify_ret_code(body.ret_code, &body.ret_msg));
        }
        Ok(body.result)
    }
}

#[async_trait]
impl ExchangeApi for BybitApi {
    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Bybit
    }

    async fn api_key_permissions(&self) -> Result<ApiKeyPermissions, ExchangeError> {
        let response = self
            .client
            .get(format!("{}/v5/user/query-api", self.base_url))
            .headers(self.signed_headers("")?)
            .send()
            .await?;
        let result = Self::unwrap_response(response).await?;
        debug!("Bybit key info: {}", result);

        let can_withdraw = result["readOnly"].as_i64() == Some(0)
            && result["permissions"]["Wallet"]
                .as_array()
                .map(|perms| perms.iter().any(|p| p.as_str() == Some("Withdraw")))
                .unwrap_or(false);
        let ip_restricted = result["ips"]
            .as_array()
            .map(|ips| !ips.is_empty() && ips.iter().all(|ip| ip.as_str() != Some("*")))
            .unwrap_or(false);

        Ok(ApiKeyPermissions {
            can_withdraw,
            ip_restricted,
        })
    }

    async fn withdraw(&self, request: &WithdrawalRequest) -> Result<WithdrawalReceipt, ExchangeError> {
        let body = serde_json::json!({
            "coin": request.coin,
            "chain": self.chain,
            "address": request.address,
            "amount": request.amount_str(),
            "timestamp": timestamp_ms(),
            "forceChain": 1,
            "accountType": "FUND"
        })
        .to_string();

        let response = self
            .client
            .post(format!("{}/v5/asset/withdraw/create", self.base_url))
            .headers(self.signed_headers(&body)?)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await?;
        let result = Self::unwrap_response(response).await?;

        let withdrawal_id = result["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ExchangeError::Validation("bybit returned no withdrawal id".into()))?;
        info!(
            "Bybit withdrawal {} of {} {} submitted",
            withdrawal_id,
            request.amount_str(),
            request.coin
        );

        Ok(WithdrawalReceipt {
            exchange: ExchangeKind::Bybit,
            withdrawal_id,
            amount: request.amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ret_code_classification() {
        assert!(matches!(
            classify_ret_code(10006, "Too many visits"),
            ExchangeError::RateLimited(_)
        ));
        assert!(matches!(
            classify_ret_code(10003, "API key is invalid"),
            ExchangeError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_ret_code(131212, "Insufficient balance"),
            ExchangeError::InsufficientBalance(_)
        ));
        assert!(matches!(
            classify_ret_code(131001, "address not in whitelist"),
            ExchangeError::Validation(_)
        ));
    }
}
