use async_trait::async_trait;
use log::info;
use serde::Deserialize;

use super::exchange_api::{
    constants::RECV_WINDOW_MS, sign_hmac_sha256, timestamp_ms, ApiKeyPermissions, ExchangeApi,
    ExchangeKind, WithdrawalReceipt, WithdrawalRequest,
};
use crate::config::ExchangeCredentials;
use crate::utils::error::ExchangeError;

const BINANCE_API_URL: &str = "https://api.binance.com";

#[derive(Deserialize, Debug)]
struct BinanceErrorBody {
    code: i64,
    msg: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ApiRestrictions {
    ip_restrict: bool,
    enable_withdrawals: bool,
}

#[derive(Deserialize, Debug)]
struct WithdrawResponse {
    id: String,
}

pub struct BinanceApi {
    client: reqwest::Client,
    base_url: String,
    credentials: ExchangeCredentials,
    network: String,
}

pub fn classify_error_code(code: i64, message: &str) -> ExchangeError {
    let detail = format!("binance {}: {}", code, message);
    match code {
        -1003 | -1015 => ExchangeError::RateLimited(detail),
        -1001 | -1007 => ExchangeError::Network(detail),
        -1002 | -1022 | -2014 | -2015 => ExchangeError::Unauthorized(detail),
        -4026 => ExchangeError::InsufficientBalance(detail),
        _ if message.to_lowercase().contains("insufficient") => {
            ExchangeError::InsufficientBalance(detail)
        }
        _ => ExchangeError::Validation(detail),
    }
}

impl BinanceApi {
    pub fn new(credentials: ExchangeCredentials, network: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: BINANCE_API_URL.to_string(),
            credentials,
            network: network.to_string(),
        }
    }

    fn signed_query(&self, params: &[(&str, String)]) -> Result<String, ExchangeError> {
        let mut query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>();
        query.push(format!("recvWindow={}", RECV_WINDOW_MS));
        query.push(format!("timestamp={}", timestamp_ms()));

        let query = query.join("&");
        let signature = sign_hmac_sha256(&self.credentials.api_secret, &query)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ExchangeError> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<BinanceErrorBody>(&text) {
                Ok(body) => classify_error_code(body.code, &body.msg),
                Err(_) if status.as_u16() == 429 || status.as_u16() == 418 => {
                    ExchangeError::RateLimited(text)
                }
                Err(_) if status.is_server_error() => ExchangeError::Network(text),
                Err(_) => ExchangeError::Validation(text),
            });
        }
        serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Validation(format!("unexpected binance payload: {}", e)))
    }
}

#[async_trait]
impl ExchangeApi for BinanceApi {
    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Binance
    }

    async fn api_key_permissions(&self) -> Result<ApiKeyPermissions, ExchangeError> {
        let query = self.signed_query(&[])?;
        let response = self
            .client
            .get(format!(
                "{}/sapi/v1/account/apiRestrictions?{}",
                self.base_url, query
            ))
            .header("X-MBX-APIKEY", &self.credentials.api_key)
            .send()
            .await?;
        let restrictions: ApiRestrictions = Self::parse(response).await?;

        Ok(ApiKeyPermissions {
            can_withdraw: restrictions.enable_withdrawals,
            ip_restricted: restrictions.ip_restrict,
        })
    }

    async fn withdraw(&self, request: &WithdrawalRequest) -> Result<WithdrawalReceipt, ExchangeError> {
        let query = self.signed_query(&[
            ("coin", request.coin.clone()),
            ("network", self.network.clone()),
            ("address", request.address.clone()),
            ("amount", request.amount_str()),
        ])?;
        let response = self
            .client
            .post(format!("{}/sapi/v1/capital/withdraw/apply?{}", self.base_url, query))
            .header("X-MBX-APIKEY", &self.credentials.api_key)
            .send()
            .await?;
        let withdrawal: WithdrawResponse = Self::parse(response).await?;
        info!(
            "Binance withdrawal {} of {} {} submitted",
            withdrawal.id,
            request.amount_str(),
            request.coin
        );

        Ok(WithdrawalReceipt {
            exchange: ExchangeKind::Binance,
            withdrawal_id: withdrawal.id,
            amount: request.amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_classification() {
        assert!(matches!(
            classify_error_code(-1003, "Too much request weight used"),
            ExchangeError::RateLimited(_)
        ));
        assert!(matches!(
            classify_error_code(-2015, "Invalid API-key, IP, or permissions for action."),
            ExchangeError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_error_code(-4026, "User has insufficient balance"),
            ExchangeError::InsufficientBalance(_)
        ));
        assert!(matches!(
            classify_error_code(-4019, "Withdrawal address is not allowed"),
            ExchangeError::Validation(_)
        ));
    }

    #[test]
    fn test_signed_query_ends_with_signature() {
        let api = BinanceApi::new(
            ExchangeCredentials {
                api_key: "key".to_string(),
                api_secret: "secret".to_string(),
            },
            "ARBITRUM",
        );

        let query = api
            .signed_query(&[("coin", "USDC".to_string())])
            .unwrap();

        assert!(query.starts_with("coin=USDC&recvWindow=5000&timestamp="));
        let (unsigned, signature) = query.rsplit_once("&signature=").unwrap();
        assert_eq!(signature, sign_hmac_sha256("secret", unsigned).unwrap());
    }
}
