use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::utils::error::BridgeError;

const LIFI_API_URL: &str = "https://li.quest/v1";

#[derive(Debug, Clone, PartialEq)]
pub struct RouteRequest {
    pub from_chain: u64,
    pub to_chain: u64,
    pub from_token: String,
    pub to_token: String,
    pub from_amount: u64,
    pub from_address: String,
    pub to_address: String,
    /// Fraction, 0.005 = 0.5%.
    pub slippage: f64,
    pub preferred_bridge: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BridgeRoute {
    pub id: String,
    pub from_amount: u64,
    pub to_amount: u64,
    pub to_amount_min: u64,
    pub from_amount_usd: f64,
    pub fee_usd: f64,
    pub tools: Vec<String>,
    #[serde(skip)]
    pub steps: Vec<Value>,
}

impl BridgeRoute {
    pub fn fee_pct(&self) -> f64 {
        if self.from_amount_usd <= 0.0 {
            return f64::INFINITY;
        }
        self.fee_usd / self.from_amount_usd * 100.0
    }

    pub fn uses_tool(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| t.eq_ignore_ascii_case(tool))
    }
}

/// EVM call data for one route step.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTransaction {
    pub to: String,
    pub data: String,
    pub value: String,
    pub gas_limit: Option<String>,
    pub approval_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    NotFound,
    Pending,
    Done { receiving_tx_hash: Option<String> },
    Failed(String),
}

#[async_trait]
pub trait BridgeApi: Send + Sync {
    async fn routes(&self, request: &RouteRequest) -> Result<Vec<BridgeRoute>, BridgeError>;
    async fn step_transaction(&self, step: &Value) -> Result<SourceTransaction, BridgeError>;
    async fn status(
        &self,
        tx_hash: &str,
        from_chain: u64,
        to_chain: u64,
        bridge: Option<&str>,
    ) -> Result<TransferStatus, BridgeError>;
}

fn amount_field(value: &Value, key: &str) -> Result<u64, BridgeError> {
    value[key]
        .as_str()
        .and_then(|raw| raw.parse::<u64>().ok())
        .or_else(|| value[key].as_u64())
        .ok_or_else(|| BridgeError::Failed(format!("route missing {}", key)))
}

fn usd_field(value: &Value) -> Option<f64> {
    value
        .as_str()
        .and_then(|raw| raw.parse::<f64>().ok())
        .or_else(|| value.as_f64())
        .filter(|usd| usd.is_finite())
}

// A cost entry without a readable USD amount counts as an unbounded fee,
// so the route can never pass the fee ceiling.
fn sum_usd(costs: &Value) -> f64 {
    costs
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|c| usd_field(&c["amountUSD"]).unwrap_or(f64::INFINITY))
                .sum()
        })
        .unwrap_or(0.0)
}

/// Parses one entry of `/advanced/routes`. Fees are the step fee costs
/// plus gas, in USD.
pub fn parse_route(route: &Value) -> Result<BridgeRoute, BridgeError> {
    let steps = route["steps"]
        .as_array()
        .cloned()
        .ok_or_else(|| BridgeError::Failed("route has no steps".to_string()))?;

    let fee_usd = steps
        .iter()
        .map(|step| sum_usd(&step["estimate"]["feeCosts"]) + sum_usd(&step["estimate"]["gasCosts"]))
        .sum();
    let tools = steps
        .iter()
        .filter_map(|step| step["tool"].as_str().map(str::to_string))
        .collect();

    let from_amount = amount_field(route, "fromAmount")?;
    let from_amount_usd = match usd_field(&route["fromAmountUSD"]) {
        Some(usd) if usd > 0.0 => usd,
        // Stablecoin input with 6 decimals.
        _ => from_amount as f64 / 1_000_000.0,
    };

    Ok(BridgeRoute {
        id: route["id"].as_str().unwrap_or_default().to_string(),
        from_amount,
        to_amount: amount_field(route, "toAmount")?,
        to_amount_min: amount_field(route, "toAmountMin")?,
        from_amount_usd,
        fee_usd,
        tools,
        steps,
    })
}

pub fn parse_status(body: &Value) -> TransferStatus {
    match body["status"].as_str().unwrap_or("NOT_FOUND") {
        "DONE" => TransferStatus::Done {
            receiving_tx_hash: body["receiving"]["txHash"].as_str().map(str::to_string),
        },
        "FAILED" | "INVALID" => TransferStatus::Failed(
            body["substatusMessage"]
                .as_str()
                .or_else(|| body["substatus"].as_str())
                .unwrap_or("unknown")
                .to_string(),
        ),
        "PENDING" => TransferStatus::Pending,
        _ => TransferStatus::NotFound,
    }
}

pub struct LifiApi {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl LifiApi {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: LIFI_API_URL.to_string(),
            api_key,
        }
    }

    fn with_key(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("x-lifi-api-key", key),
            None => builder,
        }
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, BridgeError> {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(BridgeError::Network(format!("LI.FI returned HTTP {}", status)));
        }
        let body: Value = response.json().await?;
        if !status.is_success() {
            let message = body["message"].as_str().unwrap_or("unknown error").to_string();
            return Err(if status == StatusCode::NOT_FOUND {
                BridgeError::NoRoute(message)
            } else {
                classify_message(&message)
            });
        }
        Ok(body)
    }
}

fn classify_message(message: &str) -> BridgeError {
    let lowered = message.to_lowercase();
    if lowered.contains("insufficient") || lowered.contains("balance") {
        BridgeError::InsufficientBalance(message.to_string())
    } else if lowered.contains("slippage") || lowered.contains("price") {
        BridgeError::Slippage(message.to_string())
    } else if lowered.contains("no route") || lowered.contains("no available") {
        BridgeError::NoRoute(message.to_string())
    } else {
        BridgeError::Failed(message.to_string())
    }
}

#[async_trait]
impl BridgeApi for LifiApi {
    async fn routes(&self, request: &RouteRequest) -> Result<Vec<BridgeRoute>, BridgeError> {
        let mut options = serde_json::json!({
            "slippage": request.slippage,
            "order": "CHEAPEST"
        });
        if let Some(bridge) = &request.preferred_bridge {
            options["bridges"] = serde_json::json!({ "allow": [bridge] });
        }

        let response = self
            .with_key(self.client.post(format!("{}/advanced/routes", self.base_url)))
            .json(&serde_json::json!({
                "fromChainId": request.from_chain,
                "toChainId": request.to_chain,
                "fromTokenAddress": request.from_token,
                "toTokenAddress": request.to_token,
                "fromAmount": request.from_amount.to_string(),
                "fromAddress": request.from_address,
                "toAddress": request.to_address,
                "options": options
            }))
            .send()
            .await?;
        let body = Self::read_json(response).await?;

        let routes = body["routes"].as_array().cloned().unwrap_or_default();
        debug!("LI.FI returned {} routes", routes.len());
        routes.iter().map(parse_route).collect()
    }

    async fn step_transaction(&self, step: &Value) -> Result<SourceTransaction, BridgeError> {
        let response = self
            .with_key(
                self.client
                    .post(format!("{}/advanced/stepTransaction", self.base_url)),
            )
            .json(step)
            .send()
            .await?;
        let body = Self::read_json(response).await?;

        let request = &body["transactionRequest"];
        let field = |key: &str| {
            request[key]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| BridgeError::Failed(format!("step transaction missing {}", key)))
        };

        Ok(SourceTransaction {
            to: field("to")?,
            data: field("data")?,
            value: field("value").unwrap_or_else(|_| "0x0".to_string()),
            gas_limit: field("gasLimit").ok(),
            approval_address: body["estimate"]["approvalAddress"]
                .as_str()
                .map(str::to_string),
        })
    }

    async fn status(
        &self,
        tx_hash: &str,
        from_chain: u64,
        to_chain: u64,
        bridge: Option<&str>,
    ) -> Result<TransferStatus, BridgeError> {
        let mut query = vec![
            ("txHash", tx_hash.to_string()),
            ("fromChain", from_chain.to_string()),
            ("toChain", to_chain.to_string()),
        ];
        if let Some(bridge) = bridge {
            query.push(("bridge", bridge.to_string()));
        }

        let response = self
            .with_key(self.client.get(format!("{}/status", self.base_url)))
            .query(&query)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(TransferStatus::NotFound);
        }
        let body = Self::read_json(response).await?;
        Ok(parse_status(&body))
    }
}
