use anyhow::{anyhow, Context, Result};
use serde_json::Value;

use crate::models::pool_model::PoolInfo;

const ORCA_API_URL: &str = "https://api.orca.so/v2/solana";

/// Orca's public pool listing. Only used for display and decimals; pool
/// state for any computation is read from chain.
pub struct OrcaApi {
    client: reqwest::Client,
}

impl OrcaApi {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub async fn get_pool_info(&self, pool_address: &str) -> Result<PoolInfo> {
        let response = self
            .client
            .get(format!("{}/pools/{}", ORCA_API_URL, pool_address))
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("Orca pool lookup failed for {}", pool_address))?
            .json::<Value>()
            .await?;

        parse_pool_info(response)
    }
}

impl Default for OrcaApi {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_pool_info(response: Value) -> Result<PoolInfo> {
    let data = response
        .get("data")
        .cloned()
        .ok_or_else(|| anyhow!("Orca response has no data field"))?;
    serde_json::from_value(data).context("Failed to parse Orca pool info")
}
