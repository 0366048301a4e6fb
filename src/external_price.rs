use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::Address;
use log::debug;
use serde::Deserialize;

use crate::error::PriceLookupError;

/// Off-chain price source, keyed by (platform, contract address) for tokens
/// and by well-known coin id for native assets.
#[async_trait]
pub trait ExternalPriceSource: Send + Sync {
    async fn contract_price_usd(
        &self,
        platform: &str,
        contract: Address,
    ) -> Result<f64, PriceLookupError>;

    async fn coin_price_usd(&self, coin_id: &str) -> Result<f64, PriceLookupError>;
}

// The API returns a map keyed by contract address or coin id, one
// `{ "usd": price }` row per requested asset.
#[derive(Debug, Deserialize)]
struct UsdRow {
    usd: Option<f64>,
}

type PriceResponse = HashMap<String, UsdRow>;

/// CoinGecko-style REST client. No authentication; short timeout so a slow
/// API never stalls a refresh.
pub struct PriceApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl PriceApiClient {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch(&self, url: &str) -> Result<PriceResponse, PriceLookupError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PriceLookupError::Api(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            if response.status() == 429 {
                return Err(PriceLookupError::Api("rate limited (429)".to_string()));
            }
            return Err(PriceLookupError::Api(format!(
                "http error: {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| PriceLookupError::Api(format!("json parse failed: {}", e)))
    }
}

#[async_trait]
impl ExternalPriceSource for PriceApiClient {
    async fn contract_price_usd(
        &self,
        platform: &str,
        contract: Address,
    ) -> Result<f64, PriceLookupError> {
        let contract_key = format!("{:#x}", contract);
        let url = format!(
            "{}/simple/token_price/{}?contract_addresses={}&vs_currencies=usd",
            self.base_url, platform, contract_key
        );
        let rows = self.fetch(&url).await?;
        let price = rows
            .get(&contract_key)
            .and_then(|row| row.usd)
            .ok_or_else(|| {
                PriceLookupError::Api(format!("no usd price for {} on {}", contract_key, platform))
            })?;
        debug!("external price {} on {} = {}", contract_key, platform, price);
        Ok(price)
    }

    async fn coin_price_usd(&self, coin_id: &str) -> Result<f64, PriceLookupError> {
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd",
            self.base_url, coin_id
        );
        let rows = self.fetch(&url).await?;
        rows.get(coin_id)
            .and_then(|row| row.usd)
            .ok_or_else(|| PriceLookupError::Api(format!("no usd price for coin {}", coin_id)))
    }
}
