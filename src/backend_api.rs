use std::collections::HashMap;
use std::time::Duration;

use ethers::types::Address;
use log::{debug, warn};
use serde::Deserialize;
use url::Url;

/// One token row from the backend's batched balance endpoint. Metadata
/// fields are optional; the fetcher fills gaps from the registry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendTokenBalance {
    pub address: Address,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub decimals: u8,
    /// Raw integer amount as a decimal string.
    pub raw: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendBalances {
    /// Raw native balance as a decimal string, when the backend knows it.
    pub native_raw: Option<String>,
    #[serde(default)]
    pub tokens: Vec<BackendTokenBalance>,
}

/// Client for the optional backend aggregation API.
///
/// Tried opportunistically ahead of direct RPC with a short timeout; any
/// failure here degrades silently to the direct path, so every method
/// returns `Option` rather than an error. Disabled entirely when no base
/// URL is configured.
pub struct BackendApiClient {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl BackendApiClient {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        let base_url = base_url.and_then(|u| {
            let trimmed = u.trim_end_matches('/').to_string();
            match Url::parse(&trimmed) {
                Ok(_) => Some(trimmed),
                Err(e) => {
                    warn!("ignoring invalid backend base url {}: {}", trimmed, e);
                    None
                }
            }
        });
        Self { client, base_url }
    }

    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    /// Batched balances for one wallet on one chain, or `None` when the
    /// backend is disabled, slow, or unhappy.
    pub async fn token_balances(&self, chain_id: u64, owner: Address) -> Option<BackendBalances> {
        let base = self.base_url.as_ref()?;
        let url = format!("{}/v1/chains/{}/balances/{:#x}", base, chain_id, owner);
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => match response.json().await {
                Ok(balances) => Some(balances),
                Err(e) => {
                    debug!("backend balance decode failed for chain {}: {}", chain_id, e);
                    None
                }
            },
            Ok(response) => {
                debug!(
                    "backend balance endpoint returned {} for chain {}",
                    response.status(),
                    chain_id
                );
                None
            }
            Err(e) => {
                debug!("backend balance request failed for chain {}: {}", chain_id, e);
                None
            }
        }
    }

    /// Batched USD prices for token contracts on one chain, or `None` on
    /// any failure.
    pub async fn token_prices(
        &self,
        chain_id: u64,
        contracts: &[Address],
    ) -> Option<HashMap<Address, f64>> {
        let base = self.base_url.as_ref()?;
        if contracts.is_empty() {
            return Some(HashMap::new());
        }
        let joined = contracts
            .iter()
            .map(|a| format!("{:#x}", a))
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}/v1/chains/{}/prices?contracts={}", base, chain_id, joined);
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => response.json().await.ok(),
            Ok(response) => {
                debug!(
                    "backend price endpoint returned {} for chain {}",
                    response.status(),
                    chain_id
                );
                None
            }
            Err(e) => {
                debug!("backend price request failed for chain {}: {}", chain_id, e);
                None
            }
        }
    }
}
