use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ethers::prelude::{Http, Provider};
use ethers::types::{Address, TxHash, U256, U64};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::RpcError;
use crate::networks::NetworkRegistry;

/// Caching behavior for a single RPC call.
#[derive(Debug, Clone, Copy, Default)]
pub struct CachePolicy {
    /// Overrides the method-default TTL when set.
    pub ttl: Option<Duration>,
    /// Forces a fresh fetch and skips the cache entirely.
    pub bypass: bool,
}

impl CachePolicy {
    /// Use the method-default TTL.
    pub fn default_ttl() -> Self {
        Self::default()
    }

    pub fn no_cache() -> Self {
        Self {
            ttl: None,
            bypass: true,
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            bypass: false,
        }
    }
}

/// Method-default TTLs, graded by volatility.
#[derive(Debug, Clone)]
pub struct CacheTtls {
    pub block_number: Duration,
    pub block: Duration,
    pub receipt: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            block_number: Duration::from_secs(12),
            block: Duration::from_secs(30),
            receipt: Duration::from_secs(60),
        }
    }
}

struct CachedResponse {
    value: Value,
    fetched_at: Instant,
    ttl: Duration,
}

/// Per-chain JSON-RPC client.
///
/// One long-lived provider per chain, created lazily on first use and
/// memoized for the life of the client. Responses are cached by
/// (chain id, method, params) with method-specific TTLs; balance queries and
/// `eth_call` are never cached. No automatic retries: retry policy belongs
/// to callers.
pub struct RpcClient {
    registry: Arc<NetworkRegistry>,
    providers: DashMap<u64, Arc<Provider<Http>>>,
    response_cache: DashMap<(u64, String, String), CachedResponse>,
    ttls: CacheTtls,
    request_timeout: Duration,
}

impl RpcClient {
    pub fn new(registry: Arc<NetworkRegistry>, ttls: CacheTtls, request_timeout: Duration) -> Self {
        Self {
            registry,
            providers: DashMap::new(),
            response_cache: DashMap::new(),
            ttls,
            request_timeout,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns the memoized provider for a chain, creating it on first use.
    /// Endpoints are tried in registry order; the first one that yields a
    /// usable provider wins.
    pub fn provider(&self, chain_id: u64) -> Result<Arc<Provider<Http>>, RpcError> {
        if let Some(existing) = self.providers.get(&chain_id) {
            return Ok(existing.clone());
        }

        let net = self
            .registry
            .get(chain_id)
            .ok_or(RpcError::UnknownChain(chain_id))?;

        for url in &net.rpc_endpoints {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    debug!("created provider for chain {} via {}", chain_id, url);
                    let provider = Arc::new(provider);
                    self.providers.insert(chain_id, provider.clone());
                    return Ok(provider);
                }
                Err(e) => {
                    warn!("skipping endpoint {} for chain {}: {}", url, chain_id, e);
                }
            }
        }

        Err(RpcError::NoProvider(chain_id))
    }

    fn method_default_ttl(&self, method: &str) -> Option<Duration> {
        match method {
            "eth_blockNumber" => Some(self.ttls.block_number),
            "eth_getBlockByNumber" | "eth_getBlockByHash" => Some(self.ttls.block),
            "eth_getTransactionReceipt" => Some(self.ttls.receipt),
            // balances and contract reads are live data
            _ => None,
        }
    }

    /// Generic JSON-RPC call with per-call timeout and TTL caching.
    pub async fn call<R: DeserializeOwned>(
        &self,
        chain_id: u64,
        method: &str,
        params: Value,
        policy: CachePolicy,
    ) -> Result<R, RpcError> {
        let ttl = if policy.bypass {
            None
        } else {
            policy.ttl.or_else(|| self.method_default_ttl(method))
        };

        let key = (chain_id, method.to_string(), params.to_string());
        if ttl.is_some() {
            if let Some(hit) = self.response_cache.get(&key) {
                if hit.fetched_at.elapsed() < hit.ttl {
                    return serde_json::from_value(hit.value.clone())
                        .map_err(|e| RpcError::Decode(e.to_string()));
                }
            }
        }

        let provider = self.provider(chain_id)?;
        let request = provider.request::<_, Value>(method, params);
        let value = match tokio::time::timeout(self.request_timeout, request).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => return Err(RpcError::from_provider(e)),
            Err(_) => return Err(RpcError::Timeout(self.request_timeout)),
        };

        if let Some(ttl) = ttl {
            self.response_cache.insert(
                key,
                CachedResponse {
                    value: value.clone(),
                    fetched_at: Instant::now(),
                    ttl,
                },
            );
        }

        serde_json::from_value(value).map_err(|e| RpcError::Decode(e.to_string()))
    }

    /// Latest block height, cached ~12s.
    pub async fn block_number(&self, chain_id: u64) -> Result<u64, RpcError> {
        let number: U64 = self
            .call(chain_id, "eth_blockNumber", json!([]), CachePolicy::default_ttl())
            .await?;
        Ok(number.as_u64())
    }

    /// Full block body with transactions, cached ~30s. Consumed by the
    /// activity feed, which lives outside this crate.
    pub async fn block_with_txs(&self, chain_id: u64, number: u64) -> Result<Value, RpcError> {
        self.call(
            chain_id,
            "eth_getBlockByNumber",
            json!([format!("{:#x}", number), true]),
            CachePolicy::default_ttl(),
        )
        .await
    }

    /// Transaction receipt, cached ~60s.
    pub async fn transaction_receipt(&self, chain_id: u64, hash: TxHash) -> Result<Value, RpcError> {
        self.call(
            chain_id,
            "eth_getTransactionReceipt",
            json!([hash]),
            CachePolicy::default_ttl(),
        )
        .await
    }

    /// Native currency balance of `owner`. Never cached.
    pub async fn native_balance(&self, chain_id: u64, owner: Address) -> Result<U256, RpcError> {
        self.call(
            chain_id,
            "eth_getBalance",
            json!([owner, "latest"]),
            CachePolicy::no_cache(),
        )
        .await
    }

    /// Drops expired cache entries. Callers run this opportunistically at
    /// refresh boundaries to bound memory.
    pub fn purge_expired(&self) {
        let before = self.response_cache.len();
        self.response_cache
            .retain(|_, entry| entry.fetched_at.elapsed() < entry.ttl);
        let purged = before - self.response_cache.len();
        if purged > 0 {
            debug!("purged {} expired rpc cache entries", purged);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_defaults_follow_volatility() {
        let client = RpcClient::new(
            Arc::new(NetworkRegistry::with_defaults()),
            CacheTtls::default(),
            Duration::from_secs(8),
        );
        assert_eq!(
            client.method_default_ttl("eth_blockNumber"),
            Some(Duration::from_secs(12))
        );
        assert_eq!(
            client.method_default_ttl("eth_getBlockByNumber"),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            client.method_default_ttl("eth_getTransactionReceipt"),
            Some(Duration::from_secs(60))
        );
        assert_eq!(client.method_default_ttl("eth_getBalance"), None);
        assert_eq!(client.method_default_ttl("eth_call"), None);
    }

    #[test]
    fn unknown_chain_is_a_typed_error() {
        let client = RpcClient::new(
            Arc::new(NetworkRegistry::with_defaults()),
            CacheTtls::default(),
            Duration::from_secs(8),
        );
        match client.provider(999_999) {
            Err(RpcError::UnknownChain(999_999)) => {}
            other => panic!("expected UnknownChain, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn provider_is_memoized_per_chain() {
        let client = RpcClient::new(
            Arc::new(NetworkRegistry::with_defaults()),
            CacheTtls::default(),
            Duration::from_secs(8),
        );
        let a = client.provider(1).unwrap();
        let b = client.provider(1).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
