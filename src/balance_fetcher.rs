use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ethers::prelude::*;
use ethers::utils::format_units;
use log::{debug, warn};
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;

use crate::backend_api::{BackendApiClient, BackendBalances};
use crate::contracts::Erc20;
use crate::error::RpcError;
use crate::multicall::{Call, Multicall};
use crate::networks::{NetworkConfig, NetworkRegistry};
use crate::rpc_client::RpcClient;
use crate::types::{Balance, BalanceAsset, TokenDescriptor};

/// Result of one chain's balance discovery. Native and token failures are
/// contained independently, so either side can be present without the other.
#[derive(Debug, Clone)]
pub struct ChainBalances {
    pub chain_id: u64,
    pub native: Option<Balance>,
    pub tokens: Vec<Balance>,
}

/// Per-chain balance discovery.
///
/// Tries the backend aggregation API first (short timeout), then falls back
/// to direct RPC: one `eth_getBalance` plus one multicall of `balanceOf`
/// across the chain's configured token list. Zero balances are dropped
/// before any price work. Metadata reads are best-effort with registry
/// fallback. Bounded linear-backoff retries apply only on constrained
/// client profiles.
pub struct BalanceFetcher {
    rpc: Arc<RpcClient>,
    registry: Arc<NetworkRegistry>,
    backend: Arc<BackendApiClient>,
    retry_on_transient: bool,
    retry_attempts: usize,
    retry_backoff: Duration,
}

impl BalanceFetcher {
    pub fn new(
        rpc: Arc<RpcClient>,
        registry: Arc<NetworkRegistry>,
        backend: Arc<BackendApiClient>,
        retry_on_transient: bool,
        retry_attempts: usize,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            rpc,
            registry,
            backend,
            retry_on_transient,
            retry_attempts,
            retry_backoff,
        }
    }

    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, RpcError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        if self.retry_on_transient && self.retry_attempts > 0 {
            let strategy = FixedInterval::from_millis(self.retry_backoff.as_millis() as u64)
                .take(self.retry_attempts);
            Retry::spawn(strategy, op).await
        } else {
            op().await
        }
    }

    /// Fetches native + token balances for one chain. A single token's
    /// failure never fails the chain; an erroring native call leaves
    /// `native` empty and the tokens still come back.
    pub async fn fetch_chain_balances(
        &self,
        chain_id: u64,
        owner: Address,
    ) -> Result<ChainBalances, RpcError> {
        let net = self
            .registry
            .get(chain_id)
            .ok_or(RpcError::UnknownChain(chain_id))?;

        // Fast path: the backend already aggregated this wallet.
        if let Some(backend) = self.backend.token_balances(chain_id, owner).await {
            debug!("chain {}: using backend-aggregated balances", chain_id);
            return Ok(self.from_backend(net, backend));
        }

        let native = match self
            .with_retry(|| self.rpc.native_balance(chain_id, owner))
            .await
        {
            Ok(raw) if !raw.is_zero() => Some(Balance {
                chain_id,
                asset: BalanceAsset::Native(net.native.clone()),
                raw,
                formatted: format_units(raw, net.native.decimals as u32)
                    .unwrap_or_else(|_| "0".to_string()),
                decimals: net.native.decimals,
            }),
            Ok(_) => None,
            Err(e) => {
                warn!("chain {}: native balance fetch failed: {}", chain_id, e);
                None
            }
        };

        let tokens = match self.fetch_token_balances(net, owner).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("chain {}: token balance fetch failed: {}", chain_id, e);
                Vec::new()
            }
        };

        Ok(ChainBalances {
            chain_id,
            native,
            tokens,
        })
    }

    async fn fetch_token_balances(
        &self,
        net: &NetworkConfig,
        owner: Address,
    ) -> Result<Vec<Balance>, RpcError> {
        if net.common_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let provider = self.rpc.provider(net.chain_id)?;
        let stub = Erc20::new(Address::zero(), provider.clone());
        let multicall = Multicall::new(provider.clone(), net.multicall, 100)
            .with_timeout(self.rpc.request_timeout());

        let balance_calls: Vec<Call> = net
            .common_tokens
            .iter()
            .map(|token| Call {
                target: token.address,
                call_data: stub.balance_of(owner).calldata().unwrap(),
            })
            .collect();
        let results = self
            .with_retry(|| multicall.run(balance_calls.clone()))
            .await?;

        let balance_fn = stub
            .abi()
            .function("balanceOf")
            .map_err(|e| RpcError::Decode(e.to_string()))?;

        let mut held: Vec<(&TokenDescriptor, U256)> = Vec::new();
        for (token, raw) in net.common_tokens.iter().zip(results) {
            let Some(bytes) = raw else {
                debug!(
                    "chain {}: balanceOf failed for {}, skipping",
                    net.chain_id, token.symbol
                );
                continue;
            };
            let amount = balance_fn
                .decode_output(&bytes)
                .ok()
                .and_then(|v| v.first().and_then(|t| t.clone().into_uint()));
            match amount {
                Some(amount) if !amount.is_zero() => held.push((token, amount)),
                Some(_) => {} // zero balances never reach the price layer
                None => debug!(
                    "chain {}: undecodable balanceOf return for {}",
                    net.chain_id, token.symbol
                ),
            }
        }

        if held.is_empty() {
            return Ok(Vec::new());
        }

        // Best-effort metadata follow-up for the held tokens only; any
        // failed read falls back to the registry descriptor.
        let mut meta_calls = Vec::with_capacity(held.len() * 3);
        for (token, _) in &held {
            meta_calls.push(Call {
                target: token.address,
                call_data: stub.symbol().calldata().unwrap(),
            });
            meta_calls.push(Call {
                target: token.address,
                call_data: stub.name().calldata().unwrap(),
            });
            meta_calls.push(Call {
                target: token.address,
                call_data: stub.decimals().calldata().unwrap(),
            });
        }
        let meta = match multicall.run(meta_calls).await {
            Ok(meta) => meta,
            Err(e) => {
                debug!(
                    "chain {}: metadata batch failed, using registry defaults: {}",
                    net.chain_id, e
                );
                vec![None; held.len() * 3]
            }
        };

        let symbol_fn = stub
            .abi()
            .function("symbol")
            .map_err(|e| RpcError::Decode(e.to_string()))?;
        let name_fn = stub
            .abi()
            .function("name")
            .map_err(|e| RpcError::Decode(e.to_string()))?;
        let decimals_fn = stub
            .abi()
            .function("decimals")
            .map_err(|e| RpcError::Decode(e.to_string()))?;

        let decode_string = |raw: &Option<Bytes>, f: &ethers::abi::Function| {
            raw.as_ref().and_then(|bytes| {
                f.decode_output(bytes)
                    .ok()
                    .and_then(|v| v.first().and_then(|t| t.clone().into_string()))
            })
        };

        let mut balances = Vec::with_capacity(held.len());
        for (i, (token, amount)) in held.into_iter().enumerate() {
            let symbol = decode_string(&meta[i * 3], symbol_fn);
            let name = decode_string(&meta[i * 3 + 1], name_fn);
            let decimals = meta[i * 3 + 2]
                .as_ref()
                .and_then(|bytes| {
                    decimals_fn
                        .decode_output(bytes)
                        .ok()
                        .and_then(|v| v.first().and_then(|t| t.clone().into_uint()))
                })
                .and_then(|u| u8::try_from(u).ok())
                .unwrap_or(token.decimals);

            let descriptor = TokenDescriptor {
                address: token.address,
                symbol: symbol.unwrap_or_else(|| token.symbol.clone()),
                name: name.unwrap_or_else(|| token.name.clone()),
                decimals,
                logo_url: token.logo_url.clone(),
            };
            balances.push(Balance {
                chain_id: net.chain_id,
                asset: BalanceAsset::Token(descriptor),
                raw: amount,
                formatted: format_units(amount, decimals as u32)
                    .unwrap_or_else(|_| "0".to_string()),
                decimals,
            });
        }

        Ok(balances)
    }

    /// Converts a backend aggregation response into the same shape the
    /// direct path produces, applying the same zero filter and registry
    /// metadata fallback.
    fn from_backend(&self, net: &NetworkConfig, backend: BackendBalances) -> ChainBalances {
        let native = backend
            .native_raw
            .as_deref()
            .and_then(|raw| U256::from_dec_str(raw).ok())
            .filter(|raw| !raw.is_zero())
            .map(|raw| Balance {
                chain_id: net.chain_id,
                asset: BalanceAsset::Native(net.native.clone()),
                raw,
                formatted: format_units(raw, net.native.decimals as u32)
                    .unwrap_or_else(|_| "0".to_string()),
                decimals: net.native.decimals,
            });

        let mut tokens = Vec::with_capacity(backend.tokens.len());
        for row in backend.tokens {
            let Ok(raw) = U256::from_dec_str(&row.raw) else {
                debug!(
                    "chain {}: undecodable backend amount for {:?}",
                    net.chain_id, row.address
                );
                continue;
            };
            if raw.is_zero() {
                continue;
            }
            let known = net
                .common_tokens
                .iter()
                .find(|t| t.address == row.address);
            let descriptor = TokenDescriptor {
                address: row.address,
                symbol: row
                    .symbol
                    .or_else(|| known.map(|t| t.symbol.clone()))
                    .unwrap_or_else(|| "UNKNOWN".to_string()),
                name: row
                    .name
                    .or_else(|| known.map(|t| t.name.clone()))
                    .unwrap_or_else(|| "Unknown Token".to_string()),
                decimals: row.decimals,
                logo_url: known.and_then(|t| t.logo_url.clone()),
            };
            tokens.push(Balance {
                chain_id: net.chain_id,
                asset: BalanceAsset::Token(descriptor),
                raw,
                formatted: format_units(raw, row.decimals as u32)
                    .unwrap_or_else(|_| "0".to_string()),
                decimals: row.decimals,
            });
        }

        ChainBalances {
            chain_id: net.chain_id,
            native,
            tokens,
        }
    }
}
