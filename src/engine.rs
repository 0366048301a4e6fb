use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::Address;
use futures_util::{stream, StreamExt};
use log::{debug, info};

use crate::aggregator;
use crate::backend_api::BackendApiClient;
use crate::balance_fetcher::{BalanceFetcher, ChainBalances};
use crate::error::EngineError;
use crate::external_price::PriceApiClient;
use crate::networks::NetworkRegistry;
use crate::price_oracle::{OnChainPoolReader, PriceOracle};
use crate::rpc_client::{CacheTtls, RpcClient};
use crate::scheduler::{self, ConcurrencyProfile};
use crate::settings::Settings;
use crate::types::{Balance, BalanceAsset, NftValuation, PortfolioSnapshot, PriceQuote, PriceSource};

/// How many price lookups may be in flight at once during a refresh.
const PRICE_LOOKUP_CONCURRENCY: usize = 4;

/// Top-level aggregation engine.
///
/// Owns the network registry handle, the per-chain RPC client, the price
/// oracle and the balance fetcher, along with their caches. Constructed once
/// and shared by handle; there are no process-wide singletons. A refresh
/// produces a fresh immutable snapshot that atomically replaces the previous
/// one for consumers.
pub struct PortfolioEngine {
    registry: Arc<NetworkRegistry>,
    rpc: Arc<RpcClient>,
    oracle: Arc<PriceOracle>,
    fetcher: Arc<BalanceFetcher>,
    backend: Arc<BackendApiClient>,
    profile: ConcurrencyProfile,
    chain_fetch_timeout: Duration,
}

impl PortfolioEngine {
    pub fn new(settings: Settings) -> anyhow::Result<Self> {
        let profile = settings.scheduler.concurrency_profile();
        Self::with_profile(settings, profile)
    }

    /// Builds the engine with an explicitly injected concurrency profile,
    /// overriding whatever the configuration says. Callers that know their
    /// client class (constrained mobile vs. capable desktop) use this.
    pub fn with_profile(settings: Settings, profile: ConcurrencyProfile) -> anyhow::Result<Self> {
        let registry = Arc::new(
            NetworkRegistry::with_defaults()
                .with_endpoint_overrides(&settings.rpc.endpoint_overrides),
        );

        let ttls = CacheTtls {
            block_number: Duration::from_secs(settings.cache.block_number_ttl_seconds),
            block: Duration::from_secs(settings.cache.block_ttl_seconds),
            receipt: Duration::from_secs(settings.cache.receipt_ttl_seconds),
        };
        let rpc = Arc::new(RpcClient::new(
            registry.clone(),
            ttls,
            settings.request_timeout(),
        ));

        let backend = Arc::new(BackendApiClient::new(
            settings.backend.base_url.clone(),
            Duration::from_millis(settings.backend.timeout_ms),
        ));
        let external = Arc::new(PriceApiClient::new(
            settings.price.api_base_url.clone(),
            Duration::from_millis(settings.price.api_timeout_ms),
        ));
        let pools = Arc::new(OnChainPoolReader::new(rpc.clone(), registry.clone()));

        let oracle = Arc::new(PriceOracle::new(
            registry.clone(),
            pools,
            external,
            Duration::from_secs(settings.price.quote_ttl_seconds),
            Duration::from_secs(settings.price.unavailable_ttl_seconds),
        ));

        let fetcher = Arc::new(BalanceFetcher::new(
            rpc.clone(),
            registry.clone(),
            backend.clone(),
            profile.is_constrained(),
            settings.scheduler.retry_attempts,
            Duration::from_millis(settings.scheduler.retry_backoff_ms),
        ));

        info!(
            "portfolio engine ready: {} chains, profile {:?}",
            registry.chain_ids().len(),
            profile
        );

        Ok(Self {
            registry,
            rpc,
            oracle,
            fetcher,
            backend,
            profile,
            chain_fetch_timeout: settings.chain_fetch_timeout(),
        })
    }

    pub fn registry(&self) -> &Arc<NetworkRegistry> {
        &self.registry
    }

    pub fn rpc(&self) -> &Arc<RpcClient> {
        &self.rpc
    }

    /// Full balance + price refresh for one wallet across every configured
    /// chain. Fails only when every chain's fetch failed outright; anything
    /// less surfaces as degraded data in a successful snapshot.
    pub async fn refresh(&self, owner: Address) -> Result<PortfolioSnapshot, EngineError> {
        self.refresh_with_nfts(owner, Vec::new()).await
    }

    /// Same as `refresh`, folding externally-computed NFT valuations into
    /// the snapshot.
    pub async fn refresh_with_nfts(
        &self,
        owner: Address,
        nfts: Vec<NftValuation>,
    ) -> Result<PortfolioSnapshot, EngineError> {
        let chains = self.registry.chain_ids();
        if chains.is_empty() {
            return Err(EngineError::NoChainsConfigured);
        }

        self.rpc.purge_expired();

        let outcomes = scheduler::run_across_chains(
            self.profile,
            self.chain_fetch_timeout,
            &chains,
            |chain_id| self.fetcher.fetch_chain_balances(chain_id, owner),
        )
        .await;

        let settled: Vec<ChainBalances> = outcomes.into_iter().filter_map(|o| o.result).collect();
        if settled.is_empty() {
            return Err(EngineError::AllChainsFailed(chains.len()));
        }

        let mut native_balances: Vec<Balance> = Vec::new();
        let mut token_balances: Vec<Balance> = Vec::new();
        for chain in settled {
            debug!(
                "chain {}: {} token balances, native {}",
                chain.chain_id,
                chain.tokens.len(),
                chain.native.is_some()
            );
            native_balances.extend(chain.native);
            token_balances.extend(chain.tokens);
        }

        let native_priced = self.price_native_balances(native_balances).await;
        let token_priced = self.price_token_balances(token_balances).await;

        let registry = self.registry.clone();
        let snapshot = aggregator::aggregate(&native_priced, &token_priced, &nfts, move |id| {
            registry
                .get(id)
                .map(|n| n.name.clone())
                .unwrap_or_else(|| format!("chain-{}", id))
        });

        info!(
            "refresh complete for {:#x}: {} holdings, total ${:.2}",
            owner,
            snapshot.holdings.len(),
            snapshot.total_value_usd
        );
        Ok(snapshot)
    }

    async fn price_native_balances(&self, balances: Vec<Balance>) -> Vec<(Balance, PriceQuote)> {
        stream::iter(balances)
            .map(|balance| async move {
                let quote = self.oracle.native_price(balance.chain_id).await;
                (balance, quote)
            })
            .buffer_unordered(PRICE_LOOKUP_CONCURRENCY)
            .collect()
            .await
    }

    async fn price_token_balances(&self, balances: Vec<Balance>) -> Vec<(Balance, PriceQuote)> {
        let backend_prices = self.backend_prices_for(&balances).await;
        stream::iter(balances)
            .map(|balance| {
                let backend_prices = &backend_prices;
                async move {
                    let quote = match &balance.asset {
                        BalanceAsset::Token(token) => {
                            // the stablecoin invariant outranks any backend
                            // quote, so only non-stablecoins take the fast path
                            match backend_prices.get(&(balance.chain_id, token.address)) {
                                Some(&price) if !crate::networks::is_stablecoin(&token.symbol) => {
                                    PriceQuote::new(
                                        balance.chain_id,
                                        token.address,
                                        price,
                                        PriceSource::ExternalApi,
                                    )
                                }
                                _ => self.oracle.resolve_price(balance.chain_id, token).await,
                            }
                        }
                        BalanceAsset::Native(_) => self.oracle.native_price(balance.chain_id).await,
                    };
                    (balance, quote)
                }
            })
            .buffer_unordered(PRICE_LOOKUP_CONCURRENCY)
            .collect()
            .await
    }

    /// Opportunistic batched price fetch from the aggregation backend.
    /// Anything missing, insane or failed here is priced from first
    /// principles by the oracle instead.
    async fn backend_prices_for(&self, balances: &[Balance]) -> HashMap<(u64, Address), f64> {
        let mut by_chain: HashMap<u64, Vec<Address>> = HashMap::new();
        if self.backend.is_enabled() {
            for balance in balances {
                if let BalanceAsset::Token(token) = &balance.asset {
                    by_chain.entry(balance.chain_id).or_default().push(token.address);
                }
            }
        }

        let mut prices = HashMap::new();
        for (chain_id, contracts) in by_chain {
            if let Some(fetched) = self.backend.token_prices(chain_id, &contracts).await {
                for (address, price) in fetched {
                    if crate::amm_math::is_sane_price(price) {
                        prices.insert((chain_id, address), price);
                    }
                }
            }
        }
        prices
    }
}
