use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::abi::ParamType;
use ethers::prelude::*;
use log::{debug, warn};

use crate::amm_math;
use crate::contracts::{Erc20, IUniswapV3Factory, IUniswapV3Pool};
use crate::error::{PriceLookupError, RpcError};
use crate::multicall::{Call, Multicall};
use crate::networks::{is_stablecoin, NetworkConfig, NetworkRegistry};
use crate::rpc_client::RpcClient;
use crate::types::{PriceQuote, PriceSource, TokenDescriptor};

/// Canonical AMM fee tiers, probed in order; the first existing pool wins.
pub const POOL_FEE_TIERS: [u32; 3] = [500, 3_000, 10_000];

/// Everything needed to derive a pool's price: current fixed-point sqrt
/// price plus the ordered token pair and their decimals.
#[derive(Debug, Clone)]
pub struct PoolState {
    pub pool: Address,
    pub token0: Address,
    pub token1: Address,
    pub sqrt_price_x96: U256,
    pub decimals0: u8,
    pub decimals1: u8,
}

/// On-chain pool access seam. The live implementation talks JSON-RPC; tests
/// substitute synthetic pools.
#[async_trait]
pub trait PoolReader: Send + Sync {
    async fn find_pool(
        &self,
        chain_id: u64,
        token_a: Address,
        token_b: Address,
        fee: u32,
    ) -> Result<Option<Address>, RpcError>;

    async fn pool_state(&self, chain_id: u64, pool: Address) -> Result<PoolState, RpcError>;
}

struct CachedQuote {
    quote: PriceQuote,
    stored_at: Instant,
}

/// Tiered USD price resolution.
///
/// Order: stablecoin short-circuit, direct AMM pool against the chain's
/// stable quote, two-hop composition through the wrapped native, external
/// price API, Unavailable. Successful quotes are cached for `quote_ttl`;
/// Unavailable results for the much shorter `unavailable_ttl` so a token
/// that gains a pool or API listing recovers quickly without hammering the
/// chain on every refresh.
pub struct PriceOracle {
    registry: Arc<NetworkRegistry>,
    pools: Arc<dyn PoolReader>,
    external: Arc<dyn crate::external_price::ExternalPriceSource>,
    quote_cache: DashMap<(u64, Address), CachedQuote>,
    quote_ttl: Duration,
    unavailable_ttl: Duration,
}

impl PriceOracle {
    pub fn new(
        registry: Arc<NetworkRegistry>,
        pools: Arc<dyn PoolReader>,
        external: Arc<dyn crate::external_price::ExternalPriceSource>,
        quote_ttl: Duration,
        unavailable_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            pools,
            external,
            quote_cache: DashMap::new(),
            quote_ttl,
            unavailable_ttl,
        }
    }

    /// Resolves the USD unit price of one token. Never fails: the terminal
    /// fallback is a zero-priced `Unavailable` quote.
    pub async fn resolve_price(&self, chain_id: u64, token: &TokenDescriptor) -> PriceQuote {
        // Known USD-pegged symbols are exactly 1.0, no network call.
        if is_stablecoin(&token.symbol) {
            return PriceQuote::new(chain_id, token.address, 1.0, PriceSource::Stablecoin);
        }

        let key = (chain_id, token.address);
        if let Some(hit) = self.quote_cache.get(&key) {
            let ttl = match hit.quote.source {
                PriceSource::Unavailable => self.unavailable_ttl,
                _ => self.quote_ttl,
            };
            if hit.stored_at.elapsed() < ttl {
                return hit.quote.clone();
            }
        }

        let net = match self.registry.get(chain_id) {
            Some(net) => net,
            None => return PriceQuote::unavailable(chain_id, token.address),
        };

        let quote = self.resolve_uncached(net, token).await;
        self.quote_cache.insert(
            key,
            CachedQuote {
                quote: quote.clone(),
                stored_at: Instant::now(),
            },
        );
        quote
    }

    /// Prices the chain's native asset via its wrapped-native token, falling
    /// back to the external API's well-known coin id.
    pub async fn native_price(&self, chain_id: u64) -> PriceQuote {
        let net = match self.registry.get(chain_id) {
            Some(net) => net,
            None => return PriceQuote::unavailable(chain_id, Address::zero()),
        };

        let wrapped = self.resolve_price(chain_id, &net.quote_token).await;
        if wrapped.source != PriceSource::Unavailable {
            return wrapped;
        }

        match self.external.coin_price_usd(net.native_coin_id).await {
            Ok(price) if amm_math::is_sane_price(price) => PriceQuote::new(
                chain_id,
                net.quote_token.address,
                price,
                PriceSource::ExternalApi,
            ),
            Ok(price) => {
                warn!(
                    "discarding insane native price {} for {}",
                    price, net.native_coin_id
                );
                PriceQuote::unavailable(chain_id, net.quote_token.address)
            }
            Err(e) => {
                debug!("native price api miss for {}: {}", net.native_coin_id, e);
                PriceQuote::unavailable(chain_id, net.quote_token.address)
            }
        }
    }

    async fn resolve_uncached(&self, net: &NetworkConfig, token: &TokenDescriptor) -> PriceQuote {
        match self.pool_price(net, token.address).await {
            Ok(price) => {
                return PriceQuote::new(
                    net.chain_id,
                    token.address,
                    price,
                    PriceSource::OnChainPool,
                );
            }
            Err(e) => {
                // No pool, malformed price and transport failure all advance
                // the fallback chain; only the log distinguishes them.
                debug!(
                    "pool pricing miss for {} on chain {}: {}",
                    token.symbol, net.chain_id, e
                );
            }
        }

        match self
            .external
            .contract_price_usd(net.price_api_platform, token.address)
            .await
        {
            Ok(price) if amm_math::is_sane_price(price) => {
                PriceQuote::new(net.chain_id, token.address, price, PriceSource::ExternalApi)
            }
            Ok(price) => {
                warn!(
                    "discarding insane api price {} for {} on {}",
                    price, token.symbol, net.price_api_platform
                );
                PriceQuote::unavailable(net.chain_id, token.address)
            }
            Err(e) => {
                debug!(
                    "api pricing miss for {} on chain {}: {}",
                    token.symbol, net.chain_id, e
                );
                PriceQuote::unavailable(net.chain_id, token.address)
            }
        }
    }

    /// On-chain tier: direct pool against the stable quote first, then the
    /// two-hop composition through the wrapped native. Exactly one
    /// intermediate hop; this does not generalize to arbitrary routing.
    async fn pool_price(
        &self,
        net: &NetworkConfig,
        token: Address,
    ) -> Result<f64, PriceLookupError> {
        // The wrapped native itself only has the direct stable pool.
        match self
            .pool_unit_price(net.chain_id, token, net.stable_quote.address)
            .await
        {
            Ok(price) => return Ok(price),
            // a malformed direct pool is treated as no pool: try the hops
            Err(PriceLookupError::NoPool) | Err(PriceLookupError::MalformedPrice(_)) => {}
            Err(e) => return Err(e),
        }

        if token == net.quote_token.address {
            return Err(PriceLookupError::NoPool);
        }

        let hop1 = self
            .pool_unit_price(net.chain_id, token, net.quote_token.address)
            .await?;
        let hop2 = self
            .pool_unit_price(
                net.chain_id,
                net.quote_token.address,
                net.stable_quote.address,
            )
            .await?;
        let composed = hop1 * hop2;
        if !amm_math::is_sane_price(composed) {
            return Err(PriceLookupError::MalformedPrice(composed));
        }
        Ok(composed)
    }

    /// Price of `priced` expressed in `quote` units from the first pool
    /// found across the canonical fee tiers.
    async fn pool_unit_price(
        &self,
        chain_id: u64,
        priced: Address,
        quote: Address,
    ) -> Result<f64, PriceLookupError> {
        for fee in POOL_FEE_TIERS {
            let Some(pool) = self.pools.find_pool(chain_id, priced, quote, fee).await? else {
                continue;
            };
            let state = self.pools.pool_state(chain_id, pool).await?;
            let priced_is_token0 = state.token0 == priced;
            let price = amm_math::pool_quote_price(
                state.sqrt_price_x96,
                state.decimals0,
                state.decimals1,
                priced_is_token0,
            );
            if !amm_math::is_sane_price(price) {
                return Err(PriceLookupError::MalformedPrice(price));
            }
            return Ok(price);
        }
        Err(PriceLookupError::NoPool)
    }
}

/// Live `PoolReader` over JSON-RPC. Pool addresses are immutable, so factory
/// lookups are cached indefinitely; token decimals likewise.
pub struct OnChainPoolReader {
    rpc: Arc<RpcClient>,
    registry: Arc<NetworkRegistry>,
    pool_cache: DashMap<(u64, Address, Address, u32), Option<Address>>,
    decimals_cache: DashMap<(u64, Address), u8>,
}

impl OnChainPoolReader {
    pub fn new(rpc: Arc<RpcClient>, registry: Arc<NetworkRegistry>) -> Self {
        Self {
            rpc,
            registry,
            pool_cache: DashMap::new(),
            decimals_cache: DashMap::new(),
        }
    }

    fn network(&self, chain_id: u64) -> Result<&NetworkConfig, RpcError> {
        self.registry
            .get(chain_id)
            .ok_or(RpcError::UnknownChain(chain_id))
    }

    async fn token_decimals(
        &self,
        chain_id: u64,
        token: Address,
        provider: &Arc<Provider<Http>>,
    ) -> Result<u8, RpcError> {
        if let Some(cached) = self.decimals_cache.get(&(chain_id, token)) {
            return Ok(*cached);
        }
        let erc20 = Erc20::new(token, provider.clone());
        let decimals =
            match tokio::time::timeout(self.rpc.request_timeout(), erc20.decimals().call()).await {
                Ok(Ok(d)) => d,
                Ok(Err(e)) => return Err(RpcError::Transport(e.to_string())),
                Err(_) => return Err(RpcError::Timeout(self.rpc.request_timeout())),
            };
        self.decimals_cache.insert((chain_id, token), decimals);
        Ok(decimals)
    }
}

#[async_trait]
impl PoolReader for OnChainPoolReader {
    async fn find_pool(
        &self,
        chain_id: u64,
        token_a: Address,
        token_b: Address,
        fee: u32,
    ) -> Result<Option<Address>, RpcError> {
        let key = (chain_id, token_a, token_b, fee);
        if let Some(cached) = self.pool_cache.get(&key) {
            return Ok(*cached);
        }

        let net = self.network(chain_id)?;
        let provider = self.rpc.provider(chain_id)?;
        let factory = IUniswapV3Factory::new(net.amm_factory, provider);
        let pool = match tokio::time::timeout(
            self.rpc.request_timeout(),
            factory.get_pool(token_a, token_b, fee).call(),
        )
        .await
        {
            Ok(Ok(addr)) => addr,
            Ok(Err(e)) => return Err(RpcError::Transport(e.to_string())),
            Err(_) => return Err(RpcError::Timeout(self.rpc.request_timeout())),
        };

        let found = (!pool.is_zero()).then_some(pool);
        self.pool_cache.insert(key, found);
        Ok(found)
    }

    async fn pool_state(&self, chain_id: u64, pool: Address) -> Result<PoolState, RpcError> {
        let net = self.network(chain_id)?;
        let provider = self.rpc.provider(chain_id)?;

        // slot0 + token0 + token1 in one round trip
        let stub = IUniswapV3Pool::new(Address::zero(), provider.clone());
        let calls = vec![
            Call {
                target: pool,
                call_data: stub.slot_0().calldata().unwrap(),
            },
            Call {
                target: pool,
                call_data: stub.token_0().calldata().unwrap(),
            },
            Call {
                target: pool,
                call_data: stub.token_1().calldata().unwrap(),
            },
        ];
        let multicall = Multicall::new(provider.clone(), net.multicall, 50)
            .with_timeout(self.rpc.request_timeout());
        let results = multicall.run(calls).await?;

        let slot0_raw = results[0]
            .as_ref()
            .ok_or_else(|| RpcError::Decode("slot0 call failed".to_string()))?;
        let slot0_tokens = ethers::abi::decode(
            &[
                ParamType::Uint(160),
                ParamType::Int(24),
                ParamType::Uint(16),
                ParamType::Uint(16),
                ParamType::Uint(16),
                ParamType::Uint(8),
                ParamType::Bool,
            ],
            slot0_raw,
        )
        .map_err(|e| RpcError::Decode(e.to_string()))?;
        let sqrt_price_x96 = slot0_tokens
            .first()
            .and_then(|t| t.clone().into_uint())
            .ok_or_else(|| RpcError::Decode("slot0 missing sqrtPriceX96".to_string()))?;

        let decode_address = |raw: &Option<Bytes>, label: &str| -> Result<Address, RpcError> {
            let bytes = raw
                .as_ref()
                .ok_or_else(|| RpcError::Decode(format!("{} call failed", label)))?;
            ethers::abi::decode(&[ParamType::Address], bytes)
                .ok()
                .and_then(|mut tokens| tokens.pop())
                .and_then(|t| t.into_address())
                .ok_or_else(|| RpcError::Decode(format!("{} is not an address", label)))
        };
        let token0 = decode_address(&results[1], "token0")?;
        let token1 = decode_address(&results[2], "token1")?;

        let decimals0 = self.token_decimals(chain_id, token0, &provider).await?;
        let decimals1 = self.token_decimals(chain_id, token1, &provider).await?;

        Ok(PoolState {
            pool,
            token0,
            token1,
            sqrt_price_x96,
            decimals0,
            decimals1,
        })
    }
}
