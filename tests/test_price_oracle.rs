//! Price oracle tier fallback tests over synthetic pools.
//!
//! Tests cover:
//! - Stablecoin short-circuit
//! - Direct and two-hop on-chain pool pricing
//! - Malformed pool data advancing the fallback chain
//! - Unavailable as a valid terminal state
//! - Quote caching

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::{Address, U256};
use multichain_portfolio_sdk::error::{PriceLookupError, RpcError};
use multichain_portfolio_sdk::external_price::ExternalPriceSource;
use multichain_portfolio_sdk::networks::NetworkRegistry;
use multichain_portfolio_sdk::price_oracle::{PoolReader, PoolState, PriceOracle};
use multichain_portfolio_sdk::types::{PriceSource, TokenDescriptor};

fn q96() -> U256 {
    U256::from(1u128) << 96
}

fn descriptor(address: Address, symbol: &str) -> TokenDescriptor {
    TokenDescriptor {
        address,
        symbol: symbol.to_string(),
        name: format!("{} Token", symbol),
        decimals: 18,
        logo_url: None,
    }
}

/// Unordered pair key, the way a real factory treats (tokenA, tokenB).
fn pair_key(chain_id: u64, a: Address, b: Address, fee: u32) -> (u64, Address, Address, u32) {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    (chain_id, lo, hi, fee)
}

#[derive(Default)]
struct MockPools {
    pools: HashMap<(u64, Address, Address, u32), Address>,
    states: HashMap<(u64, Address), PoolState>,
    find_calls: AtomicUsize,
}

impl MockPools {
    fn add_pool(
        &mut self,
        chain_id: u64,
        a: Address,
        b: Address,
        fee: u32,
        pool: Address,
        state: PoolState,
    ) {
        self.pools.insert(pair_key(chain_id, a, b, fee), pool);
        self.states.insert((chain_id, pool), state);
    }
}

#[async_trait]
impl PoolReader for MockPools {
    async fn find_pool(
        &self,
        chain_id: u64,
        token_a: Address,
        token_b: Address,
        fee: u32,
    ) -> Result<Option<Address>, RpcError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pools.get(&pair_key(chain_id, token_a, token_b, fee)).copied())
    }

    async fn pool_state(&self, chain_id: u64, pool: Address) -> Result<PoolState, RpcError> {
        self.states
            .get(&(chain_id, pool))
            .cloned()
            .ok_or_else(|| RpcError::Decode("unknown pool".to_string()))
    }
}

struct FailingApi {
    calls: AtomicUsize,
}

#[async_trait]
impl ExternalPriceSource for FailingApi {
    async fn contract_price_usd(
        &self,
        _platform: &str,
        _contract: Address,
    ) -> Result<f64, PriceLookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(PriceLookupError::Api("api down".to_string()))
    }

    async fn coin_price_usd(&self, _coin_id: &str) -> Result<f64, PriceLookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(PriceLookupError::Api("api down".to_string()))
    }
}

struct FixedApi(f64);

#[async_trait]
impl ExternalPriceSource for FixedApi {
    async fn contract_price_usd(
        &self,
        _platform: &str,
        _contract: Address,
    ) -> Result<f64, PriceLookupError> {
        Ok(self.0)
    }

    async fn coin_price_usd(&self, _coin_id: &str) -> Result<f64, PriceLookupError> {
        Ok(self.0)
    }
}

fn make_oracle(pools: Arc<MockPools>, external: Arc<dyn ExternalPriceSource>) -> PriceOracle {
    PriceOracle::new(
        Arc::new(NetworkRegistry::with_defaults()),
        pools,
        external,
        Duration::from_secs(60),
        Duration::from_secs(60),
    )
}

#[tokio::test]
async fn stablecoins_are_exactly_one_regardless_of_pool_state() {
    let registry = NetworkRegistry::with_defaults();
    let net = registry.get(1).unwrap();

    // a pool that would price the token at 4.0, which must never be consulted
    let mut pools = MockPools::default();
    let usdt = descriptor(Address::from_low_u64_be(0x7777), "USDT");
    let pool_addr = Address::from_low_u64_be(0xAAAA);
    pools.add_pool(
        1,
        usdt.address,
        net.stable_quote.address,
        500,
        pool_addr,
        PoolState {
            pool: pool_addr,
            token0: usdt.address,
            token1: net.stable_quote.address,
            sqrt_price_x96: q96() * U256::from(2u64),
            decimals0: 18,
            decimals1: 18,
        },
    );
    let pools = Arc::new(pools);
    let oracle = make_oracle(
        pools.clone(),
        Arc::new(FailingApi {
            calls: AtomicUsize::new(0),
        }),
    );

    let quote = oracle.resolve_price(1, &usdt).await;
    assert_eq!(quote.unit_price_usd, 1.0);
    assert_eq!(quote.source, PriceSource::Stablecoin);
    assert_eq!(pools.find_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn direct_stable_pool_prices_with_orientation() {
    let registry = NetworkRegistry::with_defaults();
    let net = registry.get(1).unwrap();

    // token address above the stable quote, so the asset is token1
    let asset = descriptor(Address::from([0xee; 20]), "RWA");
    let pool_addr = Address::from_low_u64_be(0xB001);
    let mut pools = MockPools::default();
    pools.add_pool(
        1,
        asset.address,
        net.stable_quote.address,
        3_000,
        pool_addr,
        PoolState {
            pool: pool_addr,
            token0: net.stable_quote.address,
            token1: asset.address,
            // raw ratio 4e8 with 6/18 decimals => 2500 stable per asset
            sqrt_price_x96: U256::from(20_000u64) * q96(),
            decimals0: 6,
            decimals1: 18,
        },
    );
    let oracle = make_oracle(
        Arc::new(pools),
        Arc::new(FailingApi {
            calls: AtomicUsize::new(0),
        }),
    );

    let quote = oracle.resolve_price(1, &asset).await;
    assert_eq!(quote.source, PriceSource::OnChainPool);
    let rel = (quote.unit_price_usd - 2500.0).abs() / 2500.0;
    assert!(rel < 1e-9, "price {} off reference", quote.unit_price_usd);
}

#[tokio::test]
async fn two_hop_price_composes_through_wrapped_native() {
    let registry = NetworkRegistry::with_defaults();
    let net = registry.get(1).unwrap();

    let token = descriptor(Address::from_low_u64_be(0x1001), "DEED");
    let hop1_pool = Address::from_low_u64_be(0xC001);
    let hop2_pool = Address::from_low_u64_be(0xC002);

    let mut pools = MockPools::default();
    // (token, wrapped native): 4.0 native per token
    pools.add_pool(
        1,
        token.address,
        net.quote_token.address,
        500,
        hop1_pool,
        PoolState {
            pool: hop1_pool,
            token0: token.address,
            token1: net.quote_token.address,
            sqrt_price_x96: q96() * U256::from(2u64),
            decimals0: 18,
            decimals1: 18,
        },
    );
    // (wrapped native, stable): 2500 stable per native
    pools.add_pool(
        1,
        net.quote_token.address,
        net.stable_quote.address,
        500,
        hop2_pool,
        PoolState {
            pool: hop2_pool,
            token0: net.stable_quote.address,
            token1: net.quote_token.address,
            sqrt_price_x96: U256::from(20_000u64) * q96(),
            decimals0: 6,
            decimals1: 18,
        },
    );
    let oracle = make_oracle(
        Arc::new(pools),
        Arc::new(FailingApi {
            calls: AtomicUsize::new(0),
        }),
    );

    let quote = oracle.resolve_price(1, &token).await;
    assert_eq!(quote.source, PriceSource::OnChainPool);
    let expected = 4.0 * 2500.0;
    let rel = (quote.unit_price_usd - expected).abs() / expected;
    assert!(rel < 1e-9, "composed price {} off {}", quote.unit_price_usd, expected);
}

#[tokio::test]
async fn malformed_pool_advances_to_external_api() {
    let registry = NetworkRegistry::with_defaults();
    let net = registry.get(1).unwrap();

    let token = descriptor(Address::from_low_u64_be(0x2002), "BAD");
    let pool_addr = Address::from_low_u64_be(0xD001);
    let mut pools = MockPools::default();
    // zero sqrt price decodes to a price outside the sane bounds
    pools.add_pool(
        1,
        token.address,
        net.stable_quote.address,
        500,
        pool_addr,
        PoolState {
            pool: pool_addr,
            token0: token.address,
            token1: net.stable_quote.address,
            sqrt_price_x96: U256::zero(),
            decimals0: 18,
            decimals1: 6,
        },
    );
    let oracle = make_oracle(Arc::new(pools), Arc::new(FixedApi(3.25)));

    let quote = oracle.resolve_price(1, &token).await;
    assert_eq!(quote.source, PriceSource::ExternalApi);
    assert_eq!(quote.unit_price_usd, 3.25);
}

#[tokio::test]
async fn all_tiers_failing_is_unavailable_not_an_error() {
    let token = descriptor(Address::from_low_u64_be(0x3003), "GHOST");
    let oracle = make_oracle(
        Arc::new(MockPools::default()),
        Arc::new(FailingApi {
            calls: AtomicUsize::new(0),
        }),
    );

    let quote = oracle.resolve_price(1, &token).await;
    assert_eq!(quote.source, PriceSource::Unavailable);
    assert_eq!(quote.unit_price_usd, 0.0);
}

#[tokio::test]
async fn successful_quotes_are_cached() {
    let registry = NetworkRegistry::with_defaults();
    let net = registry.get(1).unwrap();

    let asset = descriptor(Address::from([0xee; 20]), "RWA");
    let pool_addr = Address::from_low_u64_be(0xB001);
    let mut pools = MockPools::default();
    pools.add_pool(
        1,
        asset.address,
        net.stable_quote.address,
        500,
        pool_addr,
        PoolState {
            pool: pool_addr,
            token0: net.stable_quote.address,
            token1: asset.address,
            sqrt_price_x96: U256::from(20_000u64) * q96(),
            decimals0: 6,
            decimals1: 18,
        },
    );
    let pools = Arc::new(pools);
    let oracle = make_oracle(
        pools.clone(),
        Arc::new(FailingApi {
            calls: AtomicUsize::new(0),
        }),
    );

    let first = oracle.resolve_price(1, &asset).await;
    let calls_after_first = pools.find_calls.load(Ordering::SeqCst);
    let second = oracle.resolve_price(1, &asset).await;

    assert_eq!(first.unit_price_usd, second.unit_price_usd);
    assert_eq!(first.resolved_at, second.resolved_at);
    assert_eq!(pools.find_calls.load(Ordering::SeqCst), calls_after_first);
}

#[tokio::test]
async fn unavailable_results_are_cached_for_fast_retry() {
    let token = descriptor(Address::from_low_u64_be(0x4004), "GHOST");
    let api = Arc::new(FailingApi {
        calls: AtomicUsize::new(0),
    });
    let oracle = make_oracle(Arc::new(MockPools::default()), api.clone());

    let _ = oracle.resolve_price(1, &token).await;
    let calls_after_first = api.calls.load(Ordering::SeqCst);
    let second = oracle.resolve_price(1, &token).await;

    assert_eq!(second.source, PriceSource::Unavailable);
    assert_eq!(api.calls.load(Ordering::SeqCst), calls_after_first);
}

#[tokio::test]
async fn native_price_resolves_via_wrapped_token_then_coin_id() {
    let registry = NetworkRegistry::with_defaults();
    let net = registry.get(1).unwrap();

    // wrapped-native pool present: pool tier wins
    let hop_pool = Address::from_low_u64_be(0xE001);
    let mut pools = MockPools::default();
    pools.add_pool(
        1,
        net.quote_token.address,
        net.stable_quote.address,
        500,
        hop_pool,
        PoolState {
            pool: hop_pool,
            token0: net.stable_quote.address,
            token1: net.quote_token.address,
            sqrt_price_x96: U256::from(20_000u64) * q96(),
            decimals0: 6,
            decimals1: 18,
        },
    );
    let with_pool = make_oracle(
        Arc::new(pools),
        Arc::new(FailingApi {
            calls: AtomicUsize::new(0),
        }),
    );
    let quote = with_pool.native_price(1).await;
    assert_eq!(quote.source, PriceSource::OnChainPool);
    let rel = (quote.unit_price_usd - 2500.0).abs() / 2500.0;
    assert!(rel < 1e-9);

    // no pools and no contract listing: the well-known coin id is the
    // last resort
    let without_pool = make_oracle(Arc::new(MockPools::default()), Arc::new(CoinOnlyApi(1234.5)));
    let quote = without_pool.native_price(1).await;
    assert_eq!(quote.source, PriceSource::ExternalApi);
    assert_eq!(quote.unit_price_usd, 1234.5);
}

/// Knows native coins by id but has no contract listings.
struct CoinOnlyApi(f64);

#[async_trait]
impl ExternalPriceSource for CoinOnlyApi {
    async fn contract_price_usd(
        &self,
        _platform: &str,
        _contract: Address,
    ) -> Result<f64, PriceLookupError> {
        Err(PriceLookupError::Api("contract not listed".to_string()))
    }

    async fn coin_price_usd(&self, _coin_id: &str) -> Result<f64, PriceLookupError> {
        Ok(self.0)
    }
}
