use std::collections::HashMap;

use ethers::types::Address;
use once_cell::sync::Lazy;

use crate::types::{NativeCurrency, TokenDescriptor};

/// Multicall3 is deployed at the same address on every supported chain.
const MULTICALL3: &str = "0xcA11bde05977b3631167028862bE2a173976CA11";

/// Symbols always priced at exactly 1.0 USD, before any pool or API lookup.
pub static STABLECOIN_SYMBOLS: &[&str] = &[
    "USDC", "USDC.E", "USDBC", "USDT", "DAI", "BUSD", "FRAX", "TUSD", "LUSD", "USDP", "GUSD",
    "PYUSD",
];

pub fn is_stablecoin(symbol: &str) -> bool {
    let upper = symbol.to_uppercase();
    STABLECOIN_SYMBOLS.iter().any(|s| *s == upper)
}

/// Static description of one supported chain. Pure data; loaded once at
/// process start and never mutated.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub name: String,
    /// Primary endpoint first, fallbacks in order.
    pub rpc_endpoints: Vec<String>,
    pub native: NativeCurrency,
    pub common_tokens: Vec<TokenDescriptor>,
    /// Wrapped-native token used as the intermediate pricing hop.
    pub quote_token: TokenDescriptor,
    /// USD stablecoin used as the pricing quote.
    pub stable_quote: TokenDescriptor,
    pub amm_factory: Address,
    pub multicall: Address,
    /// Platform identifier for the external price API.
    pub price_api_platform: &'static str,
    /// Well-known coin id for the native asset on the external price API.
    pub native_coin_id: &'static str,
}

fn token(address: &str, symbol: &str, name: &str, decimals: u8) -> TokenDescriptor {
    TokenDescriptor {
        address: address.parse().unwrap(),
        symbol: symbol.to_string(),
        name: name.to_string(),
        decimals,
        logo_url: None,
    }
}

fn native(symbol: &str, name: &str) -> NativeCurrency {
    NativeCurrency {
        symbol: symbol.to_string(),
        name: name.to_string(),
        decimals: 18,
    }
}

static DEFAULT_NETWORKS: Lazy<Vec<NetworkConfig>> = Lazy::new(|| {
    let mut networks = Vec::new();

    // Ethereum mainnet
    {
        let weth = token(
            "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
            "WETH",
            "Wrapped Ether",
            18,
        );
        let usdc = token(
            "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
            "USDC",
            "USD Coin",
            6,
        );
        networks.push(NetworkConfig {
            chain_id: 1,
            name: "Ethereum".to_string(),
            rpc_endpoints: vec![
                "https://eth.llamarpc.com".to_string(),
                "https://rpc.ankr.com/eth".to_string(),
            ],
            native: native("ETH", "Ether"),
            common_tokens: vec![
                weth.clone(),
                usdc.clone(),
                token(
                    "0xdAC17F958D2ee523a2206206994597C13D831ec7",
                    "USDT",
                    "Tether USD",
                    6,
                ),
                token(
                    "0x6B175474E89094C44Da98b954EedeAC495271d0F",
                    "DAI",
                    "Dai Stablecoin",
                    18,
                ),
                token(
                    "0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599",
                    "WBTC",
                    "Wrapped BTC",
                    8,
                ),
                token(
                    "0x514910771AF9Ca656af840dff83E8264EcF986CA",
                    "LINK",
                    "ChainLink Token",
                    18,
                ),
                token(
                    "0x1f9840a85d5aF5bf1D1762F925BDADdC4201F984",
                    "UNI",
                    "Uniswap",
                    18,
                ),
            ],
            quote_token: weth,
            stable_quote: usdc,
            amm_factory: "0x1F98431c8aD98523631AE4a59f267346ea31F984".parse().unwrap(),
            multicall: MULTICALL3.parse().unwrap(),
            price_api_platform: "ethereum",
            native_coin_id: "ethereum",
        });
    }

    // Arbitrum One
    {
        let weth = token(
            "0x82aF49447D8a07e3bd95BD0d56f35241523fBab1",
            "WETH",
            "Wrapped Ether",
            18,
        );
        let usdc = token(
            "0xaf88d065e77c8cC2239327C5EDb3A432268e5831",
            "USDC",
            "USD Coin",
            6,
        );
        networks.push(NetworkConfig {
            chain_id: 42161,
            name: "Arbitrum One".to_string(),
            rpc_endpoints: vec![
                "https://arb1.arbitrum.io/rpc".to_string(),
                "https://rpc.ankr.com/arbitrum".to_string(),
            ],
            native: native("ETH", "Ether"),
            common_tokens: vec![
                weth.clone(),
                usdc.clone(),
                token(
                    "0xFF970A61A04b1Ca14834A43f5de4533eBDDB5CC8",
                    "USDC.e",
                    "Bridged USDC",
                    6,
                ),
                token(
                    "0xFd086bC7CD5C481DCC9C85ebE478A1C0b69FCbb9",
                    "USDT",
                    "Tether USD",
                    6,
                ),
                token(
                    "0xDA10009cBd5D07dd0CeCc66161FC93D7c9000da1",
                    "DAI",
                    "Dai Stablecoin",
                    18,
                ),
                token(
                    "0x912CE59144191C1204E64559FE8253a0e49E6548",
                    "ARB",
                    "Arbitrum",
                    18,
                ),
                token(
                    "0x2f2a2543B76A4166549F7aaB2e75Bef0aefC5B0f",
                    "WBTC",
                    "Wrapped BTC",
                    8,
                ),
                token(
                    "0xf97f4df75117a78c1A5a0DBb814Af92458539FB4",
                    "LINK",
                    "ChainLink Token",
                    18,
                ),
            ],
            quote_token: weth,
            stable_quote: usdc,
            amm_factory: "0x1F98431c8aD98523631AE4a59f267346ea31F984".parse().unwrap(),
            multicall: MULTICALL3.parse().unwrap(),
            price_api_platform: "arbitrum-one",
            native_coin_id: "ethereum",
        });
    }

    // Base
    {
        let weth = token(
            "0x4200000000000000000000000000000000000006",
            "WETH",
            "Wrapped Ether",
            18,
        );
        let usdc = token(
            "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
            "USDC",
            "USD Coin",
            6,
        );
        networks.push(NetworkConfig {
            chain_id: 8453,
            name: "Base".to_string(),
            rpc_endpoints: vec![
                "https://mainnet.base.org".to_string(),
                "https://base.llamarpc.com".to_string(),
            ],
            native: native("ETH", "Ether"),
            common_tokens: vec![
                weth.clone(),
                usdc.clone(),
                token(
                    "0xd9aAEc86B65D86f6A7B5B1b0c42FFA531710b6CA",
                    "USDbC",
                    "USD Base Coin",
                    6,
                ),
                token(
                    "0x50c5725949A6F0c72E6C4a641F24049A917DB0Cb",
                    "DAI",
                    "Dai Stablecoin",
                    18,
                ),
                token(
                    "0x2Ae3F1Ec7F1F5012CFEab0185bfc7aa3cf0DEc22",
                    "cbETH",
                    "Coinbase Wrapped Staked ETH",
                    18,
                ),
            ],
            quote_token: weth,
            stable_quote: usdc,
            amm_factory: "0x33128a8fC17869897dcE68Ed026d694621f6FDfD".parse().unwrap(),
            multicall: MULTICALL3.parse().unwrap(),
            price_api_platform: "base",
            native_coin_id: "ethereum",
        });
    }

    // Polygon PoS
    {
        let wmatic = token(
            "0x0d500B1d8E8eF31E21C99d1Db9A6444d3ADf1270",
            "WMATIC",
            "Wrapped Matic",
            18,
        );
        let usdc = token(
            "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359",
            "USDC",
            "USD Coin",
            6,
        );
        networks.push(NetworkConfig {
            chain_id: 137,
            name: "Polygon".to_string(),
            rpc_endpoints: vec![
                "https://polygon-rpc.com".to_string(),
                "https://rpc.ankr.com/polygon".to_string(),
            ],
            native: native("MATIC", "Matic"),
            common_tokens: vec![
                wmatic.clone(),
                usdc.clone(),
                token(
                    "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174",
                    "USDC.e",
                    "Bridged USDC",
                    6,
                ),
                token(
                    "0xc2132D05D31c914a87C6611C10748AEb04B58e8F",
                    "USDT",
                    "Tether USD",
                    6,
                ),
                token(
                    "0x8f3Cf7ad23Cd3CaDbD9735AFf958023239c6A063",
                    "DAI",
                    "Dai Stablecoin",
                    18,
                ),
                token(
                    "0x7ceB23fD6bC0adD59E62ac25578270cFf1b9f619",
                    "WETH",
                    "Wrapped Ether",
                    18,
                ),
                token(
                    "0x1BFD67037B42Cf73acF2047067bd4F2C47D9BfD6",
                    "WBTC",
                    "Wrapped BTC",
                    8,
                ),
            ],
            quote_token: wmatic,
            stable_quote: usdc,
            amm_factory: "0x1F98431c8aD98523631AE4a59f267346ea31F984".parse().unwrap(),
            multicall: MULTICALL3.parse().unwrap(),
            price_api_platform: "polygon-pos",
            native_coin_id: "matic-network",
        });
    }

    networks
});

/// Lookup table over the configured chain set, keyed by chain id.
#[derive(Debug, Clone)]
pub struct NetworkRegistry {
    networks: Vec<NetworkConfig>,
}

impl NetworkRegistry {
    /// Registry over the built-in production networks.
    pub fn with_defaults() -> Self {
        Self {
            networks: DEFAULT_NETWORKS.clone(),
        }
    }

    /// Replaces the RPC endpoint list for any chain present in `overrides`
    /// (keys are chain ids rendered as strings, as they come from config).
    pub fn with_endpoint_overrides(mut self, overrides: &HashMap<String, Vec<String>>) -> Self {
        for net in &mut self.networks {
            if let Some(urls) = overrides.get(&net.chain_id.to_string()) {
                if !urls.is_empty() {
                    net.rpc_endpoints = urls.clone();
                }
            }
        }
        self
    }

    pub fn get(&self, chain_id: u64) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.chain_id == chain_id)
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        self.networks.iter().map(|n| n.chain_id).collect()
    }

    pub fn networks(&self) -> &[NetworkConfig] {
        &self.networks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_ids_are_unique() {
        let registry = NetworkRegistry::with_defaults();
        let mut ids = registry.chain_ids();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), registry.networks().len());
    }

    #[test]
    fn every_network_carries_quote_and_stable_tokens() {
        let registry = NetworkRegistry::with_defaults();
        for net in registry.networks() {
            assert!(!net.rpc_endpoints.is_empty(), "{} has no endpoints", net.name);
            assert!(is_stablecoin(&net.stable_quote.symbol), "{}", net.name);
            assert_eq!(net.native.decimals, 18);
            assert!(
                net.common_tokens
                    .iter()
                    .any(|t| t.address == net.quote_token.address),
                "{} quote token missing from common tokens",
                net.name
            );
        }
    }

    #[test]
    fn stablecoin_matching_is_case_insensitive() {
        assert!(is_stablecoin("usdc"));
        assert!(is_stablecoin("USDC.e"));
        assert!(is_stablecoin("Dai"));
        assert!(!is_stablecoin("WETH"));
        assert!(!is_stablecoin("ARB"));
    }

    #[test]
    fn endpoint_overrides_replace_only_named_chains() {
        let mut overrides = HashMap::new();
        overrides.insert("1".to_string(), vec!["http://localhost:8545".to_string()]);
        let registry = NetworkRegistry::with_defaults().with_endpoint_overrides(&overrides);
        assert_eq!(
            registry.get(1).unwrap().rpc_endpoints,
            vec!["http://localhost:8545".to_string()]
        );
        assert!(registry.get(8453).unwrap().rpc_endpoints[0].contains("base"));
    }
}
