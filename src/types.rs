use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

/// Native currency of a chain (ETH, MATIC, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
}

/// A configured ERC-20 token. Identity is (chain id, address); `Address`
/// comparison is byte-wise, so case differences in source strings never
/// split an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenDescriptor {
    pub address: Address,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
}

/// The asset a balance is denominated in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BalanceAsset {
    Native(NativeCurrency),
    Token(TokenDescriptor),
}

impl BalanceAsset {
    pub fn symbol(&self) -> &str {
        match self {
            BalanceAsset::Native(n) => &n.symbol,
            BalanceAsset::Token(t) => &t.symbol,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            BalanceAsset::Native(n) => &n.name,
            BalanceAsset::Token(t) => &t.name,
        }
    }

    pub fn decimals(&self) -> u8 {
        match self {
            BalanceAsset::Native(n) => n.decimals,
            BalanceAsset::Token(t) => t.decimals,
        }
    }
}

/// A raw on-chain balance. Immutable once produced; a refresh supersedes the
/// previous value instead of mutating it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub chain_id: u64,
    pub asset: BalanceAsset,
    pub raw: U256,
    pub formatted: String,
    pub decimals: u8,
}

/// Which tier of the price-discovery chain produced a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceSource {
    Stablecoin,
    OnChainPool,
    ExternalApi,
    Unavailable,
}

/// A resolved USD unit price. `Unavailable` is a valid terminal state, not
/// an error; it prices the holding at zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub chain_id: u64,
    pub token_address: Address,
    pub unit_price_usd: f64,
    pub source: PriceSource,
    pub resolved_at: DateTime<Utc>,
}

impl PriceQuote {
    pub fn new(chain_id: u64, token_address: Address, unit_price_usd: f64, source: PriceSource) -> Self {
        Self {
            chain_id,
            token_address,
            unit_price_usd,
            source,
            resolved_at: Utc::now(),
        }
    }

    pub fn unavailable(chain_id: u64, token_address: Address) -> Self {
        Self::new(chain_id, token_address, 0.0, PriceSource::Unavailable)
    }
}

/// Externally-computed NFT valuation fed into the aggregator. Collection
/// metadata resolution is out of scope here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftValuation {
    pub chain_id: u64,
    pub collection_symbol: String,
    pub collection_name: String,
    pub quantity: f64,
    pub unit_value_usd: f64,
    /// Real-world-asset collections sort ahead of general collections.
    pub real_world_asset: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HoldingKind {
    Native,
    Erc20,
    Nft,
}

impl HoldingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldingKind::Native => "native",
            HoldingKind::Erc20 => "erc20",
            HoldingKind::Nft => "nft",
        }
    }
}

/// The normalized, chain-tagged, USD-valued representation of any held
/// asset. Recomputed wholesale on every aggregation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedHolding {
    /// Stable across refreshes: derived from chain id, kind and the asset's
    /// address (ERC-20) or symbol (native, NFT collections).
    pub id: String,
    pub kind: HoldingKind,
    pub chain_id: u64,
    pub chain_name: String,
    pub asset_symbol: String,
    pub asset_name: String,
    pub quantity: f64,
    pub unit_price_usd: f64,
    pub value_usd: f64,
}

impl UnifiedHolding {
    /// Derives the stable holding id. ERC-20 addresses are lowercased so the
    /// id is insensitive to the checksum casing of the source descriptor.
    pub fn derive_id(chain_id: u64, kind: HoldingKind, key: &str) -> String {
        format!("{}:{}:{}", chain_id, kind.as_str(), key.to_lowercase())
    }
}

/// One immutable aggregation result; consumers swap the whole snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSnapshot {
    pub holdings: Vec<UnifiedHolding>,
    pub total_value_usd: f64,
    pub refreshed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holding_id_is_stable_and_case_insensitive() {
        let a = UnifiedHolding::derive_id(1, HoldingKind::Erc20, "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
        let b = UnifiedHolding::derive_id(1, HoldingKind::Erc20, "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
        assert_eq!(a, b);
        assert_eq!(a, "1:erc20:0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
    }

    #[test]
    fn holding_id_distinguishes_chain_and_kind() {
        let erc20 = UnifiedHolding::derive_id(1, HoldingKind::Erc20, "weth");
        let native = UnifiedHolding::derive_id(1, HoldingKind::Native, "weth");
        let other_chain = UnifiedHolding::derive_id(8453, HoldingKind::Erc20, "weth");
        assert_ne!(erc20, native);
        assert_ne!(erc20, other_chain);
    }
}
