use chrono::Utc;

use crate::amm_math::u256_to_f64_lossy;
use crate::types::{
    Balance, BalanceAsset, HoldingKind, NftValuation, PortfolioSnapshot, PriceQuote,
    UnifiedHolding,
};

/// Merges priced native balances, priced token balances and externally
/// valued NFT holdings into one ordered snapshot.
///
/// Pure and idempotent: identical inputs produce identical output. Zero-raw
/// balances and zero-quantity NFT rows never appear in the result. The sort
/// is total: USD value descending, ties broken by category (fungible tokens
/// ahead of real-world-asset collections ahead of general collections),
/// then symbol, so equal inputs refresh into an identical ordering.
pub fn aggregate(
    native: &[(Balance, PriceQuote)],
    tokens: &[(Balance, PriceQuote)],
    nfts: &[NftValuation],
    chain_name: impl Fn(u64) -> String,
) -> PortfolioSnapshot {
    // (holding, category rank) pairs; the rank is only a sort key
    let mut ranked: Vec<(UnifiedHolding, u8)> = Vec::new();

    for (balance, quote) in native.iter().chain(tokens.iter()) {
        if balance.raw.is_zero() {
            continue;
        }
        let (kind, id_key) = match &balance.asset {
            BalanceAsset::Native(currency) => (HoldingKind::Native, currency.symbol.clone()),
            BalanceAsset::Token(token) => (HoldingKind::Erc20, format!("{:#x}", token.address)),
        };
        let quantity = u256_to_f64_lossy(balance.raw) / 10f64.powi(balance.decimals as i32);
        let unit_price_usd = quote.unit_price_usd;
        let holding = UnifiedHolding {
            id: UnifiedHolding::derive_id(balance.chain_id, kind, &id_key),
            kind,
            chain_id: balance.chain_id,
            chain_name: chain_name(balance.chain_id),
            asset_symbol: balance.asset.symbol().to_string(),
            asset_name: balance.asset.name().to_string(),
            quantity,
            unit_price_usd,
            value_usd: quantity * unit_price_usd,
        };
        ranked.push((holding, 0));
    }

    for nft in nfts {
        if nft.quantity <= 0.0 {
            continue;
        }
        let holding = UnifiedHolding {
            id: UnifiedHolding::derive_id(nft.chain_id, HoldingKind::Nft, &nft.collection_symbol),
            kind: HoldingKind::Nft,
            chain_id: nft.chain_id,
            chain_name: chain_name(nft.chain_id),
            asset_symbol: nft.collection_symbol.clone(),
            asset_name: nft.collection_name.clone(),
            quantity: nft.quantity,
            unit_price_usd: nft.unit_value_usd,
            value_usd: nft.quantity * nft.unit_value_usd,
        };
        let rank = if nft.real_world_asset { 1 } else { 2 };
        ranked.push((holding, rank));
    }

    ranked.sort_by(|(a, rank_a), (b, rank_b)| {
        b.value_usd
            .total_cmp(&a.value_usd)
            .then_with(|| rank_a.cmp(rank_b))
            .then_with(|| a.asset_symbol.cmp(&b.asset_symbol))
    });

    let holdings: Vec<UnifiedHolding> = ranked.into_iter().map(|(h, _)| h).collect();
    let total_value_usd = holdings.iter().map(|h| h.value_usd).sum();

    PortfolioSnapshot {
        holdings,
        total_value_usd,
        refreshed_at: Utc::now(),
    }
}
