// Fixed-point AMM pool price derivation without a quoter contract.
use ethers::types::U256;

/// Prices outside these bounds are treated as "no pool" rather than data.
const MAX_SANE_PRICE: f64 = 1e10;
const MIN_SANE_PRICE: f64 = 1e-10;

/// Lossy scientific conversion of U256 to f64 without intermediate u128
/// casts. Takes the leading digits as mantissa and the remainder as a
/// base-10 exponent.
pub fn u256_to_f64_lossy(v: U256) -> f64 {
    if v.is_zero() {
        return 0.0;
    }
    let s = v.to_string();
    let len = s.len();
    let take = if len >= 18 { 18 } else { len };
    let (mantissa_str, _rest) = s.split_at(take);
    let mantissa = mantissa_str.parse::<f64>().unwrap_or(0.0);
    let exp10 = (len - take) as i32;
    mantissa * 10f64.powi(exp10)
}

/// Converts a pool's sqrtPriceX96 into a human-unit quote price.
///
/// The fixed-point encoding is sqrt(token1_raw / token0_raw) scaled by 2^96,
/// so the raw ratio is (sqrtPriceX96 / 2^96)^2 and the human-unit ratio is
/// that value adjusted by 10^(decimals0 - decimals1). When the priced token
/// is token1 the ratio is inverted so the result is always expressed as
/// quote-token units per one unit of the priced token.
pub fn pool_quote_price(
    sqrt_price_x96: U256,
    decimals0: u8,
    decimals1: u8,
    priced_is_token0: bool,
) -> f64 {
    let sqrt_ratio = u256_to_f64_lossy(sqrt_price_x96) / (1u128 << 96) as f64;
    let raw = sqrt_ratio * sqrt_ratio;
    let adjusted = raw * 10f64.powi(decimals0 as i32 - decimals1 as i32);
    if priced_is_token0 {
        adjusted
    } else {
        let inverted = 1.0 / adjusted;
        if !inverted.is_finite() {
            tracing::warn!(
                "inverting degenerate pool ratio {} (sqrt_price_x96={})",
                adjusted,
                sqrt_price_x96
            );
        }
        inverted
    }
}

/// A price is usable only when finite, positive and within sane magnitude
/// bounds; anything else advances the fallback chain.
pub fn is_sane_price(price: f64) -> bool {
    price.is_finite() && price > 0.0 && price >= MIN_SANE_PRICE && price <= MAX_SANE_PRICE
}
