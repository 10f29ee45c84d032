//! Decimal arithmetic utilities for sizing and price math.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// 10^decimals as a Decimal. Callers pass precision exponents of validated
/// markets, which are capped at 18 during catalog validation.
pub fn pow10(decimals: u32) -> Decimal {
    Decimal::from(10u64.pow(decimals))
}

/// Mid-point of the best bid and ask.
pub fn mid_price(best_bid: Decimal, best_ask: Decimal) -> Decimal {
    (best_bid + best_ask) / dec!(2)
}

/// Bid-ask spread as a fraction of the ask.
pub fn spread_fraction(best_bid: Decimal, best_ask: Decimal) -> Decimal {
    if best_ask == Decimal::ZERO {
        return Decimal::ZERO;
    }
    (best_ask - best_bid) / best_ask
}

/// Convert a human-scale quantity to integer base units, flooring.
/// Flooring (never rounding up) keeps the committed margin at or below the
/// configured target.
pub fn floor_to_units(quantity: Decimal, size_decimals: u32) -> u64 {
    (quantity * pow10(size_decimals))
        .floor()
        .to_u64()
        .unwrap_or(0)
}
