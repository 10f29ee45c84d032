//! Position sizing and slippage price limits.

use crate::market::catalog::Market;
use crate::utils::decimal::{floor_to_units, pow10};
use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// How the per-leg trade size is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizingMode {
    /// Fixed size in exchange-native base units.
    BaseUnits(u64),
    /// Margin target per leg in quote currency; notional is margin x leverage.
    MarginQuote(Decimal),
}

/// Price limits for the two legs of one cycle.
#[derive(Debug, Clone, Copy)]
pub struct PriceLimits {
    /// Highest acceptable fill for the long (buy) leg.
    pub long_max: Decimal,
    /// Lowest acceptable fill for the short (sell) leg.
    pub short_min: Decimal,
}

/// Slippage band around the mid price.
pub fn price_limits(mid_price: Decimal, max_slippage: Decimal) -> PriceLimits {
    PriceLimits {
        long_max: mid_price * (Decimal::ONE + max_slippage),
        short_min: mid_price * (Decimal::ONE - max_slippage),
    }
}

/// Compute the base size (integer native units) for both legs of a cycle.
///
/// Margin mode: `notional = margin x avg(leverage_long, leverage_short)`,
/// `base_units = floor(notional / price * 10^size_decimals)`. Flooring keeps
/// the committed margin at or below the configured target.
pub fn compute_base_size(
    market: &Market,
    mid_price: Decimal,
    sizing: SizingMode,
    leverage_long: u32,
    leverage_short: u32,
) -> Result<u64> {
    match sizing {
        SizingMode::BaseUnits(units) => {
            if units == 0 {
                bail!("fixed base size must be at least 1 unit");
            }
            Ok(units)
        }
        SizingMode::MarginQuote(margin) => {
            if mid_price <= Decimal::ZERO {
                bail!(
                    "market {} ({}): non-positive mid price {}",
                    market.id,
                    market.symbol,
                    mid_price
                );
            }

            let avg_leverage =
                (Decimal::from(leverage_long) + Decimal::from(leverage_short)) / dec!(2);
            let notional = margin * avg_leverage;
            let raw_units = notional / mid_price;
            let base_units = floor_to_units(raw_units, market.size_decimals);

            if base_units == 0 {
                bail!(
                    "market {} ({}): margin {} at {}x rounds to zero base units \
                     (price {}, {} size decimals)",
                    market.id,
                    market.symbol,
                    margin,
                    avg_leverage,
                    mid_price,
                    market.size_decimals
                );
            }
            Ok(base_units)
        }
    }
}

/// Notional value of a base-unit quantity at a reference price.
pub fn notional_value(base_units: u64, size_decimals: u32, price: Decimal) -> Decimal {
    Decimal::from(base_units) / pow10(size_decimals) * price
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market(size_decimals: u32) -> Market {
        Market {
            id: 0,
            symbol: "BTC-USDT".to_string(),
            max_leverage: 50,
            size_decimals,
        }
    }

    #[test]
    fn test_margin_sizing_btc_example() {
        // margin $2 at 50x on a $107,000 market with 5 size decimals
        let units = compute_base_size(
            &market(5),
            dec!(107000),
            SizingMode::MarginQuote(dec!(2)),
            50,
            50,
        )
        .unwrap();
        assert_eq!(units, 93);
    }

    #[test]
    fn test_margin_sizing_unlevered_example() {
        // margin $100 at 1x on a $2,000 market with 4 size decimals
        let units = compute_base_size(
            &market(4),
            dec!(2000),
            SizingMode::MarginQuote(dec!(100)),
            1,
            1,
        )
        .unwrap();
        assert_eq!(units, 500);
    }

    #[test]
    fn test_margin_sizing_uses_average_of_asymmetric_leverage() {
        // avg(40, 60) = 50 -> same result as the symmetric case
        let units = compute_base_size(
            &market(5),
            dec!(107000),
            SizingMode::MarginQuote(dec!(2)),
            40,
            60,
        )
        .unwrap();
        assert_eq!(units, 93);
    }

    #[test]
    fn test_margin_sizing_floors_never_rounds_up() {
        // 100 / 2000 * 10^1 = 0.5 -> floors to 0 -> error, never 1
        let result = compute_base_size(
            &market(1),
            dec!(2000),
            SizingMode::MarginQuote(dec!(100)),
            1,
            1,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_fixed_units_pass_through() {
        let units =
            compute_base_size(&market(4), dec!(2000), SizingMode::BaseUnits(5000), 10, 10).unwrap();
        assert_eq!(units, 5000);

        assert!(compute_base_size(&market(4), dec!(2000), SizingMode::BaseUnits(0), 10, 10).is_err());
    }

    #[test]
    fn test_price_limits_band() {
        let limits = price_limits(dec!(100), dec!(0.02));
        assert_eq!(limits.long_max, dec!(102.00));
        assert_eq!(limits.short_min, dec!(98.00));
    }

    #[test]
    fn test_notional_value() {
        // 93 units at 5 decimals = 0.00093 BTC; at $107,000 that's $99.51
        assert_eq!(notional_value(93, 5, dec!(107000)), dec!(99.51));
    }
}
