//! Market catalog: startup fetch and validation of whitelisted markets.

use crate::exchange::MarketDataApi;
use crate::market::selection::LeverageMode;
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;

/// Upper bound on the size-precision exponent. `10^18` still fits in a
/// `u64`, so sizing math never overflows for a validated market.
const MAX_SIZE_DECIMALS: u32 = 18;

/// Per-market metadata, immutable once fetched. Refreshed only at startup.
#[derive(Debug, Clone)]
pub struct Market {
    pub id: u32,
    pub symbol: String,
    pub max_leverage: u32,
    pub size_decimals: u32,
}

/// Whitelist validation failure. Fatal: the run refuses to start rather than
/// silently excluding a bad market.
#[derive(Debug, Error)]
#[error("market validation failed:\n{}", problems.join("\n"))]
pub struct MarketValidationError {
    pub problems: Vec<String>,
}

/// Validated view of the whitelisted markets.
#[derive(Debug, Clone)]
pub struct MarketCatalog {
    markets: HashMap<u32, Market>,
}

impl MarketCatalog {
    /// Fetch metadata for every distinct whitelisted market exactly once and
    /// validate the leverage configuration against it.
    ///
    /// Every problem is collected and reported with its market id; any
    /// problem fails the whole validation.
    pub async fn validate(
        client: &dyn MarketDataApi,
        whitelist: &[u32],
        mode: &LeverageMode,
    ) -> Result<Self, MarketValidationError> {
        let mut markets = HashMap::new();
        let mut problems = Vec::new();

        let mut distinct: Vec<u32> = whitelist.to_vec();
        distinct.sort_unstable();
        distinct.dedup();

        for market_id in distinct {
            let detail = match client.order_book_detail(market_id).await {
                Ok(detail) => detail,
                Err(e) => {
                    problems.push(format!("  - market {market_id}: fetch failed: {e}"));
                    continue;
                }
            };

            if detail.size_decimals > MAX_SIZE_DECIMALS {
                problems.push(format!(
                    "  - market {market_id} ({}): size precision {} exceeds the supported maximum of {MAX_SIZE_DECIMALS}",
                    detail.symbol, detail.size_decimals
                ));
                continue;
            }

            if detail.min_initial_margin_fraction == 0 {
                problems.push(format!(
                    "  - market {market_id} ({}): exchange reported zero initial margin fraction",
                    detail.symbol
                ));
                continue;
            }

            // Margin fraction is in basis points: 500 bps = 5% = 20x.
            let max_leverage = 10_000 / detail.min_initial_margin_fraction;
            if max_leverage == 0 {
                problems.push(format!(
                    "  - market {market_id} ({}): initial margin fraction {} bps allows no leverage",
                    detail.symbol, detail.min_initial_margin_fraction
                ));
                continue;
            }

            if let LeverageMode::Fixed(configured) = mode {
                if *configured > max_leverage {
                    problems.push(format!(
                        "  - market {market_id} ({}): leverage {configured}x exceeds max {max_leverage}x",
                        detail.symbol
                    ));
                    continue;
                }
            }

            info!(
                market_id,
                symbol = %detail.symbol,
                max_leverage,
                size_decimals = detail.size_decimals,
                "Market validated"
            );

            markets.insert(
                market_id,
                Market {
                    id: market_id,
                    symbol: detail.symbol,
                    max_leverage,
                    size_decimals: detail.size_decimals,
                },
            );
        }

        if problems.is_empty() {
            Ok(Self { markets })
        } else {
            Err(MarketValidationError { problems })
        }
    }

    /// Look up a validated market. Whitelisted ids are always present after
    /// a successful [`MarketCatalog::validate`].
    pub fn market(&self, market_id: u32) -> Option<&Market> {
        self.markets.get(&market_id)
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::MockMarketData;
    use rust_decimal_macros::dec;

    fn mock_with_two_markets() -> MockMarketData {
        MockMarketData::new()
            .with_detail(MockMarketData::detail(
                0,
                "BTC-USDT",
                200, // 2% -> 50x
                5,
                dec!(106990),
                dec!(107010),
            ))
            .with_detail(MockMarketData::detail(
                1,
                "ETH-USDT",
                500, // 5% -> 20x
                4,
                dec!(1999),
                dec!(2001),
            ))
    }

    #[tokio::test]
    async fn test_computes_max_leverage_from_margin_fraction() {
        let data = mock_with_two_markets();
        let catalog = MarketCatalog::validate(&data, &[0, 1], &LeverageMode::Dynamic { buffer: 5 })
            .await
            .unwrap();

        assert_eq!(catalog.market(0).unwrap().max_leverage, 50);
        assert_eq!(catalog.market(1).unwrap().max_leverage, 20);
        assert_eq!(catalog.market(1).unwrap().size_decimals, 4);
    }

    #[tokio::test]
    async fn test_fixed_leverage_above_any_market_max_names_the_market() {
        let data = mock_with_two_markets();
        let err = MarketCatalog::validate(&data, &[0, 1], &LeverageMode::Fixed(25))
            .await
            .unwrap_err();

        // 25x is fine for BTC (50x max) but not ETH (20x max)
        let message = err.to_string();
        assert!(message.contains("market 1"), "got: {message}");
        assert!(message.contains("25x exceeds max 20x"), "got: {message}");
    }

    #[tokio::test]
    async fn test_unknown_market_fails_the_whole_validation() {
        let data = mock_with_two_markets();
        let err = MarketCatalog::validate(&data, &[0, 42], &LeverageMode::Fixed(10))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("market 42"));
    }

    #[tokio::test]
    async fn test_rejects_absurd_size_precision() {
        let data = mock_with_two_markets().with_detail(MockMarketData::detail(
            2,
            "BAD-USDT",
            500,
            20, // 10^20 would not fit in a u64
            dec!(0.9),
            dec!(1.1),
        ));
        let err = MarketCatalog::validate(&data, &[0, 2], &LeverageMode::Fixed(10))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("market 2"), "got: {message}");
        assert!(message.contains("size precision 20"), "got: {message}");
    }

    #[tokio::test]
    async fn test_duplicate_whitelist_entries_fetch_once() {
        let data = mock_with_two_markets();
        let catalog = MarketCatalog::validate(&data, &[0, 0, 1, 0], &LeverageMode::Fixed(10))
            .await
            .unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(data.fetch_count(), 2);
    }
}
