//! Random market and leverage selection.
//!
//! All draws go through an injected [`rand::Rng`] so tests can seed exact
//! sequences; production passes an entropy-seeded `StdRng`.

use crate::market::catalog::Market;
use rand::Rng;

/// Leverage selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeverageMode {
    /// Both legs use this value.
    Fixed(u32),
    /// Each leg independently draws from
    /// `max(1, market_max - buffer) ..= market_max`.
    Dynamic { buffer: u32 },
}

impl LeverageMode {
    /// Derive the mode from the trading configuration.
    pub fn from_config(trading: &crate::config::TradingConfig) -> Self {
        if trading.dynamic_leverage {
            LeverageMode::Dynamic {
                buffer: trading.leverage_buffer,
            }
        } else {
            LeverageMode::Fixed(trading.leverage)
        }
    }
}

/// Uniform draw over the whitelist sequence.
///
/// An id repeated k times has k times the selection probability. This is the
/// configured weighting mechanism, not an accident: operators bias traffic
/// toward a market by listing it more than once.
pub fn select_market<R: Rng>(whitelist: &[u32], rng: &mut R) -> u32 {
    whitelist[rng.gen_range(0..whitelist.len())]
}

/// Pick per-side leverage for one cycle.
///
/// In dynamic mode the two draws are independent, which is what produces
/// asymmetric per-side leverage while the notional values stay equal.
pub fn select_leverage<R: Rng>(market: &Market, mode: &LeverageMode, rng: &mut R) -> (u32, u32) {
    match mode {
        LeverageMode::Fixed(value) => (*value, *value),
        LeverageMode::Dynamic { buffer } => {
            let hi = market.max_leverage.max(1);
            let lo = hi.saturating_sub(*buffer).max(1);
            (rng.gen_range(lo..=hi), rng.gen_range(lo..=hi))
        }
    }
}
