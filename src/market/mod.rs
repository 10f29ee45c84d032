//! Market metadata, selection, and sizing.

mod catalog;
mod selection;
mod sizing;

pub use catalog::{Market, MarketCatalog, MarketValidationError};
pub use selection::{select_leverage, select_market, LeverageMode};
pub use sizing::{compute_base_size, notional_value, price_limits, PriceLimits, SizingMode};
