//! Exchange API traits.
//!
//! Split along the trust boundary: public market data needs no credentials
//! and is shared freely, while signed account operations are owned by exactly
//! one account executor each. Implement both for a new venue, or swap in the
//! mocks from [`crate::exchange::mock`] for tests.

use crate::exchange::types::{ExecutionError, MarginMode, OrderBookDetail, OrderRequest, TxReceipt};
use async_trait::async_trait;

/// Unauthenticated market-data access.
#[async_trait]
pub trait MarketDataApi: Send + Sync {
    /// Fetch order-book detail (margin fraction, precision, best bid/ask)
    /// for a single market.
    async fn order_book_detail(&self, market_id: u32) -> anyhow::Result<OrderBookDetail>;
}

/// Signed operations against a single account.
///
/// Implementations own that account's signing state (key material and the
/// monotonic request nonce). They must never be shared between executors:
/// exchange-side sequence numbers are strictly ordered per account.
#[async_trait]
pub trait AccountApi: Send + Sync {
    /// Place an order. Returns the transaction receipt on acceptance.
    async fn place_order(&self, order: &OrderRequest) -> Result<TxReceipt, ExecutionError>;

    /// Update leverage for one market on this account.
    async fn set_leverage(
        &self,
        market_id: u32,
        leverage: u32,
        margin_mode: MarginMode,
    ) -> Result<(), ExecutionError>;
}
