//! Type definitions for the exchange REST API.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Per-market detail returned by the order-book detail endpoint.
///
/// `min_initial_margin_fraction` is expressed in basis points: 500 means a 5%
/// initial margin requirement, which allows 20x leverage.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookDetail {
    pub market_id: u32,
    pub symbol: String,
    pub min_initial_margin_fraction: u32,
    pub size_decimals: u32,
    pub price_decimals: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub best_bid: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub best_ask: Decimal,
}

/// Envelope for the order-book detail endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookDetailsResponse {
    pub order_book_details: Vec<OrderBookDetail>,
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Margin mode for positions, passed through to set-leverage calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    Cross,
    Isolated,
}

impl MarginMode {
    /// Wire code used by the exchange (0 = cross, 1 = isolated).
    pub fn as_code(&self) -> u8 {
        match self {
            MarginMode::Cross => 0,
            MarginMode::Isolated => 1,
        }
    }
}

/// An order submission. `base_amount` is in exchange-native integer base
/// units; `price_limit` bounds the fill price for slippage protection.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub market_id: u32,
    pub client_order_id: u64,
    pub side: OrderSide,
    pub base_amount: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub price_limit: Decimal,
    pub reduce_only: bool,
}

/// Leverage update for one market on one account.
#[derive(Debug, Clone, Serialize)]
pub struct LeverageUpdate {
    pub market_id: u32,
    pub leverage: u32,
    pub margin_mode: u8,
}

/// Acknowledged transaction.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub tx_hash: String,
}

/// Generic response envelope for signed transaction endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct SendTxResponse {
    pub code: u32,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub tx_hash: Option<String>,
}

/// Error raised by an account-executor call.
///
/// The executor performs no retries internally; retry policy is owned by the
/// orchestrator, which treats timeouts identically to rejections.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("network error: {0}")]
    Network(String),
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("account worker is gone")]
    WorkerGone,
}
