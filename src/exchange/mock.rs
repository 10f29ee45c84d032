//! Scriptable mock exchange for tests.
//!
//! `MockMarketData` serves canned order-book details; `MockAccountApi`
//! records every order it receives and replays scripted failures, which is
//! how the rollback and retry paths are exercised without a live venue.

use crate::exchange::traits::{AccountApi, MarketDataApi};
use crate::exchange::types::*;
use anyhow::bail;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Canned market-data source.
#[derive(Default)]
pub struct MockMarketData {
    details: HashMap<u32, OrderBookDetail>,
    fetch_count: AtomicU64,
}

impl MockMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a market detail to serve.
    pub fn with_detail(mut self, detail: OrderBookDetail) -> Self {
        self.details.insert(detail.market_id, detail);
        self
    }

    /// Total number of detail fetches served.
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Build a plausible detail record for tests.
    pub fn detail(
        market_id: u32,
        symbol: &str,
        margin_fraction_bps: u32,
        size_decimals: u32,
        best_bid: Decimal,
        best_ask: Decimal,
    ) -> OrderBookDetail {
        OrderBookDetail {
            market_id,
            symbol: symbol.to_string(),
            min_initial_margin_fraction: margin_fraction_bps,
            size_decimals,
            price_decimals: 2,
            best_bid,
            best_ask,
        }
    }
}

#[async_trait]
impl MarketDataApi for MockMarketData {
    async fn order_book_detail(&self, market_id: u32) -> anyhow::Result<OrderBookDetail> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        match self.details.get(&market_id) {
            Some(detail) => Ok(detail.clone()),
            None => bail!("Market {} not found in order book details", market_id),
        }
    }
}

/// Mock signed client for one account.
///
/// Responses are served from a script queue; once the queue is exhausted
/// every call succeeds with a synthetic transaction hash.
#[derive(Default)]
pub struct MockAccountApi {
    orders: Mutex<Vec<OrderRequest>>,
    leverage_updates: Mutex<Vec<LeverageUpdate>>,
    script: Mutex<VecDeque<Result<TxReceipt, ExecutionError>>>,
    tx_counter: AtomicU64,
    /// Artificial latency per call, for timeout tests.
    delay: Option<Duration>,
}

impl MockAccountApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `delay` before responding.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue the next response (applies to orders only).
    pub fn push_response(&self, response: Result<TxReceipt, ExecutionError>) {
        self.script.lock().unwrap().push_back(response);
    }

    /// Queue a rejection for the next order.
    pub fn fail_next(&self, message: &str) {
        self.push_response(Err(ExecutionError::Rejected(message.to_string())));
    }

    /// Orders received so far, in arrival order.
    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }

    /// Leverage updates received so far.
    pub fn leverage_updates(&self) -> Vec<LeverageUpdate> {
        self.leverage_updates.lock().unwrap().clone()
    }

    fn next_receipt(&self) -> TxReceipt {
        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        TxReceipt {
            tx_hash: format!("0xmock{n:016x}"),
        }
    }
}

#[async_trait]
impl AccountApi for MockAccountApi {
    async fn place_order(&self, order: &OrderRequest) -> Result<TxReceipt, ExecutionError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.orders.lock().unwrap().push(order.clone());
        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(response) => response,
            None => Ok(self.next_receipt()),
        }
    }

    async fn set_leverage(
        &self,
        market_id: u32,
        leverage: u32,
        margin_mode: MarginMode,
    ) -> Result<(), ExecutionError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.leverage_updates.lock().unwrap().push(LeverageUpdate {
            market_id,
            leverage,
            margin_mode: margin_mode.as_code(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_mock_serves_details_and_counts_fetches() {
        let data = MockMarketData::new().with_detail(MockMarketData::detail(
            1,
            "ETH-USDT",
            250,
            4,
            dec!(1999),
            dec!(2001),
        ));

        let detail = data.order_book_detail(1).await.unwrap();
        assert_eq!(detail.symbol, "ETH-USDT");
        assert!(data.order_book_detail(9).await.is_err());
        assert_eq!(data.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_account_replays_script_then_succeeds() {
        let api = MockAccountApi::new();
        api.fail_next("margin check failed");

        let order = OrderRequest {
            market_id: 1,
            client_order_id: 7,
            side: OrderSide::Buy,
            base_amount: 100,
            price_limit: dec!(2001),
            reduce_only: false,
        };

        assert!(matches!(
            api.place_order(&order).await,
            Err(ExecutionError::Rejected(_))
        ));
        assert!(api.place_order(&order).await.is_ok());
        assert_eq!(api.orders().len(), 2);
    }
}
