//! Closing logic: flatten both legs of a cycle with bounded retries.
//!
//! Closes are always reduce-only, so a duplicate submission after an
//! ambiguous failure can never flip a position into fresh exposure.

use crate::account::AccountExecutor;
use crate::config::ExecutionConfig;
use crate::exchange::MarketDataApi;
use crate::market::price_limits;
use crate::orchestrator::cycle::{CycleOutcome, Position, PositionStatus, Side, TradeCycle};
use crate::orchestrator::stats::StatsCollector;
use crate::utils::decimal::mid_price;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// Bounded retry with linear backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(execution: &ExecutionConfig) -> Self {
        Self {
            max_attempts: execution.close_retry_max.max(1),
            backoff: Duration::from_millis(execution.close_retry_backoff_ms),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

/// Close one position with retries. Returns `true` when the exchange
/// acknowledged the close; the position status is updated either way.
pub async fn close_position(
    executor: &AccountExecutor,
    position: &mut Position,
    price_limit: Decimal,
    policy: &RetryPolicy,
) -> bool {
    position.status = PositionStatus::PendingClose;
    for attempt in 1..=policy.max_attempts {
        match executor
            .place_order(
                position.market_id,
                position.side.close_order(),
                position.size,
                price_limit,
                true,
            )
            .await
        {
            Ok(receipt) => {
                info!(
                    cycle_id = position.cycle_id,
                    market_id = position.market_id,
                    side = position.side.as_str(),
                    account = executor.label(),
                    tx_hash = %receipt.tx_hash,
                    "Position closed"
                );
                position.status = PositionStatus::Closed;
                return true;
            }
            Err(e) => {
                warn!(
                    cycle_id = position.cycle_id,
                    market_id = position.market_id,
                    side = position.side.as_str(),
                    account = executor.label(),
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "Close attempt failed"
                );
                if attempt < policy.max_attempts {
                    tokio::time::sleep(policy.delay(attempt)).await;
                }
            }
        }
    }

    error!(
        cycle_id = position.cycle_id,
        market_id = position.market_id,
        side = position.side.as_str(),
        account = executor.label(),
        "Giving up on close, position needs manual intervention"
    );
    position.status = PositionStatus::Failed;
    false
}

/// Flattens complete cycles and records their outcomes.
pub struct CycleCloser {
    long: AccountExecutor,
    short: AccountExecutor,
    market_data: Arc<dyn MarketDataApi>,
    stats: Arc<Mutex<StatsCollector>>,
    policy: RetryPolicy,
    max_slippage: Decimal,
}

impl CycleCloser {
    pub fn new(
        long: AccountExecutor,
        short: AccountExecutor,
        market_data: Arc<dyn MarketDataApi>,
        stats: Arc<Mutex<StatsCollector>>,
        policy: RetryPolicy,
        max_slippage: Decimal,
    ) -> Self {
        Self {
            long,
            short,
            market_data,
            stats,
            policy,
            max_slippage,
        }
    }

    fn executor_for(&self, side: Side) -> &AccountExecutor {
        match side {
            Side::Long => &self.long,
            Side::Short => &self.short,
        }
    }

    /// Close both legs of a cycle and record its terminal outcome.
    pub async fn close_cycle(&self, mut cycle: TradeCycle) -> CycleOutcome {
        info!(cycle_id = cycle.id, market_id = cycle.market_id, "Closing cycle");

        // Fresh mid for the slippage band; the entry mid is the fallback so
        // a market-data hiccup never blocks a close.
        let reference = match self.market_data.order_book_detail(cycle.market_id).await {
            Ok(detail) => mid_price(detail.best_bid, detail.best_ask),
            Err(e) => {
                warn!(
                    cycle_id = cycle.id,
                    market_id = cycle.market_id,
                    error = %e,
                    "Price fetch failed before close, using entry price"
                );
                cycle.long.entry_price
            }
        };
        let limits = price_limits(reference, self.max_slippage);

        // Closing the long is a sell, closing the short is a buy.
        let (long_closed, short_closed) = tokio::join!(
            close_position(
                self.executor_for(Side::Long),
                &mut cycle.long,
                limits.short_min,
                &self.policy,
            ),
            close_position(
                self.executor_for(Side::Short),
                &mut cycle.short,
                limits.long_max,
                &self.policy,
            ),
        );

        // One flat leg next to one stuck leg is a partial failure; it only
        // becomes a plain failure when neither leg could be flattened.
        let outcome = match (long_closed, short_closed) {
            (true, true) => CycleOutcome::Success,
            (false, false) => CycleOutcome::Failure,
            _ => CycleOutcome::PartialFailure,
        };

        let mut stats = self.stats.lock().unwrap();
        stats.record(cycle.market_id, outcome);
        if !long_closed {
            stats.record_unclosed(cycle.long.clone());
        }
        if !short_closed {
            stats.record_unclosed(cycle.short.clone());
        }

        info!(cycle_id = cycle.id, ?outcome, "Cycle finished");
        outcome
    }
}
