//! Cycle orchestration: the open loop, rollback on partial fills, and the
//! handoff to the close scheduler.
//!
//! One cycle is a matched pair of orders, a long on one account and a short
//! of identical size on the other, opened together and closed together after
//! a randomized hold. The orchestrator never holds net exposure on purpose;
//! every code path below either ends with both legs open or with both legs
//! flat, and the one exception (a close that exhausts its retries) is loudly
//! reported as an unclosed position.

mod closer;
mod cycle;
mod scheduler;
mod stats;

pub use closer::{close_position, CycleCloser, RetryPolicy};
pub use cycle::{CycleOutcome, CycleRegistry, Position, PositionStatus, Side, TradeCycle};
pub use scheduler::CycleScheduler;
pub use stats::{MarketStats, StatsCollector};

use crate::account::AccountExecutor;
use crate::config::Config;
use crate::exchange::MarketDataApi;
use crate::market::{
    compute_base_size, notional_value, price_limits, select_leverage, select_market, LeverageMode,
    Market, MarketCatalog, SizingMode,
};
use crate::utils::decimal::{mid_price, spread_fraction};
use anyhow::Result;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

const SHUTDOWN_POLL: Duration = Duration::from_secs(1);

/// Drives the open side of the trade loop and owns the shared run state.
pub struct Orchestrator {
    config: Config,
    catalog: MarketCatalog,
    market_data: Arc<dyn MarketDataApi>,
    long: AccountExecutor,
    short: AccountExecutor,
    registry: CycleRegistry,
    closer: Arc<CycleCloser>,
    stats: Arc<Mutex<StatsCollector>>,
    shutdown: Arc<AtomicBool>,
    leverage_mode: LeverageMode,
    sizing: SizingMode,
    retry_policy: RetryPolicy,
    /// Last leverage actually sent per market, one map per account. Leverage
    /// updates are only issued when the desired value differs.
    long_leverage: HashMap<u32, u32>,
    short_leverage: HashMap<u32, u32>,
    next_cycle_id: u64,
    rng: StdRng,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        catalog: MarketCatalog,
        market_data: Arc<dyn MarketDataApi>,
        long: AccountExecutor,
        short: AccountExecutor,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let stats = Arc::new(Mutex::new(StatsCollector::new()));
        let retry_policy = RetryPolicy::from_config(&config.execution);
        let closer = Arc::new(CycleCloser::new(
            long.clone(),
            short.clone(),
            market_data.clone(),
            stats.clone(),
            retry_policy,
            config.trading.max_slippage,
        ));
        let leverage_mode = LeverageMode::from_config(&config.trading);
        let sizing = config.trading.sizing_mode();

        Self {
            config,
            catalog,
            market_data,
            long,
            short,
            registry: CycleRegistry::new(),
            closer,
            stats,
            shutdown,
            leverage_mode,
            sizing,
            retry_policy,
            long_leverage: HashMap::new(),
            short_leverage: HashMap::new(),
            next_cycle_id: 1,
            rng: StdRng::from_entropy(),
        }
    }

    /// Shared statistics handle, for the final report after [`Self::run`].
    pub fn stats(&self) -> Arc<Mutex<StatsCollector>> {
        self.stats.clone()
    }

    /// Run the trade loop until the trade cap is reached or shutdown is
    /// requested, then wait for every registered cycle to close.
    pub async fn run(mut self) -> Result<()> {
        let scheduler = CycleScheduler::spawn(
            self.registry.clone(),
            self.closer.clone(),
            self.shutdown.clone(),
        );

        let max_trades = self.config.timing.max_trades;
        let mut attempted: u64 = 0;

        while !self.shutdown.load(Ordering::SeqCst) {
            if self.attempt_cycle().await {
                attempted += 1;
                info!(
                    attempted,
                    max_trades,
                    pending = self.registry.len(),
                    "Cycle attempt dispatched"
                );
            }

            if max_trades > 0 && attempted >= max_trades {
                info!(max_trades, "Trade cap reached, stopping the open loop");
                break;
            }

            let delay = self.rng.gen_range(
                self.config.timing.min_open_delay_secs..=self.config.timing.max_open_delay_secs,
            );
            info!(delay_secs = delay, "Waiting before next cycle");
            self.sleep_interruptible(Duration::from_secs(delay)).await;
        }

        // Let registered cycles close on their own schedule; a shutdown
        // request short-circuits this and the scheduler flattens them early.
        while !self.registry.is_empty() && !self.shutdown.load(Ordering::SeqCst) {
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }

        self.shutdown.store(true, Ordering::SeqCst);
        scheduler.await?;
        Ok(())
    }

    /// Attempt one full cycle open. Returns `true` when the attempt counts
    /// against the trade cap: it dispatched orders, or failed in a way that
    /// consumed the opportunity. A spread-guard skip returns `false`.
    async fn attempt_cycle(&mut self) -> bool {
        let market_id = select_market(&self.config.trading.market_whitelist, &mut self.rng);
        let market = match self.catalog.market(market_id) {
            Some(market) => market.clone(),
            None => {
                warn!(market_id, "Selected market missing from catalog");
                self.record_failure(market_id);
                return true;
            }
        };

        let detail = match self.market_data.order_book_detail(market_id).await {
            Ok(detail) => detail,
            Err(e) => {
                warn!(market_id, error = %e, "Price fetch failed, cycle abandoned");
                self.record_failure(market_id);
                return true;
            }
        };

        let spread = spread_fraction(detail.best_bid, detail.best_ask);
        if spread > self.config.trading.max_spread {
            info!(
                market_id,
                symbol = %market.symbol,
                %spread,
                max_spread = %self.config.trading.max_spread,
                "Spread too wide, skipping this opportunity"
            );
            return false;
        }

        let mid = mid_price(detail.best_bid, detail.best_ask);
        let (leverage_long, leverage_short) =
            select_leverage(&market, &self.leverage_mode, &mut self.rng);

        if !self
            .ensure_leverage(&market, leverage_long, leverage_short)
            .await
        {
            self.record_failure(market_id);
            return true;
        }

        let size = match compute_base_size(&market, mid, self.sizing, leverage_long, leverage_short)
        {
            Ok(size) => size,
            Err(e) => {
                warn!(market_id, error = %e, "Sizing failed, cycle abandoned");
                self.record_failure(market_id);
                return true;
            }
        };

        let limits = price_limits(mid, self.config.trading.max_slippage);
        let cycle_id = self.next_cycle_id;
        self.next_cycle_id += 1;

        info!(
            cycle_id,
            market_id,
            symbol = %market.symbol,
            size,
            %mid,
            notional = %notional_value(size, market.size_decimals, mid),
            leverage_long,
            leverage_short,
            "Opening cycle"
        );

        let (long_result, short_result) = tokio::join!(
            self.long.place_order(
                market_id,
                Side::Long.open_order(),
                size,
                limits.long_max,
                false,
            ),
            self.short.place_order(
                market_id,
                Side::Short.open_order(),
                size,
                limits.short_min,
                false,
            ),
        );

        let opened_at = Utc::now();
        let make_position = |side: Side, leverage: u32, account_index: u32| Position {
            cycle_id,
            market_id,
            side,
            account_index,
            size,
            entry_price: mid,
            leverage,
            opened_at,
            status: PositionStatus::PendingOpen,
        };
        let filled = |mut position: Position| {
            position.status = PositionStatus::Open;
            position
        };

        match (long_result, short_result) {
            (Ok(_), Ok(_)) => {
                let hold = self.rng.gen_range(
                    self.config.timing.min_close_delay_secs
                        ..=self.config.timing.max_close_delay_secs,
                );
                let cycle = TradeCycle {
                    id: cycle_id,
                    market_id,
                    long: filled(make_position(
                        Side::Long,
                        leverage_long,
                        self.long.account_index(),
                    )),
                    short: filled(make_position(
                        Side::Short,
                        leverage_short,
                        self.short.account_index(),
                    )),
                    close_at: Instant::now() + Duration::from_secs(hold),
                };
                info!(cycle_id, hold_secs = hold, "Both legs open, close scheduled");
                self.registry.register(cycle);
            }
            (Ok(_), Err(e)) => {
                warn!(cycle_id, error = %e, "Short leg failed, rolling back the long");
                let position = filled(make_position(
                    Side::Long,
                    leverage_long,
                    self.long.account_index(),
                ));
                self.rollback(position, limits.short_min).await;
            }
            (Err(e), Ok(_)) => {
                warn!(cycle_id, error = %e, "Long leg failed, rolling back the short");
                let position = filled(make_position(
                    Side::Short,
                    leverage_short,
                    self.short.account_index(),
                ));
                self.rollback(position, limits.long_max).await;
            }
            (Err(long_err), Err(short_err)) => {
                warn!(
                    cycle_id,
                    long_error = %long_err,
                    short_error = %short_err,
                    "Both legs failed, nothing to roll back"
                );
                self.record_failure(market_id);
            }
        }

        true
    }

    /// Close the one leg that filled after the other failed. The account is
    /// flat again afterwards unless every close attempt fails, in which case
    /// the position lands in the unclosed report.
    async fn rollback(&mut self, mut position: Position, price_limit: Decimal) {
        let executor = match position.side {
            Side::Long => self.long.clone(),
            Side::Short => self.short.clone(),
        };
        let closed =
            close_position(&executor, &mut position, price_limit, &self.retry_policy).await;

        let mut stats = self.stats.lock().unwrap();
        stats.record(position.market_id, CycleOutcome::PartialFailure);
        if !closed {
            stats.record_unclosed(position);
        }
    }

    /// Bring both accounts to the desired leverage for a market, issuing
    /// updates only where the last sent value differs.
    async fn ensure_leverage(
        &mut self,
        market: &Market,
        leverage_long: u32,
        leverage_short: u32,
    ) -> bool {
        let margin_mode = self.config.trading.margin_mode;
        let long_stale = self.long_leverage.get(&market.id) != Some(&leverage_long);
        let short_stale = self.short_leverage.get(&market.id) != Some(&leverage_short);

        let (long_result, short_result) = tokio::join!(
            async {
                if long_stale {
                    self.long
                        .set_leverage(market.id, leverage_long, margin_mode)
                        .await
                } else {
                    Ok(())
                }
            },
            async {
                if short_stale {
                    self.short
                        .set_leverage(market.id, leverage_short, margin_mode)
                        .await
                } else {
                    Ok(())
                }
            },
        );

        let mut ok = true;
        match long_result {
            Ok(()) => {
                self.long_leverage.insert(market.id, leverage_long);
            }
            Err(e) => {
                warn!(market_id = market.id, error = %e, "Long account leverage update failed");
                ok = false;
            }
        }
        match short_result {
            Ok(()) => {
                self.short_leverage.insert(market.id, leverage_short);
            }
            Err(e) => {
                warn!(market_id = market.id, error = %e, "Short account leverage update failed");
                ok = false;
            }
        }
        ok
    }

    fn record_failure(&self, market_id: u32) {
        self.stats
            .lock()
            .unwrap()
            .record(market_id, CycleOutcome::Failure);
    }

    /// Sleep in one-second slices so a shutdown request interrupts the wait.
    async fn sleep_interruptible(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while Instant::now() < deadline && !self.shutdown.load(Ordering::SeqCst) {
            let remaining = deadline - Instant::now();
            tokio::time::sleep(remaining.min(SHUTDOWN_POLL)).await;
        }
    }
}
