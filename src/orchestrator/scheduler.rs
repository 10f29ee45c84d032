//! Background task that closes cycles when their hold time expires.

use crate::orchestrator::closer::CycleCloser;
use crate::orchestrator::cycle::CycleRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::info;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Polls the registry once per second and flattens due cycles.
///
/// When the shutdown flag is raised the scheduler stops waiting on
/// schedules: it flattens everything still registered and exits.
pub struct CycleScheduler;

impl CycleScheduler {
    pub fn spawn(
        registry: CycleRegistry,
        closer: Arc<CycleCloser>,
        shutdown: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(TICK_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                if shutdown.load(Ordering::SeqCst) {
                    let remaining = registry.take_all();
                    if !remaining.is_empty() {
                        info!(
                            count = remaining.len(),
                            "Shutdown requested, closing remaining cycles early"
                        );
                    }
                    for cycle in remaining {
                        closer.close_cycle(cycle).await;
                    }
                    break;
                }

                for cycle in registry.take_due(Instant::now()) {
                    closer.close_cycle(cycle).await;
                }
            }

            info!("Cycle scheduler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountExecutor;
    use crate::exchange::mock::{MockAccountApi, MockMarketData};
    use crate::orchestrator::closer::RetryPolicy;
    use crate::orchestrator::cycle::{Position, PositionStatus, Side, TradeCycle};
    use crate::orchestrator::stats::StatsCollector;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct Harness {
        long_api: Arc<MockAccountApi>,
        short_api: Arc<MockAccountApi>,
        registry: CycleRegistry,
        closer: Arc<CycleCloser>,
        shutdown: Arc<AtomicBool>,
    }

    fn harness() -> Harness {
        let long_api = Arc::new(MockAccountApi::new());
        let short_api = Arc::new(MockAccountApi::new());
        let (long, _) =
            AccountExecutor::spawn("long", 1, long_api.clone(), Duration::from_secs(5));
        let (short, _) =
            AccountExecutor::spawn("short", 2, short_api.clone(), Duration::from_secs(5));
        let market_data = Arc::new(MockMarketData::new().with_detail(MockMarketData::detail(
            1,
            "ETH-USDT",
            500,
            4,
            dec!(1999),
            dec!(2001),
        )));
        let closer = Arc::new(CycleCloser::new(
            long,
            short,
            market_data,
            Arc::new(Mutex::new(StatsCollector::new())),
            RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_millis(1),
            },
            dec!(0.02),
        ));
        Harness {
            long_api,
            short_api,
            registry: CycleRegistry::new(),
            closer,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    fn position(side: Side) -> Position {
        Position {
            cycle_id: 1,
            market_id: 1,
            side,
            account_index: if side == Side::Long { 1 } else { 2 },
            size: 500,
            entry_price: dec!(2000),
            leverage: 10,
            opened_at: Utc::now(),
            status: PositionStatus::Open,
        }
    }

    fn cycle_due_in(secs: u64) -> TradeCycle {
        TradeCycle {
            id: 1,
            market_id: 1,
            long: position(Side::Long),
            short: position(Side::Short),
            close_at: Instant::now() + Duration::from_secs(secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_closes_cycles_when_their_time_arrives() {
        let h = harness();
        h.registry.register(cycle_due_in(5));

        let handle = CycleScheduler::spawn(
            h.registry.clone(),
            h.closer.clone(),
            h.shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(h.long_api.orders().is_empty(), "closed too early");

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.long_api.orders().len(), 1);
        assert_eq!(h.short_api.orders().len(), 1);
        assert!(h.registry.is_empty());

        h.shutdown.store(true, Ordering::SeqCst);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flattens_future_cycles_immediately() {
        let h = harness();
        h.registry.register(cycle_due_in(3600));

        let handle = CycleScheduler::spawn(
            h.registry.clone(),
            h.closer.clone(),
            h.shutdown.clone(),
        );
        h.shutdown.store(true, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.await.unwrap();

        assert_eq!(h.long_api.orders().len(), 1);
        assert_eq!(h.short_api.orders().len(), 1);
        assert!(h.registry.is_empty());
    }
}
