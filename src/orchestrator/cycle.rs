//! Trade-cycle state: a matched long/short position pair and the registry
//! of cycles waiting to be closed.

use crate::exchange::OrderSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// Which leg of a cycle a position belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Order side that opens this leg.
    pub fn open_order(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that closes this leg.
    pub fn close_order(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

/// Lifecycle of one leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    /// Open order dispatched, fill not yet confirmed.
    PendingOpen,
    Open,
    /// Close order in flight.
    PendingClose,
    Closed,
    /// Every close attempt failed; the position needs manual intervention.
    Failed,
}

/// Terminal outcome of one cycle attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Both legs opened and both legs closed.
    Success,
    /// Exactly one leg ended where its counterpart did not: one open filled
    /// and the other was rejected (the filled leg is rolled back), or one
    /// close went through and the other exhausted its retries.
    PartialFailure,
    /// Neither leg got anywhere: price fetch, sizing, or both opens failed,
    /// or both close legs exhausted their retries.
    Failure,
}

/// One leg of a cycle.
#[derive(Debug, Clone)]
pub struct Position {
    pub cycle_id: u64,
    pub market_id: u32,
    pub side: Side,
    pub account_index: u32,
    /// Size in exchange-native integer base units.
    pub size: u64,
    /// Mid price at open time, kept for reporting only.
    pub entry_price: Decimal,
    pub leverage: u32,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
}

/// A matched pair of open positions awaiting its scheduled close.
#[derive(Debug, Clone)]
pub struct TradeCycle {
    pub id: u64,
    pub market_id: u32,
    pub long: Position,
    pub short: Position,
    pub close_at: Instant,
}

impl TradeCycle {
    pub fn is_due(&self, now: Instant) -> bool {
        self.close_at <= now
    }
}

/// Shared list of cycles waiting to be closed.
///
/// The open path registers cycles; the scheduler drains due ones. The list
/// stays tiny (open cadence guarantees at most one pending cycle in normal
/// operation) so a mutex over a vec is all it needs.
#[derive(Clone, Default)]
pub struct CycleRegistry {
    cycles: Arc<Mutex<Vec<TradeCycle>>>,
}

impl CycleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, cycle: TradeCycle) {
        self.cycles.lock().unwrap().push(cycle);
    }

    /// Remove and return every cycle whose close time has arrived.
    pub fn take_due(&self, now: Instant) -> Vec<TradeCycle> {
        let mut cycles = self.cycles.lock().unwrap();
        let mut due = Vec::new();
        let mut i = 0;
        while i < cycles.len() {
            if cycles[i].is_due(now) {
                due.push(cycles.swap_remove(i));
            } else {
                i += 1;
            }
        }
        due
    }

    /// Remove and return every registered cycle regardless of schedule.
    /// Used by shutdown to flatten everything immediately.
    pub fn take_all(&self) -> Vec<TradeCycle> {
        std::mem::take(&mut *self.cycles.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.cycles.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cycles.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn position(cycle_id: u64, side: Side) -> Position {
        Position {
            cycle_id,
            market_id: 1,
            side,
            account_index: if side == Side::Long { 1 } else { 2 },
            size: 100,
            entry_price: dec!(2000),
            leverage: 10,
            opened_at: Utc::now(),
            status: PositionStatus::Open,
        }
    }

    fn cycle(id: u64, close_in: Duration) -> TradeCycle {
        TradeCycle {
            id,
            market_id: 1,
            long: position(id, Side::Long),
            short: position(id, Side::Short),
            close_at: Instant::now() + close_in,
        }
    }

    #[test]
    fn test_side_order_mapping() {
        assert_eq!(Side::Long.open_order(), OrderSide::Buy);
        assert_eq!(Side::Long.close_order(), OrderSide::Sell);
        assert_eq!(Side::Short.open_order(), OrderSide::Sell);
        assert_eq!(Side::Short.close_order(), OrderSide::Buy);
    }

    #[tokio::test]
    async fn test_take_due_leaves_future_cycles() {
        let registry = CycleRegistry::new();
        registry.register(cycle(1, Duration::ZERO));
        registry.register(cycle(2, Duration::from_secs(3600)));
        registry.register(cycle(3, Duration::ZERO));

        let due = registry.take_due(Instant::now());
        let mut ids: Vec<u64> = due.iter().map(|c| c.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_take_all_drains_regardless_of_schedule() {
        let registry = CycleRegistry::new();
        registry.register(cycle(1, Duration::from_secs(3600)));
        assert_eq!(registry.take_all().len(), 1);
        assert!(registry.is_empty());
    }
}
