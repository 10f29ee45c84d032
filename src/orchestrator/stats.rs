//! Per-market run statistics and the end-of-run report.

use crate::orchestrator::cycle::{CycleOutcome, Position};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default)]
pub struct MarketStats {
    pub attempts: u64,
    pub successes: u64,
}

impl MarketStats {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}

/// Aggregates outcomes across the whole run.
///
/// Positions that survive every close attempt land in `unclosed`; they are
/// the one thing the final report must never swallow, since each represents
/// live exposure on a real account.
#[derive(Debug, Default)]
pub struct StatsCollector {
    markets: BTreeMap<u32, MarketStats>,
    unclosed: Vec<Position>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one terminal cycle outcome for a market.
    pub fn record(&mut self, market_id: u32, outcome: CycleOutcome) {
        let entry = self.markets.entry(market_id).or_default();
        entry.attempts += 1;
        if outcome == CycleOutcome::Success {
            entry.successes += 1;
        }
    }

    /// Record a position that could not be flattened.
    pub fn record_unclosed(&mut self, position: Position) {
        self.unclosed.push(position);
    }

    pub fn market(&self, market_id: u32) -> Option<&MarketStats> {
        self.markets.get(&market_id)
    }

    pub fn total_attempts(&self) -> u64 {
        self.markets.values().map(|s| s.attempts).sum()
    }

    pub fn total_successes(&self) -> u64 {
        self.markets.values().map(|s| s.successes).sum()
    }

    pub fn unclosed(&self) -> &[Position] {
        &self.unclosed
    }

    /// Render the final report, one line per entry.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        lines.push(format!(
            "cycles: {} attempted, {} successful",
            self.total_attempts(),
            self.total_successes()
        ));

        for (market_id, stats) in &self.markets {
            lines.push(format!(
                "market {}: {}/{} successful ({:.1}%)",
                market_id,
                stats.successes,
                stats.attempts,
                stats.success_rate() * 100.0
            ));
        }

        if self.unclosed.is_empty() {
            lines.push("no unclosed positions".to_string());
        } else {
            lines.push(format!(
                "WARNING: {} position(s) left unclosed, flatten manually:",
                self.unclosed.len()
            ));
            for position in &self.unclosed {
                lines.push(format!(
                    "  cycle {} market {} {} account {} size {} opened {}",
                    position.cycle_id,
                    position.market_id,
                    position.side.as_str(),
                    position.account_index,
                    position.size,
                    position.opened_at.format("%Y-%m-%d %H:%M:%S UTC"),
                ));
            }
        }

        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::cycle::{PositionStatus, Side};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_counts_attempts_and_successes_per_market() {
        let mut stats = StatsCollector::new();
        stats.record(1, CycleOutcome::Success);
        stats.record(1, CycleOutcome::Failure);
        stats.record(1, CycleOutcome::Success);
        stats.record(2, CycleOutcome::PartialFailure);

        let m1 = stats.market(1).unwrap();
        assert_eq!(m1.attempts, 3);
        assert_eq!(m1.successes, 2);
        assert_eq!(stats.market(2).unwrap().successes, 0);
        assert_eq!(stats.total_attempts(), 4);
        assert_eq!(stats.total_successes(), 2);
    }

    #[test]
    fn test_summary_flags_unclosed_positions() {
        let mut stats = StatsCollector::new();
        stats.record(1, CycleOutcome::Failure);
        stats.record_unclosed(Position {
            cycle_id: 9,
            market_id: 1,
            side: Side::Short,
            account_index: 2,
            size: 450,
            entry_price: dec!(2000),
            leverage: 10,
            opened_at: Utc::now(),
            status: PositionStatus::Failed,
        });

        let report = stats.summary_lines().join("\n");
        assert!(report.contains("WARNING"), "got: {report}");
        assert!(report.contains("cycle 9"), "got: {report}");
        assert!(report.contains("short"), "got: {report}");
    }

    #[test]
    fn test_summary_without_unclosed_positions() {
        let mut stats = StatsCollector::new();
        stats.record(3, CycleOutcome::Success);
        let report = stats.summary_lines().join("\n");
        assert!(report.contains("no unclosed positions"));
        assert!(report.contains("market 3: 1/1"));
    }
}
