//! Integrator progress markers and the shared progress board.
//!
//! The integrator's output is opaque log text except for lines containing
//! `<current> / <total> finished`, which report how many integration hours
//! are done. Each shard's worker feeds its markers into one
//! [`ProgressBoard`]; every accepted update recomputes the overall percentage
//! inside the same critical section.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tokio::sync::Mutex;

static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(-?\d+)\s*/\s*(-?\d+)\s+finished").expect("progress marker pattern is valid")
});

/// A parsed `<current> / <total> finished` marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressMarker {
    pub current: i64,
    pub total: i64,
}

impl ProgressMarker {
    /// Find a progress marker anywhere in `line`.
    pub fn parse(line: &str) -> Option<Self> {
        let captures = MARKER.captures(line)?;
        let current = captures.get(1)?.as_str().parse().ok()?;
        let total = captures.get(2)?.as_str().parse().ok()?;
        Some(Self { current, total })
    }

    /// Completion in percent, floored to 0.1 and clamped to `[0, 100]`.
    /// Backtracking runs count down with negative steps, so magnitudes are
    /// used. `None` for a zero total.
    pub fn percent(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        let ratio = self.current.unsigned_abs() as f64 / self.total.unsigned_abs() as f64;
        let tenths = (ratio * 1000.0).floor().clamp(0.0, 1000.0);
        Some(tenths / 10.0)
    }
}

/// Latest accepted progress of one shard.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShardProgress {
    pub shard_index: usize,
    pub percent_complete: f64,
    pub last_step: i64,
    pub total_steps: i64,
}

impl ShardProgress {
    fn new(shard_index: usize) -> Self {
        Self {
            shard_index,
            percent_complete: 0.0,
            last_step: 0,
            total_steps: 0,
        }
    }
}

/// Progress table keyed by shard index.
#[derive(Debug, Default)]
pub struct ProgressBoard {
    table: Mutex<BTreeMap<usize, ShardProgress>>,
}

impl ProgressBoard {
    /// Board with every shard registered at 0%.
    pub fn new(shards: impl IntoIterator<Item = usize>) -> Self {
        let table = shards
            .into_iter()
            .map(|index| (index, ShardProgress::new(index)))
            .collect();
        Self {
            table: Mutex::new(table),
        }
    }

    /// Record `marker` for `shard` and recompute the aggregate.
    ///
    /// Returns the new aggregate when the shard's percentage advanced by at
    /// least 0.1 points, `None` when the update was redundant.
    pub async fn record(&self, shard: usize, marker: ProgressMarker) -> Option<f64> {
        let percent = marker.percent()?;
        let mut table = self.table.lock().await;
        let entry = table
            .entry(shard)
            .or_insert_with(|| ShardProgress::new(shard));
        let first = entry.total_steps == 0;
        if !first && percent <= entry.percent_complete {
            return None;
        }
        *entry = ShardProgress {
            shard_index: shard,
            percent_complete: percent,
            last_step: marker.current,
            total_steps: marker.total,
        };
        Some(mean(&table))
    }

    /// Current aggregate: mean of all shard percentages.
    pub async fn aggregate(&self) -> f64 {
        mean(&*self.table.lock().await)
    }

    pub async fn snapshot(&self) -> Vec<ShardProgress> {
        self.table.lock().await.values().copied().collect()
    }
}

fn mean(table: &BTreeMap<usize, ShardProgress>) -> f64 {
    if table.is_empty() {
        return 0.0;
    }
    table.values().map(|p| p.percent_complete).sum::<f64>() / table.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(current: i64, total: i64) -> ProgressMarker {
        ProgressMarker { current, total }
    }

    #[test]
    fn parses_marker_amid_noise() {
        assert_eq!(
            ProgressMarker::parse("  12 / 48 finished (hours)"),
            Some(marker(12, 48))
        );
        assert_eq!(
            ProgressMarker::parse("[lag] step -6/-24 finished (hours) dt=60"),
            Some(marker(-6, -24))
        );
        assert_eq!(ProgressMarker::parse("reading grid subei_grd.dat"), None);
        assert_eq!(ProgressMarker::parse("12 / 48 remaining"), None);
    }

    #[test]
    fn percent_is_floored_to_tenths() {
        assert_eq!(marker(1, 3).percent(), Some(33.3));
        assert_eq!(marker(2, 3).percent(), Some(66.6));
        assert_eq!(marker(-12, -24).percent(), Some(50.0));
        assert_eq!(marker(30, 24).percent(), Some(100.0));
        assert_eq!(marker(1, 0).percent(), None);
    }

    #[tokio::test]
    async fn aggregate_is_mean_of_shards() {
        let board = ProgressBoard::new(0..3);
        board.record(0, marker(12, 24)).await;
        board.record(1, marker(24, 24)).await;
        board.record(2, marker(0, 24)).await;
        assert_eq!(board.aggregate().await, 50.0);
    }

    #[tokio::test]
    async fn redundant_updates_are_suppressed() {
        let board = ProgressBoard::new(0..2);
        assert_eq!(board.record(0, marker(1, 2)).await, Some(25.0));
        assert_eq!(board.record(0, marker(1, 2)).await, None);
        // 49.99% floors below the recorded 50.0%
        assert_eq!(board.record(0, marker(10_000, 20_001)).await, None);
        assert_eq!(board.record(0, marker(3, 4)).await, Some(37.5));
        assert_eq!(board.record(0, marker(2, 4)).await, None);

        let snapshot = board.snapshot().await;
        assert_eq!(snapshot[0].last_step, 3);
        assert_eq!(snapshot[0].total_steps, 4);
        assert_eq!(snapshot[1].percent_complete, 0.0);
    }

    #[tokio::test]
    async fn first_zero_marker_is_recorded() {
        let board = ProgressBoard::new(0..1);
        assert_eq!(board.record(0, marker(0, 24)).await, Some(0.0));
        assert_eq!(board.snapshot().await[0].total_steps, 24);
    }
}
