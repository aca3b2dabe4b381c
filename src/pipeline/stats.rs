//! Rolling detection statistics.

use serde::Serialize;
use tokio::time::Instant;

use crate::detect::{Detection, Priority};

/// Cumulative counters since the last reset.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionStats {
    pub total_detections: u64,
    pub high_priority_count: u64,
    /// Running mean score over every detection counted.
    pub average_confidence: f64,
    /// Cycles with at least one detection, per second since the last reset.
    pub detection_rate: f64,
    /// Epoch milliseconds of the last non-empty batch; 0 until there is one.
    pub last_detection_time: u64,
}

/// Maintains [`DetectionStats`] across published batches.
///
/// Uses the tokio monotonic clock so paused-time tests see deterministic rates.
#[derive(Debug)]
pub struct StatsAggregator {
    stats: DetectionStats,
    cycles_with_output: u64,
    started: Instant,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(started: Instant) -> Self {
        Self {
            stats: DetectionStats::default(),
            cycles_with_output: 0,
            started,
        }
    }

    pub fn stats(&self) -> &DetectionStats {
        &self.stats
    }

    pub fn update(&mut self, batch: &[Detection]) {
        self.update_at(batch, Instant::now());
    }

    /// Fold one published batch into the counters, with `now` as the rate clock reading.
    pub fn update_at(&mut self, batch: &[Detection], now: Instant) {
        let old_total = self.stats.total_detections;
        let new_total = old_total + batch.len() as u64;
        let batch_sum: f64 = batch.iter().map(|d| d.score as f64).sum();

        self.stats.average_confidence = if new_total == 0 {
            0.0
        } else {
            (self.stats.average_confidence * old_total as f64 + batch_sum) / new_total as f64
        };
        self.stats.total_detections = new_total;
        self.stats.high_priority_count += batch
            .iter()
            .filter(|d| d.priority == Priority::High)
            .count() as u64;

        if let Some(first) = batch.first() {
            self.cycles_with_output += 1;
            self.stats.last_detection_time = first.timestamp;
        }

        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
        self.stats.detection_rate = if elapsed > 0.0 {
            self.cycles_with_output as f64 / elapsed
        } else {
            0.0
        };
    }

    /// Zero every counter and restart the rate clock.
    pub fn reset(&mut self) {
        self.reset_at(Instant::now());
    }

    pub fn reset_at(&mut self, now: Instant) {
        *self = Self::starting_at(now);
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}
