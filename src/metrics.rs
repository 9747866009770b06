//! Fleet metrics (spec §3 `FleetMetrics`, §6 `/stats`). Percentiles are a
//! plain sorted-vec computation — no histogram crate, matching the
//! teacher's preference for doing small aggregations by hand in
//! `SiteAggregateBuilder` (`der_headend/src/models.rs`) rather than pulling
//! in a metrics library for a handful of counters.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::bot::BotSnapshot;

pub const SLIDING_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Per-shard rollup for the `/stats` `shards` array (§4.2 stats rows, §6
/// nested stats shape): bot-state counts plus one row per bot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardSnapshot {
    pub id: usize,
    pub counts: BotCounts,
    pub bots: Vec<BotSnapshot>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub depth: usize,
    pub capacity: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub bots_ready: usize,
    pub bots_busy: usize,
    pub bots_cooldown: usize,
    pub bots_disconnected: usize,
    pub bots_permanently_failed: usize,
    pub success: u64,
    pub cached: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub retried: u64,
    pub success_after_retry: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyMs {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub recent_p50: f64,
    pub recent_p95: f64,
    pub recent_p99: f64,
}

/// The full `/stats` payload (§6): per-shard bot rows, queue occupancy,
/// cumulative totals, and latency percentiles.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub shards: Vec<ShardSnapshot>,
    pub queue: QueueSnapshot,
    pub totals: Totals,
    pub latency_ms: LatencyMs,
}

struct Sample {
    at: Instant,
    duration_ms: f64,
}

/// Accumulates per-inspection latency samples and derives percentiles over
/// both the all-time set and a trailing 5-minute window.
pub struct MetricsRecorder {
    all_time: Vec<f64>,
    recent: VecDeque<Sample>,
    recent_failures: VecDeque<Instant>,
    total_inspections: u64,
    total_cached: u64,
    total_failures: u64,
    total_timeouts: u64,
    total_retries: u64,
    total_success_after_retry: u64,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            all_time: Vec::new(),
            recent: VecDeque::new(),
            recent_failures: VecDeque::new(),
            total_inspections: 0,
            total_cached: 0,
            total_failures: 0,
            total_timeouts: 0,
            total_retries: 0,
            total_success_after_retry: 0,
        }
    }

    /// A request answered straight from the cache (§4.5 step 2): never
    /// reaches the manager/shard, so it is counted separately from
    /// `total_inspections`.
    pub fn record_cached(&mut self) {
        self.total_cached += 1;
    }

    pub fn record_success(&mut self, duration: Duration, after_retry: bool) {
        self.total_inspections += 1;
        if after_retry {
            self.total_success_after_retry += 1;
        }
        let ms = duration.as_secs_f64() * 1000.0;
        self.all_time.push(ms);
        self.recent.push_back(Sample {
            at: Instant::now(),
            duration_ms: ms,
        });
        self.evict_stale();
    }

    pub fn record_failure(&mut self, timed_out: bool) {
        self.total_inspections += 1;
        self.total_failures += 1;
        if timed_out {
            self.total_timeouts += 1;
        }
        self.recent_failures.push_back(Instant::now());
        self.evict_stale();
    }

    pub fn record_retry(&mut self) {
        self.total_retries += 1;
    }

    fn evict_stale(&mut self) {
        let cutoff = Instant::now() - SLIDING_WINDOW;
        while let Some(front) = self.recent.front() {
            if front.at < cutoff {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        while let Some(front) = self.recent_failures.front() {
            if *front < cutoff {
                self.recent_failures.pop_front();
            } else {
                break;
            }
        }
    }

    /// Latency percentiles over both the all-time set and the trailing
    /// 5-minute window (§3 `FleetMetrics`).
    pub fn latency(&mut self) -> LatencyMs {
        self.evict_stale();
        let (p50, p95, p99) = percentiles(&self.all_time);
        let recent_durations: Vec<f64> = self.recent.iter().map(|s| s.duration_ms).collect();
        let (recent_p50, recent_p95, recent_p99) = percentiles(&recent_durations);
        LatencyMs {
            p50,
            p95,
            p99,
            recent_p50,
            recent_p95,
            recent_p99,
        }
    }

    pub fn totals(&self, bot_counts: BotCounts) -> Totals {
        Totals {
            bots_ready: bot_counts.ready,
            bots_busy: bot_counts.busy,
            bots_cooldown: bot_counts.cooldown,
            bots_disconnected: bot_counts.disconnected,
            bots_permanently_failed: bot_counts.permanently_failed,
            success: self.total_inspections - self.total_failures,
            cached: self.total_cached,
            failed: self.total_failures,
            timeouts: self.total_timeouts,
            retried: self.total_retries,
            success_after_retry: self.total_success_after_retry,
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotCounts {
    pub ready: usize,
    pub busy: usize,
    pub cooldown: usize,
    pub disconnected: usize,
    pub permanently_failed: usize,
}

fn percentiles(samples: &[f64]) -> (f64, f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    (
        percentile_of(&sorted, 0.50),
        percentile_of(&sorted, 0.95),
        percentile_of(&sorted, 0.99),
    )
}

fn percentile_of(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_of_empty_set_are_zero() {
        assert_eq!(percentiles(&[]), (0.0, 0.0, 0.0));
    }

    #[test]
    fn percentiles_are_monotone() {
        let samples: Vec<f64> = (1..=100).map(|n| n as f64).collect();
        let (p50, p95, p99) = percentiles(&samples);
        assert!(p50 <= p95);
        assert!(p95 <= p99);
    }

    #[test]
    fn recorder_counts_successes_and_failures() {
        let mut r = MetricsRecorder::new();
        r.record_success(Duration::from_millis(100), false);
        r.record_failure(true);
        r.record_retry();
        let totals = r.totals(BotCounts::default());
        assert_eq!(totals.success, 1);
        assert_eq!(totals.failed, 1);
        assert_eq!(totals.timeouts, 1);
        assert_eq!(totals.retried, 1);
        assert!(r.latency().p50 >= 99.0);
    }

    #[test]
    fn success_after_retry_and_cached_are_tracked_separately() {
        let mut r = MetricsRecorder::new();
        r.record_cached();
        r.record_success(Duration::from_millis(50), true);
        let totals = r.totals(BotCounts::default());
        assert_eq!(totals.cached, 1);
        assert_eq!(totals.success_after_retry, 1);
        assert_eq!(totals.success, 1);
    }
}
