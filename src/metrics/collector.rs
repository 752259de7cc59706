use std::collections::VecDeque;
use std::time::Instant;

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

use super::percentiles::{new_histogram, PercentileSet, HIST_HIGH, HIST_LOW};

// ─── Configuration ───────────────────────────────────────────────

/// How many completed cycles we keep for the live feed
const MAX_RECENT_CYCLES: usize = 200;

/// Bucket boundaries (μs) for the RTT distribution chart.
const DIST_BOUNDARIES: &[u64] = &[
    250, 500, 1_000, 2_000, 5_000, 10_000, 20_000, 50_000, 100_000, 250_000, 500_000,
    1_000_000,
];

// ─── Public types ────────────────────────────────────────────────

/// Driver-side live view of the run.
/// The driver calls the `record_*` methods, the dashboard calls `snapshot()`.
pub struct LiveStats {
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleSample {
    pub sequence: u64,
    /// Milliseconds since the first cycle was sent.
    pub timestamp_ms: u64,
    pub rtt_us: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DistBucket {
    pub range_start_us: u64,
    pub range_end_us: u64,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveSnapshot {
    pub rtt: PercentileSet,
    pub sent: u64,
    pub completed: u64,
    pub timed_out: u64,
    /// Cycles lost to a transport error other than a timeout.
    pub failed: u64,
    pub in_flight: u64,
    pub loss_pct: f64,
    pub elapsed_secs: f64,
    pub recent: Vec<CycleSample>,
    pub distribution: Vec<DistBucket>,
}

// ─── Internal state ──────────────────────────────────────────────

struct Inner {
    rtt_hist: Histogram<u64>,
    sent: u64,
    completed: u64,
    timed_out: u64,
    failed: u64,
    recent: VecDeque<CycleSample>,
    start_time: Option<Instant>,
}

impl Default for LiveStats {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveStats {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn record_sent(&self) {
        let mut inner = self.inner.lock();
        inner.start_time.get_or_insert_with(Instant::now);
        inner.sent += 1;
    }

    pub fn record_rtt(&self, sequence: u64, rtt_us: u64) {
        self.inner.lock().record_rtt(sequence, rtt_us);
    }

    pub fn record_timeout(&self) {
        self.inner.lock().timed_out += 1;
    }

    pub fn record_failure(&self) {
        self.inner.lock().failed += 1;
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        self.inner.lock().snapshot()
    }
}

impl Inner {
    fn new() -> Self {
        Self {
            rtt_hist: new_histogram(),
            sent: 0,
            completed: 0,
            timed_out: 0,
            failed: 0,
            recent: VecDeque::with_capacity(MAX_RECENT_CYCLES + 1),
            start_time: None,
        }
    }

    fn record_rtt(&mut self, sequence: u64, rtt_us: u64) {
        let start = *self.start_time.get_or_insert_with(Instant::now);
        self.completed += 1;
        let _ = self.rtt_hist.record(rtt_us.clamp(HIST_LOW, HIST_HIGH));

        self.recent.push_back(CycleSample {
            sequence,
            timestamp_ms: start.elapsed().as_millis() as u64,
            rtt_us,
        });
        if self.recent.len() > MAX_RECENT_CYCLES {
            self.recent.pop_front();
        }
    }

    fn snapshot(&self) -> LiveSnapshot {
        let lost = self.timed_out + self.failed;
        let finished = self.completed + lost;
        let loss_pct = if finished > 0 {
            lost as f64 * 100.0 / finished as f64
        } else {
            0.0
        };

        LiveSnapshot {
            rtt: PercentileSet::from_histogram(&self.rtt_hist),
            sent: self.sent,
            completed: self.completed,
            timed_out: self.timed_out,
            failed: self.failed,
            in_flight: self.sent.saturating_sub(finished),
            loss_pct,
            elapsed_secs: self
                .start_time
                .map(|t| t.elapsed().as_secs_f64())
                .unwrap_or(0.0),
            recent: self.recent.iter().cloned().collect(),
            distribution: distribution(&self.rtt_hist),
        }
    }
}

/// Buckets every recorded RTT by `DIST_BOUNDARIES`, skipping empty buckets.
fn distribution(hist: &Histogram<u64>) -> Vec<DistBucket> {
    if hist.len() == 0 {
        return Vec::new();
    }

    let mut counts = vec![0u64; DIST_BOUNDARIES.len() + 1];
    for iv in hist.iter_recorded() {
        // first boundary >= value; past the end is the overflow bucket
        let idx = DIST_BOUNDARIES.partition_point(|&b| b < iv.value_iterated_to());
        counts[idx] += iv.count_at_value();
    }

    let mut result = Vec::new();
    let mut prev = 0u64;
    for (&boundary, &count) in DIST_BOUNDARIES.iter().zip(&counts) {
        if count > 0 {
            result.push(DistBucket {
                range_start_us: prev,
                range_end_us: boundary,
                count,
            });
        }
        prev = boundary;
    }
    let overflow = counts[DIST_BOUNDARIES.len()];
    if overflow > 0 {
        result.push(DistBucket {
            range_start_us: prev,
            range_end_us: hist.max(),
            count: overflow,
        });
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_completions_and_timeouts() {
        let stats = LiveStats::new();
        for _ in 0..4 {
            stats.record_sent();
        }
        stats.record_rtt(1000, 1_500);
        stats.record_rtt(1001, 2_500);
        stats.record_timeout();

        let snap = stats.snapshot();
        assert_eq!(snap.sent, 4);
        assert_eq!(snap.completed, 2);
        assert_eq!(snap.timed_out, 1);
        assert_eq!(snap.in_flight, 1);
        assert!((snap.loss_pct - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(snap.recent.len(), 2);
        assert_eq!(snap.rtt.count, 2);
    }

    #[test]
    fn failures_are_lost_but_not_timeouts() {
        let stats = LiveStats::new();
        for _ in 0..4 {
            stats.record_sent();
        }
        stats.record_rtt(1000, 1_500);
        stats.record_timeout();
        stats.record_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.timed_out, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.in_flight, 1);
        assert!((snap.loss_pct - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn distribution_puts_values_in_their_buckets() {
        let stats = LiveStats::new();
        stats.record_rtt(1, 400);
        stats.record_rtt(2, 450);
        stats.record_rtt(3, 3_000_000);

        let dist = stats.snapshot().distribution;
        assert_eq!(dist.len(), 2);
        assert_eq!((dist[0].range_start_us, dist[0].range_end_us, dist[0].count), (250, 500, 2));
        assert_eq!(dist[1].range_start_us, 1_000_000);
        assert_eq!(dist[1].count, 1);
    }
}
