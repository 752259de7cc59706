use hdrhistogram::Histogram;
use serde::Serialize;

/// HdrHistogram range: 1 μs → 60 s, 3 significant figures
pub(crate) const HIST_LOW: u64 = 1;
pub(crate) const HIST_HIGH: u64 = 60_000_000;
pub(crate) const HIST_SIGFIG: u8 = 3;

pub(crate) fn new_histogram() -> Histogram<u64> {
    Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
        .expect("static histogram bounds are valid")
}

/// Percentile breakdown of a set of microsecond latencies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentileSet {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub p999: u64,
    pub count: u64,
}

impl PercentileSet {
    /// Zeroed values if the histogram is empty.
    pub fn from_histogram(hist: &Histogram<u64>) -> Self {
        if hist.len() == 0 {
            return Self::empty();
        }

        Self {
            min: hist.min(),
            max: hist.max(),
            mean: hist.mean(),
            p50: hist.value_at_percentile(50.0),
            p95: hist.value_at_percentile(95.0),
            p99: hist.value_at_percentile(99.0),
            p999: hist.value_at_percentile(99.9),
            count: hist.len(),
        }
    }

    /// Values are clamped into the histogram range.
    pub fn from_micros(values: impl IntoIterator<Item = u64>) -> Self {
        let mut hist = new_histogram();
        for v in values {
            let _ = hist.record(v.clamp(HIST_LOW, HIST_HIGH));
        }
        Self::from_histogram(&hist)
    }

    pub fn empty() -> Self {
        Self {
            min: 0,
            max: 0,
            mean: 0.0,
            p50: 0,
            p95: 0,
            p99: 0,
            p999: 0,
            count: 0,
        }
    }

    pub fn has_data(&self) -> bool {
        self.count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarises_recorded_values() {
        let set = PercentileSet::from_micros([1_000, 2_000, 3_000, 4_000]);
        assert_eq!(set.count, 4);
        assert_eq!(set.min, 1_000);
        assert!(set.max >= 4_000 && set.max < 4_010);
        assert!((set.mean - 2_500.0).abs() < 10.0);
    }

    #[test]
    fn empty_input_has_no_data() {
        assert!(!PercentileSet::from_micros([]).has_data());
    }
}
