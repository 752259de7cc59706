//! Joins the three roles' timestamp records into per-cycle metrics.
//!
//! The join is by sequence: driver `sequence` → relay `sequence`, relay
//! `inner_sequence` → terminal `sequence`. A cycle missing any link becomes
//! a gap and never shifts the rows after it.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use tracing::{debug, warn};

use super::percentiles::PercentileSet;
use crate::error::MetricError;
use crate::records::{DriverRecord, MetricSource, RelayRecord, TerminalRecord};

/// One fully joined cycle. Derived values are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRow {
    pub sequence: u64,
    pub inner_sequence: u64,

    pub send_outer_request: u64,
    pub receive_outer_request: u64,
    pub send_inner_request: u64,
    pub receive_inner_request: u64,
    pub send_inner_response: u64,
    pub receive_inner_response: u64,
    pub send_outer_response: u64,
    pub receive_outer_response: u64,

    pub interest_rtt: f64,
    pub gen_inner_request: f64,
    pub interest_travel: f64,
    pub data_rtt: f64,
    pub gen_outer_response: f64,
    pub data_travel: f64,
    pub total_rtt: f64,
}

/// Signed difference in milliseconds; stamps from different processes may
/// come out of order when their clocks disagree.
fn delta_ms(later: u64, earlier: u64) -> f64 {
    (later as i128 - earlier as i128) as f64 / 1000.0
}

impl MetricRow {
    pub fn join(driver: &DriverRecord, relay: &RelayRecord, terminal: &TerminalRecord) -> Self {
        let interest_rtt = delta_ms(terminal.receive_inner_request, driver.send_outer_request);
        let gen_inner_request = delta_ms(relay.send_inner_request, relay.receive_outer_request);
        let data_rtt = delta_ms(driver.receive_outer_response, terminal.send_inner_response);
        let gen_outer_response = delta_ms(relay.send_outer_response, relay.receive_inner_response);

        Self {
            sequence: driver.sequence,
            inner_sequence: relay.inner_sequence,
            send_outer_request: driver.send_outer_request,
            receive_outer_request: relay.receive_outer_request,
            send_inner_request: relay.send_inner_request,
            receive_inner_request: terminal.receive_inner_request,
            send_inner_response: terminal.send_inner_response,
            receive_inner_response: relay.receive_inner_response,
            send_outer_response: relay.send_outer_response,
            receive_outer_response: driver.receive_outer_response,
            interest_rtt,
            gen_inner_request,
            interest_travel: interest_rtt - gen_inner_request,
            data_rtt,
            gen_outer_response,
            data_travel: data_rtt - gen_outer_response,
            total_rtt: delta_ms(driver.receive_outer_response, driver.send_outer_request),
        }
    }

    pub fn is_finite(&self) -> bool {
        [
            self.interest_rtt,
            self.gen_inner_request,
            self.interest_travel,
            self.data_rtt,
            self.gen_outer_response,
            self.data_travel,
            self.total_rtt,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// Mean of every derived value over the averaged rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Averages {
    pub cycles: usize,
    pub interest_rtt: f64,
    pub gen_inner_request: f64,
    pub interest_travel: f64,
    pub data_rtt: f64,
    pub gen_outer_response: f64,
    pub data_travel: f64,
    pub total_rtt: f64,
}

impl Averages {
    fn over(rows: &[MetricRow]) -> Option<Self> {
        if rows.is_empty() {
            return None;
        }
        let n = rows.len() as f64;
        let mean = |f: fn(&MetricRow) -> f64| rows.iter().map(f).sum::<f64>() / n;
        Some(Self {
            cycles: rows.len(),
            interest_rtt: mean(|r| r.interest_rtt),
            gen_inner_request: mean(|r| r.gen_inner_request),
            interest_travel: mean(|r| r.interest_travel),
            data_rtt: mean(|r| r.data_rtt),
            gen_outer_response: mean(|r| r.gen_outer_response),
            data_travel: mean(|r| r.data_travel),
            total_rtt: mean(|r| r.total_rtt),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub expected_cycles: usize,
    pub rows: Vec<MetricRow>,
    /// Expected sequences that could not be fully joined.
    pub gaps: Vec<u64>,
    /// Fewer rows than expected cycles; the report is partial.
    pub underrun: bool,
    /// Averages over every row except the first, which carries one-time
    /// route discovery. `None` with fewer than two rows.
    pub average: Option<Averages>,
    /// Client-side total RTT of every row, in microseconds.
    pub total_rtt: PercentileSet,
}

impl Report {
    fn from_rows(expected_cycles: usize, rows: Vec<MetricRow>, gaps: Vec<u64>) -> Self {
        let underrun = rows.len() < expected_cycles;
        if underrun {
            warn!(
                expected = expected_cycles,
                joined = rows.len(),
                "correlation underrun; report is partial"
            );
        }
        let average = rows.get(1..).and_then(Averages::over);
        let total_rtt = PercentileSet::from_micros(
            rows.iter()
                .map(|r| r.receive_outer_response.saturating_sub(r.send_outer_request)),
        );
        Self {
            expected_cycles,
            rows,
            gaps,
            underrun,
            average,
            total_rtt,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>12} {:>11} {:>10} {:>11} {:>10} {:>10} {:>10} {:>10}",
            "sequence", "interestRTT", "genI2", "interestTr", "dataRTT", "genD1", "dataTr", "total"
        )?;
        for r in &self.rows {
            writeln!(
                f,
                "{:>12} {:>11.3} {:>10.3} {:>11.3} {:>10.3} {:>10.3} {:>10.3} {:>10.3}",
                r.sequence,
                r.interest_rtt,
                r.gen_inner_request,
                r.interest_travel,
                r.data_rtt,
                r.gen_outer_response,
                r.data_travel,
                r.total_rtt
            )?;
        }
        if let Some(a) = &self.average {
            writeln!(
                f,
                "{:>12} {:>11.3} {:>10.3} {:>11.3} {:>10.3} {:>10.3} {:>10.3} {:>10.3}",
                format!("avg({})", a.cycles),
                a.interest_rtt,
                a.gen_inner_request,
                a.interest_travel,
                a.data_rtt,
                a.gen_outer_response,
                a.data_travel,
                a.total_rtt
            )?;
        }
        if self.total_rtt.has_data() {
            let p = &self.total_rtt;
            writeln!(
                f,
                "total RTT (μs): min {} p50 {} p95 {} p99 {} max {}",
                p.min, p.p50, p.p95, p.p99, p.max
            )?;
        }
        write!(
            f,
            "{}/{} cycles joined",
            self.rows.len(),
            self.expected_cycles
        )?;
        if !self.gaps.is_empty() {
            write!(f, ", gaps at {:?}", self.gaps)?;
        }
        if self.underrun {
            write!(f, " (partial)")?;
        }
        Ok(())
    }
}

/// Holds one snapshot of all recorded sets; reports are pure functions of it.
#[derive(Debug, Clone, Default)]
pub struct Correlator {
    driver: Vec<DriverRecord>,
    relay: Vec<RelayRecord>,
    terminal: Vec<TerminalRecord>,
}

impl Correlator {
    pub fn new(
        driver: Vec<DriverRecord>,
        relay: Vec<RelayRecord>,
        terminal: Vec<TerminalRecord>,
    ) -> Self {
        Self {
            driver,
            relay,
            terminal,
        }
    }

    pub async fn load(source: &mut dyn MetricSource) -> Result<Self, MetricError> {
        let driver = source.read_driver().await?;
        let relay = source.read_relay().await?;
        let terminal = source.read_terminal().await?;
        debug!(
            driver = driver.len(),
            relay = relay.len(),
            terminal = terminal.len(),
            "records loaded"
        );
        Ok(Self::new(driver, relay, terminal))
    }

    /// Report over the last `expected_cycles` driver records.
    ///
    /// Logs may span several runs; only the most recent cycles count. Cycles
    /// the driver itself timed out are not visible here, so they show up as
    /// an underrun rather than as gaps.
    pub fn compute_report(&self, expected_cycles: usize) -> Report {
        let skip = self.driver.len().saturating_sub(expected_cycles);
        let (relay, terminal) = self.indexes();

        let mut rows = Vec::new();
        let mut gaps = Vec::new();
        for d in &self.driver[skip..] {
            match join(d, &relay, &terminal) {
                Some(row) => rows.push(row),
                None => gaps.push(d.sequence),
            }
        }
        Report::from_rows(expected_cycles, rows, gaps)
    }

    /// Report over an exact range of sequences, as the driver knows them.
    /// Every sequence in the range without a joined row is a gap.
    pub fn compute_report_for(&self, sequences: Range<u64>) -> Report {
        let (relay, terminal) = self.indexes();
        let driver: HashMap<u64, &DriverRecord> =
            self.driver.iter().map(|d| (d.sequence, d)).collect();

        let expected_cycles = (sequences.end.saturating_sub(sequences.start)) as usize;
        let mut rows = Vec::new();
        let mut gaps = Vec::new();
        for sequence in sequences {
            match driver.get(&sequence).and_then(|d| join(d, &relay, &terminal)) {
                Some(row) => rows.push(row),
                None => gaps.push(sequence),
            }
        }
        Report::from_rows(expected_cycles, rows, gaps)
    }

    /// Positional join: the n-th record of each log is assumed
    /// to belong to the same cycle.
    ///
    /// Any record dropped by one role (timeout, write failure) misaligns
    /// every later row. Kept only to re-read logs written by older tools.
    pub fn compute_by_position(&self, expected_cycles: usize) -> Report {
        let available = self
            .driver
            .len()
            .min(self.relay.len())
            .min(self.terminal.len());
        let rows: Vec<MetricRow> = (0..expected_cycles.min(available))
            .map(|i| MetricRow::join(&self.driver[i], &self.relay[i], &self.terminal[i]))
            .collect();
        Report::from_rows(expected_cycles, rows, Vec::new())
    }

    // Later records win, so a rerun that reuses sequences supersedes older ones.
    fn indexes(&self) -> (HashMap<u64, &RelayRecord>, HashMap<u64, &TerminalRecord>) {
        let relay = self.relay.iter().map(|r| (r.sequence, r)).collect();
        let terminal = self.terminal.iter().map(|t| (t.sequence, t)).collect();
        (relay, terminal)
    }
}

fn join(
    driver: &DriverRecord,
    relay: &HashMap<u64, &RelayRecord>,
    terminal: &HashMap<u64, &TerminalRecord>,
) -> Option<MetricRow> {
    let r = relay.get(&driver.sequence)?;
    let t = terminal.get(&r.inner_sequence)?;
    Some(MetricRow::join(driver, r, t))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    /// A cycle with the given hop latencies (μs), starting at `t0`.
    fn cycle(sequence: u64, inner: u64, t0: u64) -> (DriverRecord, RelayRecord, TerminalRecord) {
        let relay = RelayRecord {
            sequence,
            inner_sequence: inner,
            receive_outer_request: t0 + 400,
            send_inner_request: t0 + 450,
            receive_inner_response: t0 + 1_700,
            send_outer_response: t0 + 1_900,
        };
        let terminal = TerminalRecord {
            sequence: inner,
            receive_inner_request: t0 + 800,
            send_inner_response: t0 + 1_300,
        };
        let driver = DriverRecord {
            sequence,
            send_outer_request: t0,
            receive_outer_response: t0 + 2_300,
        };
        (driver, relay, terminal)
    }

    fn correlator(cycles: &[(DriverRecord, RelayRecord, TerminalRecord)]) -> Correlator {
        Correlator::new(
            cycles.iter().map(|c| c.0).collect(),
            cycles.iter().map(|c| c.1).collect(),
            cycles.iter().map(|c| c.2).collect(),
        )
    }

    #[test]
    fn derives_hop_metrics_in_milliseconds() {
        let (d, r, t) = cycle(1000, 5, 10_000);
        let row = MetricRow::join(&d, &r, &t);
        assert!((row.interest_rtt - 0.8).abs() < EPS);
        assert!((row.gen_inner_request - 0.05).abs() < EPS);
        assert!((row.interest_travel - 0.75).abs() < EPS);
        assert!((row.data_rtt - 1.0).abs() < EPS);
        assert!((row.gen_outer_response - 0.2).abs() < EPS);
        assert!((row.data_travel - 0.8).abs() < EPS);
        assert!((row.total_rtt - 2.3).abs() < EPS);
    }

    #[test]
    fn travel_plus_generation_equals_rtt() {
        let rows: Vec<MetricRow> = (0..50)
            .map(|i| {
                let (d, mut r, t) = cycle(i, i + 7, 1_000_000 * i);
                r.send_inner_request += i * 13;
                r.send_outer_response += i * 29;
                MetricRow::join(&d, &r, &t)
            })
            .collect();
        for row in rows {
            assert!((row.interest_travel + row.gen_inner_request - row.interest_rtt).abs() < 1e-6);
            assert!((row.data_travel + row.gen_outer_response - row.data_rtt).abs() < 1e-6);
        }
    }

    #[test]
    fn dropped_cycle_does_not_shift_later_rows() {
        let cycles: Vec<_> = (0..3).map(|i| cycle(1000 + i, 20 + i, i * 1_000_000)).collect();
        let mut c = correlator(&cycles);
        // the relay timed out on cycle 1001: neither responder recorded it
        c.relay.remove(1);
        c.terminal.remove(1);

        let report = c.compute_report(3);
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.gaps, vec![1001]);
        assert!(report.underrun);
        assert_eq!(report.rows[1].sequence, 1002);
        assert_eq!(report.rows[1].inner_sequence, 22);
        assert!((report.rows[1].interest_rtt - 0.8).abs() < EPS);

        // the positional join pairs driver 1001 with relay 1002
        let legacy = c.compute_by_position(3);
        assert_eq!(legacy.rows.len(), 2);
        assert_ne!(legacy.rows[1].inner_sequence, 21);
    }

    #[test]
    fn range_report_counts_driver_timeouts_as_gaps() {
        let cycles: Vec<_> = (0..4).map(|i| cycle(1000 + i, i, i * 1_000_000)).collect();
        let mut c = correlator(&cycles);
        c.driver.remove(2);

        let report = c.compute_report_for(1000..1004);
        assert_eq!(report.expected_cycles, 4);
        assert_eq!(report.gaps, vec![1002]);
        assert_eq!(report.rows.len(), 3);
    }

    #[test]
    fn only_the_latest_cycles_are_reported() {
        let mut cycles: Vec<_> = (0..3).map(|i| cycle(500 + i, i, i * 1_000_000)).collect();
        cycles.extend((0..2).map(|i| cycle(9000 + i, 100 + i, (10 + i) * 1_000_000)));
        let report = correlator(&cycles).compute_report(2);
        let seqs: Vec<u64> = report.rows.iter().map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![9000, 9001]);
        assert!(!report.underrun);
    }

    #[test]
    fn average_excludes_the_first_cycle() {
        let mut cycles: Vec<_> = (0..3).map(|i| cycle(i, i, i * 1_000_000)).collect();
        // slow first cycle: route discovery
        cycles[0].2.receive_inner_request += 50_000;
        let report = correlator(&cycles).compute_report(3);

        let avg = report.average.expect("three rows give an average");
        assert_eq!(avg.cycles, 2);
        assert!((avg.interest_rtt - 0.8).abs() < EPS);
        assert_eq!(report.total_rtt.count, 3);
    }

    #[test]
    fn correlating_twice_gives_identical_reports() {
        let cycles: Vec<_> = (0..5).map(|i| cycle(i, i, i * 777_777)).collect();
        let c = correlator(&cycles);
        assert_eq!(c.compute_report(5), c.compute_report(5));
        assert_eq!(c.compute_report_for(0..5), c.compute_report_for(0..5));
    }

    #[test]
    fn empty_logs_give_a_partial_report() {
        let report = Correlator::default().compute_report(3);
        assert!(report.rows.is_empty());
        assert!(report.underrun);
        assert!(report.average.is_none());
        assert!(report.to_string().contains("0/3 cycles joined"));
    }
}
