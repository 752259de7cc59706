use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{random_sequence_base, DriverConfig};
use crate::error::{NdnPingError, TransportError};
use crate::metrics::{Correlator, LiveStats, Report};
use crate::packet::{Data, Interest};
use crate::records::{DriverRecord, MetricSink, MetricSource, Record};
use crate::transport::RequestChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    /// Cycles remain to be scheduled; some may be awaiting responses.
    Sending,
    /// Every cycle is scheduled; waiting for the last responses.
    AwaitingResponses,
    /// Waiting, at most the drain interval, for the responders' records
    /// of every answered cycle before the report.
    Draining,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverSummary {
    pub first_sequence: u64,
    pub sent: u64,
    pub completed: u64,
    pub timed_out: u64,
    /// Lost to a transport error other than a timeout.
    pub failed: u64,
}

impl DriverSummary {
    pub fn sequences(&self) -> Range<u64> {
        self.first_sequence..self.first_sequence + self.sent
    }
}

#[derive(Debug, Clone)]
pub struct DriverOutcome {
    pub summary: DriverSummary,
    /// Present when the driver was given a metric source.
    pub report: Option<Report>,
}

/// How often the drain re-reads the metric store.
const SETTLE_POLL: Duration = Duration::from_millis(25);

/// What a finished `express` task hands back to the loop.
struct CycleOutcome {
    sequence: u64,
    sent_at: u64,
    result: Result<Data, TransportError>,
}

/// The client: sends one outer request per interval and records the RTT of
/// each response.
///
/// The interval is measured from the previous send, so slow cycles overlap
/// with the next ones.
pub struct PingDriver {
    config: DriverConfig,
    channel: Arc<dyn RequestChannel>,
    clock: Arc<dyn Clock>,
    sink: Box<dyn MetricSink>,
    source: Option<Box<dyn MetricSource>>,
    stats: Arc<LiveStats>,
    state: DriverState,
    next_sequence: u64,
    outstanding: usize,
    summary: DriverSummary,
}

impl PingDriver {
    pub fn new(
        config: DriverConfig,
        channel: Arc<dyn RequestChannel>,
        clock: Arc<dyn Clock>,
        sink: Box<dyn MetricSink>,
    ) -> Self {
        let first_sequence = config.seq_base.unwrap_or_else(random_sequence_base);
        Self {
            config,
            channel,
            clock,
            sink,
            source: None,
            stats: Arc::new(LiveStats::new()),
            state: DriverState::Idle,
            next_sequence: first_sequence,
            outstanding: 0,
            summary: DriverSummary {
                first_sequence,
                sent: 0,
                completed: 0,
                timed_out: 0,
                failed: 0,
            },
        }
    }

    /// Correlate from `source` once the run has drained.
    pub fn with_source(mut self, source: Box<dyn MetricSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_stats(mut self, stats: Arc<LiveStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> Arc<LiveStats> {
        self.stats.clone()
    }

    fn transition(&mut self, next: DriverState) {
        debug!(from = ?self.state, to = ?next, "driver state");
        self.state = next;
    }

    /// Run every cycle, drain, correlate and shut the channel down.
    ///
    /// Fails before sending anything when the sequence base leaves no room
    /// for the configured cycles.
    pub async fn run(mut self) -> Result<DriverOutcome, NdnPingError> {
        let first = self.summary.first_sequence;
        if first.checked_add(self.config.cycles).is_none() {
            self.channel.shutdown();
            return Err(NdnPingError::SequenceOverflow {
                base: first,
                cycles: self.config.cycles,
            });
        }
        info!(
            name = %self.config.name,
            cycles = self.config.cycles,
            first_sequence = self.summary.first_sequence,
            interval_ms = self.config.interval.as_millis() as u64,
            "starting ping run"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pending: JoinSet<CycleOutcome> = JoinSet::new();

        self.transition(DriverState::Sending);
        loop {
            let scheduled_all = self.summary.sent >= self.config.cycles;
            if scheduled_all {
                if self.outstanding == 0 {
                    break;
                }
                if self.state == DriverState::Sending {
                    self.transition(DriverState::AwaitingResponses);
                }
            }

            tokio::select! {
                _ = ticker.tick(), if !scheduled_all => self.send_cycle(&mut pending),
                Some(joined) = pending.join_next(), if !pending.is_empty() => match joined {
                    Ok(outcome) => self.on_outcome(outcome).await,
                    Err(e) => {
                        warn!(error = %e, "cycle task failed");
                        self.outstanding = self.outstanding.saturating_sub(1);
                    }
                },
            }
        }

        self.transition(DriverState::Draining);
        let report = match self.source.take() {
            Some(mut source) => {
                settle(
                    source.as_mut(),
                    self.summary.sequences(),
                    self.summary.completed,
                    self.config.drain,
                )
                .await
            }
            None => {
                if !self.config.drain.is_zero() {
                    debug!(drain_ms = self.config.drain.as_millis() as u64, "draining");
                    tokio::time::sleep(self.config.drain).await;
                }
                None
            }
        };

        self.channel.shutdown();
        self.transition(DriverState::Stopped);
        info!(
            sent = self.summary.sent,
            completed = self.summary.completed,
            timed_out = self.summary.timed_out,
            failed = self.summary.failed,
            "ping run finished"
        );
        Ok(DriverOutcome {
            summary: self.summary,
            report,
        })
    }

    fn send_cycle(&mut self, pending: &mut JoinSet<CycleOutcome>) {
        let sequence = self.next_sequence;
        // `run` checked that the whole run fits below u64::MAX.
        self.next_sequence = sequence.wrapping_add(1);

        let interest = Interest::new(self.config.name.clone().append_number(sequence))
            .with_lifetime(self.config.lifetime)
            .with_must_be_fresh(true);
        let sent_at = self.clock.now_micros();

        info!(name = %interest.name, "sending outer request");
        let channel = self.channel.clone();
        pending.spawn(async move {
            let result = channel.express(interest).await;
            CycleOutcome {
                sequence,
                sent_at,
                result,
            }
        });

        self.outstanding += 1;
        self.summary.sent += 1;
        self.stats.record_sent();
    }

    async fn on_outcome(&mut self, outcome: CycleOutcome) {
        let CycleOutcome {
            sequence,
            sent_at,
            result,
        } = outcome;
        self.outstanding = self.outstanding.saturating_sub(1);

        match result {
            Ok(data) => {
                let received = self.clock.now_micros();
                let rtt_us = received.saturating_sub(sent_at);
                self.summary.completed += 1;
                self.stats.record_rtt(sequence, rtt_us);

                let record = Record::Driver(DriverRecord {
                    sequence,
                    send_outer_request: sent_at,
                    receive_outer_response: received,
                });
                if let Err(e) = self.sink.append(record).await {
                    warn!(sequence, error = %e, "failed to persist driver record");
                }
                info!(
                    name = %data.name,
                    rtt_ms = rtt_us as f64 / 1000.0,
                    "received outer response"
                );
            }
            Err(e) if e.is_timeout() => {
                self.summary.timed_out += 1;
                self.stats.record_timeout();
                info!(sequence, "outer request timed out");
            }
            Err(e) => {
                self.summary.failed += 1;
                self.stats.record_failure();
                warn!(sequence, error = %e, "outer request failed");
            }
        }
    }
}

/// Responders persist after they respond, so their records of the last
/// cycles may still be on their way. Re-read the store until every answered
/// cycle joins, or `drain` runs out.
async fn settle(
    source: &mut dyn MetricSource,
    sequences: Range<u64>,
    completed: u64,
    drain: Duration,
) -> Option<Report> {
    let deadline = Instant::now() + drain;
    loop {
        let report = match Correlator::load(source).await {
            Ok(correlator) => correlator.compute_report_for(sequences.clone()),
            Err(e) => {
                warn!(error = %e, "could not read records; no report");
                return None;
            }
        };
        if report.rows.len() as u64 >= completed {
            return Some(report);
        }
        if Instant::now() >= deadline {
            warn!(
                joined = report.rows.len(),
                completed,
                "drain elapsed before every answered cycle was recorded"
            );
            return Some(report);
        }
        tokio::time::sleep(SETTLE_POLL).await;
    }
}
