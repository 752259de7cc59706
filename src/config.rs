use clap::ValueEnum;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, MonotonicClock, WallClock};
use crate::packet::{Name, DEFAULT_FRESHNESS, DEFAULT_LIFETIME};

// ─── Protocol defaults ───────────────────────────────────────────

/// Component appended after the request name in every response name.
pub const DEFAULT_APP_MARKER: &str = "testApp";
pub const DEFAULT_PAYLOAD: &str = "HELLO KITTY";
/// Delay between consecutive sends, measured from the previous send.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);
/// Wait after the last cycle before the report is computed.
pub const DEFAULT_DRAIN: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum ClockKind {
    /// CLOCK_MONOTONIC; all roles on one host
    #[default]
    Monotonic,
    /// UTC wall clock; roles on NTP-synchronised hosts
    Wall,
}

impl ClockKind {
    pub fn clock(self) -> Arc<dyn Clock> {
        match self {
            Self::Monotonic => Arc::new(MonotonicClock),
            Self::Wall => Arc::new(WallClock),
        }
    }
}

/// How a responder shapes its responses.
#[derive(Debug, Clone)]
pub struct ResponseConfig {
    pub marker: String,
    pub freshness: Duration,
    pub payload: Vec<u8>,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            marker: DEFAULT_APP_MARKER.to_owned(),
            freshness: DEFAULT_FRESHNESS,
            payload: DEFAULT_PAYLOAD.as_bytes().to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TerminalConfig {
    pub prefix: Name,
    pub response: ResponseConfig,
}

impl TerminalConfig {
    pub fn new(prefix: Name) -> Self {
        Self {
            prefix,
            response: ResponseConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Prefix the relay advertises for outer requests.
    pub prefix: Name,
    /// Prefix of the terminal; inner requests are `<target>/<inner-seq>`.
    pub target: Name,
    pub lifetime: Duration,
    pub response: ResponseConfig,
    /// First inner sequence; random when unset.
    pub inner_seq_base: Option<u64>,
}

impl RelayConfig {
    pub fn new(prefix: Name, target: Name) -> Self {
        Self {
            prefix,
            target,
            lifetime: DEFAULT_LIFETIME,
            response: ResponseConfig::default(),
            inner_seq_base: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Outer requests are `<name>/<sequence>`.
    pub name: Name,
    pub cycles: u64,
    pub interval: Duration,
    pub lifetime: Duration,
    pub drain: Duration,
    /// First sequence; random when unset.
    pub seq_base: Option<u64>,
}

impl DriverConfig {
    pub fn new(name: Name, cycles: u64) -> Self {
        Self {
            name,
            cycles,
            interval: DEFAULT_INTERVAL,
            lifetime: DEFAULT_LIFETIME,
            drain: DEFAULT_DRAIN,
            seq_base: None,
        }
    }
}

/// A random starting sequence, so runs appending to the same logs do not
/// reuse each other's sequences. Leaves room below `u64::MAX` for the run.
pub fn random_sequence_base() -> u64 {
    use rand::Rng;
    rand::thread_rng().gen_range(0..u32::MAX as u64)
}
