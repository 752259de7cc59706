//! Timestamp records and where they are kept.
//!
//! Every record carries its correlation sequence as its first field so the
//! correlator can join the three roles explicitly instead of by position.

mod file_store;
mod memory;
mod redis_store;

pub use file_store::{BlockReader, FileSink, FileSource};
pub use memory::MemoryStore;
pub use redis_store::{connect as connect_redis, RedisStore};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::MetricError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Driver,
    Relay,
    Terminal,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Driver => "driver",
            Self::Relay => "relay",
            Self::Terminal => "terminal",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.log", self.as_str())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-side stamps of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverRecord {
    pub sequence: u64,
    pub send_outer_request: u64,
    pub receive_outer_response: u64,
}

/// Relay stamps of one cycle. `sequence` is the client's correlation
/// sequence, `inner_sequence` the relay's own counter seen by the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRecord {
    pub sequence: u64,
    pub inner_sequence: u64,
    pub receive_outer_request: u64,
    pub send_inner_request: u64,
    pub receive_inner_response: u64,
    pub send_outer_response: u64,
}

/// Terminal stamps, keyed by the inner sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalRecord {
    pub sequence: u64,
    pub receive_inner_request: u64,
    pub send_inner_response: u64,
}

/// A record in its fixed-arity block form: one integer per line.
pub trait Block: Sized {
    const ROLE: Role;
    const ARITY: usize;

    fn sequence(&self) -> u64;
    fn to_values(&self) -> Vec<u64>;
    /// `values` always holds exactly `ARITY` entries.
    fn from_values(values: &[u64]) -> Self;
}

impl Block for DriverRecord {
    const ROLE: Role = Role::Driver;
    const ARITY: usize = 3;

    fn sequence(&self) -> u64 {
        self.sequence
    }

    fn to_values(&self) -> Vec<u64> {
        vec![self.sequence, self.send_outer_request, self.receive_outer_response]
    }

    fn from_values(v: &[u64]) -> Self {
        Self {
            sequence: v[0],
            send_outer_request: v[1],
            receive_outer_response: v[2],
        }
    }
}

impl Block for RelayRecord {
    const ROLE: Role = Role::Relay;
    const ARITY: usize = 6;

    fn sequence(&self) -> u64 {
        self.sequence
    }

    fn to_values(&self) -> Vec<u64> {
        vec![
            self.sequence,
            self.inner_sequence,
            self.receive_outer_request,
            self.send_inner_request,
            self.receive_inner_response,
            self.send_outer_response,
        ]
    }

    fn from_values(v: &[u64]) -> Self {
        Self {
            sequence: v[0],
            inner_sequence: v[1],
            receive_outer_request: v[2],
            send_inner_request: v[3],
            receive_inner_response: v[4],
            send_outer_response: v[5],
        }
    }
}

impl Block for TerminalRecord {
    const ROLE: Role = Role::Terminal;
    const ARITY: usize = 3;

    fn sequence(&self) -> u64 {
        self.sequence
    }

    fn to_values(&self) -> Vec<u64> {
        vec![self.sequence, self.receive_inner_request, self.send_inner_response]
    }

    fn from_values(v: &[u64]) -> Self {
        Self {
            sequence: v[0],
            receive_inner_request: v[1],
            send_inner_response: v[2],
        }
    }
}

/// Any one role's record, as handed to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
    Driver(DriverRecord),
    Relay(RelayRecord),
    Terminal(TerminalRecord),
}

impl Record {
    pub fn role(&self) -> Role {
        match self {
            Self::Driver(_) => Role::Driver,
            Self::Relay(_) => Role::Relay,
            Self::Terminal(_) => Role::Terminal,
        }
    }

    pub fn sequence(&self) -> u64 {
        match self {
            Self::Driver(r) => r.sequence,
            Self::Relay(r) => r.sequence,
            Self::Terminal(r) => r.sequence,
        }
    }

    pub fn to_values(&self) -> Vec<u64> {
        match self {
            Self::Driver(r) => r.to_values(),
            Self::Relay(r) => r.to_values(),
            Self::Terminal(r) => r.to_values(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Driver(r) => serde_json::to_string(r),
            Self::Relay(r) => serde_json::to_string(r),
            Self::Terminal(r) => serde_json::to_string(r),
        }
    }
}

/// Append-only destination for one process's records.
#[async_trait]
pub trait MetricSink: Send {
    /// Must not return before the record is visible to readers.
    async fn append(&mut self, record: Record) -> Result<(), MetricError>;
}

/// Reads back every role's records in the order they were written.
#[async_trait]
pub trait MetricSource: Send {
    async fn read_driver(&mut self) -> Result<Vec<DriverRecord>, MetricError>;
    async fn read_relay(&mut self) -> Result<Vec<RelayRecord>, MetricError>;
    async fn read_terminal(&mut self) -> Result<Vec<TerminalRecord>, MetricError>;
}
