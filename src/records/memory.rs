use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use super::{DriverRecord, MetricSink, MetricSource, Record, RelayRecord, TerminalRecord};
use crate::error::MetricError;

/// In-process store shared by clones; records stay in write order.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<Vec<Record>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    pub fn driver(&self) -> Vec<DriverRecord> {
        self.filter(|r| match r {
            Record::Driver(d) => Some(*d),
            _ => None,
        })
    }

    pub fn relay(&self) -> Vec<RelayRecord> {
        self.filter(|r| match r {
            Record::Relay(d) => Some(*d),
            _ => None,
        })
    }

    pub fn terminal(&self) -> Vec<TerminalRecord> {
        self.filter(|r| match r {
            Record::Terminal(d) => Some(*d),
            _ => None,
        })
    }

    fn filter<T>(&self, pick: impl Fn(&Record) -> Option<T>) -> Vec<T> {
        self.records.lock().iter().filter_map(pick).collect()
    }
}

#[async_trait]
impl MetricSink for MemoryStore {
    async fn append(&mut self, record: Record) -> Result<(), MetricError> {
        self.records.lock().push(record);
        Ok(())
    }
}

#[async_trait]
impl MetricSource for MemoryStore {
    async fn read_driver(&mut self) -> Result<Vec<DriverRecord>, MetricError> {
        Ok(self.driver())
    }

    async fn read_relay(&mut self) -> Result<Vec<RelayRecord>, MetricError> {
        Ok(self.relay())
    }

    async fn read_terminal(&mut self) -> Result<Vec<TerminalRecord>, MetricError> {
        Ok(self.terminal())
    }
}
