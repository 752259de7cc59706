use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};

use super::{Block, DriverRecord, MetricSink, MetricSource, Record, RelayRecord, TerminalRecord};
use crate::error::MetricError;

/// Creates a `ConnectionManager` that auto-reconnects on failure.
///
/// Cheaply cloneable; every clone shares one multiplexed connection, so the
/// three roles of a `local` run can all write through it.
pub async fn connect(url: &str) -> Result<ConnectionManager, MetricError> {
    let client = redis::Client::open(url)?;
    Ok(ConnectionManager::new(client).await?)
}

/// Shared metrics store for runs whose roles live on different hosts.
///
/// Layout per role, under `namespace`:
///   `<ns>:<role>`        hash  sequence → record JSON
///   `<ns>:<role>:order`  list  sequences in write order
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager, namespace: impl Into<String>) -> Self {
        Self {
            conn,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn records_key(&self, role: super::Role) -> String {
        records_key(&self.namespace, role)
    }

    fn order_key(&self, role: super::Role) -> String {
        format!("{}:order", self.records_key(role))
    }

    async fn read_role<R: Block + DeserializeOwned>(&mut self) -> Result<Vec<R>, MetricError> {
        let order_key = self.order_key(R::ROLE);
        let records_key = self.records_key(R::ROLE);
        let order: Vec<u64> = self.conn.lrange(order_key, 0, -1).await?;
        let by_sequence: HashMap<u64, String> = self.conn.hgetall(records_key).await?;
        in_write_order(&order, &by_sequence)
    }
}

/// Records in first-write order. A reused sequence appears once in the
/// hash (the newest write) but several times in the order list; it is
/// returned once, at its first position.
fn in_write_order<R: DeserializeOwned>(
    order: &[u64],
    by_sequence: &HashMap<u64, String>,
) -> Result<Vec<R>, MetricError> {
    let mut seen = HashSet::with_capacity(order.len());
    let mut records = Vec::with_capacity(order.len());
    for sequence in order {
        if !seen.insert(*sequence) {
            continue;
        }
        if let Some(json) = by_sequence.get(sequence) {
            records.push(serde_json::from_str(json)?);
        }
    }
    Ok(records)
}

fn records_key(namespace: &str, role: super::Role) -> String {
    format!("{namespace}:{role}")
}

#[async_trait]
impl MetricSink for RedisStore {
    async fn append(&mut self, record: Record) -> Result<(), MetricError> {
        let role = record.role();
        let json = record.to_json()?;
        let _: () = redis::pipe()
            .atomic()
            .hset(self.records_key(role), record.sequence(), json)
            .ignore()
            .rpush(self.order_key(role), record.sequence())
            .ignore()
            .query_async(&mut self.conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MetricSource for RedisStore {
    async fn read_driver(&mut self) -> Result<Vec<DriverRecord>, MetricError> {
        self.read_role().await
    }

    async fn read_relay(&mut self) -> Result<Vec<RelayRecord>, MetricError> {
        self.read_role().await
    }

    async fn read_terminal(&mut self) -> Result<Vec<TerminalRecord>, MetricError> {
        self.read_role().await
    }
}
