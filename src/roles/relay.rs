use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::build_response;
use crate::clock::Clock;
use crate::config::{random_sequence_base, RelayConfig};
use crate::error::{NdnPingError, TransportError};
use crate::packet::{Data, Interest, Name};
use crate::records::{MetricSink, Record, RelayRecord};
use crate::signer::Signer;
use crate::transport::RequestChannel;

/// What the relay remembers about one cycle while its inner request is out.
#[derive(Debug)]
struct CycleContext {
    outer_name: Name,
    /// The outer request's trailing number, if it has one.
    sequence: Option<u64>,
    receive_outer_request: u64,
    send_inner_request: u64,
}

type InnerOutcome = (u64, Result<Data, TransportError>);

/// Server B: turns each outer request into an inner request to the
/// terminal, and the terminal's response into the outer response.
///
/// Inner requests are numbered by the relay's own counter, never by the
/// outer request's sequence. Contexts are keyed by that inner sequence, so
/// any number of cycles may overlap.
pub struct RelayResponder {
    config: RelayConfig,
    channel: Arc<dyn RequestChannel>,
    signer: Arc<dyn Signer>,
    clock: Arc<dyn Clock>,
    sink: Box<dyn MetricSink>,
    next_inner: u64,
    in_flight: HashMap<u64, CycleContext>,
}

impl RelayResponder {
    pub fn new(
        config: RelayConfig,
        channel: Arc<dyn RequestChannel>,
        signer: Arc<dyn Signer>,
        clock: Arc<dyn Clock>,
        sink: Box<dyn MetricSink>,
    ) -> Self {
        let next_inner = config.inner_seq_base.unwrap_or_else(random_sequence_base);
        Self {
            config,
            channel,
            signer,
            clock,
            sink,
            next_inner,
            in_flight: HashMap::new(),
        }
    }

    /// Serve until the channel shuts down. Failing to register the prefix
    /// shuts the channel down and returns the error.
    pub async fn run(mut self) -> Result<(), NdnPingError> {
        let mut registration = match self.channel.advertise(&self.config.prefix).await {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "cannot serve; shutting down");
                self.channel.shutdown();
                return Err(e.into());
            }
        };
        info!(
            prefix = %registration.prefix(),
            target = %self.config.target,
            first_inner = self.next_inner,
            "relay responder serving"
        );

        let mut pending: JoinSet<InnerOutcome> = JoinSet::new();
        loop {
            tokio::select! {
                incoming = registration.next() => match incoming {
                    Some(interest) => self.on_outer_request(interest, &mut pending),
                    None => break,
                },
                Some(joined) = pending.join_next(), if !pending.is_empty() => match joined {
                    Ok((inner, Ok(data))) => self.on_inner_response(inner, data).await,
                    Ok((inner, Err(e))) if e.is_timeout() => self.on_inner_timeout(inner),
                    Ok((inner, Err(e))) => {
                        warn!(inner, error = %e, "inner request failed; cycle dropped");
                        self.in_flight.remove(&inner);
                    }
                    Err(e) => warn!(error = %e, "inner request task failed"),
                },
            }
        }

        pending.abort_all();
        info!(abandoned = self.in_flight.len(), "relay responder stopped");
        Ok(())
    }

    fn on_outer_request(&mut self, interest: Interest, pending: &mut JoinSet<InnerOutcome>) {
        let received = self.clock.now_micros();
        debug!(%interest, "received outer request");

        let inner_sequence = self.next_inner;
        let inner = Interest::new(self.config.target.clone().append_number(inner_sequence))
            .with_lifetime(self.config.lifetime)
            .with_must_be_fresh(true);
        let sent = self.clock.now_micros();

        let sequence = interest.name.last_number();
        self.in_flight.insert(
            inner_sequence,
            CycleContext {
                outer_name: interest.name,
                sequence,
                receive_outer_request: received,
                send_inner_request: sent,
            },
        );

        info!(
            name = %inner.name,
            make_us = sent.saturating_sub(received),
            "sending inner request"
        );
        let channel = self.channel.clone();
        pending.spawn(async move { (inner_sequence, channel.express(inner).await) });
        // Inner sequences wrap after u64::MAX.
        self.next_inner = self.next_inner.wrapping_add(1);
    }

    async fn on_inner_response(&mut self, inner_sequence: u64, data: Data) {
        let received = self.clock.now_micros();
        let Some(cycle) = self.in_flight.remove(&inner_sequence) else {
            warn!(inner_sequence, name = %data.name, "response for unknown cycle");
            return;
        };
        debug!(name = %data.name, "received inner response");

        let mut outer = build_response(cycle.outer_name.clone(), &self.config.response);
        if let Err(e) = self.signer.sign(&mut outer) {
            warn!(name = %cycle.outer_name, error = %e, "signing failed; cycle dropped");
            return;
        }
        let sent = self.clock.now_micros();

        if let Err(e) = self.channel.respond(outer) {
            warn!(name = %cycle.outer_name, error = %e, "failed to send outer response");
            return;
        }
        info!(
            name = %cycle.outer_name,
            inner_rtt_us = received.saturating_sub(cycle.send_inner_request),
            make_us = sent.saturating_sub(received),
            "sent outer response"
        );

        match cycle.sequence {
            Some(sequence) => {
                let record = Record::Relay(RelayRecord {
                    sequence,
                    inner_sequence,
                    receive_outer_request: cycle.receive_outer_request,
                    send_inner_request: cycle.send_inner_request,
                    receive_inner_response: received,
                    send_outer_response: sent,
                });
                if let Err(e) = self.sink.append(record).await {
                    warn!(sequence, error = %e, "failed to persist relay record");
                }
            }
            None => debug!(name = %cycle.outer_name, "no sequence in name; not recorded"),
        }
    }

    /// The outer requester gets nothing; its own timeout ends the cycle.
    fn on_inner_timeout(&mut self, inner_sequence: u64) {
        match self.in_flight.remove(&inner_sequence) {
            Some(cycle) => info!(
                inner_sequence,
                outer = %cycle.outer_name,
                "inner request timed out; cycle dropped"
            ),
            None => debug!(inner_sequence, "timeout for unknown cycle"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::config::TerminalConfig;
    use crate::records::MemoryStore;
    use crate::roles::TerminalResponder;
    use crate::signer::{verify, DigestSigner};
    use crate::transport::Forwarder;
    use std::time::Duration;

    fn relay_config() -> RelayConfig {
        let mut config = RelayConfig::new("/serverB".parse().unwrap(), "/serverA".parse().unwrap());
        config.inner_seq_base = Some(0);
        config.lifetime = Duration::from_millis(200);
        config
    }

    async fn wait_for_prefixes(hub: &Forwarder, n: usize) {
        for _ in 0..200 {
            if hub.registered_prefixes().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("prefixes never registered");
    }

    #[tokio::test]
    async fn overlapping_cycles_keep_their_own_names() {
        let hub = Forwarder::new();
        let store = MemoryStore::new();
        tokio::spawn(
            TerminalResponder::new(
                TerminalConfig::new("/serverA".parse().unwrap()),
                Arc::new(hub.connect_local()),
                Arc::new(DigestSigner),
                Arc::new(MonotonicClock),
                Box::new(store.clone()),
            )
            .run(),
        );
        tokio::spawn(
            RelayResponder::new(
                relay_config(),
                Arc::new(hub.connect_local()),
                Arc::new(DigestSigner),
                Arc::new(MonotonicClock),
                Box::new(store.clone()),
            )
            .run(),
        );
        wait_for_prefixes(&hub, 2).await;

        let client = hub.connect_local();
        let asks = (0..3u64).map(|i| {
            let client = client.clone();
            async move {
                client
                    .express(Interest::new(format!("/serverB/{}", 500 + i).parse().unwrap()))
                    .await
            }
        });
        let answers = futures_join(asks).await;

        for (i, data) in answers.into_iter().enumerate() {
            let data = data.unwrap();
            assert!(verify(&data));
            assert_eq!(data.name.components()[1], (500 + i as u64).to_string());
        }

        let mut relay = store.relay();
        relay.sort_by_key(|r| r.sequence);
        assert_eq!(relay.len(), 3);
        let mut inner: Vec<u64> = relay.iter().map(|r| r.inner_sequence).collect();
        inner.sort_unstable();
        assert_eq!(inner, vec![0, 1, 2]);
        for r in &relay {
            assert!(r.receive_outer_request <= r.send_inner_request);
            assert!(r.send_inner_request <= r.receive_inner_response);
            assert!(r.receive_inner_response <= r.send_outer_response);
        }
        assert_eq!(store.terminal().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn inner_timeout_sends_nothing_back() {
        let hub = Forwarder::new();
        let store = MemoryStore::new();
        // a terminal that never answers
        let silent = hub.connect_local();
        let _registration = silent.advertise(&"/serverA".parse().unwrap()).await.unwrap();
        tokio::spawn(
            RelayResponder::new(
                relay_config(),
                Arc::new(hub.connect_local()),
                Arc::new(DigestSigner),
                Arc::new(MonotonicClock),
                Box::new(store.clone()),
            )
            .run(),
        );
        wait_for_prefixes(&hub, 2).await;

        let outer = Interest::new("/serverB/9".parse().unwrap()).with_lifetime(Duration::from_millis(600));
        let err = hub.connect_local().express(outer).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(store.relay().is_empty());
    }

    #[tokio::test]
    async fn inner_sequence_wraps_at_the_top_of_the_range() {
        let hub = Forwarder::new();
        let store = MemoryStore::new();
        tokio::spawn(
            TerminalResponder::new(
                TerminalConfig::new("/serverA".parse().unwrap()),
                Arc::new(hub.connect_local()),
                Arc::new(DigestSigner),
                Arc::new(MonotonicClock),
                Box::new(store.clone()),
            )
            .run(),
        );
        let mut config = relay_config();
        config.inner_seq_base = Some(u64::MAX);
        tokio::spawn(
            RelayResponder::new(
                config,
                Arc::new(hub.connect_local()),
                Arc::new(DigestSigner),
                Arc::new(MonotonicClock),
                Box::new(store.clone()),
            )
            .run(),
        );
        wait_for_prefixes(&hub, 2).await;

        let client = hub.connect_local();
        for seq in [1u64, 2] {
            let name = format!("/serverB/{seq}").parse().unwrap();
            client.express(Interest::new(name)).await.unwrap();
        }

        let inner: Vec<u64> = store.relay().iter().map(|r| r.inner_sequence).collect();
        assert_eq!(inner, vec![u64::MAX, 0]);
        let mut terminal: Vec<u64> = store.terminal().iter().map(|r| r.sequence).collect();
        terminal.sort_unstable();
        assert_eq!(terminal, vec![0, u64::MAX]);
    }

    /// Runs the futures concurrently on the test runtime, in order.
    async fn futures_join<F, T>(futures: impl IntoIterator<Item = F>) -> Vec<T>
    where
        F: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handles: Vec<_> = futures.into_iter().map(tokio::spawn).collect();
        let mut out = Vec::with_capacity(handles.len());
        for h in handles {
            out.push(h.await.unwrap());
        }
        out
    }
}
