use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::build_response;
use crate::clock::Clock;
use crate::config::TerminalConfig;
use crate::error::NdnPingError;
use crate::packet::Interest;
use crate::records::{MetricSink, Record, TerminalRecord};
use crate::signer::Signer;
use crate::transport::RequestChannel;

/// Server A: answers every inner request with a signed response.
pub struct TerminalResponder {
    config: TerminalConfig,
    channel: Arc<dyn RequestChannel>,
    signer: Arc<dyn Signer>,
    clock: Arc<dyn Clock>,
    sink: Box<dyn MetricSink>,
}

impl TerminalResponder {
    pub fn new(
        config: TerminalConfig,
        channel: Arc<dyn RequestChannel>,
        signer: Arc<dyn Signer>,
        clock: Arc<dyn Clock>,
        sink: Box<dyn MetricSink>,
    ) -> Self {
        Self {
            config,
            channel,
            signer,
            clock,
            sink,
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
        info!(prefix = %registration.prefix(), "terminal responder serving");

        while let Some(interest) = registration.next().await {
            self.on_inner_request(interest).await;
        }
        info!("terminal responder stopped");
        Ok(())
    }

    async fn on_inner_request(&mut self, interest: Interest) {
        let received = self.clock.now_micros();
        debug!(%interest, "received inner request");

        let mut data = build_response(interest.name.clone(), &self.config.response);
        if let Err(e) = self.signer.sign(&mut data) {
            warn!(%interest, error = %e, "signing failed; cycle dropped");
            return;
        }
        let sent = self.clock.now_micros();

        // The response leaves as soon as it is stamped; the record follows.
        if let Err(e) = self.channel.respond(data) {
            warn!(%interest, error = %e, "failed to send inner response");
            return;
        }
        info!(
            name = %interest.name,
            make_us = sent.saturating_sub(received),
            "sent inner response"
        );

        match interest.name.last_number() {
            Some(sequence) => {
                let record = Record::Terminal(TerminalRecord {
                    sequence,
                    receive_inner_request: received,
                    send_inner_response: sent,
                });
                if let Err(e) = self.sink.append(record).await {
                    warn!(sequence, error = %e, "failed to persist terminal record");
                }
            }
            None => debug!(name = %interest.name, "no sequence in name; not recorded"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::error::SignError;
    use crate::packet::{Data, Name};
    use crate::records::MemoryStore;
    use crate::signer::{verify, DigestSigner};
    use crate::transport::Forwarder;
    use std::time::Duration;

    /// Takes `delay` to write each record.
    struct SlowSink {
        inner: MemoryStore,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl MetricSink for SlowSink {
        async fn append(&mut self, record: Record) -> Result<(), crate::error::MetricError> {
            tokio::time::sleep(self.delay).await;
            self.inner.append(record).await
        }
    }

    struct BrokenSigner;

    impl Signer for BrokenSigner {
        fn sign(&self, _data: &mut Data) -> Result<(), SignError> {
            Err(SignError::KeyUnavailable("test".into()))
        }
    }

    fn spawn_terminal(hub: &Forwarder, signer: Arc<dyn Signer>, store: &MemoryStore) {
        let terminal = TerminalResponder::new(
            TerminalConfig::new("/serverA".parse().unwrap()),
            Arc::new(hub.connect_local()),
            signer,
            Arc::new(MonotonicClock),
            Box::new(store.clone()),
        );
        tokio::spawn(terminal.run());
    }

    async fn ask(hub: &Forwarder, name: &str) -> Result<Data, crate::error::TransportError> {
        // wait for the terminal's registration to land
        for _ in 0..100 {
            if !hub.registered_prefixes().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        hub.connect_local()
            .express(Interest::new(name.parse::<Name>().unwrap()).with_lifetime(Duration::from_millis(300)))
            .await
    }

    #[tokio::test]
    async fn answers_and_records_each_request() {
        let hub = Forwarder::new();
        let store = MemoryStore::new();
        spawn_terminal(&hub, Arc::new(DigestSigner), &store);

        let data = ask(&hub, "/serverA/41").await.unwrap();
        assert!(verify(&data));
        assert_eq!(data.content, b"HELLO KITTY");
        assert_eq!(data.name.components()[..3], ["serverA", "41", "testApp"]);
        assert!(data.name.version().is_some());

        let records = store.terminal();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence, 41);
        assert!(records[0].send_inner_response >= records[0].receive_inner_request);
    }

    #[tokio::test(start_paused = true)]
    async fn signing_failure_drops_the_cycle_but_keeps_serving() {
        let hub = Forwarder::new();
        let store = MemoryStore::new();
        spawn_terminal(&hub, Arc::new(BrokenSigner), &store);

        assert!(ask(&hub, "/serverA/1").await.unwrap_err().is_timeout());
        assert!(ask(&hub, "/serverA/2").await.unwrap_err().is_timeout());
        assert!(store.terminal().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn response_does_not_wait_for_the_record() {
        let hub = Forwarder::new();
        let store = MemoryStore::new();
        let terminal = TerminalResponder::new(
            TerminalConfig::new("/serverA".parse().unwrap()),
            Arc::new(hub.connect_local()),
            Arc::new(DigestSigner),
            Arc::new(MonotonicClock),
            Box::new(SlowSink {
                inner: store.clone(),
                delay: Duration::from_millis(500),
            }),
        );
        tokio::spawn(terminal.run());

        // the lifetime is shorter than one record write
        let started = tokio::time::Instant::now();
        ask(&hub, "/serverA/7").await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(300));
        assert!(store.terminal().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(store.terminal().len(), 1);
    }
}
