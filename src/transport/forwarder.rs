use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::Face;
use crate::packet::{Data, Frame, Interest, Name};

pub type FaceId = u64;

/// The hub: routes interests by longest advertised prefix and returns data
/// along the pending-interest table.
///
/// Cloning shares the same tables. There is no content store; every
/// interest is forwarded and every response is produced afresh.
#[derive(Clone, Default)]
pub struct Forwarder {
    tables: Arc<Mutex<Tables>>,
}

#[derive(Default)]
struct Tables {
    next_face: FaceId,
    faces: HashMap<FaceId, mpsc::UnboundedSender<Frame>>,
    fib: Vec<FibEntry>,
    pit: Vec<PitEntry>,
}

struct FibEntry {
    prefix: Name,
    face: FaceId,
}

struct PitEntry {
    name: Name,
    nonce: u32,
    downstream: FaceId,
    expires: Instant,
}

impl Forwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a face whose outbound frames go to `tx`.
    pub fn add_face(&self, tx: mpsc::UnboundedSender<Frame>) -> FaceId {
        let mut tables = self.tables.lock();
        let id = tables.next_face;
        tables.next_face += 1;
        tables.faces.insert(id, tx);
        debug!(face = id, "face attached");
        id
    }

    /// Detach a face and withdraw everything it advertised or was waiting for.
    pub fn remove_face(&self, id: FaceId) {
        let mut tables = self.tables.lock();
        tables.faces.remove(&id);
        tables.fib.retain(|e| e.face != id);
        tables.pit.retain(|e| e.downstream != id);
        debug!(face = id, "face detached");
    }

    /// Creates an in-process face attached to this hub.
    pub fn connect_local(&self) -> Face {
        let (to_face_tx, to_face_rx) = mpsc::unbounded_channel();
        let (from_face_tx, mut from_face_rx) = mpsc::unbounded_channel();
        let id = self.add_face(to_face_tx);

        let forwarder = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = from_face_rx.recv().await {
                forwarder.handle(id, frame);
            }
            forwarder.remove_face(id);
        });

        Face::new(from_face_tx, to_face_rx)
    }

    pub fn registered_prefixes(&self) -> Vec<Name> {
        self.tables.lock().fib.iter().map(|e| e.prefix.clone()).collect()
    }

    /// Process one frame received from face `from`.
    pub fn handle(&self, from: FaceId, frame: Frame) {
        let mut tables = self.tables.lock();
        match frame {
            Frame::Register { prefix } => tables.on_register(from, prefix),
            Frame::Interest(interest) => tables.on_interest(from, interest),
            Frame::Data(data) => tables.on_data(from, data),
            Frame::RegisterOk { .. } | Frame::RegisterFailed { .. } => {
                trace!(face = from, "ignoring registration reply sent to hub");
            }
        }
    }
}

impl Tables {
    fn send_to(&self, face: FaceId, frame: Frame) {
        if let Some(tx) = self.faces.get(&face) {
            let _ = tx.send(frame);
        }
    }

    fn on_register(&mut self, from: FaceId, prefix: Name) {
        if let Some(owner) = self.fib.iter().find(|e| e.prefix == prefix) {
            let reason = format!("prefix already registered by face {}", owner.face);
            info!(%prefix, face = from, %reason, "rejecting registration");
            self.send_to(from, Frame::RegisterFailed { prefix, reason });
            return;
        }
        info!(%prefix, face = from, "prefix registered");
        self.fib.push(FibEntry {
            prefix: prefix.clone(),
            face: from,
        });
        self.send_to(from, Frame::RegisterOk { prefix });
    }

    fn on_interest(&mut self, from: FaceId, interest: Interest) {
        let now = Instant::now();
        self.pit.retain(|e| e.expires > now);

        if self
            .pit
            .iter()
            .any(|e| e.name == interest.name && e.nonce == interest.nonce)
        {
            debug!(%interest, "duplicate nonce; dropping looped interest");
            return;
        }

        let upstream = self
            .fib
            .iter()
            .filter(|e| e.face != from && e.prefix.is_prefix_of(&interest.name))
            .max_by_key(|e| e.prefix.len())
            .map(|e| e.face);
        let Some(upstream) = upstream else {
            debug!(%interest, "no route; dropping interest");
            return;
        };

        self.pit.push(PitEntry {
            name: interest.name.clone(),
            nonce: interest.nonce,
            downstream: from,
            expires: now + interest.lifetime(),
        });
        trace!(%interest, from, upstream, "forwarding interest");
        self.send_to(upstream, Frame::Interest(interest));
    }

    fn on_data(&mut self, from: FaceId, data: Data) {
        let now = Instant::now();
        let mut downstream = Vec::new();
        self.pit.retain(|e| {
            if e.expires <= now {
                return false;
            }
            if e.name.is_prefix_of(&data.name) {
                if !downstream.contains(&e.downstream) {
                    downstream.push(e.downstream);
                }
                return false;
            }
            true
        });

        if downstream.is_empty() {
            debug!(name = %data.name, face = from, "unsolicited data dropped");
            return;
        }
        for face in downstream {
            self.send_to(face, Frame::Data(data.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::packet::Data;
    use crate::transport::RequestChannel;
    use std::time::Duration;

    #[tokio::test]
    async fn routes_interest_and_returns_data() {
        let hub = Forwarder::new();
        let producer = hub.connect_local();
        let consumer = hub.connect_local();

        let prefix: Name = "/serverA".parse().unwrap();
        let mut registration = producer.advertise(&prefix).await.unwrap();
        assert_eq!(hub.registered_prefixes(), vec![prefix]);

        let answer = tokio::spawn(async move {
            let interest = registration.next().await.unwrap();
            let data = Data::new(interest.name.clone().append("testApp").append_version(1));
            producer.respond(data).unwrap();
        });

        let data = consumer
            .express(Interest::new("/serverA/3".parse().unwrap()))
            .await
            .unwrap();
        assert_eq!(data.name.to_string(), "/serverA/3/testApp/v=1");
        answer.await.unwrap();
    }

    #[tokio::test]
    async fn second_registration_of_a_prefix_is_rejected() {
        let hub = Forwarder::new();
        let first = hub.connect_local();
        let second = hub.connect_local();
        let prefix: Name = "/serverB".parse().unwrap();

        let _registration = first.advertise(&prefix).await.unwrap();
        let err = second.advertise(&prefix).await.unwrap_err();
        assert!(matches!(err, TransportError::RegistrationFailed { .. }));
    }

    #[tokio::test]
    async fn unanswered_interest_times_out() {
        let hub = Forwarder::new();
        let producer = hub.connect_local();
        let consumer = hub.connect_local();
        let _registration = producer.advertise(&"/silent".parse().unwrap()).await.unwrap();

        let interest =
            Interest::new("/silent/1".parse().unwrap()).with_lifetime(Duration::from_millis(50));
        let err = consumer.express(interest).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn detached_face_withdraws_its_prefixes() {
        let hub = Forwarder::new();
        let producer = hub.connect_local();
        let _registration = producer.advertise(&"/gone".parse().unwrap()).await.unwrap();

        producer.shutdown();
        for _ in 0..100 {
            if hub.registered_prefixes().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("prefix still registered after face shutdown");
    }
}
