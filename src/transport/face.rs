use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use super::{Registration, RequestChannel};
use crate::error::TransportError;
use crate::packet::{Data, Frame, Interest, Name};

/// How long `advertise` waits for the hub to accept a prefix.
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(4);

/// A role's attachment to the hub.
///
/// Cheap to clone: every clone shares the same outbound queue and tables.
/// A dispatcher task owns the inbound queue and routes each frame to the
/// registration or pending `express` call it belongs to.
#[derive(Clone)]
pub struct Face {
    state: Arc<Mutex<FaceState>>,
}

struct PendingInterest {
    name: Name,
    tx: oneshot::Sender<Data>,
}

#[derive(Default)]
struct FaceState {
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    registrations: Vec<(Name, mpsc::UnboundedSender<Interest>)>,
    awaiting_registration: HashMap<Name, oneshot::Sender<Result<(), String>>>,
    pending: HashMap<u64, PendingInterest>,
    next_token: u64,
}

impl Face {
    /// Wires a face onto a pair of frame queues leading to and from the hub.
    pub fn new(
        outbound: mpsc::UnboundedSender<Frame>,
        inbound: mpsc::UnboundedReceiver<Frame>,
    ) -> Self {
        let state = Arc::new(Mutex::new(FaceState {
            outbound: Some(outbound),
            ..FaceState::default()
        }));
        tokio::spawn(dispatch(inbound, state.clone()));
        Self { state }
    }

    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let state = self.state.lock();
        let outbound = state.outbound.as_ref().ok_or(TransportError::Closed)?;
        outbound.send(frame).map_err(|_| TransportError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().outbound.is_none()
    }

    fn forget_pending(&self, token: u64) {
        self.state.lock().pending.remove(&token);
    }
}

#[async_trait]
impl RequestChannel for Face {
    async fn advertise(&self, prefix: &Name) -> Result<Registration, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            if state.registrations.iter().any(|(p, _)| p == prefix) {
                return Err(TransportError::RegistrationFailed {
                    prefix: prefix.to_string(),
                    reason: "prefix already advertised on this face".into(),
                });
            }
            // Listen before asking so no interest slips past the ack.
            state.registrations.push((prefix.clone(), tx));
            state.awaiting_registration.insert(prefix.clone(), ack_tx);
        }

        let outcome = match self.send(Frame::Register {
            prefix: prefix.clone(),
        }) {
            Ok(()) => match tokio::time::timeout(REGISTRATION_TIMEOUT, ack_rx).await {
                Ok(Ok(Ok(()))) => Ok(()),
                Ok(Ok(Err(reason))) => Err(reason),
                Ok(Err(_)) => Err("hub connection lost".to_owned()),
                Err(_) => Err("no answer from hub".to_owned()),
            },
            Err(_) => Err("face is closed".to_owned()),
        };

        match outcome {
            Ok(()) => {
                debug!(%prefix, "prefix registered");
                Ok(Registration::new(prefix.clone(), rx))
            }
            Err(reason) => {
                let mut state = self.state.lock();
                state.registrations.retain(|(p, _)| p != prefix);
                state.awaiting_registration.remove(prefix);
                Err(TransportError::RegistrationFailed {
                    prefix: prefix.to_string(),
                    reason,
                })
            }
        }
    }

    async fn express(&self, interest: Interest) -> Result<Data, TransportError> {
        let (tx, rx) = oneshot::channel();
        let token = {
            let mut state = self.state.lock();
            let token = state.next_token;
            state.next_token += 1;
            state.pending.insert(
                token,
                PendingInterest {
                    name: interest.name.clone(),
                    tx,
                },
            );
            token
        };

        let name = interest.name.clone();
        let lifetime = interest.lifetime();
        if let Err(e) = self.send(Frame::Interest(interest)) {
            self.forget_pending(token);
            return Err(e);
        }

        match tokio::time::timeout(lifetime, rx).await {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.forget_pending(token);
                Err(TransportError::Timeout {
                    name: name.to_string(),
                })
            }
        }
    }

    fn respond(&self, data: Data) -> Result<(), TransportError> {
        self.send(Frame::Data(data))
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        // Dropping the senders ends every registration stream and wakes
        // every pending `express` with `Closed`.
        state.outbound = None;
        state.registrations.clear();
        state.awaiting_registration.clear();
        state.pending.clear();
    }
}

// ─── Inbound dispatch ────────────────────────────────────────────

async fn dispatch(mut inbound: mpsc::UnboundedReceiver<Frame>, state: Arc<Mutex<FaceState>>) {
    while let Some(frame) = inbound.recv().await {
        let mut state = state.lock();
        match frame {
            Frame::Interest(interest) => {
                let target = state
                    .registrations
                    .iter()
                    .filter(|(prefix, _)| prefix.is_prefix_of(&interest.name))
                    .max_by_key(|(prefix, _)| prefix.len());
                match target {
                    Some((_, tx)) => {
                        let _ = tx.send(interest);
                    }
                    None => debug!(%interest, "no local registration for interest"),
                }
            }
            Frame::Data(data) => {
                let matched: Vec<u64> = state
                    .pending
                    .iter()
                    .filter(|(_, p)| p.name.is_prefix_of(&data.name))
                    .map(|(token, _)| *token)
                    .collect();
                if matched.is_empty() {
                    trace!(name = %data.name, "unsolicited data");
                }
                for token in matched {
                    if let Some(p) = state.pending.remove(&token) {
                        let _ = p.tx.send(data.clone());
                    }
                }
            }
            Frame::RegisterOk { prefix } => {
                if let Some(ack) = state.awaiting_registration.remove(&prefix) {
                    let _ = ack.send(Ok(()));
                }
            }
            Frame::RegisterFailed { prefix, reason } => {
                if let Some(ack) = state.awaiting_registration.remove(&prefix) {
                    let _ = ack.send(Err(reason));
                }
            }
            Frame::Register { prefix } => {
                warn!(%prefix, "hub sent a registration request to a face; ignored");
            }
        }
    }

    debug!("hub went away; closing face");
    let mut state = state.lock();
    state.outbound = None;
    state.registrations.clear();
    state.awaiting_registration.clear();
    state.pending.clear();
}
