//! Named-request transport.
//!
//! Roles talk to a [`Forwarder`] through a [`Face`]. The forwarder keeps the
//! table of advertised prefixes and the table of pending interests; a face
//! matches returning data to the `express` call waiting for it. The hub runs
//! in-process ([`Forwarder::connect_local`]) or behind TCP ([`tcp`]).

mod face;
mod forwarder;
pub mod tcp;

pub use face::Face;
pub use forwarder::{FaceId, Forwarder};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::packet::{Data, Interest, Name};

/// The capability every role consumes to send and answer named requests.
#[async_trait]
pub trait RequestChannel: Send + Sync {
    /// Advertise `prefix`; interests under it arrive on the returned registration.
    async fn advertise(&self, prefix: &Name) -> Result<Registration, TransportError>;

    /// Send an interest and wait for its data, or fail with
    /// [`TransportError::Timeout`] once its lifetime has passed.
    async fn express(&self, interest: Interest) -> Result<Data, TransportError>;

    fn respond(&self, data: Data) -> Result<(), TransportError>;

    /// Drop every registration and pending interest and detach from the hub.
    fn shutdown(&self);
}

/// Stream of interests received for one advertised prefix.
///
/// Ends when the channel is shut down or the hub goes away.
#[derive(Debug)]
pub struct Registration {
    prefix: Name,
    rx: mpsc::UnboundedReceiver<Interest>,
}

impl Registration {
    pub(crate) fn new(prefix: Name, rx: mpsc::UnboundedReceiver<Interest>) -> Self {
        Self { prefix, rx }
    }

    pub fn prefix(&self) -> &Name {
        &self.prefix
    }

    pub async fn next(&mut self) -> Option<Interest> {
        self.rx.recv().await
    }
}
