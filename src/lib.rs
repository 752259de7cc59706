//! Three-hop named-data latency measurement.
//!
//! A [`roles::PingDriver`] sends outer requests to a [`roles::RelayResponder`],
//! which derives an inner request to a [`roles::TerminalResponder`]. Every hop
//! stamps its send and receive events, and the
//! [`metrics::Correlator`] joins the stamps by sequence to split round-trip
//! time into travel time and per-hop response-construction time.

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod packet;
pub mod records;
pub mod roles;
pub mod server;
pub mod signer;
pub mod transport;

pub use error::NdnPingError;
