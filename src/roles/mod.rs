//! The three long-running roles of a measurement run.
//!
//! Each role owns its state inside one event loop; handlers run to
//! completion between awaits, so nothing in a role is locked.
//! A responder stamps and emits its response first and persists its record
//! afterwards, so record writes never count as transit time. The driver
//! therefore re-reads the store after its last cycle until the responders'
//! records of every answered cycle are there, for at most the drain interval.

mod driver;
mod relay;
mod terminal;

pub use driver::{DriverOutcome, DriverState, DriverSummary, PingDriver};
pub use relay::RelayResponder;
pub use terminal::TerminalResponder;

use crate::config::ResponseConfig;
use crate::packet::{Data, Name};

/// `<request>/<marker>/v=<now>` carrying the configured payload, unsigned.
fn build_response(request: Name, config: &ResponseConfig) -> Data {
    let name = request.append(config.marker.clone()).append_version_now();
    Data::new(name)
        .with_freshness(config.freshness)
        .with_content(config.payload.clone())
}
