pub mod collector;
pub mod correlator;
pub mod percentiles;
pub mod stream;

pub use collector::{LiveSnapshot, LiveStats};
pub use correlator::{Averages, Correlator, MetricRow, Report};
pub use percentiles::PercentileSet;
