//! Spectrum assembly from scanner output

pub mod layout;
pub mod history;
pub mod measurement;
pub mod aggregator;

pub use layout::BinLayout;
pub use history::{BinStats, RollingHistory};
pub use measurement::{BaselineChannel, Measurement};
pub use aggregator::{Aggregator, DEFAULT_AVERAGE_HOLD};
