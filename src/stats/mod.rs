//! Session and server statistics

pub mod metrics;

pub(crate) use metrics::ServerCounters;
pub use metrics::{ServerStats, SessionStats};
