pub mod identity;
pub mod log;
pub mod metrics;

pub use identity::Identity;
pub use log::LogManager;
pub use metrics::{FileMetrics, MetricsRecorder};
