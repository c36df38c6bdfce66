mod clock;
mod config;
mod drop_detector;
mod registry;

pub use clock::SystemClock;
pub use config::{DetectorConfig, DetectorConfigUpdate};
pub use registry::{DetectorRegistry, DetectorSnapshot, DEFAULT_TARGET};
