pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::{ConfigManager, ConfigSource, EngineConfig};
pub use error::{EngineError, ErrorCategory, Result};
pub use logging::{setup_logging, LoggingConfig};
pub use metrics::{InMemoryMetrics, MetricsSink};
