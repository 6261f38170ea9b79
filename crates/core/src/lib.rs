//! Shared types and configuration for the kiln generation engine.

pub mod config;
pub mod logging;
pub mod types;

pub use config::{load_dotenv, MetricsConfig, QueueConfig};
pub use logging::init_tracing;
pub use types::{Priority, TaskId, TaskKind, TaskStatus};
