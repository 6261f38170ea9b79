//! Operational metrics for the generation queue.
//!
//! One [`MetricEvent`] is recorded per queue transition. The collector
//! keeps a bounded rolling window for near-real-time statistics and
//! monotonic lifetime counters, and can poll a caller-supplied state
//! provider for periodic queue snapshots.

pub mod collector;
pub mod event;
pub mod window;

pub use collector::{LifetimeStats, LifetimeSummary, MetricsCollector, MetricsReport};
pub use event::{MetricEvent, MetricKind};
pub use window::{RollingWindow, WindowStats};
