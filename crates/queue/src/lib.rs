//! Generation admission and scheduling engine.
//!
//! Accepts expensive, long-running rendering jobs, serializes their
//! execution against a single downstream compute resource, and protects
//! that resource with admission control and a circuit breaker:
//!
//! - strict priority-then-FIFO dequeue order, bounded capacity
//! - GPU-memory resource gate with fail-open degradation
//! - circuit breaker opening after consecutive failures, cooldown close
//! - cooperative cancellation and wall-clock timeouts
//! - per-transition metric events via [`kiln_metrics`]
//! - queue-state broadcast to subscribers after every mutation

pub mod breaker;
pub mod error;
pub mod gate;
pub mod queue;
pub mod state;
pub mod task;

mod scheduler;

pub use breaker::CircuitBreaker;
pub use error::GenerationError;
pub use gate::{GateError, GateStatus, GpuMemoryGate, ResourceGate};
pub use queue::{GenerationQueue, QueueBuilder};
pub use state::{QueueState, QueueTotals};
pub use task::{GenerationTask, TaskContext, TaskHandle, TaskHooks, TaskOutput, WorkFn};
