//! Resource admission gate.
//!
//! Before a task starts, the scheduler asks the gate whether the
//! downstream compute resource (GPU memory, in production) has room.
//! A failing check degrades gracefully: the scheduler proceeds anyway
//! rather than stalling the queue behind a broken probe.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("gate check failed: {0}")]
    Check(String),
}

/// What the gate reported at check time.
#[derive(Debug, Clone, Serialize)]
pub struct GateStatus {
    /// Whether the scheduler may start the next task now.
    pub available: bool,
    pub free_mb: u64,
    pub total_mb: u64,
    /// Used fraction of total capacity, 0–100.
    pub utilization_pct: f32,
}

impl GateStatus {
    pub fn available_with(free_mb: u64, total_mb: u64) -> Self {
        Self::with_availability(true, free_mb, total_mb)
    }

    pub fn unavailable_with(free_mb: u64, total_mb: u64) -> Self {
        Self::with_availability(false, free_mb, total_mb)
    }

    fn with_availability(available: bool, free_mb: u64, total_mb: u64) -> Self {
        let utilization_pct = if total_mb == 0 {
            0.0
        } else {
            (total_mb.saturating_sub(free_mb)) as f32 / total_mb as f32 * 100.0
        };
        Self { available, free_mb, total_mb, utilization_pct }
    }
}

/// Pluggable resource availability check consulted before each task start.
#[async_trait]
pub trait ResourceGate: Send + Sync {
    async fn check(&self) -> Result<GateStatus, GateError>;
}

/// Gate backed by a caller-supplied probe of (free MB, total MB), with a
/// free-memory threshold deciding availability. The production probe
/// queries the rendering backend's system stats endpoint.
pub struct GpuMemoryGate {
    min_free_mb: u64,
    probe: Arc<dyn Fn() -> Result<(u64, u64), GateError> + Send + Sync>,
}

impl GpuMemoryGate {
    pub fn new<F>(min_free_mb: u64, probe: F) -> Self
    where
        F: Fn() -> Result<(u64, u64), GateError> + Send + Sync + 'static,
    {
        Self { min_free_mb, probe: Arc::new(probe) }
    }
}

#[async_trait]
impl ResourceGate for GpuMemoryGate {
    async fn check(&self) -> Result<GateStatus, GateError> {
        let (free_mb, total_mb) = (self.probe)()?;
        Ok(if free_mb >= self.min_free_mb {
            GateStatus::available_with(free_mb, total_mb)
        } else {
            GateStatus::unavailable_with(free_mb, total_mb)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gpu_gate_applies_threshold() {
        let gate = GpuMemoryGate::new(1024, || Ok((2048, 8192)));
        let status = gate.check().await.unwrap();
        assert!(status.available);
        assert_eq!(status.free_mb, 2048);
        assert_eq!(status.utilization_pct, 75.0);

        let gate = GpuMemoryGate::new(4096, || Ok((2048, 8192)));
        assert!(!gate.check().await.unwrap().available);
    }

    #[tokio::test]
    async fn gpu_gate_propagates_probe_errors() {
        let gate = GpuMemoryGate::new(1024, || Err(GateError::Check("stats endpoint down".into())));
        assert!(gate.check().await.is_err());
    }

    #[test]
    fn zero_total_capacity_is_zero_utilization() {
        let status = GateStatus::unavailable_with(0, 0);
        assert_eq!(status.utilization_pct, 0.0);
    }
}
