//! Metric event types.
//!
//! One event is recorded per queue transition. Events carry only the
//! payload fields relevant to their kind; the rest stay `None` and are
//! skipped during serialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kiln_core::TaskId;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Enqueue,
    Dequeue,
    Complete,
    Fail,
    Cancel,
    Timeout,
    CircuitOpen,
    CircuitClose,
    GateWait,
    Snapshot,
}

/// A single recorded queue transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEvent {
    pub kind: MetricKind,
    /// Task the event belongs to. Breaker and snapshot events have none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub at: DateTime<Utc>,
    /// Queue-wait time in milliseconds (dequeue, complete).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_ms: Option<u64>,
    /// Execution time in milliseconds (complete, fail, timeout).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec_ms: Option<u64>,
    /// Failure reason (fail).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Free capacity in MB reported by the resource gate (gate_wait).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_free_mb: Option<u64>,
    /// Consecutive-failure count when the breaker opened (circuit_open).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failures: Option<u32>,
    /// Polled queue-state snapshot (snapshot).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<serde_json::Value>,
}

impl MetricEvent {
    fn base(kind: MetricKind, task_id: Option<TaskId>) -> Self {
        Self {
            kind,
            task_id,
            at: Utc::now(),
            wait_ms: None,
            exec_ms: None,
            reason: None,
            gate_free_mb: None,
            failures: None,
            snapshot: None,
        }
    }

    pub fn enqueue(task_id: TaskId) -> Self {
        Self::base(MetricKind::Enqueue, Some(task_id))
    }

    /// Task left the queue and started executing after `wait_ms` in line.
    pub fn dequeue(task_id: TaskId, wait_ms: u64) -> Self {
        Self {
            wait_ms: Some(wait_ms),
            ..Self::base(MetricKind::Dequeue, Some(task_id))
        }
    }

    pub fn complete(task_id: TaskId, wait_ms: u64, exec_ms: u64) -> Self {
        Self {
            wait_ms: Some(wait_ms),
            exec_ms: Some(exec_ms),
            ..Self::base(MetricKind::Complete, Some(task_id))
        }
    }

    pub fn fail(task_id: TaskId, exec_ms: u64, reason: impl Into<String>) -> Self {
        Self {
            exec_ms: Some(exec_ms),
            reason: Some(reason.into()),
            ..Self::base(MetricKind::Fail, Some(task_id))
        }
    }

    pub fn cancel(task_id: TaskId) -> Self {
        Self::base(MetricKind::Cancel, Some(task_id))
    }

    pub fn timeout(task_id: TaskId, exec_ms: u64) -> Self {
        Self {
            exec_ms: Some(exec_ms),
            ..Self::base(MetricKind::Timeout, Some(task_id))
        }
    }

    pub fn circuit_open(failures: u32) -> Self {
        Self {
            failures: Some(failures),
            ..Self::base(MetricKind::CircuitOpen, None)
        }
    }

    pub fn circuit_close() -> Self {
        Self::base(MetricKind::CircuitClose, None)
    }

    /// One gate wait-and-retry cycle: the task has waited `waited_ms` so
    /// far, and the gate reported `free_mb` of free capacity.
    pub fn gate_wait(task_id: TaskId, waited_ms: u64, free_mb: u64) -> Self {
        Self {
            wait_ms: Some(waited_ms),
            gate_free_mb: Some(free_mb),
            ..Self::base(MetricKind::GateWait, Some(task_id))
        }
    }

    pub fn snapshot(state: serde_json::Value) -> Self {
        Self {
            snapshot: Some(state),
            ..Self::base(MetricKind::Snapshot, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_constructors_set_payloads() {
        let id = TaskId::new();

        let e = MetricEvent::dequeue(id, 250);
        assert_eq!(e.kind, MetricKind::Dequeue);
        assert_eq!(e.wait_ms, Some(250));
        assert_eq!(e.task_id, Some(id));

        let e = MetricEvent::fail(id, 1200, "backend unreachable");
        assert_eq!(e.exec_ms, Some(1200));
        assert_eq!(e.reason.as_deref(), Some("backend unreachable"));

        let e = MetricEvent::circuit_open(3);
        assert_eq!(e.failures, Some(3));
        assert!(e.task_id.is_none());
    }

    #[test]
    fn serialization_skips_empty_payloads() {
        let json = serde_json::to_value(MetricEvent::cancel(TaskId::new())).unwrap();
        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("wait_ms"));
        assert!(!obj.contains_key("reason"));
        assert_eq!(obj["kind"], "cancel");
    }
}
