//! Queue state broadcast to subscribers after every mutation.

use serde::Serialize;

use kiln_core::TaskId;

/// Lifetime counters carried in the broadcast state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueTotals {
    pub queued: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timed_out: u64,
}

/// Snapshot of the queue, as seen by subscribers. Mutated only by the
/// scheduler; read everywhere else.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueState {
    /// Pending + running tasks.
    pub size: usize,
    pub running: bool,
    pub running_task: Option<TaskId>,
    pub circuit_open: bool,
    pub consecutive_failures: u32,
    pub totals: QueueTotals,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_empty() {
        let state = QueueState::default();
        assert_eq!(state.size, 0);
        assert!(!state.running);
        assert!(state.running_task.is_none());
        assert!(!state.circuit_open);
        assert_eq!(state.totals, QueueTotals::default());
    }

    #[test]
    fn serializes_for_dashboard() {
        let state = QueueState {
            size: 3,
            running: true,
            running_task: Some(TaskId::new()),
            circuit_open: false,
            consecutive_failures: 1,
            totals: QueueTotals { queued: 10, completed: 6, failed: 1, cancelled: 0, timed_out: 0 },
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["size"], 3);
        assert_eq!(json["totals"]["completed"], 6);
    }
}
