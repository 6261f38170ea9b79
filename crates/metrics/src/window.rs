//! Bounded rolling window of metric events.
//!
//! The window is a ring buffer: once capacity is reached the oldest event
//! is evicted for each new one. Window statistics are computed only from
//! the events currently held, so their cost stays bounded regardless of
//! queue lifetime.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

use crate::event::{MetricEvent, MetricKind};

/// Derived statistics over the current window.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WindowStats {
    /// Events currently in the window.
    pub events: usize,
    pub completed: u64,
    pub failed: u64,
    pub avg_wait_ms: f64,
    pub p95_wait_ms: f64,
    pub max_wait_ms: u64,
    pub avg_exec_ms: f64,
    /// `completed / (completed + failed)`; 1.0 when neither occurred.
    pub success_rate: f64,
    /// Completions per minute over the window's elapsed span.
    pub throughput_per_min: f64,
    pub circuit_opens: u64,
    pub gate_waits: u64,
}

/// Fixed-capacity event buffer with derived stats.
#[derive(Debug)]
pub struct RollingWindow {
    events: VecDeque<MetricEvent>,
    capacity: usize,
    /// When the window last started from empty (creation or reset).
    opened_at: DateTime<Utc>,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            opened_at: Utc::now(),
        }
    }

    /// Append an event, evicting the oldest if the window is full.
    pub fn push(&mut self, event: MetricEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The most recent `max` events, newest last.
    pub fn recent(&self, max: usize) -> Vec<MetricEvent> {
        let skip = self.events.len().saturating_sub(max);
        self.events.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.opened_at = Utc::now();
    }

    /// Compute statistics from the events currently in the window.
    pub fn stats(&self) -> WindowStats {
        let mut waits: Vec<u64> = Vec::new();
        let mut execs: Vec<u64> = Vec::new();
        let mut completed = 0u64;
        let mut failed = 0u64;
        let mut circuit_opens = 0u64;
        let mut gate_waits = 0u64;

        for event in &self.events {
            match event.kind {
                MetricKind::Dequeue => {
                    if let Some(w) = event.wait_ms {
                        waits.push(w);
                    }
                }
                MetricKind::Complete => {
                    completed += 1;
                    if let Some(e) = event.exec_ms {
                        execs.push(e);
                    }
                }
                MetricKind::Fail => failed += 1,
                MetricKind::CircuitOpen => circuit_opens += 1,
                MetricKind::GateWait => gate_waits += 1,
                _ => {}
            }
        }

        let finished = completed + failed;
        let success_rate = if finished == 0 {
            1.0
        } else {
            completed as f64 / finished as f64
        };

        // Throughput over the span from the oldest retained event to now.
        let span_start = self
            .events
            .front()
            .map(|e| e.at)
            .unwrap_or(self.opened_at);
        let elapsed_min = Utc::now()
            .signed_duration_since(span_start)
            .num_milliseconds()
            .max(0) as f64
            / 60_000.0;
        let throughput_per_min = if elapsed_min > 0.0 {
            completed as f64 / elapsed_min
        } else {
            0.0
        };

        WindowStats {
            events: self.events.len(),
            completed,
            failed,
            avg_wait_ms: mean(&waits),
            p95_wait_ms: percentile(&waits, 95.0),
            max_wait_ms: waits.iter().copied().max().unwrap_or(0),
            avg_exec_ms: mean(&execs),
            success_rate,
            throughput_per_min,
            circuit_opens,
            gate_waits,
        }
    }
}

fn mean(samples: &[u64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<u64>() as f64 / samples.len() as f64
}

/// Nearest-rank percentile over a copy of the samples.
fn percentile(samples: &[u64], pct: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<u64> = samples.to_vec();
    sorted.sort_unstable();
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1] as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::TaskId;

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut window = RollingWindow::new(3);
        for wait in [1, 2, 3, 4] {
            window.push(MetricEvent::dequeue(TaskId::new(), wait));
        }
        assert_eq!(window.len(), 3);
        let waits: Vec<u64> = window.recent(10).iter().filter_map(|e| e.wait_ms).collect();
        assert_eq!(waits, vec![2, 3, 4]);
    }

    #[test]
    fn wait_statistics_on_hundred_samples() {
        // Samples 100, 200, ..., 10000 ms.
        let mut window = RollingWindow::new(200);
        for i in 1..=100u64 {
            window.push(MetricEvent::dequeue(TaskId::new(), i * 100));
        }
        let stats = window.stats();
        assert_eq!(stats.avg_wait_ms, 5050.0);
        assert!(
            (9400.0..=9600.0).contains(&stats.p95_wait_ms),
            "p95 out of range: {}",
            stats.p95_wait_ms
        );
        assert_eq!(stats.max_wait_ms, 10_000);
    }

    #[test]
    fn success_rate_counts_completes_and_fails() {
        let mut window = RollingWindow::new(50);
        let id = TaskId::new();
        window.push(MetricEvent::complete(id, 10, 100));
        window.push(MetricEvent::complete(id, 10, 200));
        window.push(MetricEvent::fail(id, 50, "boom"));
        let stats = window.stats();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
        assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.avg_exec_ms, 150.0);
    }

    #[test]
    fn empty_window_stats_are_neutral() {
        let window = RollingWindow::new(10);
        let stats = window.stats();
        assert_eq!(stats.events, 0);
        assert_eq!(stats.avg_wait_ms, 0.0);
        assert_eq!(stats.p95_wait_ms, 0.0);
        assert_eq!(stats.success_rate, 1.0);
    }

    #[test]
    fn recent_caps_returned_events() {
        let mut window = RollingWindow::new(10);
        for _ in 0..5 {
            window.push(MetricEvent::cancel(TaskId::new()));
        }
        assert_eq!(window.recent(2).len(), 2);
        assert_eq!(window.recent(100).len(), 5);
    }

    #[test]
    fn counts_breaker_and_gate_events() {
        let mut window = RollingWindow::new(10);
        window.push(MetricEvent::circuit_open(3));
        window.push(MetricEvent::circuit_close());
        window.push(MetricEvent::gate_wait(TaskId::new(), 5000, 512));
        let stats = window.stats();
        assert_eq!(stats.circuit_opens, 1);
        assert_eq!(stats.gate_waits, 1);
    }
}
