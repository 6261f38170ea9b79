//! Metrics collector: rolling window + lifetime counters + snapshot poller.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use kiln_core::MetricsConfig;

use crate::event::{MetricEvent, MetricKind};
use crate::window::{RollingWindow, WindowStats};

/// Monotonic lifetime counters. Never reset except by an explicit
/// [`MetricsCollector::reset`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct LifetimeStats {
    pub enqueued: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timed_out: u64,
    pub circuit_opens: u64,
    pub gate_waits: u64,
    dequeued: u64,
    total_wait_ms: u64,
    total_exec_ms: u64,
}

impl LifetimeStats {
    fn record(&mut self, event: &MetricEvent) {
        match event.kind {
            MetricKind::Enqueue => self.enqueued += 1,
            MetricKind::Dequeue => {
                self.dequeued += 1;
                self.total_wait_ms += event.wait_ms.unwrap_or(0);
            }
            MetricKind::Complete => {
                self.completed += 1;
                self.total_exec_ms += event.exec_ms.unwrap_or(0);
            }
            MetricKind::Fail => self.failed += 1,
            MetricKind::Cancel => self.cancelled += 1,
            MetricKind::Timeout => self.timed_out += 1,
            MetricKind::CircuitOpen => self.circuit_opens += 1,
            MetricKind::GateWait => self.gate_waits += 1,
            MetricKind::CircuitClose | MetricKind::Snapshot => {}
        }
    }

    /// Average queue wait across every dequeued task, including those
    /// later cancelled mid-run.
    pub fn avg_wait_ms(&self) -> f64 {
        if self.dequeued == 0 {
            0.0
        } else {
            self.total_wait_ms as f64 / self.dequeued as f64
        }
    }

    /// Average execution time across completed tasks.
    pub fn avg_exec_ms(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            self.total_exec_ms as f64 / self.completed as f64
        }
    }

    /// `completed / (completed + failed)`; 1.0 when neither occurred.
    pub fn success_rate(&self) -> f64 {
        let finished = self.completed + self.failed;
        if finished == 0 {
            1.0
        } else {
            self.completed as f64 / finished as f64
        }
    }

    /// Counters plus derived aggregates, for export.
    pub fn summary(&self) -> LifetimeSummary {
        LifetimeSummary {
            enqueued: self.enqueued,
            completed: self.completed,
            failed: self.failed,
            cancelled: self.cancelled,
            timed_out: self.timed_out,
            circuit_opens: self.circuit_opens,
            gate_waits: self.gate_waits,
            avg_wait_ms: self.avg_wait_ms(),
            avg_exec_ms: self.avg_exec_ms(),
            success_rate: self.success_rate(),
        }
    }
}

/// Lifetime counters with derived aggregates, as exported.
#[derive(Debug, Clone, Serialize)]
pub struct LifetimeSummary {
    pub enqueued: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timed_out: u64,
    pub circuit_opens: u64,
    pub gate_waits: u64,
    pub avg_wait_ms: f64,
    pub avg_exec_ms: f64,
    pub success_rate: f64,
}

/// Combined export structure for dashboards and log sinks.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub window: WindowStats,
    pub lifetime: LifetimeSummary,
    pub generated_at: DateTime<Utc>,
}

struct Inner {
    window: RollingWindow,
    lifetime: LifetimeStats,
    snapshot_stop: Option<CancellationToken>,
}

/// Records queue transitions and derives operational statistics.
///
/// Cheap to clone; all clones share the same window and counters. The
/// collector is written to by the scheduler and read by exporters and the
/// snapshot poller, so it carries its own lock rather than living inside
/// the scheduler's single-threaded state.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<RwLock<Inner>>,
    snapshot_interval: Duration,
}

impl MetricsCollector {
    pub fn new(config: &MetricsConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                window: RollingWindow::new(config.window_size),
                lifetime: LifetimeStats::default(),
                snapshot_stop: None,
            })),
            snapshot_interval: config.snapshot_interval(),
        }
    }

    /// Record one event into both the window and the lifetime counters.
    pub fn record(&self, event: MetricEvent) {
        let mut inner = self.inner.write().unwrap();
        inner.lifetime.record(&event);
        inner.window.push(event);
    }

    /// Snapshot of the current window statistics.
    pub fn window_stats(&self) -> WindowStats {
        self.inner.read().unwrap().window.stats()
    }

    /// Snapshot of the lifetime counters.
    pub fn lifetime(&self) -> LifetimeStats {
        self.inner.read().unwrap().lifetime.clone()
    }

    /// The most recent `max` raw events, newest last.
    pub fn recent_events(&self, max: usize) -> Vec<MetricEvent> {
        self.inner.read().unwrap().window.recent(max)
    }

    /// Combined window + lifetime report with a generation timestamp.
    pub fn export(&self) -> MetricsReport {
        let inner = self.inner.read().unwrap();
        MetricsReport {
            window: inner.window.stats(),
            lifetime: inner.lifetime.summary(),
            generated_at: Utc::now(),
        }
    }

    /// Clear both the window and the lifetime counters unconditionally.
    /// Snapshot polling, if active, keeps running.
    pub fn reset(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.window.clear();
        inner.lifetime = LifetimeStats::default();
    }

    /// Start polling `provider` on the configured interval, appending a
    /// state snapshot event per tick. A previous poller, if any, is
    /// stopped first.
    pub fn start_snapshots<F>(&self, provider: F)
    where
        F: Fn() -> serde_json::Value + Send + Sync + 'static,
    {
        let stop = CancellationToken::new();
        {
            let mut inner = self.inner.write().unwrap();
            if let Some(previous) = inner.snapshot_stop.replace(stop.clone()) {
                previous.cancel();
            }
        }

        let collector = self.clone();
        let interval = self.snapshot_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so snapshots are
            // spaced one full interval apart from start.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => {
                        debug!("snapshot polling stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        collector.record(MetricEvent::snapshot(provider()));
                    }
                }
            }
        });
    }

    /// Halt snapshot polling. Already-collected snapshots are kept.
    pub fn stop_snapshots(&self) {
        let mut inner = self.inner.write().unwrap();
        if let Some(stop) = inner.snapshot_stop.take() {
            stop.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::TaskId;

    fn collector() -> MetricsCollector {
        MetricsCollector::new(&MetricsConfig::default())
    }

    #[test]
    fn lifetime_counters_accumulate() {
        let c = collector();
        let id = TaskId::new();
        c.record(MetricEvent::enqueue(id));
        c.record(MetricEvent::dequeue(id, 100));
        c.record(MetricEvent::complete(id, 100, 400));
        c.record(MetricEvent::fail(id, 50, "boom"));
        c.record(MetricEvent::cancel(id));
        c.record(MetricEvent::timeout(id, 9000));

        let lifetime = c.lifetime();
        assert_eq!(lifetime.enqueued, 1);
        assert_eq!(lifetime.completed, 1);
        assert_eq!(lifetime.failed, 1);
        assert_eq!(lifetime.cancelled, 1);
        assert_eq!(lifetime.timed_out, 1);
        assert_eq!(lifetime.success_rate(), 0.5);
        assert_eq!(lifetime.avg_exec_ms(), 400.0);
    }

    #[test]
    fn avg_wait_counts_every_dequeued_task() {
        let c = collector();
        let a = TaskId::new();
        let b = TaskId::new();
        c.record(MetricEvent::dequeue(a, 100));
        c.record(MetricEvent::complete(a, 100, 50));
        // Dequeued then cancelled mid-run: its wait still weighs in.
        c.record(MetricEvent::dequeue(b, 300));
        c.record(MetricEvent::cancel(b));
        assert_eq!(c.lifetime().avg_wait_ms(), 200.0);
    }

    #[test]
    fn reset_clears_window_and_lifetime() {
        let c = collector();
        c.record(MetricEvent::enqueue(TaskId::new()));
        c.reset();
        assert_eq!(c.lifetime().enqueued, 0);
        assert!(c.recent_events(10).is_empty());
        assert_eq!(c.window_stats().events, 0);
    }

    #[test]
    fn export_carries_window_and_lifetime() {
        let c = collector();
        let id = TaskId::new();
        c.record(MetricEvent::complete(id, 10, 100));
        let report = c.export();
        assert_eq!(report.window.completed, 1);
        assert_eq!(report.lifetime.completed, 1);
        assert_eq!(report.lifetime.success_rate, 1.0);
        // Serializable end to end.
        serde_json::to_string(&report).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_poller_appends_on_interval() {
        let c = collector();
        c.start_snapshots(|| serde_json::json!({ "size": 0 }));

        tokio::time::sleep(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;

        let snapshots = c
            .recent_events(100)
            .iter()
            .filter(|e| e.kind == MetricKind::Snapshot)
            .count();
        assert!(snapshots >= 2, "expected >= 2 snapshots, got {}", snapshots);

        c.stop_snapshots();
        let before = c.recent_events(100).len();
        tokio::time::sleep(Duration::from_secs(20)).await;
        tokio::task::yield_now().await;
        assert_eq!(c.recent_events(100).len(), before);
    }
}
