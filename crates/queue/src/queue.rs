//! Public queue handle and builder.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use kiln_core::{MetricsConfig, QueueConfig, TaskId};
use kiln_metrics::{MetricEvent, MetricsCollector, MetricsReport};

use crate::error::GenerationError;
use crate::gate::ResourceGate;
use crate::scheduler::{Command, Scheduler};
use crate::state::QueueState;
use crate::task::{GenerationTask, TaskHandle};

/// Builds a [`GenerationQueue`] with optional overrides.
///
/// The composition root constructs one instance and passes it to
/// dependents; there is deliberately no global accessor.
pub struct QueueBuilder {
    config: QueueConfig,
    metrics_config: MetricsConfig,
    gate: Option<Arc<dyn ResourceGate>>,
}

impl QueueBuilder {
    pub fn new() -> Self {
        Self {
            config: QueueConfig::default(),
            metrics_config: MetricsConfig::default(),
            gate: None,
        }
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn metrics_config(mut self, config: MetricsConfig) -> Self {
        self.metrics_config = config;
        self
    }

    /// Inject a resource-availability check consulted before each start.
    /// Without one, the gate always reports available.
    pub fn gate(mut self, gate: Arc<dyn ResourceGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Spawn the scheduler and return its handle. Must be called within a
    /// tokio runtime.
    pub fn build(self) -> GenerationQueue {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(QueueState::default());
        let metrics = MetricsCollector::new(&self.metrics_config);

        let scheduler = Scheduler::new(
            self.config,
            self.gate,
            rx,
            tx.downgrade(),
            metrics.clone(),
            state_tx,
        );
        tokio::spawn(scheduler.run());

        GenerationQueue { tx, state_rx, metrics }
    }
}

impl Default for QueueBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to the generation scheduler. Cheap to clone; all clones talk to
/// the same underlying queue.
#[derive(Clone)]
pub struct GenerationQueue {
    tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<QueueState>,
    metrics: MetricsCollector,
}

impl GenerationQueue {
    /// Queue with default configuration and no resource gate.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> QueueBuilder {
        QueueBuilder::new()
    }

    /// Submit a task for execution.
    ///
    /// Rejects with [`GenerationError::QueueFull`] when pending + running
    /// already equals capacity. On success the returned handle yields the
    /// task's terminal outcome.
    pub async fn submit(&self, task: GenerationTask) -> Result<TaskHandle, GenerationError> {
        let id = task.id;
        let (settle_tx, settle_rx) = oneshot::channel();
        let (admitted_tx, admitted_rx) = oneshot::channel();
        self.tx
            .send(Command::Submit { task, settle: settle_tx, admitted: admitted_tx })
            .map_err(|_| GenerationError::ChannelClosed)?;
        admitted_rx
            .await
            .map_err(|_| GenerationError::ChannelClosed)??;
        Ok(TaskHandle::new(id, settle_rx))
    }

    /// Cancel a task by id. Returns `true` if the task was found pending
    /// (removed and settled cancelled) or running (cancellation signalled).
    pub async fn cancel(&self, id: TaskId) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Command::Cancel { id, reply: reply_tx }).is_err() {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Cancel every pending task (never the running one). Returns the
    /// number cancelled.
    pub async fn cancel_all(&self) -> usize {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Command::CancelAll { reply: reply_tx }).is_err() {
            return 0;
        }
        reply_rx.await.unwrap_or(0)
    }

    /// Force-close the circuit breaker and zero its failure count.
    pub async fn reset_circuit_breaker(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Command::ResetBreaker { reply: reply_tx }).is_ok() {
            let _ = reply_rx.await;
        }
    }

    /// Wipe all queue and stats state back to initial values. Pending
    /// handles observe [`GenerationError::ChannelClosed`]; the running
    /// task's cancellation is signalled.
    pub async fn clear(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Command::Clear { reply: reply_tx }).is_ok() {
            let _ = reply_rx.await;
        }
    }

    /// Stop the scheduler. Queued work is abandoned; subsequent operations
    /// observe [`GenerationError::ChannelClosed`].
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    /// Current queue state.
    pub fn state(&self) -> QueueState {
        self.state_rx.borrow().clone()
    }

    /// Subscribe to state updates. `borrow()` yields the current state
    /// immediately; `changed().await` then `borrow()` observes every
    /// subsequent mutation in order (coalesced under load). Dropping the
    /// receiver unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<QueueState> {
        self.state_rx.clone()
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Combined window + lifetime metrics report.
    pub fn export_metrics(&self) -> MetricsReport {
        self.metrics.export()
    }

    /// The most recent raw metric events, capped at `max`.
    pub fn recent_events(&self, max: usize) -> Vec<MetricEvent> {
        self.metrics.recent_events(max)
    }

    /// Begin periodic queue-state snapshots into the metrics window.
    pub fn start_state_snapshots(&self) {
        let rx = self.state_rx.clone();
        self.metrics.start_snapshots(move || {
            serde_json::to_value(&*rx.borrow()).unwrap_or_default()
        });
    }

    /// Halt snapshot polling, keeping already-collected data.
    pub fn stop_state_snapshots(&self) {
        self.metrics.stop_snapshots();
    }
}

impl Default for GenerationQueue {
    fn default() -> Self {
        Self::new()
    }
}
