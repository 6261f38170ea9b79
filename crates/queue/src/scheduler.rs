//! The single-slot scheduling actor.
//!
//! All queue state lives inside [`Scheduler`], which processes commands
//! from a single channel one at a time — submissions, cancellations, and
//! settlement messages from the in-flight task all serialize through it,
//! so no locks guard the queue structures. At most one unit of work is in
//! flight at any instant.

use std::cmp::Reverse;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kiln_core::{Priority, QueueConfig, TaskId, TaskKind, TaskStatus};
use kiln_metrics::{MetricEvent, MetricsCollector};

use crate::breaker::CircuitBreaker;
use crate::error::GenerationError;
use crate::gate::ResourceGate;
use crate::state::{QueueState, QueueTotals};
use crate::task::{GenerationTask, TaskContext, TaskHooks, TaskOutput, WorkFn};

/// Terminal result of an in-flight task, reported back to the actor.
#[derive(Debug)]
pub(crate) enum Outcome {
    Completed(TaskOutput),
    Failed(GenerationError),
    Cancelled,
    TimedOut { elapsed_ms: u64 },
}

pub(crate) enum Command {
    Submit {
        task: GenerationTask,
        settle: oneshot::Sender<Result<TaskOutput, GenerationError>>,
        admitted: oneshot::Sender<Result<(), GenerationError>>,
    },
    Cancel {
        id: TaskId,
        reply: oneshot::Sender<bool>,
    },
    CancelAll {
        reply: oneshot::Sender<usize>,
    },
    ResetBreaker {
        reply: oneshot::Sender<()>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
    // Internal: sent by the in-flight future.
    GateWaited {
        id: TaskId,
        waited_ms: u64,
        free_mb: u64,
    },
    Started {
        id: TaskId,
    },
    Settled {
        id: TaskId,
        outcome: Outcome,
    },
    CooldownElapsed,
}

/// A task waiting in priority order.
struct PendingTask {
    id: TaskId,
    kind: TaskKind,
    priority: Priority,
    /// FIFO tie-break within a tier: lower sequence runs first.
    seq: u64,
    timeout: Option<Duration>,
    hooks: TaskHooks,
    work: WorkFn,
    settle: oneshot::Sender<Result<TaskOutput, GenerationError>>,
    enqueued_at: Instant,
    token: CancellationToken,
}

impl PendingTask {
    fn settle_cancelled(self) {
        fire_status_hook(&self.hooks.on_status_change, TaskStatus::Cancelled);
        let _ = self.settle.send(Err(GenerationError::Cancelled));
    }
}

/// The task occupying the execution slot (gate-waiting or running).
struct CurrentTask {
    id: TaskId,
    hooks: TaskHooks,
    settle: oneshot::Sender<Result<TaskOutput, GenerationError>>,
    token: CancellationToken,
    enqueued_at: Instant,
    started_at: Option<Instant>,
    wait_ms: u64,
}

impl CurrentTask {
    fn finish(self, status: TaskStatus, result: Result<TaskOutput, GenerationError>) {
        // Status hook fires before the handle settles so callers can update
        // UI state synchronously with the authoritative transition.
        fire_status_hook(&self.hooks.on_status_change, status);
        let _ = self.settle.send(result);
    }
}

fn fire_status_hook(hook: &Option<Box<dyn Fn(TaskStatus) + Send>>, status: TaskStatus) {
    if let Some(hook) = hook {
        if catch_unwind(AssertUnwindSafe(|| hook(status))).is_err() {
            warn!(status = ?status, "status hook panicked; ignoring");
        }
    }
}

pub(crate) struct Scheduler {
    config: QueueConfig,
    gate: Option<Arc<dyn ResourceGate>>,
    rx: mpsc::UnboundedReceiver<Command>,
    /// Weak self-reference, upgraded for in-flight futures and timers so
    /// they can report back without keeping the channel alive. The actor
    /// thus exits once every public handle has dropped.
    tx: mpsc::WeakUnboundedSender<Command>,
    pending: Vec<PendingTask>,
    current: Option<CurrentTask>,
    breaker: CircuitBreaker,
    metrics: MetricsCollector,
    state_tx: watch::Sender<QueueState>,
    totals: QueueTotals,
    next_seq: u64,
}

impl Scheduler {
    pub(crate) fn new(
        config: QueueConfig,
        gate: Option<Arc<dyn ResourceGate>>,
        rx: mpsc::UnboundedReceiver<Command>,
        tx: mpsc::WeakUnboundedSender<Command>,
        metrics: MetricsCollector,
        state_tx: watch::Sender<QueueState>,
    ) -> Self {
        let breaker = CircuitBreaker::new(config.failure_threshold, config.breaker_cooldown());
        Self {
            config,
            gate,
            rx,
            tx,
            pending: Vec::new(),
            current: None,
            breaker,
            metrics,
            state_tx,
            totals: QueueTotals::default(),
            next_seq: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                Command::Submit { task, settle, admitted } => {
                    self.handle_submit(task, settle, admitted);
                }
                Command::Cancel { id, reply } => {
                    let found = self.handle_cancel(id);
                    let _ = reply.send(found);
                }
                Command::CancelAll { reply } => {
                    let count = self.handle_cancel_all();
                    let _ = reply.send(count);
                }
                Command::ResetBreaker { reply } => {
                    self.handle_reset_breaker();
                    let _ = reply.send(());
                }
                Command::Clear { reply } => {
                    self.handle_clear();
                    let _ = reply.send(());
                }
                Command::Shutdown => break,
                Command::GateWaited { id, waited_ms, free_mb } => {
                    self.metrics.record(MetricEvent::gate_wait(id, waited_ms, free_mb));
                }
                Command::Started { id } => self.handle_started(id),
                Command::Settled { id, outcome } => self.handle_settled(id, outcome),
                Command::CooldownElapsed => self.handle_cooldown_elapsed(),
            }
        }
        // Stopping, via Shutdown or because every public handle dropped:
        // abandon in-flight work; pending handles observe ChannelClosed
        // when their settle senders drop with the actor.
        if let Some(current) = &self.current {
            current.token.cancel();
        }
        info!("generation queue stopped");
    }

    fn size(&self) -> usize {
        self.pending.len() + usize::from(self.current.is_some())
    }

    // ── Submission ────────────────────────────────────────────

    fn handle_submit(
        &mut self,
        task: GenerationTask,
        settle: oneshot::Sender<Result<TaskOutput, GenerationError>>,
        admitted: oneshot::Sender<Result<(), GenerationError>>,
    ) {
        let size = self.size();
        if size >= self.config.capacity {
            warn!(task = %task.id, size, capacity = self.config.capacity, "queue full, rejecting");
            let _ = admitted.send(Err(GenerationError::QueueFull {
                size,
                capacity: self.config.capacity,
            }));
            return;
        }

        let id = task.id;
        let seq = self.next_seq;
        self.next_seq += 1;

        debug!(task = %id, metadata = %task.metadata, "task metadata");
        info!(
            task = %id,
            kind = %task.kind,
            priority = ?task.priority,
            seq,
            "task submitted"
        );

        let record = PendingTask {
            id,
            kind: task.kind,
            priority: task.priority,
            seq,
            timeout: task.timeout,
            hooks: task.hooks,
            work: task.work,
            settle,
            enqueued_at: Instant::now(),
            token: CancellationToken::new(),
        };
        self.insert_pending(record);

        self.totals.queued += 1;
        self.metrics.record(MetricEvent::enqueue(id));
        let _ = admitted.send(Ok(()));
        self.notify();
        self.dispatch();
    }

    /// Insert in dequeue order: higher tier first, FIFO by sequence
    /// within a tier.
    fn insert_pending(&mut self, record: PendingTask) {
        let key = (Reverse(record.priority), record.seq);
        let idx = self
            .pending
            .partition_point(|p| (Reverse(p.priority), p.seq) <= key);
        self.pending.insert(idx, record);
    }

    // ── Dispatch & execution ──────────────────────────────────

    fn dispatch(&mut self) {
        if self.current.is_some() || self.pending.is_empty() || self.breaker.is_open() {
            return;
        }
        let record = self.pending.remove(0);
        debug!(task = %record.id, kind = %record.kind, "dispatching");

        let ctx = TaskContext::new(record.token.clone(), record.hooks.on_progress.clone());
        let current = CurrentTask {
            id: record.id,
            hooks: record.hooks,
            settle: record.settle,
            token: record.token.clone(),
            enqueued_at: record.enqueued_at,
            started_at: None,
            wait_ms: 0,
        };
        self.current = Some(current);
        self.spawn_in_flight(record.id, record.work, ctx, record.token, record.timeout);
    }

    /// Drive one task through gate admission and the completion /
    /// cancellation / timeout race, off the actor so the actor stays
    /// responsive to control commands.
    fn spawn_in_flight(
        &self,
        id: TaskId,
        work: WorkFn,
        ctx: TaskContext,
        token: CancellationToken,
        timeout: Option<Duration>,
    ) {
        // A dispatch is always triggered by a live command, so the upgrade
        // only fails when the actor is already winding down.
        let Some(tx) = self.tx.upgrade() else { return };
        let gate = self.gate.clone();
        let retry_delay = self.config.gate_retry_delay();

        tokio::spawn(async move {
            if let Some(gate) = gate {
                let wait_started = Instant::now();
                loop {
                    match gate.check().await {
                        Ok(status) if status.available => break,
                        Ok(status) => {
                            debug!(
                                task = %id,
                                free_mb = status.free_mb,
                                "insufficient resources, waiting"
                            );
                            tokio::select! {
                                biased;
                                _ = token.cancelled() => {
                                    let _ = tx.send(Command::Settled { id, outcome: Outcome::Cancelled });
                                    return;
                                }
                                _ = tokio::time::sleep(retry_delay) => {}
                            }
                            // Recorded after the sleep, so the payload carries
                            // the wait actually served for this cycle.
                            let _ = tx.send(Command::GateWaited {
                                id,
                                waited_ms: wait_started.elapsed().as_millis() as u64,
                                free_mb: status.free_mb,
                            });
                        }
                        // Fail open: a broken probe must not stall the queue.
                        Err(e) => {
                            warn!(task = %id, error = %e, "resource gate check failed, proceeding");
                            break;
                        }
                    }
                }
            }

            let _ = tx.send(Command::Started { id });
            let started = Instant::now();
            let mut work_fut = (work)(ctx);
            let deadline = async {
                match timeout {
                    Some(d) => tokio::time::sleep(d).await,
                    None => std::future::pending().await,
                }
            };

            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => Outcome::Cancelled,
                _ = deadline => Outcome::TimedOut {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                },
                result = &mut work_fut => match result {
                    Ok(output) => Outcome::Completed(output),
                    // Structured conditions pass through unchanged.
                    Err(GenerationError::Cancelled) => Outcome::Cancelled,
                    Err(GenerationError::Timeout { elapsed_ms }) => Outcome::TimedOut { elapsed_ms },
                    Err(err) => Outcome::Failed(err),
                },
            };
            let _ = tx.send(Command::Settled { id, outcome });
        });
    }

    fn handle_started(&mut self, id: TaskId) {
        let Some(current) = self.current.as_mut() else {
            return; // cleared while admitting
        };
        if current.id != id {
            return;
        }
        current.started_at = Some(Instant::now());
        current.wait_ms = current.enqueued_at.elapsed().as_millis() as u64;
        info!(task = %id, wait_ms = current.wait_ms, "task started");
        self.metrics.record(MetricEvent::dequeue(id, current.wait_ms));
        fire_status_hook(&current.hooks.on_status_change, TaskStatus::Running);
        self.notify();
    }

    fn handle_settled(&mut self, id: TaskId, outcome: Outcome) {
        let current = match self.current.take() {
            Some(c) if c.id == id => c,
            // Stale settlement from a cleared or superseded slot.
            Some(c) => {
                self.current = Some(c);
                return;
            }
            None => return,
        };

        let wait_ms = current.wait_ms;
        let exec_ms = current
            .started_at
            .map(|s| s.elapsed().as_millis() as u64)
            .unwrap_or(0);

        let (status, result) = match outcome {
            Outcome::Completed(output) => {
                info!(task = %id, exec_ms, "task completed");
                self.breaker.record_success();
                self.totals.completed += 1;
                self.metrics.record(MetricEvent::complete(id, wait_ms, exec_ms));
                (TaskStatus::Completed, Ok(output))
            }
            Outcome::Failed(err) => {
                warn!(task = %id, error = %err, exec_ms, "task failed");
                self.totals.failed += 1;
                self.metrics.record(MetricEvent::fail(id, exec_ms, err.to_string()));
                if self.breaker.record_failure() {
                    self.metrics
                        .record(MetricEvent::circuit_open(self.breaker.consecutive_failures()));
                    self.arm_cooldown();
                }
                (TaskStatus::Failed, Err(err))
            }
            Outcome::Cancelled => {
                info!(task = %id, "running task cancelled");
                self.totals.cancelled += 1;
                self.metrics.record(MetricEvent::cancel(id));
                (TaskStatus::Cancelled, Err(GenerationError::Cancelled))
            }
            Outcome::TimedOut { elapsed_ms } => {
                warn!(task = %id, elapsed_ms, "task timed out, abandoning");
                self.totals.timed_out += 1;
                self.metrics.record(MetricEvent::timeout(id, elapsed_ms));
                (TaskStatus::TimedOut, Err(GenerationError::Timeout { elapsed_ms }))
            }
        };

        // Broadcast the mutation before the handle settles so a caller
        // awaiting the outcome never reads pre-settlement state.
        self.notify();
        current.finish(status, result);
        self.dispatch();
    }

    // ── Breaker ───────────────────────────────────────────────

    fn arm_cooldown(&self) {
        let tx = self.tx.clone();
        let cooldown = self.config.breaker_cooldown();
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::CooldownElapsed);
            }
        });
    }

    fn handle_cooldown_elapsed(&mut self) {
        if self.breaker.try_close() {
            self.metrics.record(MetricEvent::circuit_close());
            self.notify();
            self.dispatch();
        }
    }

    fn handle_reset_breaker(&mut self) {
        if self.breaker.reset() {
            self.metrics.record(MetricEvent::circuit_close());
        }
        self.notify();
        self.dispatch();
    }

    // ── Cancellation & clearing ───────────────────────────────

    fn handle_cancel(&mut self, id: TaskId) -> bool {
        if let Some(pos) = self.pending.iter().position(|p| p.id == id) {
            let record = self.pending.remove(pos);
            info!(task = %id, "pending task cancelled");
            self.totals.cancelled += 1;
            self.metrics.record(MetricEvent::cancel(id));
            self.notify();
            record.settle_cancelled();
            return true;
        }
        if let Some(current) = &self.current {
            if current.id == id {
                info!(task = %id, "cancellation requested for in-flight task");
                current.token.cancel();
                // Settlement arrives through the in-flight race.
                return true;
            }
        }
        false
    }

    fn handle_cancel_all(&mut self) -> usize {
        let drained: Vec<PendingTask> = self.pending.drain(..).collect();
        let count = drained.len();
        if count > 0 {
            for record in &drained {
                self.totals.cancelled += 1;
                self.metrics.record(MetricEvent::cancel(record.id));
            }
            info!(count, "cancelled all pending tasks");
            self.notify();
            for record in drained {
                record.settle_cancelled();
            }
        }
        count
    }

    fn handle_clear(&mut self) {
        info!(
            pending = self.pending.len(),
            running = self.current.is_some(),
            "clearing queue"
        );
        // Dropping the settle senders surfaces ChannelClosed at the handles.
        self.pending.clear();
        if let Some(current) = self.current.take() {
            current.token.cancel();
        }
        self.breaker.reset();
        self.metrics.reset();
        self.totals = QueueTotals::default();
        self.next_seq = 0;
        self.notify();
    }

    // ── State broadcast ───────────────────────────────────────

    fn notify(&self) {
        let state = QueueState {
            size: self.size(),
            running: self.current.is_some(),
            running_task: self.current.as_ref().map(|c| c.id),
            circuit_open: self.breaker.is_open(),
            consecutive_failures: self.breaker.consecutive_failures(),
            totals: self.totals,
        };
        // send_replace never fails; subscribers may come and go freely.
        self.state_tx.send_replace(state);
    }
}
