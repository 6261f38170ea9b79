//! Task descriptor, per-task hooks, and the caller-facing result handle.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use kiln_core::{Priority, TaskId, TaskKind, TaskStatus};

use crate::error::GenerationError;

/// Opaque result produced by a unit of work (e.g. rendered asset paths).
pub type TaskOutput = serde_json::Value;

/// The future a unit of work settles with.
pub type WorkFuture = BoxFuture<'static, Result<TaskOutput, GenerationError>>;

/// The unit of work itself. The engine does not know what the call does,
/// only whether it settles, fails, or is abandoned.
pub type WorkFn = Box<dyn FnOnce(TaskContext) -> WorkFuture + Send>;

/// Context handed to a running unit of work.
///
/// Cancellation is cooperative: the engine settles the caller's handle
/// promptly on cancel or timeout, but work that never observes the token
/// cannot be forcibly halted — dropping its future merely abandons it.
#[derive(Clone)]
pub struct TaskContext {
    token: CancellationToken,
    on_progress: Option<Arc<dyn Fn(f32) + Send + Sync>>,
}

impl TaskContext {
    pub(crate) fn new(
        token: CancellationToken,
        on_progress: Option<Arc<dyn Fn(f32) + Send + Sync>>,
    ) -> Self {
        Self { token, on_progress }
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Report progress (0.0–1.0) to the caller's hook, if any. A panicking
    /// hook is logged and isolated.
    pub fn report_progress(&self, fraction: f32) {
        if let Some(hook) = &self.on_progress {
            if catch_unwind(AssertUnwindSafe(|| hook(fraction))).is_err() {
                warn!("progress hook panicked; ignoring");
            }
        }
    }
}

/// Optional per-task notification hooks.
#[derive(Default)]
pub struct TaskHooks {
    /// Fed by the unit of work through [`TaskContext::report_progress`].
    pub on_progress: Option<Arc<dyn Fn(f32) + Send + Sync>>,
    /// Invoked with each status transition, including the terminal status
    /// just before the result handle settles.
    pub on_status_change: Option<Box<dyn Fn(TaskStatus) + Send>>,
}

/// A generation task as submitted by feature code.
pub struct GenerationTask {
    pub id: TaskId,
    pub kind: TaskKind,
    pub priority: Priority,
    /// Wall-clock deadline for the running phase.
    pub timeout: Option<Duration>,
    /// Free-form caller metadata, carried through untouched.
    pub metadata: serde_json::Value,
    pub hooks: TaskHooks,
    pub(crate) work: WorkFn,
}

impl GenerationTask {
    pub fn new<F>(kind: TaskKind, work: F) -> Self
    where
        F: FnOnce(TaskContext) -> WorkFuture + Send + 'static,
    {
        Self {
            id: TaskId::new(),
            kind,
            priority: Priority::Normal,
            timeout: None,
            metadata: serde_json::Value::Null,
            hooks: TaskHooks::default(),
            work: Box::new(work),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_progress_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        self.hooks.on_progress = Some(Arc::new(hook));
        self
    }

    pub fn with_status_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(TaskStatus) + Send + 'static,
    {
        self.hooks.on_status_change = Some(Box::new(hook));
        self
    }
}

impl std::fmt::Debug for GenerationTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationTask")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Caller-facing handle to a submitted task's outcome. Settles exactly
/// once with the task's terminal result.
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    rx: oneshot::Receiver<Result<TaskOutput, GenerationError>>,
}

impl TaskHandle {
    pub(crate) fn new(
        id: TaskId,
        rx: oneshot::Receiver<Result<TaskOutput, GenerationError>>,
    ) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Wait for the task's terminal outcome.
    pub async fn outcome(self) -> Result<TaskOutput, GenerationError> {
        self.rx.await.unwrap_or(Err(GenerationError::ChannelClosed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn builder_sets_fields() {
        let task = GenerationTask::new(TaskKind::Video, |_ctx| {
            Box::pin(async { Ok(serde_json::Value::Null) })
        })
        .with_priority(Priority::High)
        .with_timeout(Duration::from_secs(120))
        .with_metadata(serde_json::json!({ "scene": 4 }));

        assert_eq!(task.priority, Priority::High);
        assert_eq!(task.timeout, Some(Duration::from_secs(120)));
        assert_eq!(task.metadata["scene"], 4);
    }

    #[test]
    fn progress_reporting_reaches_hook() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let ctx = TaskContext::new(
            CancellationToken::new(),
            Some(Arc::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })),
        );
        ctx.report_progress(0.5);
        ctx.report_progress(1.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_progress_hook_is_isolated() {
        let ctx = TaskContext::new(
            CancellationToken::new(),
            Some(Arc::new(|_| panic!("listener bug"))),
        );
        // Must not propagate.
        ctx.report_progress(0.1);
    }

    #[tokio::test]
    async fn dropped_settlement_yields_channel_closed() {
        let (tx, rx) = oneshot::channel();
        let handle = TaskHandle::new(TaskId::new(), rx);
        drop(tx);
        assert_eq!(handle.outcome().await, Err(GenerationError::ChannelClosed));
    }
}
