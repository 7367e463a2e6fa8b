//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] carries one [`PipelineEvent`] per state transition. It is
//! shared via `Arc<EventBus>` between the task factory, the executors, the
//! aggregator and the reconciler.
//!
//! Delivery is best-effort: a receiver that falls behind observes
//! `RecvError::Lagged` and misses messages. Handlers re-check state in the
//! store, and the reconciler re-announces jobs that sat `pending` too long,
//! so a lost message delays work but never loses it.

use fanout_core::types::DbId;
use fanout_db::models::status::{JobStatus, TaskStatus};
use serde::Serialize;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// PipelineEvent
// ---------------------------------------------------------------------------

/// A state transition in the generation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A job is `pending` and wants an executor. Also re-announced after an
    /// in-place retry and by the reconciler's redelivery sweep.
    JobCreated { task_id: DbId, job_id: DbId },

    /// A job row changed status.
    JobStatusChanged {
        task_id: DbId,
        job_id: DbId,
        old: JobStatus,
        new: JobStatus,
    },

    /// A task reached its terminal status. Emitted once, by the finalizer
    /// that won the compare-and-swap.
    TaskFinalized {
        task_id: DbId,
        status: TaskStatus,
        refunded_points: i64,
    },
}

impl PipelineEvent {
    pub fn task_id(&self) -> DbId {
        match self {
            Self::JobCreated { task_id, .. }
            | Self::JobStatusChanged { task_id, .. }
            | Self::TaskFinalized { task_id, .. } => *task_id,
        }
    }

    /// Dot-separated name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JobCreated { .. } => "job.created",
            Self::JobStatusChanged { .. } => "job.status_changed",
            Self::TaskFinalized { .. } => "task.finalized",
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 4096;

/// In-process fan-out event bus.
///
/// ```rust
/// use fanout_events::bus::{EventBus, PipelineEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(PipelineEvent::JobCreated { task_id: 1, job_id: 2 });
/// ```
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// With no subscribers the event is dropped; the reconciler's redelivery
    /// sweep picks up any job announcement lost this way.
    pub fn publish(&self, event: PipelineEvent) {
        tracing::trace!(kind = event.kind(), task_id = event.task_id(), "Publishing event");
        // Ignore the SendError: it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
