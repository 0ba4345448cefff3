//! Mutation event definitions and the in-process event bus
//!
//! Every transcript mutation walks a fixed state sequence. Transitions are
//! published on the [`EventBus`] so that an embedding service can forward
//! them (SSE, audit log) without the engine knowing about the transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Entry operation that started a mutation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// New transcript uploaded
    Create,
    /// Transcript removed
    Delete,
    /// Interview date/time edited
    EditSchedule,
    /// Repair run with no mutation
    Resequence,
    /// Explicit orphan-row cleanup
    PruneOrphans,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MutationKind::Create => "create",
            MutationKind::Delete => "delete",
            MutationKind::EditSchedule => "edit_schedule",
            MutationKind::Resequence => "resequence",
            MutationKind::PruneOrphans => "prune_orphans",
        };
        f.write_str(name)
    }
}

/// Mutation run state
///
/// RECEIVED → VALIDATED → OLD_ORDER_CAPTURED → NEW_ORDER_COMPUTED →
/// TRANSCRIPTS_PERSISTED → ANALYSES_RECONCILED → ANALYSES_PERSISTED → DONE,
/// with FAILED reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationState {
    Received,
    Validated,
    OldOrderCaptured,
    NewOrderComputed,
    TranscriptsPersisted,
    AnalysesReconciled,
    AnalysesPersisted,
    Done,
    Failed,
}

impl MutationState {
    /// Check if state is terminal (finished)
    pub fn is_terminal(self) -> bool {
        matches!(self, MutationState::Done | MutationState::Failed)
    }

    /// Transitions only move forward; FAILED is reachable from anywhere non-terminal
    ///
    /// Forward skips are allowed (a cleanup run never persists transcripts).
    pub fn can_transition_to(self, next: MutationState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == MutationState::Failed || next > self
    }
}

impl std::fmt::Display for MutationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MutationState::Received => "RECEIVED",
            MutationState::Validated => "VALIDATED",
            MutationState::OldOrderCaptured => "OLD_ORDER_CAPTURED",
            MutationState::NewOrderComputed => "NEW_ORDER_COMPUTED",
            MutationState::TranscriptsPersisted => "TRANSCRIPTS_PERSISTED",
            MutationState::AnalysesReconciled => "ANALYSES_RECONCILED",
            MutationState::AnalysesPersisted => "ANALYSES_PERSISTED",
            MutationState::Done => "DONE",
            MutationState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Events published while a mutation runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MutationEvent {
    /// A run moved to a new state
    StateChanged {
        run_id: Uuid,
        kind: MutationKind,
        project_id: String,
        old_state: MutationState,
        new_state: MutationState,
        timestamp: DateTime<Utc>,
    },

    /// An analysis document could not be reconciled and was left as-is
    DocumentSkipped {
        run_id: Uuid,
        project_id: String,
        document_id: Option<String>,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A run reached DONE
    Completed {
        run_id: Uuid,
        kind: MutationKind,
        project_id: String,
        respondents: usize,
        timestamp: DateTime<Utc>,
    },
}

/// Central event distribution bus
///
/// Wraps `tokio::sync::broadcast`: publishing never blocks and slow
/// subscribers observe `Lagged` instead of stalling the producer.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MutationEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<MutationEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: MutationEvent,
    ) -> Result<usize, broadcast::error::SendError<MutationEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: MutationEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}
