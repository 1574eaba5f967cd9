//! Core domain logic for learning time reconciliation.
//!
//! This crate contains the fundamental types and logic for:
//! - Normalization: decoding raw event logs into lifecycle events
//! - Reconciliation: computing learning time and completion per session
//! - Completeness: deriving per-learning-objective completion records
//! - Dispatch: fanning a batch out to its downstream sinks in parallel

mod batch;
mod completeness;
pub mod dispatch;
mod event;
pub mod fanout;
mod lifecycle;
pub mod normalize;
pub mod reconcile;
pub mod types;

pub use batch::{BatchError, EventBatch, partition_by_key};
pub use completeness::{CompletenessRecord, derive_completeness};
pub use dispatch::{
    Collaborators, CompletenessRecorder, DispatchError, DispatchOutcome, LearningTimeLedger,
    SinkError, StudyPlanItemTracker, dispatch_batch,
};
pub use event::{LearningEvent, TimedEvent};
pub use lifecycle::{LEARNING_OBJECTIVE_KIND, Lifecycle};
pub use normalize::{MalformedEvent, NormalizedBatch, RawEventLog, normalize_batch};
pub use reconcile::{ReconciliationResult, reconcile};
pub use types::{
    CorrelationKey, EventId, LoId, SessionId, StudentId, StudyPlanItemId, ValidationError,
};
