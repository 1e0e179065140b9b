#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Action approval queue and execution.
//!
//! Proposals become [`Action`]s only through [`ActionQueue::submit`], which refuses a second
//! non-terminal action for the same entity and kind. Humans move actions through the
//! [`ApprovalDesk`]; the [`ActionExecutor`] applies them with bounded retries.

/// Action model, lifecycle and journal.
pub mod action;
/// Human approval front door.
pub mod approval;
/// Platform executor seam and retried execution.
pub mod executor;
/// Deduplicating action store.
pub mod queue;

use thiserror::Error;

pub use action::{
    Action, ActionEvent, ActionId, ActionJournal, ActionKind, ActionParams, ActionStatus,
    MetricsSnapshot, ProposedAction,
};
pub use approval::ApprovalDesk;
pub use executor::{
    ActionExecutor, DryRunExecutor, ExecutionReport, PlatformError, PlatformExecutor, RetryPolicy,
};
pub use queue::{ActionQueue, Claim};

/// Queue and lifecycle errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// No action with this id.
    #[error("action {0} not found")]
    NotFound(ActionId),
    /// A non-terminal action already covers the entity and kind.
    #[error("{kind} already open for {entity_id} as {existing}")]
    Duplicate {
        /// Target entity.
        entity_id: String,
        /// Normalized kind.
        kind: ActionKind,
        /// Action already open.
        existing: ActionId,
    },
    /// Illegal lifecycle edge.
    #[error("action {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Action.
        id: ActionId,
        /// Current status.
        from: ActionStatus,
        /// Requested status.
        to: ActionStatus,
    },
    /// Not approved and not auto-executable.
    #[error("action {id} is {status} and cannot execute")]
    NotExecutable {
        /// Action.
        id: ActionId,
        /// Current status.
        status: ActionStatus,
    },
    /// Another executor holds the claim.
    #[error("action {0} is already being executed")]
    AlreadyClaimed(ActionId),
    /// Approval or rejection of an action outside the human gate.
    #[error("action {id} is {reason} and not open for review")]
    NotReviewable {
        /// Action.
        id: ActionId,
        /// Why review is closed.
        reason: &'static str,
    },
}
