use chrono::{Duration, Utc};
use tracing::info;

use crate::{
    action::{Action, ActionId, ActionStatus},
    queue::ActionQueue,
    ActionError,
};

/// Human approval front door: the only path to `approved` or `rejected`.
#[derive(Debug, Clone)]
pub struct ApprovalDesk {
    queue: ActionQueue,
    ttl: Duration,
}

impl ApprovalDesk {
    /// Desk over a queue with the default 48 hour approval window.
    #[must_use]
    pub fn new(queue: ActionQueue) -> Self {
        Self {
            queue,
            ttl: Duration::hours(48),
        }
    }

    /// Overrides the approval window.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Actions awaiting a human, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<Action> {
        self.queue
            .with_status(ActionStatus::Pending)
            .into_iter()
            .filter(|action| !action.auto_execute)
            .collect()
    }

    /// Failed actions with their verbatim errors.
    #[must_use]
    pub fn failed(&self) -> Vec<Action> {
        self.queue.with_status(ActionStatus::Failed)
    }

    /// Approves a pending action.
    ///
    /// # Errors
    /// [`ActionError::InvalidTransition`] when the action is not pending,
    /// [`ActionError::NotReviewable`] when it skips the human gate.
    pub fn approve(&self, id: ActionId, note: Option<String>) -> Result<Action, ActionError> {
        let action = self.queue.transition(id, ActionStatus::Approved, note)?;
        info!(action = %id, entity = %action.entity_id, "action approved");
        Ok(action)
    }

    /// Rejects a pending action with a note.
    ///
    /// # Errors
    /// [`ActionError::InvalidTransition`] when the action is not pending,
    /// [`ActionError::NotReviewable`] when it skips the human gate.
    pub fn reject(&self, id: ActionId, note: impl Into<String>) -> Result<Action, ActionError> {
        let action = self
            .queue
            .transition(id, ActionStatus::Rejected, Some(note.into()))?;
        info!(action = %id, entity = %action.entity_id, "action rejected");
        Ok(action)
    }

    /// Expires pending actions older than the window.
    pub fn expire_stale(&self) -> Vec<ActionId> {
        let expired = self.queue.expire_stale(self.ttl, Utc::now());
        if !expired.is_empty() {
            info!(count = expired.len(), "expired stale approvals");
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionKind, ProposedAction};

    #[test]
    fn approval_only_from_pending() {
        let queue = ActionQueue::new();
        let desk = ApprovalDesk::new(queue.clone());
        let action = queue
            .submit(ProposedAction::new("c1", ActionKind::Pause, "mild loss"))
            .unwrap();
        let auto = queue
            .submit(ProposedAction::new("c2", ActionKind::Pause, "severe").auto(true))
            .unwrap();
        assert_eq!(desk.pending().len(), 1);
        assert!(matches!(
            desk.reject(auto.id, "not yet"),
            Err(ActionError::NotReviewable { .. })
        ));
        assert!(desk.approve(auto.id, None).is_err());

        let rejected = desk.reject(action.id, "seasonal dip").unwrap();
        assert_eq!(rejected.review_note.as_deref(), Some("seasonal dip"));
        assert!(desk.approve(action.id, None).is_err());
        assert_eq!(queue.review_counts(), (1, 1));
    }

    #[test]
    fn zero_window_expires_everything_pending() {
        let queue = ActionQueue::new();
        let desk = ApprovalDesk::new(queue.clone()).with_ttl(Duration::seconds(-1));
        let action = queue
            .submit(ProposedAction::new("c1", ActionKind::Resume, "recovered"))
            .unwrap();
        assert_eq!(desk.expire_stale(), vec![action.id]);
        assert_eq!(queue.get(action.id).unwrap().status, ActionStatus::Expired);
    }
}
