use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::{
    action::{
        Action, ActionEvent, ActionId, ActionJournal, ActionKind, ActionStatus, ProposedAction,
    },
    ActionError,
};

/// Persisted actions plus the claim set guarding execution.
///
/// Creation is serialized by the duplicate check running under the write lock, so at most one
/// non-terminal action exists per entity and kind.
#[derive(Debug, Clone, Default)]
pub struct ActionQueue {
    actions: Arc<RwLock<IndexMap<ActionId, Action>>>,
    claims: Arc<Mutex<HashSet<ActionId>>>,
    journal: ActionJournal,
}

impl ActionQueue {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition journal.
    #[must_use]
    pub fn journal(&self) -> ActionJournal {
        self.journal.clone()
    }

    /// Persists a proposal unless a non-terminal action already targets the entity with the
    /// same kind.
    ///
    /// # Errors
    /// [`ActionError::Duplicate`] naming the existing action.
    pub fn submit(&self, proposal: ProposedAction) -> Result<Action, ActionError> {
        let mut guard = self.actions.write();
        if let Some(existing) = guard.values().find(|action| {
            action.entity_id == proposal.entity_id
                && action.kind == proposal.kind
                && !action.status.is_terminal()
        }) {
            return Err(ActionError::Duplicate {
                entity_id: proposal.entity_id,
                kind: proposal.kind,
                existing: existing.id,
            });
        }
        let action = Action::from_proposal(proposal);
        guard.insert(action.id, action.clone());
        drop(guard);
        self.record(&action, Some(action.rationale.clone()));
        info!(
            action = %action.id,
            entity = %action.entity_id,
            kind = action.kind.label(),
            auto = action.auto_execute,
            "action queued"
        );
        Ok(action)
    }

    /// Copy of an action.
    #[must_use]
    pub fn get(&self, id: ActionId) -> Option<Action> {
        self.actions.read().get(&id).cloned()
    }

    /// Every action in creation order.
    #[must_use]
    pub fn all(&self) -> Vec<Action> {
        self.actions.read().values().cloned().collect()
    }

    /// Actions in a given status.
    #[must_use]
    pub fn with_status(&self, status: ActionStatus) -> Vec<Action> {
        self.actions
            .read()
            .values()
            .filter(|action| action.status == status)
            .cloned()
            .collect()
    }

    /// Whether any non-terminal action targets the entity.
    #[must_use]
    pub fn has_open(&self, entity_id: &str) -> bool {
        self.actions
            .read()
            .values()
            .any(|action| action.entity_id == entity_id && !action.status.is_terminal())
    }

    /// Most recent time the entity was acted on: creation of an open action or execution of a
    /// finished one. Rejected and expired actions do not count.
    #[must_use]
    pub fn last_action_at(&self, entity_id: &str) -> Option<DateTime<Utc>> {
        self.actions
            .read()
            .values()
            .filter(|action| action.entity_id == entity_id)
            .filter_map(|action| match action.status {
                ActionStatus::Pending | ActionStatus::Approved => Some(action.created_at),
                ActionStatus::Executed => action.executed_at.or(Some(action.updated_at)),
                ActionStatus::Failed => Some(action.updated_at),
                ActionStatus::Rejected | ActionStatus::Expired => None,
            })
            .max()
    }

    /// Actions ready for execution, oldest first.
    #[must_use]
    pub fn executable(&self) -> Vec<Action> {
        self.actions
            .read()
            .values()
            .filter(|action| action.is_executable())
            .cloned()
            .collect()
    }

    /// Executed actions not yet reflected whose execution is older than `cutoff`.
    #[must_use]
    pub fn executed_unreflected(&self, cutoff: DateTime<Utc>) -> Vec<Action> {
        self.actions
            .read()
            .values()
            .filter(|action| {
                action.status == ActionStatus::Executed
                    && !action.reflected
                    && action.executed_at.unwrap_or(action.updated_at) <= cutoff
            })
            .cloned()
            .collect()
    }

    /// Actions updated at or after `since`.
    #[must_use]
    pub fn updated_since(&self, since: DateTime<Utc>) -> Vec<Action> {
        self.actions
            .read()
            .values()
            .filter(|action| action.updated_at >= since)
            .cloned()
            .collect()
    }

    /// Human review totals as `(reviewed, rejected)`.
    #[must_use]
    pub fn review_counts(&self) -> (usize, usize) {
        let guard = self.actions.read();
        let reviewed = guard.values().filter(|a| a.reviewed_at.is_some()).count();
        let rejected = guard
            .values()
            .filter(|a| a.status == ActionStatus::Rejected)
            .count();
        (reviewed, rejected)
    }

    /// Sets the reflected flag. Returns `false` when it was already set.
    ///
    /// # Errors
    /// [`ActionError::NotFound`].
    pub fn mark_reflected(&self, id: ActionId) -> Result<bool, ActionError> {
        let mut guard = self.actions.write();
        let action = guard.get_mut(&id).ok_or(ActionError::NotFound(id))?;
        if action.reflected {
            return Ok(false);
        }
        action.reflected = true;
        Ok(true)
    }

    /// Applies a lifecycle transition. Review outcomes are refused for auto-executed actions
    /// and for actions an executor currently holds.
    ///
    /// # Errors
    /// [`ActionError::NotFound`], [`ActionError::InvalidTransition`] or
    /// [`ActionError::NotReviewable`].
    pub fn transition(
        &self,
        id: ActionId,
        next: ActionStatus,
        note: Option<String>,
    ) -> Result<Action, ActionError> {
        let mut guard = self.actions.write();
        let action = guard.get_mut(&id).ok_or(ActionError::NotFound(id))?;
        if !action.status.can_transition(next, action.auto_execute) {
            return Err(ActionError::InvalidTransition {
                id,
                from: action.status,
                to: next,
            });
        }
        if matches!(next, ActionStatus::Approved | ActionStatus::Rejected) {
            if action.auto_execute {
                return Err(ActionError::NotReviewable {
                    id,
                    reason: "auto-executed",
                });
            }
            if self.claims.lock().contains(&id) {
                return Err(ActionError::NotReviewable {
                    id,
                    reason: "being executed",
                });
            }
        }
        let now = Utc::now();
        action.status = next;
        action.updated_at = now;
        match next {
            ActionStatus::Approved | ActionStatus::Rejected => {
                action.reviewed_at = Some(now);
                action.review_note.clone_from(&note);
            }
            ActionStatus::Executed => action.executed_at = Some(now),
            ActionStatus::Failed => action.last_error.clone_from(&note),
            ActionStatus::Pending | ActionStatus::Expired => {}
        }
        let snapshot = action.clone();
        drop(guard);
        debug!(action = %id, status = next.label(), "action transition");
        self.record(&snapshot, note);
        Ok(snapshot)
    }

    /// Counts a failed platform attempt, keeping the error verbatim.
    ///
    /// # Errors
    /// [`ActionError::NotFound`].
    pub fn record_attempt(&self, id: ActionId, error: Option<String>) -> Result<u32, ActionError> {
        let mut guard = self.actions.write();
        let action = guard.get_mut(&id).ok_or(ActionError::NotFound(id))?;
        action.attempts += 1;
        if error.is_some() {
            action.last_error = error;
        }
        action.updated_at = Utc::now();
        Ok(action.attempts)
    }

    /// Expires pending actions older than `ttl`.
    pub fn expire_stale(&self, ttl: Duration, now: DateTime<Utc>) -> Vec<ActionId> {
        let stale: Vec<ActionId> = self
            .actions
            .read()
            .values()
            .filter(|action| {
                action.status == ActionStatus::Pending
                    && !action.auto_execute
                    && now - action.created_at > ttl
            })
            .map(|action| action.id)
            .collect();
        stale
            .into_iter()
            .filter(|id| {
                self.transition(*id, ActionStatus::Expired, Some("approval window elapsed".into()))
                    .is_ok()
            })
            .collect()
    }

    /// Claims an executable action for one executor. The claim lasts as long as the returned
    /// guard, so a cancelled execution frees the action for the next run.
    ///
    /// # Errors
    /// [`ActionError::AlreadyClaimed`], [`ActionError::NotExecutable`] or
    /// [`ActionError::NotFound`].
    pub fn claim(&self, id: ActionId) -> Result<Claim, ActionError> {
        if !self.claims.lock().insert(id) {
            return Err(ActionError::AlreadyClaimed(id));
        }
        let checked = match self.get(id) {
            None => Err(ActionError::NotFound(id)),
            Some(action) if !action.is_executable() => Err(ActionError::NotExecutable {
                id,
                status: action.status,
            }),
            Some(action) => Ok(action),
        };
        match checked {
            Ok(action) => Ok(Claim {
                claims: Arc::clone(&self.claims),
                action,
            }),
            Err(err) => {
                self.claims.lock().remove(&id);
                Err(err)
            }
        }
    }

    /// Whether an action is currently claimed.
    #[must_use]
    pub fn is_claimed(&self, id: ActionId) -> bool {
        self.claims.lock().contains(&id)
    }

    /// Non-terminal action for an entity and kind.
    #[must_use]
    pub fn open_for(&self, entity_id: &str, kind: ActionKind) -> Option<Action> {
        self.actions
            .read()
            .values()
            .find(|a| a.entity_id == entity_id && a.kind == kind && !a.status.is_terminal())
            .cloned()
    }

    fn record(&self, action: &Action, note: Option<String>) {
        self.journal.push(ActionEvent {
            id: action.id,
            entity_id: action.entity_id.clone(),
            timestamp: action.updated_at,
            status: action.status,
            note,
        });
    }
}

/// Exclusive execution right over one action, released on drop.
#[derive(Debug)]
#[must_use = "the claim is released as soon as it is dropped"]
pub struct Claim {
    claims: Arc<Mutex<HashSet<ActionId>>>,
    action: Action,
}

impl Claim {
    /// Snapshot of the action taken when the claim was granted.
    #[must_use]
    pub const fn action(&self) -> &Action {
        &self.action
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.claims.lock().remove(&self.action.id);
    }
}
