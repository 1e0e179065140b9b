use std::{fmt, sync::Arc};

use autopilot_signals::{CampaignMetrics, EntityStatus};
use autopilot_skills::SkillId;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a persisted action.
pub type ActionId = Uuid;

/// Canonical operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Stop delivery.
    Pause,
    /// Restart delivery.
    Resume,
    /// Set a new daily budget.
    AdjustBudget,
}

impl ActionKind {
    /// The single normalization point for free-form operation names.
    #[must_use]
    pub fn normalize(raw: &str) -> Option<Self> {
        let token = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match token.as_str() {
            "pause" | "pause_campaign" | "stop" | "disable" => Some(Self::Pause),
            "resume" | "unpause" | "enable" | "activate" | "restart" => Some(Self::Resume),
            "adjust_budget" | "budget" | "set_budget" | "increase_budget" | "decrease_budget"
            | "scale_budget" | "raise_budget" | "lower_budget" => Some(Self::AdjustBudget),
            _ => None,
        }
    }

    /// Wire label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::AdjustBudget => "adjust_budget",
        }
    }

    /// Entity status this kind drives the platform to, if it is a status change.
    #[must_use]
    pub const fn target_status(self) -> Option<EntityStatus> {
        match self {
            Self::Pause => Some(EntityStatus::Paused),
            Self::Resume => Some(EntityStatus::Active),
            Self::AdjustBudget => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Waiting for approval, or for execution when auto-flagged.
    Pending,
    /// Approved by a human.
    Approved,
    /// Rejected by a human.
    Rejected,
    /// Left pending past its TTL.
    Expired,
    /// Applied on the platform.
    Executed,
    /// Retries exhausted.
    Failed,
}

impl ActionStatus {
    /// Whether the status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Expired | Self::Executed | Self::Failed
        )
    }

    /// Wire label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Executed => "executed",
            Self::Failed => "failed",
        }
    }

    /// Whether `self -> next` is a legal edge. `auto` allows pending to go straight to execution.
    #[must_use]
    pub const fn can_transition(self, next: Self, auto: bool) -> bool {
        match (self, next) {
            (Self::Pending, Self::Approved | Self::Rejected | Self::Expired)
            | (Self::Approved, Self::Executed | Self::Failed) => true,
            (Self::Pending, Self::Executed | Self::Failed) => auto,
            _ => false,
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Operation parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionParams {
    /// Target daily budget for budget changes.
    pub new_budget: Option<f64>,
    /// Budget at decision time.
    pub previous_budget: Option<f64>,
}

/// Compact metrics captured before and after an action for reflection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Three-day ratio.
    pub roas_3d: f64,
    /// Seven-day ratio.
    pub roas_7d: f64,
    /// Three-day spend.
    pub spend_3d: f64,
    /// Three-day conversions.
    pub conversions_3d: f64,
    /// Reference-day ratio.
    pub roas_today: f64,
    /// Reference-day spend.
    pub spend_today: f64,
    /// Configured daily budget.
    pub daily_budget: f64,
}

impl MetricsSnapshot {
    /// Captures the figures reflection compares.
    #[must_use]
    pub fn from_metrics(metrics: &CampaignMetrics) -> Self {
        Self {
            roas_3d: metrics.roas_3d(),
            roas_7d: metrics.roas_7d(),
            spend_3d: metrics.last_3d.spend,
            conversions_3d: metrics.last_3d.conversions,
            roas_today: metrics.today.roas(),
            spend_today: metrics.today.spend,
            daily_budget: metrics.daily_budget,
        }
    }
}

/// Candidate emitted by the decision phase, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    /// Target entity.
    pub entity_id: String,
    /// Normalized operation.
    pub kind: ActionKind,
    /// Parameters.
    pub params: ActionParams,
    /// Rationale shown verbatim to reviewers.
    pub rationale: String,
    /// Skill the proposal is attributed to.
    pub skill_id: Option<SkillId>,
    /// Strategy that produced the proposal.
    pub origin: String,
    /// Whether the approval gate is skipped.
    pub auto_execute: bool,
    /// Metrics at decision time.
    pub pre_metrics: Option<MetricsSnapshot>,
}

impl ProposedAction {
    /// Proposal requiring approval.
    #[must_use]
    pub fn new(
        entity_id: impl Into<String>,
        kind: ActionKind,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            kind,
            params: ActionParams::default(),
            rationale: rationale.into(),
            skill_id: None,
            origin: "manual".into(),
            auto_execute: false,
            pre_metrics: None,
        }
    }

    /// Sets the budget parameters.
    #[must_use]
    pub const fn with_budget(mut self, previous: f64, new_budget: f64) -> Self {
        self.params = ActionParams {
            new_budget: Some(new_budget),
            previous_budget: Some(previous),
        };
        self
    }

    /// Marks the proposal for automatic execution.
    #[must_use]
    pub const fn auto(mut self, auto_execute: bool) -> Self {
        self.auto_execute = auto_execute;
        self
    }

    /// Records the producing strategy.
    #[must_use]
    pub fn from_strategy(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Attributes the proposal to a skill.
    #[must_use]
    pub fn with_skill(mut self, skill_id: Option<SkillId>) -> Self {
        self.skill_id = skill_id;
        self
    }

    /// Captures the pre-decision metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: &CampaignMetrics) -> Self {
        self.pre_metrics = Some(MetricsSnapshot::from_metrics(metrics));
        self
    }
}

/// The only write-intent object in the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Identifier.
    pub id: ActionId,
    /// Target entity.
    pub entity_id: String,
    /// Normalized operation.
    pub kind: ActionKind,
    /// Parameters.
    pub params: ActionParams,
    /// Rationale.
    pub rationale: String,
    /// Originating skill.
    pub skill_id: Option<SkillId>,
    /// Strategy that produced it.
    pub origin: String,
    /// Whether the approval gate is skipped.
    pub auto_execute: bool,
    /// Lifecycle state.
    pub status: ActionStatus,
    /// Platform attempts made.
    pub attempts: u32,
    /// Last platform error, verbatim.
    pub last_error: Option<String>,
    /// Reviewer note on approval or rejection.
    pub review_note: Option<String>,
    /// Metrics at decision time.
    pub pre_metrics: Option<MetricsSnapshot>,
    /// Whether reflection has consumed this action.
    pub reflected: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last transition.
    pub updated_at: DateTime<Utc>,
    /// Human review time.
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Successful execution time.
    pub executed_at: Option<DateTime<Utc>>,
}

impl Action {
    /// Persists a proposal as a pending action.
    #[must_use]
    pub fn from_proposal(proposal: ProposedAction) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            entity_id: proposal.entity_id,
            kind: proposal.kind,
            params: proposal.params,
            rationale: proposal.rationale,
            skill_id: proposal.skill_id,
            origin: proposal.origin,
            auto_execute: proposal.auto_execute,
            status: ActionStatus::Pending,
            attempts: 0,
            last_error: None,
            review_note: None,
            pre_metrics: proposal.pre_metrics,
            reflected: false,
            created_at: now,
            updated_at: now,
            reviewed_at: None,
            executed_at: None,
        }
    }

    /// Whether the executor may pick the action up.
    #[must_use]
    pub const fn is_executable(&self) -> bool {
        matches!(self.status, ActionStatus::Approved)
            || (self.auto_execute && matches!(self.status, ActionStatus::Pending))
    }
}

/// One recorded transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    /// Action identifier.
    pub id: ActionId,
    /// Target entity.
    pub entity_id: String,
    /// Timestamp of the event.
    pub timestamp: DateTime<Utc>,
    /// Status after the transition.
    pub status: ActionStatus,
    /// Optional note or error.
    pub note: Option<String>,
}

impl fmt::Display for ActionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} -> {}", self.id, self.timestamp, self.status)
    }
}

/// Append-only log of action transitions.
#[derive(Debug, Clone, Default)]
pub struct ActionJournal {
    entries: Arc<RwLock<Vec<ActionEvent>>>,
}

impl ActionJournal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn push(&self, event: ActionEvent) {
        self.entries.write().push(event);
    }

    /// Copy of the log.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ActionEvent> {
        self.entries.read().clone()
    }

    /// Events of one action.
    #[must_use]
    pub fn history(&self, id: ActionId) -> Vec<ActionEvent> {
        self.entries
            .read()
            .iter()
            .filter(|event| event.id == id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_form_names_normalize_once() {
        assert_eq!(ActionKind::normalize(" Increase-Budget "), Some(ActionKind::AdjustBudget));
        assert_eq!(ActionKind::normalize("decrease_budget"), Some(ActionKind::AdjustBudget));
        assert_eq!(ActionKind::normalize("PAUSE"), Some(ActionKind::Pause));
        assert_eq!(ActionKind::normalize("enable"), Some(ActionKind::Resume));
        assert_eq!(ActionKind::normalize("delete"), None);
    }

    #[test]
    fn only_legal_edges_are_allowed() {
        use ActionStatus::{Approved, Executed, Expired, Failed, Pending, Rejected};
        assert!(Pending.can_transition(Approved, false));
        assert!(!Pending.can_transition(Executed, false));
        assert!(Pending.can_transition(Executed, true));
        assert!(Approved.can_transition(Failed, false));
        for terminal in [Rejected, Expired, Executed, Failed] {
            assert!(terminal.is_terminal());
            for next in [Pending, Approved, Rejected, Expired, Executed, Failed] {
                assert!(!terminal.can_transition(next, true));
            }
        }
        assert!(!Approved.can_transition(Approved, false));
    }
}
