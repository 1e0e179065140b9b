use std::fmt;

use autopilot_skills::SkillId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the auditor found wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    /// Skipped or watched, but now a loss.
    ScreenerFalseNegative,
    /// Flagged for decision, but now healthy with no action taken.
    ScreenerFalsePositive,
    /// An executed action judged wrong in hindsight.
    DecisionWrong,
    /// An action that exhausted its retries.
    ExecutionFailure,
}

impl FindingCategory {
    /// Wire label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ScreenerFalseNegative => "screener_false_negative",
            Self::ScreenerFalsePositive => "screener_false_positive",
            Self::DecisionWrong => "decision_wrong",
            Self::ExecutionFailure => "execution_failure",
        }
    }

    /// Corrective action suggested for this category.
    #[must_use]
    pub const fn corrective(self) -> CorrectiveAction {
        match self {
            Self::ScreenerFalseNegative | Self::ScreenerFalsePositive => CorrectiveAction::Rescreen,
            Self::DecisionWrong => CorrectiveAction::OverrideDecision,
            Self::ExecutionFailure => CorrectiveAction::RetryExecute,
        }
    }
}

impl fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    /// Informational.
    Low,
    /// Worth a look.
    Medium,
    /// Money is being lost.
    High,
}

/// Suggested remedy; never applied automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectiveAction {
    /// Screen the entity again.
    Rescreen,
    /// Revisit the decision.
    OverrideDecision,
    /// Retry the platform call.
    RetryExecute,
}

/// One audit observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Identifier.
    pub id: String,
    /// Category.
    pub category: FindingCategory,
    /// Severity.
    pub severity: FindingSeverity,
    /// Entity concerned.
    pub entity_id: String,
    /// Skill the finding is attributed to.
    pub skill_id: Option<SkillId>,
    /// Action concerned, for decision and execution findings.
    pub action_id: Option<Uuid>,
    /// Human readable detail.
    pub detail: String,
    /// Suggested remedy.
    pub suggested: CorrectiveAction,
    /// Set once the librarian has consumed the finding.
    pub processed: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Finding {
    /// Unprocessed finding with the category's default remedy.
    #[must_use]
    pub fn new(
        category: FindingCategory,
        severity: FindingSeverity,
        entity_id: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("fnd-{}", Uuid::new_v4()),
            category,
            severity,
            entity_id: entity_id.into(),
            skill_id: None,
            action_id: None,
            detail: detail.into(),
            suggested: category.corrective(),
            processed: false,
            created_at: Utc::now(),
        }
    }

    /// Attributes the finding to a skill.
    #[must_use]
    pub fn with_skill(mut self, skill_id: Option<SkillId>) -> Self {
        self.skill_id = skill_id;
        self
    }

    /// Links the finding to an action.
    #[must_use]
    pub const fn with_action(mut self, action_id: Uuid) -> Self {
        self.action_id = Some(action_id);
        self
    }

    /// Knowledge topic; repeated topics validate one entry instead of creating another.
    #[must_use]
    pub fn topic(&self) -> String {
        let subject = self
            .skill_id
            .as_ref()
            .map_or("unattributed", SkillId::as_str);
        format!("audit.{}.{subject}", self.category.label())
    }
}
