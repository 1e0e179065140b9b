use autopilot_signals::{CampaignMetrics, TrendDirection};
use autopilot_skills::DecisionThresholds;
use autopilot_triage::{Classification, Label, ScreenResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// An entity that reached the decision phase.
#[derive(Debug, Clone)]
pub struct DecisionCandidate {
    /// Windowed metrics.
    pub metrics: CampaignMetrics,
    /// Screener result, carrying rule attribution and the auto flag.
    pub screen: ScreenResult,
    /// Classifier result.
    pub classification: Classification,
    /// Product goal budget ceiling, if any.
    pub goal_budget_ceiling: Option<f64>,
}

impl DecisionCandidate {
    /// Whether the attributed rule forbids automatic execution.
    #[must_use]
    pub fn approval_forced(&self) -> bool {
        self.screen.auto_execute == Some(false)
    }
}

/// Compact per-entity summary sent to the reasoning service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityBrief {
    /// Entity identifier.
    pub id: String,
    /// Classifier label.
    pub label: Label,
    /// Three-day ratio.
    pub roas_3d: f64,
    /// Seven-day ratio.
    pub roas_7d: f64,
    /// Three-day spend.
    pub spend_3d: f64,
    /// Three-day conversions.
    pub conversions_3d: f64,
    /// Daily budget.
    pub daily_budget: f64,
    /// Trend direction.
    pub trend: TrendDirection,
    /// Acted on recently, outside the cooldown.
    pub recently_acted: bool,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl EntityBrief {
    /// Summarizes a candidate.
    #[must_use]
    pub fn from_candidate(candidate: &DecisionCandidate, recently_acted: bool) -> Self {
        let metrics = &candidate.metrics;
        Self {
            id: metrics.entity_id.clone(),
            label: candidate.classification.label,
            roas_3d: round2(metrics.roas_3d()),
            roas_7d: round2(metrics.roas_7d()),
            spend_3d: round2(metrics.last_3d.spend),
            conversions_3d: metrics.last_3d.conversions,
            daily_budget: round2(metrics.daily_budget),
            trend: candidate.screen.trend,
            recently_acted,
        }
    }
}

/// Input shared by every decision strategy.
#[derive(Debug, Clone, Default)]
pub struct DecisionContext {
    /// Eligible candidates by entity id.
    pub candidates: IndexMap<String, DecisionCandidate>,
    /// Summaries in candidate order.
    pub briefs: Vec<EntityBrief>,
    /// Promoted knowledge lines.
    pub knowledge: Vec<String>,
    /// Decision constants.
    pub thresholds: DecisionThresholds,
}

impl DecisionContext {
    /// Budget ceiling for a candidate: the tighter of the goal and the global ceiling.
    #[must_use]
    pub fn budget_ceiling(&self, candidate: &DecisionCandidate) -> f64 {
        candidate
            .goal_budget_ceiling
            .map_or(self.thresholds.budget_ceiling, |goal| {
                goal.min(self.thresholds.budget_ceiling)
            })
    }
}
