use async_trait::async_trait;
use autopilot_actions::{ActionKind, ProposedAction};
use autopilot_reasoning::{Strategy, StrategyError};
use autopilot_triage::Label;

use crate::context::{DecisionCandidate, DecisionContext};

/// Origin recorded on deterministic proposals.
pub const FALLBACK_ORIGIN: &str = "rules";

/// Threshold rules used when the reasoning service cannot be used.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackDecision;

impl FallbackDecision {
    /// Proposal for one candidate, if any.
    #[must_use]
    pub fn propose(
        context: &DecisionContext,
        candidate: &DecisionCandidate,
    ) -> Option<ProposedAction> {
        let metrics = &candidate.metrics;
        let t = &context.thresholds;
        let label = candidate.classification.label;
        let reason = &candidate.classification.reason;
        let base = |kind: ActionKind, rationale: String| {
            ProposedAction::new(metrics.entity_id.clone(), kind, rationale)
                .from_strategy(FALLBACK_ORIGIN)
                .with_skill(candidate.screen.skill_id.clone())
                .with_metrics(metrics)
        };

        let zero_conversion_burn = metrics.last_3d.conversions <= 0.0
            && metrics.last_3d.spend >= t.zero_conversion_spend_3d;

        if !metrics.is_active() {
            return None;
        }
        if label == Label::LossSevere {
            return Some(base(ActionKind::Pause, format!("{label}: {reason}")).auto(true));
        }
        if zero_conversion_burn {
            return Some(
                base(
                    ActionKind::Pause,
                    format!(
                        "no conversions on {:.2} spend over 3 days (limit {:.2})",
                        metrics.last_3d.spend, t.zero_conversion_spend_3d
                    ),
                )
                .auto(true),
            );
        }
        if matches!(label, Label::LossMild | Label::Declining) {
            return Some(base(ActionKind::Pause, format!("{label}: {reason}")));
        }
        if label == Label::HighPotential {
            let ceiling = context.budget_ceiling(candidate);
            let current = metrics.daily_budget;
            if current > 0.0 && current < ceiling {
                let target = (current * (1.0 + t.budget_step)).min(ceiling);
                return Some(
                    base(
                        ActionKind::AdjustBudget,
                        format!(
                            "{label}: {reason}; budget {current:.2} -> {target:.2} \
                             (ceiling {ceiling:.2})"
                        ),
                    )
                    .with_budget(current, (target * 100.0).round() / 100.0),
                );
            }
        }
        None
    }
}

#[async_trait]
impl Strategy<DecisionContext, Vec<ProposedAction>> for FallbackDecision {
    fn name(&self) -> &'static str {
        FALLBACK_ORIGIN
    }

    async fn run(&self, input: &DecisionContext) -> Result<Vec<ProposedAction>, StrategyError> {
        Ok(input
            .candidates
            .values()
            .filter_map(|candidate| Self::propose(input, candidate))
            .collect())
    }
}
