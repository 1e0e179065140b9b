use std::{fmt::Write as _, sync::Arc};

use async_trait::async_trait;
use autopilot_actions::{ActionKind, ProposedAction};
use autopilot_reasoning::{parse_json_list, ReasoningService, Strategy, StrategyError};
use serde::Deserialize;
use tracing::warn;

use crate::context::DecisionContext;

/// Origin recorded on model proposals.
pub const MODEL_ORIGIN: &str = "reasoning";

/// Fixed policy preamble for the decision prompt.
pub const POLICY_PREAMBLE: &str = "You manage paid advertising entities. Propose only these \
operations: pause, resume, adjust_budget. Pause entities that are losing money with meaningful \
spend. Increase budgets only for strong performers, never above the stated ceiling, by at most \
the stated step. Leave entities marked recently_acted alone unless losses are severe. Answer \
with a JSON array of objects {\"entity_id\", \"action\", \"new_budget\" (adjust_budget only), \
\"reason\"} and nothing else. Return [] when no change is warranted.";

#[derive(Debug, Deserialize)]
struct ModelProposal {
    entity_id: String,
    action: String,
    #[serde(default)]
    new_budget: Option<f64>,
    #[serde(default)]
    reason: Option<String>,
}

/// Decision strategy backed by the reasoning service.
#[derive(Clone)]
pub struct ModelDecision {
    service: Arc<dyn ReasoningService>,
}

impl std::fmt::Debug for ModelDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelDecision")
            .field("service", &self.service.name())
            .finish()
    }
}

impl ModelDecision {
    /// Strategy over a service.
    #[must_use]
    pub const fn new(service: Arc<dyn ReasoningService>) -> Self {
        Self { service }
    }

    /// Prompt for a context.
    #[must_use]
    pub fn prompt(context: &DecisionContext) -> String {
        let t = &context.thresholds;
        let mut prompt = String::from(POLICY_PREAMBLE);
        let _ = write!(
            prompt,
            "\n\nBudget step: {:.0}%. Global budget ceiling: {:.2}.",
            t.budget_step * 100.0,
            t.budget_ceiling
        );
        if !context.knowledge.is_empty() {
            prompt.push_str("\n\nLessons learned:\n");
            for line in &context.knowledge {
                let _ = writeln!(prompt, "- {line}");
            }
        }
        let briefs = serde_json::to_string(&context.briefs).unwrap_or_else(|_| "[]".into());
        let _ = write!(prompt, "\n\nEntities:\n{briefs}\n");
        prompt
    }

    fn convert(context: &DecisionContext, raw: ModelProposal) -> Option<ProposedAction> {
        let Some(candidate) = context.candidates.get(&raw.entity_id) else {
            warn!(entity = %raw.entity_id, "model proposed an unknown entity; dropped");
            return None;
        };
        let Some(kind) = ActionKind::normalize(&raw.action) else {
            warn!(entity = %raw.entity_id, action = %raw.action, "unsupported operation; dropped");
            return None;
        };
        let metrics = &candidate.metrics;
        let rationale = raw
            .reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| {
                format!(
                    "{}: {}",
                    candidate.classification.label, candidate.classification.reason
                )
            });
        let mut proposal = ProposedAction::new(raw.entity_id, kind, rationale)
            .from_strategy(MODEL_ORIGIN)
            .with_skill(candidate.screen.skill_id.clone())
            .with_metrics(metrics)
            .auto(kind == ActionKind::Pause && candidate.screen.auto_execute == Some(true));
        if kind == ActionKind::AdjustBudget {
            let current = metrics.daily_budget;
            let ceiling = context.budget_ceiling(candidate);
            let step_cap = current * (1.0 + context.thresholds.budget_step);
            let requested = raw.new_budget.filter(|b| b.is_finite() && *b > 0.0)?;
            let target = requested.min(ceiling).min(step_cap.max(current));
            if (target - current).abs() < f64::EPSILON {
                return None;
            }
            proposal = proposal.with_budget(current, (target * 100.0).round() / 100.0);
        }
        Some(proposal)
    }
}

#[async_trait]
impl Strategy<DecisionContext, Vec<ProposedAction>> for ModelDecision {
    fn name(&self) -> &'static str {
        MODEL_ORIGIN
    }

    async fn run(&self, input: &DecisionContext) -> Result<Vec<ProposedAction>, StrategyError> {
        let text = self.service.complete(&Self::prompt(input)).await?;
        let raw: Vec<ModelProposal> = parse_json_list(&text, "actions")?;
        Ok(raw
            .into_iter()
            .filter_map(|proposal| Self::convert(input, proposal))
            .collect())
    }
}
