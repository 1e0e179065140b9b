use std::sync::Arc;

use autopilot_actions::{ActionQueue, ProposedAction};
use autopilot_reasoning::{ReasoningService, StrategyChain};
use autopilot_skills::DecisionThresholds;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    context::{DecisionCandidate, DecisionContext, EntityBrief},
    fallback::{FallbackDecision, FALLBACK_ORIGIN},
    model::ModelDecision,
};

/// Result of the decision phase. Nothing here has been persisted or executed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    /// Proposed actions.
    pub proposals: Vec<ProposedAction>,
    /// Strategy that produced them.
    pub strategy: String,
    /// Why earlier strategies were skipped.
    pub fallback_reasons: Vec<String>,
    /// Entities excluded by the cooldown.
    pub cooled_down: Vec<String>,
    /// Proposals whose auto flag was cleared by a rule requiring approval.
    pub forced_approval: Vec<String>,
}

/// Proposes actions for classified entities.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    chain: StrategyChain<DecisionContext, Vec<ProposedAction>>,
    thresholds: DecisionThresholds,
}

impl DecisionEngine {
    /// Engine with the model strategy first when a service is configured.
    #[must_use]
    pub fn new(thresholds: DecisionThresholds, service: Option<Arc<dyn ReasoningService>>) -> Self {
        let mut chain = StrategyChain::new();
        if let Some(service) = service {
            chain = chain.then(Arc::new(ModelDecision::new(service)));
        }
        Self {
            chain: chain.then(Arc::new(FallbackDecision)),
            thresholds,
        }
    }

    /// Decides for the given candidates.
    ///
    /// Entities acted on within the cooldown are excluded from every strategy.
    pub async fn decide(
        &self,
        candidates: Vec<DecisionCandidate>,
        queue: &ActionQueue,
        knowledge: Vec<String>,
        now: DateTime<Utc>,
    ) -> DecisionOutcome {
        let cooldown = Duration::hours(self.thresholds.cooldown_hours.max(0));
        let recent_window = cooldown * 3;
        let mut outcome = DecisionOutcome::default();
        let mut context = DecisionContext {
            knowledge,
            thresholds: self.thresholds.clone(),
            ..DecisionContext::default()
        };
        for candidate in candidates {
            let id = candidate.metrics.entity_id.clone();
            let last = queue.last_action_at(&id);
            if last.is_some_and(|at| now - at < cooldown) {
                outcome.cooled_down.push(id);
                continue;
            }
            let recently_acted = last.is_some_and(|at| now - at < recent_window);
            context
                .briefs
                .push(EntityBrief::from_candidate(&candidate, recently_acted));
            context.candidates.insert(id, candidate);
        }
        if context.candidates.is_empty() {
            outcome.strategy = FALLBACK_ORIGIN.to_string();
            return outcome;
        }

        let resolved = match self.chain.run(&context).await {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(error = %err, "every decision strategy failed");
                outcome.fallback_reasons.push(err.to_string());
                return outcome;
            }
        };
        outcome.strategy = resolved.strategy.to_string();
        outcome.fallback_reasons = resolved.skipped;
        for mut proposal in resolved.output {
            let forced = context
                .candidates
                .get(&proposal.entity_id)
                .is_some_and(DecisionCandidate::approval_forced);
            if forced && proposal.auto_execute {
                proposal.auto_execute = false;
                outcome.forced_approval.push(proposal.entity_id.clone());
            }
            outcome.proposals.push(proposal);
        }
        info!(
            strategy = %outcome.strategy,
            proposals = outcome.proposals.len(),
            cooled_down = outcome.cooled_down.len(),
            "decision phase complete"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use autopilot_actions::ActionKind;
    use autopilot_reasoning::ReasoningError;
    use autopilot_signals::{CampaignMetrics, TrendDirection};
    use autopilot_skills::{ClassifierThresholds, SkillId, Verdict};
    use autopilot_triage::{Classifier, ScreenResult};
    use chrono::NaiveDate;

    struct Scripted(Result<String, ()>);

    #[async_trait]
    impl ReasoningService for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _prompt: &str) -> Result<String, ReasoningError> {
            self.0
                .clone()
                .map_err(|()| ReasoningError::NotConfigured("offline".into()))
        }
    }

    fn candidate(
        id: &str,
        day: (f64, f64, f64),
        budget: f64,
        auto: Option<bool>,
    ) -> DecisionCandidate {
        let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let metrics = (0..3)
            .fold(CampaignMetrics::builder(id).daily_budget(budget), |b, i| {
                b.day(start + chrono::Duration::days(i), day.0, day.1, day.2)
            })
            .build()
            .unwrap();
        let thresholds = ClassifierThresholds::default();
        let classification = Classifier::classify(&metrics, &thresholds, None);
        DecisionCandidate {
            screen: ScreenResult {
                entity_id: id.into(),
                verdict: Verdict::NeedsDecision,
                reason: "test".into(),
                skill_id: auto.map(|_| SkillId::from("rule.x")),
                auto_execute: auto,
                thresholds,
                max_severity: 0,
                confidence: 1.0,
                trend: TrendDirection::Stable,
            },
            metrics,
            classification,
            goal_budget_ceiling: None,
        }
    }

    #[tokio::test]
    async fn fallback_pauses_severe_loss_automatically() {
        let engine = DecisionEngine::new(DecisionThresholds::default(), None);
        let outcome = engine
            .decide(
                vec![candidate("c1", (40.0, 6.0, 0.0), 50.0, Some(true))],
                &ActionQueue::new(),
                Vec::new(),
                Utc::now(),
            )
            .await;
        assert_eq!(outcome.strategy, "rules");
        let proposal = &outcome.proposals[0];
        assert_eq!(proposal.kind, ActionKind::Pause);
        assert!(proposal.auto_execute);
        assert!(proposal.rationale.starts_with("loss_severe"));
    }

    #[tokio::test]
    async fn high_potential_budget_respects_step_and_needs_approval() {
        let engine = DecisionEngine::new(DecisionThresholds::default(), None);
        let outcome = engine
            .decide(
                vec![candidate("c1", (20.0, 70.0, 2.0), 100.0, None)],
                &ActionQueue::new(),
                Vec::new(),
                Utc::now(),
            )
            .await;
        let proposal = &outcome.proposals[0];
        assert_eq!(proposal.kind, ActionKind::AdjustBudget);
        assert_eq!(proposal.params.new_budget, Some(125.0));
        assert!(!proposal.auto_execute);
    }

    #[tokio::test]
    async fn model_output_is_filtered_and_unknown_entities_dropped() {
        let reply = r#"Here is my plan: {"actions": [
            {"entity_id": "c1", "action": "Pause", "reason": "bleeding"},
            {"entity_id": "ghost", "action": "pause"},
            {"entity_id": "c2", "action": "increase_budget", "new_budget": 1000}
        ]}"#;
        let engine = DecisionEngine::new(
            DecisionThresholds::default(),
            Some(Arc::new(Scripted(Ok(reply.into())))),
        );
        let outcome = engine
            .decide(
                vec![
                    candidate("c1", (40.0, 6.0, 0.0), 50.0, Some(false)),
                    candidate("c2", (20.0, 70.0, 2.0), 100.0, None),
                ],
                &ActionQueue::new(),
                vec!["[lesson.x] weekend dips recover".into()],
                Utc::now(),
            )
            .await;
        assert_eq!(outcome.strategy, "reasoning");
        assert_eq!(outcome.proposals.len(), 2);
        assert_eq!(outcome.proposals[0].rationale, "bleeding");
        assert!(!outcome.proposals[0].auto_execute);
        assert_eq!(outcome.proposals[1].kind, ActionKind::AdjustBudget);
        assert_eq!(outcome.proposals[1].params.new_budget, Some(125.0));
    }

    #[tokio::test]
    async fn unavailable_service_and_cooldown() {
        let engine = DecisionEngine::new(
            DecisionThresholds::default(),
            Some(Arc::new(Scripted(Err(())))),
        );
        let queue = ActionQueue::new();
        queue
            .submit(ProposedAction::new("c2", ActionKind::Pause, "earlier"))
            .unwrap();
        let outcome = engine
            .decide(
                vec![
                    candidate("c1", (40.0, 6.0, 0.0), 50.0, Some(false)),
                    candidate("c2", (40.0, 6.0, 0.0), 50.0, None),
                ],
                &queue,
                Vec::new(),
                Utc::now(),
            )
            .await;
        assert_eq!(outcome.strategy, "rules");
        assert_eq!(outcome.fallback_reasons.len(), 1);
        assert_eq!(outcome.cooled_down, vec!["c2".to_string()]);
        assert_eq!(outcome.forced_approval, vec!["c1".to_string()]);
        assert!(!outcome.proposals[0].auto_execute);
    }

    #[test]
    fn prompt_carries_policy_knowledge_and_briefs() {
        let c = candidate("c1", (40.0, 6.0, 0.0), 50.0, None);
        let context = DecisionContext {
            briefs: vec![EntityBrief::from_candidate(&c, true)],
            knowledge: vec!["[k] keep weekends".into()],
            ..DecisionContext::default()
        };
        let prompt = ModelDecision::prompt(&context);
        assert!(prompt.starts_with(crate::model::POLICY_PREAMBLE));
        assert!(prompt.contains("keep weekends"));
        assert!(prompt.contains("\"recently_acted\":true"));
    }
}
