use std::{fmt::Write as _, sync::Arc};

use async_trait::async_trait;
use autopilot_actions::{Action, ActionId, ActionKind, ActionQueue, MetricsSnapshot};
use autopilot_knowledge::{Librarian, Outcome};
use autopilot_reasoning::{
    parse_json_object, ReasoningService, Strategy, StrategyChain, StrategyError,
};
use autopilot_skills::{ReflectionThresholds, SkillId};
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::assess::assess;

/// Shortest delay before an executed action is reflected on.
pub const MIN_DELAY_HOURS: i64 = 2;
/// Longest delay before an executed action is reflected on.
pub const MAX_DELAY_HOURS: i64 = 24;

/// Clamps a configured reflection delay into the supported window.
#[must_use]
pub fn clamp_delay(hours: i64) -> Duration {
    Duration::hours(hours.clamp(MIN_DELAY_HOURS, MAX_DELAY_HOURS))
}

/// One reflected action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionRecord {
    /// Action reflected on.
    pub action_id: ActionId,
    /// Target entity.
    pub entity_id: String,
    /// Operation.
    pub kind: ActionKind,
    /// Originating skill.
    pub skill_id: Option<SkillId>,
    /// Verdict.
    pub outcome: Outcome,
    /// Lesson learned.
    pub lesson: String,
    /// Strategy that produced the verdict.
    pub strategy: String,
    /// Metrics at decision time.
    pub pre: Option<MetricsSnapshot>,
    /// Metrics at reflection time.
    pub post: Option<MetricsSnapshot>,
    /// Reflection time.
    pub reflected_at: DateTime<Utc>,
}

/// Reflection records keyed by action id.
#[derive(Debug, Clone, Default)]
pub struct ReflectionLog {
    records: Arc<RwLock<IndexMap<ActionId, ReflectionRecord>>>,
}

impl ReflectionLog {
    /// Empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the action was already reflected.
    #[must_use]
    pub fn contains(&self, id: ActionId) -> bool {
        self.records.read().contains_key(&id)
    }

    /// Inserts a record unless one exists; returns whether it was inserted.
    pub fn insert(&self, record: ReflectionRecord) -> bool {
        let mut guard = self.records.write();
        if guard.contains_key(&record.action_id) {
            return false;
        }
        guard.insert(record.action_id, record);
        true
    }

    /// Every record.
    #[must_use]
    pub fn all(&self) -> Vec<ReflectionRecord> {
        self.records.read().values().cloned().collect()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

/// Strategy input.
#[derive(Debug, Clone)]
pub struct ReflectionInput {
    /// Executed action.
    pub action: Action,
    /// Current metrics of its entity.
    pub post: Option<MetricsSnapshot>,
    /// Deterministic rule constants.
    pub thresholds: ReflectionThresholds,
}

/// Verdict and lesson from one strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Judgement {
    /// Verdict.
    pub verdict: Outcome,
    /// Lesson.
    pub lesson: String,
}

/// Deterministic reflection rules.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleReflection;

#[async_trait]
impl Strategy<ReflectionInput, Judgement> for RuleReflection {
    fn name(&self) -> &'static str {
        "rules"
    }

    async fn run(&self, input: &ReflectionInput) -> Result<Judgement, StrategyError> {
        let (verdict, lesson) = assess(&input.action, input.post.as_ref(), &input.thresholds);
        Ok(Judgement { verdict, lesson })
    }
}

/// Reflection backed by the reasoning service.
#[derive(Clone)]
pub struct ModelReflection {
    service: Arc<dyn ReasoningService>,
}

impl std::fmt::Debug for ModelReflection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelReflection")
            .field("service", &self.service.name())
            .finish()
    }
}

impl ModelReflection {
    /// Strategy over a service.
    #[must_use]
    pub const fn new(service: Arc<dyn ReasoningService>) -> Self {
        Self { service }
    }

    fn prompt(input: &ReflectionInput) -> String {
        let action = &input.action;
        let mut prompt = String::from(
            "You review an operation applied to an advertising entity. Compare the metrics before \
             and after and answer with JSON {\"verdict\": \"correct\"|\"wrong\"|\"unclear\", \
             \"lesson\": \"one sentence\"} and nothing else.\n\n",
        );
        let _ = writeln!(
            prompt,
            "Operation: {} on {} ({})",
            action.kind, action.entity_id, action.rationale
        );
        let facts = json!({
            "before": action.pre_metrics,
            "after": input.post,
            "params": action.params,
        });
        let _ = write!(prompt, "Metrics: {facts}");
        prompt
    }
}

#[async_trait]
impl Strategy<ReflectionInput, Judgement> for ModelReflection {
    fn name(&self) -> &'static str {
        "reasoning"
    }

    async fn run(&self, input: &ReflectionInput) -> Result<Judgement, StrategyError> {
        if input.post.is_none() {
            return Err(StrategyError::Declined("no post-action metrics".into()));
        }
        let text = self.service.complete(&Self::prompt(input)).await?;
        let judgement: Judgement = parse_json_object(&text)?;
        if judgement.lesson.trim().is_empty() {
            return Err(StrategyError::Unparseable("empty lesson".into()));
        }
        Ok(judgement)
    }
}

/// Summary of a reflection pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReflectionSummary {
    /// New records.
    pub reflected: Vec<ReflectionRecord>,
    /// Actions already reflected, only their flag was repaired.
    pub already_reflected: usize,
}

/// Reflects on executed actions once their delay has elapsed.
#[derive(Debug, Clone)]
pub struct ReflectionEngine {
    chain: StrategyChain<ReflectionInput, Judgement>,
    queue: ActionQueue,
    librarian: Librarian,
    log: ReflectionLog,
    delay: Duration,
    thresholds: ReflectionThresholds,
}

impl ReflectionEngine {
    /// Engine with the model strategy first when a service is configured.
    #[must_use]
    pub fn new(
        queue: ActionQueue,
        librarian: Librarian,
        log: ReflectionLog,
        service: Option<Arc<dyn ReasoningService>>,
    ) -> Self {
        let mut chain = StrategyChain::new();
        if let Some(service) = service {
            chain = chain.then(Arc::new(ModelReflection::new(service)));
        }
        Self {
            chain: chain.then(Arc::new(RuleReflection)),
            queue,
            librarian,
            log,
            delay: clamp_delay(6),
            thresholds: ReflectionThresholds::default(),
        }
    }

    /// Sets the delay in hours, clamped to 2 to 24.
    #[must_use]
    pub fn with_delay_hours(mut self, hours: i64) -> Self {
        self.delay = clamp_delay(hours);
        self
    }

    /// Sets the deterministic rule constants.
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: ReflectionThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Effective delay.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Reflection log.
    #[must_use]
    pub const fn log(&self) -> &ReflectionLog {
        &self.log
    }

    /// Reflects on every due action, using `post` metrics keyed by entity id.
    pub async fn reflect_due(
        &self,
        now: DateTime<Utc>,
        post: &IndexMap<String, MetricsSnapshot>,
    ) -> ReflectionSummary {
        let mut summary = ReflectionSummary::default();
        for action in self.queue.executed_unreflected(now - self.delay) {
            let snapshot = post.get(&action.entity_id).copied();
            match self.reflect(action, snapshot).await {
                Some(record) => summary.reflected.push(record),
                None => summary.already_reflected += 1,
            }
        }
        if !summary.reflected.is_empty() {
            info!(
                reflected = summary.reflected.len(),
                repaired = summary.already_reflected,
                "reflection pass complete"
            );
        }
        summary
    }

    /// Reflects on one action. Returns `None` when it was already reflected.
    pub async fn reflect(
        &self,
        action: Action,
        post: Option<MetricsSnapshot>,
    ) -> Option<ReflectionRecord> {
        if action.reflected || self.log.contains(action.id) {
            let _ = self.queue.mark_reflected(action.id);
            return None;
        }
        let input = ReflectionInput {
            action,
            post,
            thresholds: self.thresholds.clone(),
        };
        let (judgement, strategy) = match self.chain.run(&input).await {
            Ok(resolved) => (resolved.output, resolved.strategy.to_string()),
            Err(err) => {
                warn!(action = %input.action.id, error = %err, "reflection strategies failed");
                (
                    Judgement {
                        verdict: Outcome::Unclear,
                        lesson: "no strategy could judge the action".into(),
                    },
                    "none".into(),
                )
            }
        };
        let action = input.action;
        let record = ReflectionRecord {
            action_id: action.id,
            entity_id: action.entity_id.clone(),
            kind: action.kind,
            skill_id: action.skill_id.clone(),
            outcome: judgement.verdict,
            lesson: judgement.lesson,
            strategy,
            pre: action.pre_metrics,
            post: input.post,
            reflected_at: Utc::now(),
        };
        if !self.log.insert(record.clone()) {
            return None;
        }
        match self.queue.mark_reflected(action.id) {
            Ok(true) => {}
            Ok(false) => debug!(action = %action.id, "reflected flag already set"),
            Err(err) => warn!(action = %action.id, error = %err, "could not flag reflected action"),
        }
        if let Some(skill_id) = &record.skill_id {
            if let Err(err) = self.librarian.record_outcome(skill_id, record.outcome) {
                warn!(skill = %skill_id, error = %err, "outcome not counted");
            }
        }
        let subject = record
            .skill_id
            .as_ref()
            .map_or_else(|| record.entity_id.clone(), ToString::to_string);
        self.librarian.record_lesson(
            format!("lesson.{}.{subject}", record.kind),
            record.lesson.clone(),
            if record.outcome == Outcome::Unclear { 0.4 } else { 0.6 },
            record.skill_id.clone(),
            json!({
                "action_id": record.action_id,
                "outcome": record.outcome,
                "strategy": record.strategy,
                "pre": record.pre,
                "post": record.post,
            }),
        );
        debug!(action = %record.action_id, outcome = record.outcome.label(), "action reflected");
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_actions::{ActionStatus, ProposedAction};
    use autopilot_knowledge::KnowledgeBase;
    use autopilot_reasoning::ReasoningError;
    use autopilot_skills::{seed::SEVERE_LOSS_GUARD_ID, SkillStore};

    struct Replies(&'static str);

    #[async_trait]
    impl ReasoningService for Replies {
        fn name(&self) -> &str {
            "replies"
        }

        async fn complete(&self, _prompt: &str) -> Result<String, ReasoningError> {
            Ok(self.0.to_string())
        }
    }

    fn executed_pause(queue: &ActionQueue) -> Action {
        let mut proposal = ProposedAction::new("c1", ActionKind::Pause, "loss")
            .auto(true)
            .with_skill(Some(SEVERE_LOSS_GUARD_ID.into()));
        proposal.pre_metrics = Some(MetricsSnapshot {
            roas_3d: 0.15,
            spend_3d: 120.0,
            ..MetricsSnapshot::default()
        });
        let action = queue.submit(proposal).unwrap();
        queue
            .transition(action.id, ActionStatus::Executed, None)
            .unwrap()
    }

    fn post() -> IndexMap<String, MetricsSnapshot> {
        let mut post = IndexMap::new();
        post.insert(
            "c1".to_string(),
            MetricsSnapshot {
                roas_3d: 0.1,
                ..MetricsSnapshot::default()
            },
        );
        post
    }

    #[test]
    fn delay_is_clamped() {
        assert_eq!(clamp_delay(0), Duration::hours(2));
        assert_eq!(clamp_delay(72), Duration::hours(24));
        assert_eq!(clamp_delay(6), Duration::hours(6));
    }

    #[tokio::test]
    async fn reflecting_twice_does_not_double_count() {
        let queue = ActionQueue::new();
        let librarian = Librarian::new(SkillStore::bootstrap(), KnowledgeBase::new());
        let engine =
            ReflectionEngine::new(queue.clone(), librarian.clone(), ReflectionLog::new(), None);
        let action = executed_pause(&queue);

        let later = Utc::now() + Duration::hours(7);
        let first = engine.reflect_due(later, &post()).await;
        assert_eq!(first.reflected.len(), 1);
        assert_eq!(first.reflected[0].outcome, Outcome::Correct);

        let stale_copy = Action {
            reflected: false,
            ..queue.get(action.id).unwrap()
        };
        assert!(engine.reflect(stale_copy, None).await.is_none());
        assert!(engine.reflect_due(later, &post()).await.reflected.is_empty());

        let stats = librarian
            .skills()
            .get(&SEVERE_LOSS_GUARD_ID.into())
            .unwrap()
            .stats;
        assert_eq!((stats.correct, stats.wrong), (1, 0));
        assert_eq!(engine.log().len(), 1);
    }

    #[tokio::test]
    async fn actions_inside_the_delay_wait() {
        let queue = ActionQueue::new();
        let librarian = Librarian::new(SkillStore::bootstrap(), KnowledgeBase::new());
        let engine = ReflectionEngine::new(queue.clone(), librarian, ReflectionLog::new(), None)
            .with_delay_hours(1);
        executed_pause(&queue);
        assert!(engine
            .reflect_due(Utc::now() + Duration::minutes(90), &post())
            .await
            .reflected
            .is_empty());
    }

    #[tokio::test]
    async fn model_verdict_is_used_when_parseable() {
        let queue = ActionQueue::new();
        let librarian = Librarian::new(SkillStore::bootstrap(), KnowledgeBase::new());
        let engine = ReflectionEngine::new(
            queue.clone(),
            librarian.clone(),
            ReflectionLog::new(),
            Some(Arc::new(Replies(
                "Verdict: {\"verdict\": \"wrong\", \"lesson\": \"weekend dips recover\"}",
            ))),
        );
        let action = executed_pause(&queue);
        let record = engine
            .reflect(queue.get(action.id).unwrap(), Some(MetricsSnapshot::default()))
            .await
            .unwrap();
        assert_eq!(record.strategy, "reasoning");
        assert_eq!(record.outcome, Outcome::Wrong);
        assert_eq!(librarian.knowledge().len(), 1);
    }
}
