use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use autopilot_actions::{
    ActionKind, ActionStatus, DryRunExecutor, PlatformError, PlatformExecutor, ProposedAction,
};
use autopilot_knowledge::{KnowledgeEntry, KnowledgeKind};
use autopilot_orchestrator::{
    CyclePhase, Pipeline, PipelineConfig, PipelineTelemetry, SnapshotStatus,
};
use autopilot_reasoning::{ReasoningError, ReasoningService};
use autopilot_signals::{DateRange, EntityStatus, FetchScope, MetricsSource, RawSample, SourceError};
use autopilot_skills::{seed::SEVERE_LOSS_GUARD_ID, SkillId, Verdict};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use shared_event_bus::{EventPublisher, MemoryEventBus};

/// Daily profile repeated over the last three days of every requested range.
#[derive(Debug, Clone, Copy)]
struct Profile {
    spend: f64,
    revenue: f64,
    conversions: f64,
}

const fn profile(spend: f64, revenue: f64, conversions: f64) -> Profile {
    Profile {
        spend,
        revenue,
        conversions,
    }
}

#[derive(Default)]
struct ScriptedSource {
    entities: Mutex<Vec<(String, Profile)>>,
    fail: bool,
    stall: Option<Duration>,
}

impl ScriptedSource {
    fn with(entities: &[(&str, Profile)]) -> Self {
        let source = Self::default();
        source.set(entities);
        source
    }

    fn set(&self, entities: &[(&str, Profile)]) {
        *self.entities.lock() = entities
            .iter()
            .map(|(id, p)| ((*id).to_string(), *p))
            .collect();
    }
}

#[async_trait]
impl MetricsSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn priority(&self) -> u8 {
        1
    }

    async fn fetch(
        &self,
        _scope: &FetchScope,
        range: &DateRange,
    ) -> Result<Vec<RawSample>, SourceError> {
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        if self.fail {
            return Err(SourceError::Unavailable("connection refused".into()));
        }
        let entities = self.entities.lock().clone();
        Ok(entities
            .iter()
            .flat_map(|(id, p)| {
                (0..3).map(move |back| RawSample {
                    daily_budget: Some(50.0),
                    account: Some("acct-1".into()),
                    ..RawSample::daily(
                        id.clone(),
                        range.end - ChronoDuration::days(back),
                        p.spend,
                        p.revenue,
                        p.conversions,
                    )
                })
            })
            .collect())
    }
}

/// Platform that rejects every call and counts them.
#[derive(Default)]
struct RejectingPlatform {
    calls: AtomicUsize,
}

#[async_trait]
impl PlatformExecutor for RejectingPlatform {
    fn name(&self) -> &str {
        "rejecting"
    }

    async fn set_status(
        &self,
        _entity_id: &str,
        _status: EntityStatus,
    ) -> Result<(), PlatformError> {
        self.reject()
    }

    async fn set_budget(&self, _entity_id: &str, _amount: f64) -> Result<(), PlatformError> {
        self.reject()
    }
}

impl RejectingPlatform {
    fn reject(&self) -> Result<(), PlatformError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Err(PlatformError::Rejected {
            code: "17".into(),
            message: format!("User request limit reached (call {call})"),
        })
    }
}

/// Reasoning service answering every prompt with a canned reply.
struct ScriptedReasoning {
    reply: &'static str,
    prompts: AtomicUsize,
}

impl ScriptedReasoning {
    const fn new(reply: &'static str) -> Self {
        Self {
            reply,
            prompts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoning {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _prompt: &str) -> Result<String, ReasoningError> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.to_string())
    }
}

fn config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.execution.backoff_secs = 0;
    config
}

fn pipeline_with(
    config: PipelineConfig,
    source: Arc<dyn MetricsSource>,
    platform: Arc<dyn PlatformExecutor>,
) -> Pipeline {
    Pipeline::builder(config)
        .source(source)
        .platform(platform)
        .build()
        .unwrap()
}

#[tokio::test]
async fn sustained_heavy_loss_is_paused_without_approval() {
    let source = Arc::new(ScriptedSource::with(&[("c-loss", profile(40.0, 6.0, 0.0))]));
    let platform = Arc::new(DryRunExecutor::new());
    let mut pipeline = pipeline_with(config(), source, platform.clone());

    let snapshot = pipeline.run_cycle(Utc::now()).await;

    assert_eq!(snapshot.status, SnapshotStatus::Completed);
    assert_eq!(snapshot.last_phase, Some(CyclePhase::Reflect));
    assert_eq!(snapshot.verdicts.get("needs_decision"), Some(&1));
    assert_eq!(snapshot.labels.get("loss_severe"), Some(&1));
    assert_eq!(snapshot.executed, 1);
    assert_eq!(snapshot.pending_approval, 0);

    let actions = pipeline.queue().all();
    assert_eq!(actions.len(), 1);
    let action = &actions[0];
    assert_eq!(action.kind, ActionKind::Pause);
    assert!(action.auto_execute);
    assert_eq!(action.status, ActionStatus::Executed);
    assert!(action.reviewed_at.is_none());
    assert_eq!(action.skill_id, Some(SkillId::from(SEVERE_LOSS_GUARD_ID)));
    let statuses: Vec<_> = pipeline
        .queue()
        .journal()
        .history(action.id)
        .into_iter()
        .map(|event| event.status)
        .collect();
    assert!(!statuses.contains(&ActionStatus::Approved));
    assert_eq!(platform.calls().len(), 1);

    let guard = pipeline
        .librarian()
        .skills()
        .get(&SkillId::from(SEVERE_LOSS_GUARD_ID))
        .unwrap();
    assert_eq!(guard.stats.triggered, 1);
}

#[tokio::test]
async fn trivial_spend_is_skipped_and_never_classified() {
    let source = Arc::new(ScriptedSource::with(&[("c-small", profile(1.0, 0.0, 0.0))]));
    let mut pipeline = pipeline_with(config(), source, Arc::new(DryRunExecutor::new()));

    let snapshot = pipeline.run_cycle(Utc::now()).await;

    assert_eq!(snapshot.status, SnapshotStatus::Completed);
    assert_eq!(snapshot.verdicts.get("skip"), Some(&1));
    assert!(snapshot.labels.is_empty());
    assert_eq!(snapshot.proposals, 0);
    assert!(pipeline.queue().all().is_empty());
    let state = pipeline.cache().get("c-small").unwrap();
    assert_eq!(state.verdict, Verdict::Skip);
    assert!(state.label.is_none());
}

#[tokio::test]
async fn approved_action_fails_after_bounded_retries() {
    let source = Arc::new(ScriptedSource::with(&[("c-1", profile(20.0, 24.0, 1.0))]));
    let platform = Arc::new(RejectingPlatform::default());
    let mut pipeline = pipeline_with(config(), source, platform.clone());

    let queued = pipeline
        .queue()
        .submit(ProposedAction::new("c-1", ActionKind::Pause, "operator request"))
        .unwrap();
    pipeline.desk().approve(queued.id, Some("go".into())).unwrap();

    let snapshot = pipeline.run_cycle(Utc::now()).await;

    assert_eq!(snapshot.status, SnapshotStatus::Completed);
    assert_eq!(snapshot.failed, 1);
    assert_eq!(platform.calls.load(Ordering::SeqCst), 3);
    let action = pipeline.queue().get(queued.id).unwrap();
    assert_eq!(action.status, ActionStatus::Failed);
    assert_eq!(action.attempts, 3);
    assert_eq!(
        action.last_error.as_deref(),
        Some("platform error 17: User request limit reached (call 3)")
    );

    // A failed action is terminal; the next cycle must not retry it.
    pipeline.run_cycle(Utc::now()).await;
    assert_eq!(platform.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn audit_decays_stale_knowledge_without_archiving() {
    let source = Arc::new(ScriptedSource::with(&[("c-1", profile(20.0, 30.0, 1.0))]));
    let pipeline = pipeline_with(config(), source, Arc::new(DryRunExecutor::new()));
    let now = Utc::now();
    let (id, created) = pipeline.librarian().upsert(
        KnowledgeEntry::new(
            "lesson.pause.recovery",
            KnowledgeKind::Lesson,
            "pauses rarely recover",
            0.35,
        )
        .validated_at(now - ChronoDuration::days(31)),
    );
    assert!(created);

    let outcome = pipeline.maintenance().audit(now).await;

    assert_eq!(outcome.decay.decayed, vec![id.clone()]);
    assert!(outcome.decay.archived.is_empty());
    let entry = pipeline.librarian().knowledge().get(&id).unwrap();
    assert!((entry.confidence - 0.25).abs() < 1e-9);
    assert!(!entry.archived);
}

#[tokio::test]
async fn failing_provider_fails_cycle_before_any_phase() {
    let source = Arc::new(ScriptedSource {
        fail: true,
        ..ScriptedSource::default()
    });
    let mut pipeline = pipeline_with(config(), source, Arc::new(DryRunExecutor::new()));

    let snapshot = pipeline.run_cycle(Utc::now()).await;

    assert_eq!(snapshot.status, SnapshotStatus::Failed);
    assert_eq!(snapshot.last_phase, None);
    assert!(snapshot.error.as_deref().unwrap().contains("monitor phase"));
    assert_eq!(snapshot.failed_sources, vec!["scripted".to_string()]);
    assert_eq!(pipeline.ledger().len(), 1);
    assert_eq!(pipeline.ledger().latest().unwrap().id, snapshot.id);
}

#[tokio::test(start_paused = true)]
async fn cycle_deadline_seals_a_failed_snapshot() {
    let source = Arc::new(ScriptedSource {
        stall: Some(Duration::from_secs(120)),
        ..ScriptedSource::with(&[("c-1", profile(20.0, 30.0, 1.0))])
    });
    let mut config = config();
    config.cycle.deadline_secs = 5;
    config.cycle.source_timeout_secs = 600;
    let mut pipeline = pipeline_with(config, source, Arc::new(DryRunExecutor::new()));

    let snapshot = pipeline.run_cycle(Utc::now()).await;

    assert_eq!(snapshot.status, SnapshotStatus::Failed);
    assert_eq!(snapshot.error.as_deref(), Some("cycle deadline of 5s exceeded"));
    assert!(snapshot.finished_at.is_some());
}

#[tokio::test]
async fn second_cycle_respects_open_actions_and_reflects_later() {
    let source = Arc::new(ScriptedSource::with(&[("c-loss", profile(40.0, 6.0, 0.0))]));
    let mut pipeline = pipeline_with(config(), source, Arc::new(DryRunExecutor::new()));
    let start = Utc::now();

    let first = pipeline.run_cycle(start).await;
    assert_eq!(first.queued, 1);
    assert_eq!(first.reflected, 0);

    let second = pipeline.run_cycle(start + ChronoDuration::hours(7)).await;
    assert_eq!(second.status, SnapshotStatus::Completed);
    assert_eq!(second.queued, 0);
    assert_eq!(second.cooled_down, 1);
    assert_eq!(second.reflected, 1);
    assert_eq!(pipeline.queue().all().len(), 1);

    let records = pipeline.reflections().all();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].entity_id, "c-loss");
    assert!(pipeline.queue().all()[0].reflected);

    // Reflection happens once per action.
    let third = pipeline.run_cycle(start + ChronoDuration::hours(8)).await;
    assert_eq!(third.reflected, 0);
}

#[tokio::test]
async fn worsening_entity_is_escalated_and_queued_for_approval() {
    let source = Arc::new(ScriptedSource::with(&[("c-1", profile(20.0, 24.0, 1.0))]));
    let mut pipeline = pipeline_with(config(), source.clone(), Arc::new(DryRunExecutor::new()));
    let start = Utc::now();

    let first = pipeline.run_cycle(start).await;
    assert_eq!(first.verdicts.get("watch"), Some(&1));
    assert!(first.escalated.is_empty());

    source.set(&[("c-1", profile(20.0, 12.0, 1.0))]);
    let second = pipeline.run_cycle(start + ChronoDuration::hours(1)).await;

    assert_eq!(second.labels.get("loss_mild"), Some(&1));
    assert_eq!(second.escalated, vec!["c-1".to_string()]);
    assert_eq!(second.pending_approval, 1);
    assert_eq!(second.executed, 0);
    let pending = pipeline.desk().pending();
    assert_eq!(pending[0].kind, ActionKind::Pause);
    assert!(!pending[0].auto_execute);
}

#[tokio::test]
async fn cycle_events_reach_the_bus() {
    let bus = Arc::new(MemoryEventBus::new(256));
    let publisher: Arc<dyn EventPublisher> = bus.clone();
    let telemetry = PipelineTelemetry::builder("orchestrator")
        .event_publisher(publisher)
        .build()
        .unwrap();
    let source = Arc::new(ScriptedSource::with(&[("c-loss", profile(40.0, 6.0, 0.0))]));
    let mut pipeline = Pipeline::builder(config())
        .source(source)
        .platform(Arc::new(DryRunExecutor::new()))
        .telemetry(telemetry)
        .build()
        .unwrap();

    let snapshot = pipeline.run_cycle(Utc::now()).await;

    let completed = bus.events_of("autopilot.cycle.completed");
    assert_eq!(completed.len(), 1);
    assert_eq!(
        completed[0].payload["cycle_id"],
        serde_json::json!(snapshot.id.to_string())
    );
    assert_eq!(bus.events_of("autopilot.monitor.completed").len(), 1);
    assert_eq!(bus.events_of("autopilot.reflect.completed").len(), 1);
}

#[tokio::test]
async fn model_proposals_are_filtered_and_await_approval() {
    let reasoning = Arc::new(ScriptedReasoning::new(
        "Here you go:\n```json\n\
         [{\"entity_id\": \"c-1\", \"action\": \"PAUSE\", \"reason\": \"bleeding money\"}, \
         {\"entity_id\": \"ghost\", \"action\": \"pause\"}]\n```",
    ));
    let source = Arc::new(ScriptedSource::with(&[("c-1", profile(20.0, 12.0, 1.0))]));
    let mut pipeline = Pipeline::builder(config())
        .source(source)
        .platform(Arc::new(DryRunExecutor::new()))
        .reasoning(Some(reasoning.clone() as Arc<dyn ReasoningService>))
        .build()
        .unwrap();

    let snapshot = pipeline.run_cycle(Utc::now()).await;

    assert_eq!(snapshot.strategy.as_deref(), Some("reasoning"));
    assert!(snapshot.fallback_reasons.is_empty());
    assert_eq!(snapshot.queued, 1);
    assert_eq!(snapshot.pending_approval, 1);
    assert_eq!(reasoning.prompts.load(Ordering::SeqCst), 1);
    let pending = pipeline.desk().pending();
    assert_eq!(pending[0].entity_id, "c-1");
    assert_eq!(pending[0].origin, "reasoning");
    assert_eq!(pending[0].rationale, "bleeding money");
    assert!(!pending[0].auto_execute);
}

#[tokio::test]
async fn unusable_model_reply_falls_back_to_rules() {
    let reasoning = Arc::new(ScriptedReasoning::new("I am unable to help with that."));
    let source = Arc::new(ScriptedSource::with(&[("c-loss", profile(40.0, 6.0, 0.0))]));
    let mut pipeline = Pipeline::builder(config())
        .source(source)
        .platform(Arc::new(DryRunExecutor::new()))
        .reasoning(Some(reasoning as Arc<dyn ReasoningService>))
        .build()
        .unwrap();

    let snapshot = pipeline.run_cycle(Utc::now()).await;

    assert_eq!(snapshot.status, SnapshotStatus::Completed);
    assert_eq!(snapshot.strategy.as_deref(), Some("rules"));
    assert_eq!(snapshot.fallback_reasons.len(), 1);
    assert_eq!(snapshot.executed, 1);
}
