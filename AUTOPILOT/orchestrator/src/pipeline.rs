use std::{sync::Arc, time::Duration, time::Instant};

use anyhow::{bail, Context, Result};
use autopilot_actions::{
    ActionError, ActionExecutor, ActionQueue, ApprovalDesk, ExecutionReport, PlatformExecutor,
};
use autopilot_decision::{DecisionCandidate, DecisionEngine};
use autopilot_knowledge::{KnowledgeBase, Librarian};
use autopilot_learning::{ReflectionEngine, ReflectionLog};
use autopilot_reasoning::ReasoningService;
use autopilot_signals::{CampaignMetrics, DateRange, MetricsGateway, MetricsSource, SignalEngine};
use autopilot_skills::{SkillStore, Verdict};
use autopilot_triage::{screen_batch, Classifier, ScreenJob, ScreenResult, Screener};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use indexmap::IndexMap;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
    cache::CycleCache,
    config::PipelineConfig,
    history::{MetricsBoard, ScreenHistory},
    maintenance::Maintenance,
    notify::{deliver, CycleSummary, NotificationSink},
    snapshot::{CyclePhase, Snapshot, SnapshotLedger},
    telemetry::PipelineTelemetry,
};

/// Wires the collaborators into a [`Pipeline`].
pub struct PipelineBuilder {
    config: PipelineConfig,
    skills: Option<SkillStore>,
    knowledge: Option<KnowledgeBase>,
    queue: Option<ActionQueue>,
    sources: Vec<Arc<dyn MetricsSource>>,
    platform: Option<Arc<dyn PlatformExecutor>>,
    reasoning: Option<Arc<dyn ReasoningService>>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    telemetry: PipelineTelemetry,
    ledger: Option<SnapshotLedger>,
}

impl PipelineBuilder {
    /// Builder over a validated config.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            skills: None,
            knowledge: None,
            queue: None,
            sources: Vec::new(),
            platform: None,
            reasoning: None,
            sinks: Vec::new(),
            telemetry: PipelineTelemetry::disabled(),
            ledger: None,
        }
    }

    /// Skill store; defaults to the seeded bootstrap store.
    #[must_use]
    pub fn skills(mut self, skills: SkillStore) -> Self {
        self.skills = Some(skills);
        self
    }

    /// Knowledge base; defaults to an empty one.
    #[must_use]
    pub fn knowledge(mut self, knowledge: KnowledgeBase) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    /// Action queue; defaults to an empty one.
    #[must_use]
    pub fn queue(mut self, queue: ActionQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Adds a metrics provider.
    #[must_use]
    pub fn source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Platform the executor drives.
    #[must_use]
    pub fn platform(mut self, platform: Arc<dyn PlatformExecutor>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Reasoning service tried before the deterministic fallbacks.
    #[must_use]
    pub fn reasoning(mut self, service: Option<Arc<dyn ReasoningService>>) -> Self {
        self.reasoning = service;
        self
    }

    /// Adds a notification sink.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Telemetry handle.
    #[must_use]
    pub fn telemetry(mut self, telemetry: PipelineTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Snapshot ledger; defaults to the configured file, else memory only.
    #[must_use]
    pub fn ledger(mut self, ledger: SnapshotLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Builds the pipeline.
    pub fn build(self) -> Result<Pipeline> {
        let Some(platform) = self.platform else {
            bail!("a platform executor is required");
        };
        let ledger = match (self.ledger, &self.config.paths.snapshots) {
            (Some(ledger), _) => ledger,
            (None, Some(path)) => SnapshotLedger::open(path).context("opening snapshot ledger")?,
            (None, None) => SnapshotLedger::new(),
        };
        let skills = self.skills.unwrap_or_else(SkillStore::bootstrap);
        let librarian = Librarian::new(skills.clone(), self.knowledge.unwrap_or_default());
        let queue = self.queue.unwrap_or_default();
        let gateway = self
            .sources
            .into_iter()
            .fold(MetricsGateway::new(), MetricsGateway::with_source)
            .with_timeout(Duration::from_secs(self.config.cycle.source_timeout_secs.max(1)))
            .with_streak_floor(skills.thresholds().classifier.severe_roas);
        let executor = ActionExecutor::new(queue.clone(), platform)
            .with_policy(self.config.execution.retry_policy());
        let desk = ApprovalDesk::new(queue.clone())
            .with_ttl(ChronoDuration::hours(self.config.execution.approval_ttl_hours.max(1)));
        Ok(Pipeline {
            config: self.config,
            skills,
            librarian,
            gateway,
            queue,
            executor,
            desk,
            reasoning: self.reasoning,
            reflections: ReflectionLog::new(),
            screens: ScreenHistory::new(),
            board: MetricsBoard::new(),
            ledger,
            cache: CycleCache::default(),
            sinks: self.sinks,
            telemetry: self.telemetry,
        })
    }
}

/// Runs Monitor, Screen, Classify, Decide, Execute, Notify and Reflect as one cycle.
pub struct Pipeline {
    config: PipelineConfig,
    skills: SkillStore,
    librarian: Librarian,
    gateway: MetricsGateway,
    queue: ActionQueue,
    executor: ActionExecutor,
    desk: ApprovalDesk,
    reasoning: Option<Arc<dyn ReasoningService>>,
    reflections: ReflectionLog,
    screens: ScreenHistory,
    board: MetricsBoard,
    ledger: SnapshotLedger,
    cache: CycleCache,
    sinks: Vec<Arc<dyn NotificationSink>>,
    telemetry: PipelineTelemetry,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("sources", &self.gateway.source_count())
            .field("reasoning", &self.reasoning.as_ref().map(|s| s.name().to_string()))
            .field("sinks", &self.sinks.len())
            .field("snapshots", &self.ledger.len())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Starts a builder.
    #[must_use]
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Action queue.
    #[must_use]
    pub const fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    /// Human approval front door.
    #[must_use]
    pub const fn desk(&self) -> &ApprovalDesk {
        &self.desk
    }

    /// Sole writer of skills and knowledge.
    #[must_use]
    pub const fn librarian(&self) -> &Librarian {
        &self.librarian
    }

    /// Snapshot history.
    #[must_use]
    pub const fn ledger(&self) -> &SnapshotLedger {
        &self.ledger
    }

    /// Reflection records.
    #[must_use]
    pub const fn reflections(&self) -> &ReflectionLog {
        &self.reflections
    }

    /// Verdicts and labels of the last finished cycle.
    #[must_use]
    pub const fn cache(&self) -> &CycleCache {
        &self.cache
    }

    /// Audit and evolution handle sharing this pipeline's stores.
    #[must_use]
    pub fn maintenance(&self) -> Maintenance {
        Maintenance {
            librarian: self.librarian.clone(),
            queue: self.queue.clone(),
            reflections: self.reflections.clone(),
            screens: self.screens.clone(),
            board: self.board.clone(),
            audit: self.config.audit.clone(),
            evolution: self.config.evolution.clone(),
            telemetry: self.telemetry.clone(),
        }
    }

    /// Runs one cycle and appends its sealed snapshot to the ledger.
    ///
    /// A phase error or the cycle deadline marks the snapshot failed with the last completed
    /// phase; nothing already done is rolled back.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Snapshot {
        let mut snapshot = Snapshot::start(now);
        let clock = Instant::now();
        let deadline = Duration::from_secs(self.config.cycle.deadline_secs.max(1));
        info!(cycle = %snapshot.id, "cycle started");

        let outcome = tokio::time::timeout(deadline, self.run_phases(&mut snapshot, now)).await;
        let finished = now
            + ChronoDuration::from_std(clock.elapsed()).unwrap_or_else(|_| ChronoDuration::zero());
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(format!("{err:#}")),
            Err(_) => Some(format!("cycle deadline of {}s exceeded", deadline.as_secs())),
        };
        match failure {
            None => snapshot.complete(finished),
            Some(error) => {
                if let Some(phase) = CyclePhase::after(snapshot.last_phase) {
                    self.telemetry
                        .phase(snapshot.id, phase, "failed", json!({ "error": &error }))
                        .await;
                }
                warn!(
                    cycle = %snapshot.id,
                    error = %error,
                    last_phase = ?snapshot.last_phase,
                    "cycle failed"
                );
                snapshot.fail(error, finished);
            }
        }

        if let Err(err) = self.ledger.append(&snapshot) {
            warn!(cycle = %snapshot.id, error = %err, "snapshot not persisted");
        }
        let name = if snapshot.error.is_some() {
            "autopilot.cycle.failed"
        } else {
            "autopilot.cycle.completed"
        };
        let payload = serde_json::to_value(&snapshot).unwrap_or_default();
        self.telemetry.emit(name, Some(snapshot.id), payload).await;
        snapshot
    }

    async fn run_phases(&mut self, snapshot: &mut Snapshot, now: DateTime<Utc>) -> Result<()> {
        let mut cache = CycleCache::new(snapshot.id);

        let metrics = self.monitor(snapshot, now).await.context("monitor phase")?;
        let payload = json!({
            "entities": snapshot.entities,
            "dropped_rows": snapshot.dropped_rows,
            "failed_sources": snapshot.failed_sources,
            "expired": snapshot.expired,
        });
        self.phase_done(snapshot, CyclePhase::Monitor, payload).await;

        let results = self.screen(snapshot, &metrics, &mut cache).await;
        let payload = json!({ "verdicts": snapshot.verdicts });
        self.phase_done(snapshot, CyclePhase::Screen, payload).await;

        let candidates = self.classify(snapshot, &metrics, &results, &mut cache, now);
        let payload = json!({ "labels": snapshot.labels, "candidates": candidates.len() });
        self.phase_done(snapshot, CyclePhase::Classify, payload).await;

        self.decide(snapshot, candidates, now).await;
        let payload = json!({
            "strategy": snapshot.strategy,
            "fallback_reasons": snapshot.fallback_reasons,
            "proposals": snapshot.proposals,
            "queued": snapshot.queued,
            "duplicates": snapshot.duplicates,
            "cooled_down": snapshot.cooled_down,
        });
        self.phase_done(snapshot, CyclePhase::Decide, payload).await;

        let report = self.executor.execute_ready().await;
        snapshot.executed = report.executed.len();
        snapshot.failed = report.failed.len();
        let payload = json!({
            "executed": snapshot.executed,
            "failed": snapshot.failed,
            "skipped": report.skipped.len(),
        });
        self.phase_done(snapshot, CyclePhase::Execute, payload).await;

        let failed_sinks = self.notify(snapshot, &cache, &report).await;
        let payload = json!({
            "escalated": snapshot.escalated,
            "pending_approval": snapshot.pending_approval,
            "failed_sinks": failed_sinks,
        });
        self.phase_done(snapshot, CyclePhase::Notify, payload).await;

        self.reflect(snapshot, now).await;
        let payload = json!({ "reflected": snapshot.reflected });
        self.phase_done(snapshot, CyclePhase::Reflect, payload).await;

        self.cache = cache;
        Ok(())
    }

    async fn phase_done(
        &self,
        snapshot: &mut Snapshot,
        phase: CyclePhase,
        payload: serde_json::Value,
    ) {
        snapshot.phase_done(phase);
        self.telemetry.phase(snapshot.id, phase, "completed", payload).await;
    }

    async fn monitor(
        &self,
        snapshot: &mut Snapshot,
        now: DateTime<Utc>,
    ) -> Result<IndexMap<String, CampaignMetrics>> {
        let sources = self.gateway.source_count();
        if sources == 0 {
            bail!("no metrics providers configured");
        }
        let as_of = now.date_naive();
        let range = DateRange::ending(as_of, self.config.cycle.lookback_days);
        let outcome = self.gateway.collect(&self.config.cycle.scope, &range, as_of).await;
        snapshot.entities = outcome.metrics.len();
        snapshot.dropped_rows = outcome.report.dropped_total();
        snapshot.failed_sources.clone_from(&outcome.report.failed_sources);
        if outcome.report.failed_sources.len() == sources {
            bail!(
                "every metrics provider failed: {}",
                outcome.report.failed_sources.join(", ")
            );
        }
        self.board.replace(&outcome.metrics);
        snapshot.expired = self.desk.expire_stale().len();
        Ok(outcome
            .metrics
            .into_iter()
            .map(|m| (m.entity_id.clone(), m))
            .collect())
    }

    async fn screen(
        &self,
        snapshot: &mut Snapshot,
        metrics: &IndexMap<String, CampaignMetrics>,
        cache: &mut CycleCache,
    ) -> Vec<ScreenResult> {
        let thresholds = self.skills.thresholds();
        let all: Vec<CampaignMetrics> = metrics.values().cloned().collect();
        let batch = SignalEngine::new(thresholds.signals).analyze(&all);
        let screener = Screener::from_store(&self.skills)
            .with_alerting_accounts(batch.alerting_accounts.clone());

        let mut jobs = Vec::with_capacity(all.len());
        for entity in all {
            let Some(signals) = batch.report(&entity.entity_id).cloned() else {
                warn!(entity = %entity.entity_id, "no signal report, not screened");
                continue;
            };
            let pending_action = self.queue.has_open(&entity.entity_id);
            jobs.push(ScreenJob {
                metrics: entity,
                signals,
                pending_action,
            });
        }
        let results =
            screen_batch(Arc::new(screener), jobs, self.config.cycle.max_concurrency).await;

        for result in &results {
            *snapshot
                .verdicts
                .entry(result.verdict.label().to_string())
                .or_default() += 1;
            cache.record(result.entity_id.clone(), result.verdict);
            if let Some(skill_id) = &result.skill_id {
                if let Err(err) = self.librarian.record_trigger(skill_id) {
                    debug!(skill = %skill_id, error = %err, "trigger not counted");
                }
            }
        }
        results
    }

    fn classify(
        &self,
        snapshot: &mut Snapshot,
        metrics: &IndexMap<String, CampaignMetrics>,
        results: &[ScreenResult],
        cache: &mut CycleCache,
        now: DateTime<Utc>,
    ) -> Vec<DecisionCandidate> {
        let mut records = Vec::with_capacity(results.len());
        let mut candidates = Vec::new();
        for result in results {
            let Some(entity) = metrics.get(&result.entity_id) else {
                continue;
            };
            if result.verdict != Verdict::NeedsDecision {
                let mut record = result.record(entity, None);
                record.screened_at = now;
                records.push(record);
                continue;
            }
            let classification =
                Classifier::classify(entity, &result.thresholds, result.skill_id.clone());
            *snapshot
                .labels
                .entry(classification.label.label().to_string())
                .or_default() += 1;
            cache.label(&result.entity_id, classification.label);
            let mut record = result.record(entity, Some(classification.label));
            record.screened_at = now;
            records.push(record);

            let goal_budget_ceiling = entity
                .scope
                .product
                .as_deref()
                .and_then(|product| self.skills.goal_for(product))
                .and_then(|goal| goal.max_daily_budget);
            candidates.push(DecisionCandidate {
                metrics: entity.clone(),
                screen: result.clone(),
                classification,
                goal_budget_ceiling,
            });
        }
        self.screens.extend(records);
        candidates
    }

    async fn decide(
        &self,
        snapshot: &mut Snapshot,
        candidates: Vec<DecisionCandidate>,
        now: DateTime<Utc>,
    ) {
        let engine = DecisionEngine::new(self.skills.thresholds().decision, self.reasoning.clone());
        let knowledge = self
            .librarian
            .high_priority_context(self.config.cycle.knowledge_context);
        let outcome = engine.decide(candidates, &self.queue, knowledge, now).await;
        snapshot.strategy = Some(outcome.strategy).filter(|s| !s.is_empty());
        snapshot.fallback_reasons = outcome.fallback_reasons;
        snapshot.cooled_down = outcome.cooled_down.len();
        snapshot.proposals = outcome.proposals.len();
        for proposal in outcome.proposals {
            let entity = proposal.entity_id.clone();
            match self.queue.submit(proposal) {
                Ok(action) => {
                    snapshot.queued += 1;
                    debug!(
                        action = %action.id,
                        entity = %entity,
                        auto = action.auto_execute,
                        "action queued"
                    );
                }
                Err(ActionError::Duplicate { .. }) => snapshot.duplicates += 1,
                Err(err) => warn!(entity = %entity, error = %err, "proposal refused"),
            }
        }
    }

    async fn notify(
        &self,
        snapshot: &mut Snapshot,
        cache: &CycleCache,
        report: &ExecutionReport,
    ) -> Vec<String> {
        snapshot.escalated = cache.escalated_since(&self.cache);
        let pending = self.desk.pending();
        snapshot.pending_approval = pending.len();
        let failed: Vec<_> = self
            .desk
            .failed()
            .into_iter()
            .filter(|action| report.failed.contains(&action.id))
            .collect();
        let summary = CycleSummary::new(snapshot, &pending, &failed);
        deliver(&self.sinks, &summary).await
    }

    async fn reflect(&self, snapshot: &mut Snapshot, now: DateTime<Utc>) {
        let engine = ReflectionEngine::new(
            self.queue.clone(),
            self.librarian.clone(),
            self.reflections.clone(),
            self.reasoning.clone(),
        )
        .with_delay_hours(self.config.reflection.delay_hours)
        .with_thresholds(self.skills.thresholds().reflection);
        let summary = engine.reflect_due(now, &self.board.snapshots()).await;
        snapshot.reflected = summary.reflected.len();
    }
}
