use std::time::Duration;

use autopilot_actions::ActionQueue;
use autopilot_audit::{AuditReport, Auditor};
use autopilot_knowledge::{DecayReport, FindingsApplied, Librarian};
use autopilot_learning::{EvolutionEngine, EvolutionReport, ReflectionLog};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::info;

use crate::{
    config::{AuditSettings, EvolutionSettings},
    history::{MetricsBoard, ScreenHistory},
    telemetry::PipelineTelemetry,
};

/// What one audit run found and what the librarian did with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditOutcome {
    /// The audit report, findings marked processed.
    pub report: AuditReport,
    /// Knowledge writes from the findings.
    pub applied: FindingsApplied,
    /// Knowledge decay applied after the audit.
    pub decay: DecayReport,
    /// Entries promoted to high priority.
    pub promoted: Vec<String>,
}

/// Audit, knowledge upkeep and evolution, run off the cycle path.
#[derive(Debug, Clone)]
pub struct Maintenance {
    pub(crate) librarian: Librarian,
    pub(crate) queue: ActionQueue,
    pub(crate) reflections: ReflectionLog,
    pub(crate) screens: ScreenHistory,
    pub(crate) board: MetricsBoard,
    pub(crate) audit: AuditSettings,
    pub(crate) evolution: EvolutionSettings,
    pub(crate) telemetry: PipelineTelemetry,
}

impl Maintenance {
    /// Audits the lookback window, hands findings to the librarian, then decays and promotes
    /// knowledge.
    pub async fn audit(&self, now: DateTime<Utc>) -> AuditOutcome {
        let lookback = ChronoDuration::hours(self.audit.lookback_hours.max(1));
        let since = now - lookback;
        let auditor = Auditor::new(self.librarian.skills().thresholds()).with_lookback(lookback);
        let mut report = auditor.audit(
            &self.screens.since(since),
            &self.queue.updated_since(since),
            &self.board.current(),
            now,
        );
        let applied = self.librarian.apply_findings(&mut report.findings);
        let decay = self.librarian.decay(now);
        let promoted = self.librarian.promote();
        self.screens.prune(now - lookback * 2);

        self.telemetry
            .emit(
                "autopilot.audit.completed",
                None,
                json!({
                    "audit_id": report.id,
                    "findings": report.findings.len(),
                    "screening_accuracy": report.screening.accuracy(),
                    "decision_accuracy": report.decisions.accuracy(),
                    "execution_accuracy": report.execution.accuracy(),
                    "knowledge_created": applied.created,
                    "decayed": decay.decayed.len(),
                    "archived": decay.archived.len(),
                    "promoted": promoted.len(),
                }),
            )
            .await;
        AuditOutcome {
            report,
            applied,
            decay,
            promoted,
        }
    }

    /// Runs one evolution pass over the reflection log.
    pub async fn evolve(&self) -> EvolutionReport {
        let report = EvolutionEngine::new(self.librarian.clone())
            .with_policy(self.evolution.policy.clone())
            .run(&self.reflections, &self.queue);
        self.telemetry
            .emit(
                "autopilot.evolution.completed",
                None,
                json!({
                    "groups": report.groups.len(),
                    "applied": report
                        .applied
                        .iter()
                        .map(|m| m.skill_id.to_string())
                        .collect::<Vec<_>>(),
                    "refused": report.refused.len(),
                    "rejection_rate": report.rejection_rate,
                    "proposal": report.proposal,
                }),
            )
            .await;
        report
    }

    /// Starts the audit and evolution schedules. The first run of each waits one interval.
    #[must_use]
    pub fn spawn(self) -> BackgroundJobs {
        let audit_every = Duration::from_secs(self.audit.interval_secs.max(1));
        let evolve_every = Duration::from_secs(self.evolution.interval_secs.max(1));
        let auditor = self.clone();
        let audit = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(audit_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                auditor.audit(Utc::now()).await;
            }
        });
        let evolution = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(evolve_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.evolve().await;
            }
        });
        info!(
            audit_secs = audit_every.as_secs(),
            evolution_secs = evolve_every.as_secs(),
            "background jobs started"
        );
        BackgroundJobs {
            handles: vec![audit, evolution],
        }
    }
}

/// Handles of the background schedules.
#[derive(Debug)]
pub struct BackgroundJobs {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundJobs {
    /// Number of running jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    /// Whether every job has stopped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops every job and waits for it to wind down.
    pub async fn shutdown(self) {
        for handle in &self.handles {
            handle.abort();
        }
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
