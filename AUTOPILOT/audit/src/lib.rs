#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Auditor.
//!
//! Re-checks earlier screening verdicts, executed decisions and platform calls against newer
//! data. The result is an [`AuditReport`] whose findings are handed to the librarian; the
//! auditor never changes anything itself.

use autopilot_actions::{Action, ActionStatus, MetricsSnapshot};
use autopilot_knowledge::{Finding, FindingCategory, FindingSeverity, Outcome};
use autopilot_learning::assess;
use autopilot_signals::CampaignMetrics;
use autopilot_skills::{ThresholdConfig, Verdict};
use autopilot_triage::{Classifier, Label, ScreenRecord};
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Totals for one audited category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryStats {
    /// Items that could be judged.
    pub checked: usize,
    /// Items judged wrong.
    pub errors: usize,
}

impl CategoryStats {
    /// Share of checked items that were right; `None` when nothing was checked.
    #[must_use]
    pub fn accuracy(&self) -> Option<f64> {
        #[allow(clippy::cast_precision_loss)]
        (self.checked > 0).then(|| 1.0 - self.errors as f64 / self.checked as f64)
    }
}

/// Output of one audit run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Identifier.
    pub id: Uuid,
    /// When the audit ran.
    pub generated_at: DateTime<Utc>,
    /// Start of the lookback window.
    pub since: DateTime<Utc>,
    /// Screener verdicts re-checked.
    pub screening: CategoryStats,
    /// Executed decisions re-graded.
    pub decisions: CategoryStats,
    /// Platform execution outcomes.
    pub execution: CategoryStats,
    /// Findings for the librarian.
    pub findings: Vec<Finding>,
}

impl AuditReport {
    /// Findings of a category.
    #[must_use]
    pub fn of(&self, category: FindingCategory) -> Vec<&Finding> {
        self.findings
            .iter()
            .filter(|finding| finding.category == category)
            .collect()
    }
}

/// Independent re-check over a lookback window.
#[derive(Debug, Clone)]
pub struct Auditor {
    thresholds: ThresholdConfig,
    lookback: Duration,
}

impl Auditor {
    /// Auditor with a 24 hour lookback.
    #[must_use]
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self {
            thresholds,
            lookback: Duration::hours(24),
        }
    }

    /// Overrides the lookback window.
    #[must_use]
    pub const fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    /// Audits screening records and actions against `current` metrics.
    #[must_use]
    pub fn audit(
        &self,
        records: &[ScreenRecord],
        actions: &[Action],
        current: &IndexMap<String, CampaignMetrics>,
        now: DateTime<Utc>,
    ) -> AuditReport {
        let since = now - self.lookback;
        let mut findings = Vec::new();
        let screening = self.audit_screening(records, actions, current, since, &mut findings);
        let decisions = self.audit_decisions(actions, current, since, &mut findings);
        let execution = Self::audit_execution(actions, since, &mut findings);
        info!(
            screened = screening.checked,
            decisions = decisions.checked,
            executions = execution.checked,
            findings = findings.len(),
            "audit complete"
        );
        AuditReport {
            id: Uuid::new_v4(),
            generated_at: now,
            since,
            screening,
            decisions,
            execution,
            findings,
        }
    }

    fn audit_screening(
        &self,
        records: &[ScreenRecord],
        actions: &[Action],
        current: &IndexMap<String, CampaignMetrics>,
        since: DateTime<Utc>,
        findings: &mut Vec<Finding>,
    ) -> CategoryStats {
        let mut latest: IndexMap<&str, &ScreenRecord> = IndexMap::new();
        for record in records.iter().filter(|r| r.screened_at >= since) {
            let slot = latest.entry(record.entity_id.as_str()).or_insert(record);
            if record.screened_at > slot.screened_at {
                *slot = record;
            }
        }

        let mut stats = CategoryStats::default();
        for (entity_id, record) in latest {
            let Some(metrics) = current.get(entity_id) else {
                continue;
            };
            stats.checked += 1;
            let thresholds = record
                .thresholds
                .as_ref()
                .unwrap_or(&self.thresholds.classifier);
            let now_label = Classifier::classify(metrics, thresholds, None).label;
            let acted = actions
                .iter()
                .any(|a| a.entity_id == entity_id && a.created_at >= record.screened_at);
            let finding = match record.verdict {
                Verdict::Skip | Verdict::Watch if now_label.is_loss() => Some(Finding::new(
                    FindingCategory::ScreenerFalseNegative,
                    if now_label == Label::LossSevere {
                        FindingSeverity::High
                    } else {
                        FindingSeverity::Medium
                    },
                    entity_id,
                    format!(
                        "screened {} ({}) but now {now_label} at roas_3d {:.2}",
                        record.verdict,
                        record.reason,
                        metrics.roas_3d()
                    ),
                )),
                Verdict::NeedsDecision if now_label.is_healthy() && !acted => Some(Finding::new(
                    FindingCategory::ScreenerFalsePositive,
                    FindingSeverity::Low,
                    entity_id,
                    format!(
                        "flagged for decision ({}) but now {now_label} with no action taken",
                        record.reason
                    ),
                )),
                _ => None,
            };
            if let Some(finding) = finding {
                stats.errors += 1;
                findings.push(finding.with_skill(record.skill_id.clone()));
            }
        }
        stats
    }

    fn audit_decisions(
        &self,
        actions: &[Action],
        current: &IndexMap<String, CampaignMetrics>,
        since: DateTime<Utc>,
        findings: &mut Vec<Finding>,
    ) -> CategoryStats {
        let mut stats = CategoryStats::default();
        for action in actions
            .iter()
            .filter(|a| a.status == ActionStatus::Executed && a.updated_at >= since)
        {
            let post = current.get(&action.entity_id).map(MetricsSnapshot::from_metrics);
            let (outcome, lesson) = assess(action, post.as_ref(), &self.thresholds.reflection);
            match outcome {
                Outcome::Unclear => {}
                Outcome::Correct => stats.checked += 1,
                Outcome::Wrong => {
                    stats.checked += 1;
                    stats.errors += 1;
                    findings.push(
                        Finding::new(
                            FindingCategory::DecisionWrong,
                            FindingSeverity::Medium,
                            action.entity_id.clone(),
                            format!("{} judged wrong: {lesson}", action.kind),
                        )
                        .with_skill(action.skill_id.clone())
                        .with_action(action.id),
                    );
                }
            }
        }
        stats
    }

    fn audit_execution(
        actions: &[Action],
        since: DateTime<Utc>,
        findings: &mut Vec<Finding>,
    ) -> CategoryStats {
        let mut stats = CategoryStats::default();
        for action in actions.iter().filter(|a| a.updated_at >= since) {
            match action.status {
                ActionStatus::Executed => stats.checked += 1,
                ActionStatus::Failed => {
                    stats.checked += 1;
                    stats.errors += 1;
                    findings.push(
                        Finding::new(
                            FindingCategory::ExecutionFailure,
                            FindingSeverity::High,
                            action.entity_id.clone(),
                            format!(
                                "{} failed after {} attempts: {}",
                                action.kind,
                                action.attempts,
                                action.last_error.as_deref().unwrap_or("unknown error")
                            ),
                        )
                        .with_skill(action.skill_id.clone())
                        .with_action(action.id),
                    );
                }
                _ => {}
            }
        }
        stats
    }
}
