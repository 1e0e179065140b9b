use std::sync::Arc;

use autopilot_signals::{CampaignMetrics, SignalReport, TrendDirection};
use autopilot_skills::{
    ClassifierThresholds, GoalSkill, Skill, SkillId, SkillMatcher, SkillStore, ThresholdConfig,
    Verdict,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, warn};

use crate::classifier::Label;

/// Owned input for one entity.
#[derive(Debug, Clone)]
pub struct ScreenJob {
    /// Windowed metrics.
    pub metrics: CampaignMetrics,
    /// Trend, quality and anomalies.
    pub signals: SignalReport,
    /// Whether a non-terminal action already targets the entity.
    pub pending_action: bool,
}

/// Screening outcome for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenResult {
    /// Entity identifier.
    pub entity_id: String,
    /// Verdict.
    pub verdict: Verdict,
    /// Why the verdict was reached.
    pub reason: String,
    /// Rule skill that matched, kept for audit attribution.
    pub skill_id: Option<SkillId>,
    /// Whether the matched rule allows auto execution.
    pub auto_execute: Option<bool>,
    /// Classifier thresholds after goal and rule merging.
    pub thresholds: ClassifierThresholds,
    /// Highest anomaly severity.
    pub max_severity: u8,
    /// Data-quality confidence.
    pub confidence: f64,
    /// Trend direction.
    pub trend: TrendDirection,
}

impl ScreenResult {
    /// Persistable record, optionally with the classifier label.
    #[must_use]
    pub fn record(&self, metrics: &CampaignMetrics, label: Option<Label>) -> ScreenRecord {
        ScreenRecord {
            entity_id: self.entity_id.clone(),
            verdict: self.verdict,
            reason: self.reason.clone(),
            skill_id: self.skill_id.clone(),
            label,
            roas_3d: metrics.roas_3d(),
            spend_3d: metrics.last_3d.spend,
            thresholds: Some(self.thresholds.clone()),
            screened_at: Utc::now(),
        }
    }
}

/// Triage outcome kept in the cycle snapshot and re-checked by the auditor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenRecord {
    /// Entity identifier.
    pub entity_id: String,
    /// Verdict.
    pub verdict: Verdict,
    /// Reason string.
    pub reason: String,
    /// Attributed rule skill.
    pub skill_id: Option<SkillId>,
    /// Classifier label, when the entity was classified.
    pub label: Option<Label>,
    /// Three-day ratio at screening time.
    pub roas_3d: f64,
    /// Three-day spend at screening time.
    pub spend_3d: f64,
    /// Classifier thresholds the entity was screened with, after goal and rule merging.
    #[serde(default)]
    pub thresholds: Option<ClassifierThresholds>,
    /// When the entity was screened.
    pub screened_at: DateTime<Utc>,
}

/// Rule-first, table-second screener over an immutable skill snapshot.
#[derive(Debug, Clone, Default)]
pub struct Screener {
    config: ThresholdConfig,
    rules: Vec<Skill>,
    goals: Vec<GoalSkill>,
    alerting_accounts: Vec<String>,
}

impl Screener {
    /// Screener with thresholds and no rules.
    #[must_use]
    pub fn new(config: ThresholdConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Snapshot of the store's thresholds, active rules and goals.
    #[must_use]
    pub fn from_store(store: &SkillStore) -> Self {
        Self::new(store.thresholds())
            .with_rules(store.active_rules())
            .with_goals(store.goals())
    }

    /// Sets the rule skills.
    #[must_use]
    pub fn with_rules(mut self, rules: Vec<Skill>) -> Self {
        self.rules = rules;
        self
    }

    /// Sets the product goals.
    #[must_use]
    pub fn with_goals(mut self, goals: Vec<GoalSkill>) -> Self {
        self.goals = goals;
        self
    }

    /// Accounts with an account-wide anomaly this cycle.
    #[must_use]
    pub fn with_alerting_accounts(mut self, accounts: Vec<String>) -> Self {
        self.alerting_accounts = accounts;
        self
    }

    fn goal_for(&self, metrics: &CampaignMetrics) -> Option<&GoalSkill> {
        let product = metrics.scope.product.as_deref()?;
        self.goals
            .iter()
            .find(|goal| goal.product.eq_ignore_ascii_case(product))
    }

    fn account_alert(&self, metrics: &CampaignMetrics) -> bool {
        metrics.scope.account.as_deref().is_some_and(|account| {
            self.alerting_accounts
                .iter()
                .any(|alerting| alerting.eq_ignore_ascii_case(account))
        })
    }

    /// Screens one entity.
    #[must_use]
    pub fn screen(&self, job: &ScreenJob) -> ScreenResult {
        let metrics = &job.metrics;
        let signals = &job.signals;
        let mut facts = metrics.facts();
        facts.insert("max_severity", f64::from(signals.max_severity()));
        facts.insert("confidence", signals.quality.confidence);
        facts.insert("trend_relative_slope", signals.trend.relative_slope);
        let outcome =
            SkillMatcher::match_entity(&self.rules, &self.config, self.goal_for(metrics), &facts);

        let result = |verdict: Verdict, reason: String| ScreenResult {
            entity_id: metrics.entity_id.clone(),
            verdict,
            reason,
            skill_id: outcome.skill_id.clone(),
            auto_execute: outcome.auto_execute,
            thresholds: outcome.thresholds.clone(),
            max_severity: signals.max_severity(),
            confidence: signals.quality.confidence,
            trend: signals.trend.direction,
        };

        if job.pending_action {
            return ScreenResult {
                skill_id: None,
                auto_execute: None,
                ..result(Verdict::Skip, "pending action awaiting resolution".into())
            };
        }

        if let (Some(verdict), Some(id)) = (outcome.verdict, outcome.skill_id.as_ref()) {
            let described = self
                .rules
                .iter()
                .find(|skill| &skill.id == id)
                .and_then(|skill| {
                    skill
                        .as_rule()
                        .map(|rule| format!("{} [{}]", skill.name, rule.conditions.describe()))
                })
                .unwrap_or_default();
            return result(verdict, format!("rule {id} matched: {described}"));
        }

        let (verdict, reason) = self.table(metrics, signals, &outcome.thresholds);
        result(verdict, reason)
    }

    fn table(
        &self,
        metrics: &CampaignMetrics,
        signals: &SignalReport,
        thresholds: &ClassifierThresholds,
    ) -> (Verdict, String) {
        let s = &self.config.screening;
        let spend_3d = metrics.last_3d.spend;
        let roas_3d = metrics.roas_3d();
        let confidence = signals.quality.confidence;
        let crashing = signals.trend.direction == TrendDirection::Crashing;
        let severity = signals.max_severity();

        if spend_3d < s.min_spend_3d {
            return (
                Verdict::Skip,
                format!("spend_3d {spend_3d:.2} below floor {:.2}", s.min_spend_3d),
            );
        }
        if signals.trend.direction == TrendDirection::InsufficientData
            && metrics.today.spend < s.low_spend_today
        {
            return (
                Verdict::Skip,
                format!(
                    "insufficient data and spend today {:.2} < {:.2}",
                    metrics.today.spend, s.low_spend_today
                ),
            );
        }
        if severity >= s.escalate_severity {
            let detail = signals
                .anomalies
                .iter()
                .max_by_key(|anomaly| anomaly.severity)
                .map(|anomaly| anomaly.detail.clone())
                .unwrap_or_default();
            return (
                Verdict::NeedsDecision,
                format!("anomaly severity {severity}: {detail}"),
            );
        }
        if confidence < s.low_confidence && crashing {
            return (
                Verdict::NeedsDecision,
                format!("crashing with low confidence {confidence:.2}"),
            );
        }
        if signals.quality.reliable && crashing {
            return (
                Verdict::NeedsDecision,
                format!("reliable crash (confidence {confidence:.2})"),
            );
        }
        if roas_3d < thresholds.mild_roas && spend_3d >= s.loss_min_spend_3d {
            return (
                Verdict::NeedsDecision,
                format!(
                    "roas_3d {roas_3d:.2} < {:.2} with spend_3d {spend_3d:.2}",
                    thresholds.mild_roas
                ),
            );
        }
        if roas_3d >= thresholds.high_roas {
            return (
                Verdict::NeedsDecision,
                format!("roas_3d {roas_3d:.2} >= {:.2}", thresholds.high_roas),
            );
        }
        if self.account_alert(metrics) {
            return (
                Verdict::NeedsDecision,
                "account-wide underperformance".to_string(),
            );
        }
        (
            Verdict::Watch,
            format!("roas_3d {roas_3d:.2}, trend {}", signals.trend.direction.label()),
        )
    }
}

/// Screens every job across a bounded worker pool, preserving input order.
pub async fn screen_batch(
    screener: Arc<Screener>,
    jobs: Vec<ScreenJob>,
    max_concurrency: usize,
) -> Vec<ScreenResult> {
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let ids: Vec<String> = jobs.iter().map(|job| job.metrics.entity_id.clone()).collect();
    let mut set = JoinSet::new();
    for (idx, job) in jobs.into_iter().enumerate() {
        let screener = Arc::clone(&screener);
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            (idx, screener.screen(&job))
        });
    }

    let mut slots: Vec<Option<ScreenResult>> = vec![None; ids.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, result)) => {
                debug!(entity = %result.entity_id, verdict = %result.verdict, "screened");
                slots[idx] = Some(result);
            }
            Err(err) => warn!(error = %err, "screening task failed"),
        }
    }
    slots
        .into_iter()
        .zip(ids)
        .map(|(slot, entity_id)| {
            slot.unwrap_or_else(|| ScreenResult {
                entity_id,
                verdict: Verdict::Watch,
                reason: "screening task failed".into(),
                skill_id: None,
                auto_execute: None,
                thresholds: screener.config.classifier.clone(),
                max_severity: 0,
                confidence: 0.0,
                trend: TrendDirection::InsufficientData,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_signals::SignalEngine;
    use autopilot_skills::{
        Comparison, Condition, ConditionList, EntityScope, RuleSkill, SkillScope,
    };
    use chrono::NaiveDate;

    fn job(days: &[(f64, f64, f64)]) -> ScreenJob {
        let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let metrics = days
            .iter()
            .enumerate()
            .fold(
                CampaignMetrics::builder("c1").scope(EntityScope {
                    product: Some("shoes".into()),
                    account: Some("acct".into()),
                    ..EntityScope::default()
                }),
                |builder, (idx, (s, r, c))| {
                    builder.day(
                        start + chrono::Duration::days(i64::try_from(idx).unwrap()),
                        *s,
                        *r,
                        *c,
                    )
                },
            )
            .build()
            .unwrap();
        let signals = SignalEngine::default().analyze(std::slice::from_ref(&metrics));
        ScreenJob {
            signals: signals.report("c1").unwrap().clone(),
            metrics,
            pending_action: false,
        }
    }

    #[test]
    fn negligible_spend_is_skipped_by_seed_guard() {
        let screener = Screener::from_store(&SkillStore::bootstrap());
        let result = screener.screen(&job(&[(1.0, 0.0, 0.0), (1.0, 0.0, 0.0), (1.0, 0.0, 0.0)]));
        assert_eq!(result.verdict, Verdict::Skip);
        assert_eq!(
            result.skill_id.as_ref().map(SkillId::as_str),
            Some("guard.low_spend_skip")
        );
    }

    #[test]
    fn pending_action_wins_over_everything() {
        let screener = Screener::from_store(&SkillStore::bootstrap());
        let mut input = job(&[(40.0, 6.0, 0.0), (40.0, 6.0, 0.0), (40.0, 6.0, 0.0)]);
        input.pending_action = true;
        let result = screener.screen(&input);
        assert_eq!(result.verdict, Verdict::Skip);
        assert!(result.reason.contains("pending"));
    }

    #[test]
    fn loss_with_meaningful_spend_needs_decision() {
        let screener = Screener::new(ThresholdConfig::default());
        let result =
            screener.screen(&job(&[(20.0, 14.0, 1.0), (20.0, 14.0, 1.0), (20.0, 14.0, 1.0)]));
        assert_eq!(result.verdict, Verdict::NeedsDecision);
        assert!(result.reason.contains("< 1.00"));
    }

    #[test]
    fn healthy_entity_is_watched() {
        let screener = Screener::new(ThresholdConfig::default());
        let result =
            screener.screen(&job(&[(20.0, 36.0, 1.0), (20.0, 36.0, 1.0), (20.0, 36.0, 1.0)]));
        assert_eq!(result.verdict, Verdict::Watch);
    }

    #[test]
    fn record_keeps_goal_merged_thresholds() {
        let goal = GoalSkill {
            product: "shoes".into(),
            min_roas: Some(1.5),
            target_roas: Some(2.0),
            ..GoalSkill::default()
        };
        let screener = Screener::new(ThresholdConfig::default()).with_goals(vec![goal]);
        let input = job(&[(20.0, 25.0, 1.0), (20.0, 25.0, 1.0), (20.0, 25.0, 1.0)]);
        let result = screener.screen(&input);
        let record = result.record(&input.metrics, None);
        let thresholds = record.thresholds.unwrap();
        assert!((thresholds.mild_roas - 1.5).abs() < f64::EPSILON);
        assert!((thresholds.good_roas - 2.0).abs() < f64::EPSILON);
        assert_eq!(Some(thresholds), Some(result.thresholds));
    }

    #[test]
    fn rule_can_force_a_verdict_within_its_scope() {
        let rule = Skill::rule(
            "watch.shoes",
            "Always watch shoes",
            RuleSkill {
                conditions: ConditionList::new().and(Condition::new(
                    "spend_3d",
                    Comparison::Gt,
                    0.0,
                )),
                verdict: Some(Verdict::Watch),
                ..RuleSkill::default()
            },
        )
        .with_scope(SkillScope::wildcard().product("SHOES"));
        let screener = Screener::new(ThresholdConfig::default()).with_rules(vec![rule]);
        let result =
            screener.screen(&job(&[(20.0, 14.0, 1.0), (20.0, 14.0, 1.0), (20.0, 14.0, 1.0)]));
        assert_eq!(result.verdict, Verdict::Watch);
        assert!(result.reason.contains("spend_3d > 0"));
    }

    #[tokio::test]
    async fn batch_preserves_input_order() {
        let screener = Arc::new(Screener::from_store(&SkillStore::bootstrap()));
        let mut jobs = Vec::new();
        for (idx, spend) in [1.0, 20.0, 40.0].into_iter().enumerate() {
            let mut input = job(&[(spend, spend, 1.0), (spend, spend, 1.0), (spend, spend, 1.0)]);
            input.metrics = CampaignMetrics::builder(format!("c{idx}"))
                .day(NaiveDate::from_ymd_opt(2024, 5, 3).unwrap(), spend, spend, 1.0)
                .build()
                .unwrap();
            jobs.push(input);
        }
        let results = screen_batch(screener, jobs, 2).await;
        let ids: Vec<&str> = results.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["c0", "c1", "c2"]);
    }
}
