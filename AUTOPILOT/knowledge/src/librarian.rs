use autopilot_skills::{
    MetaSkill, Skill, SkillBody, SkillError, SkillId, SkillKind, SkillStats, SkillStore,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::{
    entry::{KnowledgeBase, KnowledgeEntry, KnowledgeKind, KnowledgeQuery},
    finding::Finding,
    KnowledgeError,
};

const FINDING_CONFIDENCE: f64 = 0.5;
const VALIDATION_BOOST: f64 = 0.05;

/// Hindsight verdict on a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The decision helped.
    Correct,
    /// The decision hurt.
    Wrong,
    /// Not enough evidence either way.
    Unclear,
}

impl Outcome {
    /// Wire label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Correct => "correct",
            Self::Wrong => "wrong",
            Self::Unclear => "unclear",
        }
    }
}

/// Change evolution wants applied to a rule skill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationChange {
    /// Stop matching entirely.
    Disable,
    /// Keep matching but require approval.
    DemoteToApproval,
}

/// A skill mutation with its supporting statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillMutation {
    /// Target rule.
    pub skill_id: SkillId,
    /// Change.
    pub change: MutationChange,
    /// Explanation.
    pub reason: String,
    /// Counters at decision time.
    pub stats: SkillStats,
    /// Accuracy at decision time.
    pub accuracy: f64,
}

/// Summary of a findings pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingsApplied {
    /// New knowledge entries.
    pub created: usize,
    /// Existing entries validated again.
    pub validated: usize,
    /// Skill flag increments.
    pub flagged: usize,
    /// Findings already processed.
    pub skipped: usize,
}

/// Summary of a decay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecayReport {
    /// Entries whose confidence was lowered.
    pub decayed: Vec<String>,
    /// Entries archived.
    pub archived: Vec<String>,
}

/// Sole writer of skill state and knowledge entries.
#[derive(Debug, Clone)]
pub struct Librarian {
    skills: SkillStore,
    knowledge: KnowledgeBase,
}

impl Librarian {
    /// Librarian over shared stores.
    #[must_use]
    pub const fn new(skills: SkillStore, knowledge: KnowledgeBase) -> Self {
        Self { skills, knowledge }
    }

    /// Skill store handle for readers.
    #[must_use]
    pub const fn skills(&self) -> &SkillStore {
        &self.skills
    }

    /// Knowledge base handle for readers.
    #[must_use]
    pub const fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    fn policy(&self) -> MetaSkill {
        self.skills.meta_policy()
    }

    /// Creates the entry for `topic`, or validates the live one.
    ///
    /// Returns the entry id and whether it was newly created.
    pub fn upsert(&self, entry: KnowledgeEntry) -> (String, bool) {
        if let Some(existing) = self.knowledge.by_topic(&entry.topic) {
            let evidence = entry.evidence;
            self.knowledge.update(&existing.id, |current| {
                current.validations += 1;
                current.confidence = (current.confidence + VALIDATION_BOOST).min(1.0);
                current.last_validated = Utc::now();
                current.content = entry.content;
                if !evidence.is_null() {
                    current.evidence = evidence;
                }
            });
            debug!(topic = %existing.topic, "knowledge validated");
            (existing.id, false)
        } else {
            debug!(topic = %entry.topic, kind = entry.kind.label(), "knowledge created");
            (self.knowledge.insert(entry), true)
        }
    }

    /// Consumes unprocessed findings: one entry per topic, flag counters on attributed skills.
    pub fn apply_findings(&self, findings: &mut [Finding]) -> FindingsApplied {
        let mut applied = FindingsApplied::default();
        for finding in findings.iter_mut() {
            if finding.processed {
                applied.skipped += 1;
                continue;
            }
            let entry = KnowledgeEntry::new(
                finding.topic(),
                KnowledgeKind::Finding,
                finding.detail.clone(),
                FINDING_CONFIDENCE,
            )
            .with_skill(finding.skill_id.clone())
            .with_evidence(json!({
                "finding_id": finding.id,
                "entity_id": finding.entity_id,
                "severity": finding.severity,
                "suggested": finding.suggested,
            }));
            if self.upsert(entry).1 {
                applied.created += 1;
            } else {
                applied.validated += 1;
            }
            if let Some(skill_id) = &finding.skill_id {
                match self.skills.update_stats(skill_id, |stats| stats.flagged += 1) {
                    Ok(_) => applied.flagged += 1,
                    Err(err) => {
                        warn!(skill = %skill_id, error = %err, "finding names unknown skill");
                    }
                }
            }
            finding.processed = true;
        }
        info!(
            created = applied.created,
            validated = applied.validated,
            flagged = applied.flagged,
            "findings applied"
        );
        applied
    }

    /// Counts a proposal attributed to a skill.
    ///
    /// # Errors
    /// [`KnowledgeError::Skill`] when the skill is unknown.
    pub fn record_trigger(&self, skill_id: &SkillId) -> Result<SkillStats, KnowledgeError> {
        Ok(self.skills.update_stats(skill_id, |stats| stats.triggered += 1)?)
    }

    /// Counts a reflection outcome against the originating skill.
    ///
    /// # Errors
    /// [`KnowledgeError::Skill`] when the skill is unknown.
    pub fn record_outcome(
        &self,
        skill_id: &SkillId,
        outcome: Outcome,
    ) -> Result<SkillStats, KnowledgeError> {
        Ok(self.skills.update_stats(skill_id, |stats| match outcome {
            Outcome::Correct => stats.correct += 1,
            Outcome::Wrong => stats.wrong += 1,
            Outcome::Unclear => stats.unclear += 1,
        })?)
    }

    /// Records a reflection lesson.
    pub fn record_lesson(
        &self,
        topic: impl Into<String>,
        lesson: impl Into<String>,
        confidence: f64,
        skill_id: Option<SkillId>,
        evidence: Value,
    ) -> String {
        let entry = KnowledgeEntry::new(topic, KnowledgeKind::Lesson, lesson, confidence)
            .with_skill(skill_id)
            .with_evidence(evidence);
        self.upsert(entry).0
    }

    /// Records a suggestion that is deliberately not applied.
    pub fn record_proposal(
        &self,
        topic: impl Into<String>,
        content: impl Into<String>,
        evidence: Value,
    ) -> String {
        let entry = KnowledgeEntry::new(topic, KnowledgeKind::Proposal, content, FINDING_CONFIDENCE)
            .with_evidence(evidence);
        self.upsert(entry).0
    }

    /// Applies an evolution mutation and logs it as knowledge.
    ///
    /// # Errors
    /// Unknown, archived or non-rule skills.
    pub fn apply_mutation(&self, mutation: &SkillMutation) -> Result<Skill, KnowledgeError> {
        let current = self
            .skills
            .get(&mutation.skill_id)
            .ok_or_else(|| SkillError::NotFound(mutation.skill_id.clone()))?;
        if current.kind() != SkillKind::Rule {
            return Err(SkillError::WrongKind {
                id: mutation.skill_id.clone(),
                expected: SkillKind::Rule,
                actual: current.kind(),
            }
            .into());
        }
        let updated = match mutation.change {
            MutationChange::Disable => self.skills.set_enabled(&mutation.skill_id, false)?,
            MutationChange::DemoteToApproval => self.skills.edit(&mutation.skill_id, |skill| {
                if let SkillBody::Rule(rule) = &mut skill.body {
                    rule.auto_execute = false;
                }
            })?,
        };
        let change = match mutation.change {
            MutationChange::Disable => "disabled",
            MutationChange::DemoteToApproval => "demoted to approval",
        };
        self.upsert(
            KnowledgeEntry::new(
                format!("evolution.{}", mutation.skill_id),
                KnowledgeKind::Mutation,
                format!("rule {} {change}: {}", mutation.skill_id, mutation.reason),
                1.0,
            )
            .with_skill(Some(mutation.skill_id.clone()))
            .with_evidence(json!({
                "change": mutation.change,
                "accuracy": mutation.accuracy,
                "stats": mutation.stats,
                "version": updated.version,
            })),
        );
        info!(skill = %mutation.skill_id, change, accuracy = mutation.accuracy, "skill mutated");
        Ok(updated)
    }

    /// Decays neglected entries per the meta policy, at most once per decay period each.
    pub fn decay(&self, now: DateTime<Utc>) -> DecayReport {
        let policy = self.policy();
        let period = Duration::days(policy.decay_after_days.max(1));
        let mut report = DecayReport::default();
        for id in self.knowledge.ids() {
            let step = self.knowledge.update(&id, |entry| {
                if entry.archived || now - entry.last_validated <= period {
                    return None;
                }
                if entry.last_decayed.is_some_and(|at| now - at < period) {
                    return None;
                }
                entry.last_decayed = Some(now);
                if entry.confidence < policy.archive_floor {
                    entry.archived = true;
                    entry.high_priority = false;
                    Some(true)
                } else {
                    entry.confidence = (entry.confidence - policy.decay_step).max(0.0);
                    Some(false)
                }
            });
            match step.flatten() {
                Some(true) => report.archived.push(id),
                Some(false) => report.decayed.push(id),
                None => {}
            }
        }
        if !report.decayed.is_empty() || !report.archived.is_empty() {
            info!(
                decayed = report.decayed.len(),
                archived = report.archived.len(),
                "knowledge decay applied"
            );
        }
        report
    }

    /// Promotes entries validated often enough; returns the promoted ids.
    pub fn promote(&self) -> Vec<String> {
        let policy = self.policy();
        self.knowledge
            .ids()
            .into_iter()
            .filter(|id| {
                self.knowledge
                    .update(id, |entry| {
                        if entry.archived
                            || entry.high_priority
                            || entry.validations < policy.promote_after
                        {
                            return false;
                        }
                        entry.high_priority = true;
                        entry.confidence = entry.confidence.max(policy.promoted_confidence);
                        true
                    })
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Queries the knowledge base.
    #[must_use]
    pub fn query(&self, query: &KnowledgeQuery) -> Vec<KnowledgeEntry> {
        self.knowledge.query(query)
    }

    /// Promoted knowledge rendered for the decision prompt.
    #[must_use]
    pub fn high_priority_context(&self, limit: usize) -> Vec<String> {
        self.knowledge
            .high_priority()
            .into_iter()
            .take(limit)
            .map(|entry| format!("[{}] {}", entry.topic, entry.content))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::{FindingCategory, FindingSeverity};
    use autopilot_skills::seed::SEVERE_LOSS_GUARD_ID;

    fn librarian() -> Librarian {
        Librarian::new(SkillStore::bootstrap(), KnowledgeBase::new())
    }

    #[test]
    fn neglected_entry_decays_once_per_period_then_archives() {
        let lib = librarian();
        let now = Utc::now();
        let id = lib.knowledge.insert(
            KnowledgeEntry::new("lesson.x", KnowledgeKind::Lesson, "x", 0.35)
                .validated_at(now - Duration::days(31)),
        );
        let report = lib.decay(now);
        assert_eq!(report.decayed, vec![id.clone()]);
        let entry = lib.knowledge.get(&id).unwrap();
        assert!((entry.confidence - 0.25).abs() < 1e-9);
        assert!(!entry.archived);

        assert_eq!(lib.decay(now + Duration::days(1)), DecayReport::default());
        let later = lib.decay(now + Duration::days(31));
        assert_eq!(later.archived, vec![id.clone()]);
        assert!(lib.knowledge.get(&id).unwrap().archived);
    }

    #[test]
    fn repeated_finding_topic_validates_and_flags_skill() {
        let lib = librarian();
        let finding = || {
            Finding::new(
                FindingCategory::ScreenerFalseNegative,
                FindingSeverity::High,
                "c1",
                "skipped but now losing",
            )
            .with_skill(Some(SEVERE_LOSS_GUARD_ID.into()))
        };
        let mut batch = vec![finding(), finding()];
        let applied = lib.apply_findings(&mut batch);
        assert_eq!((applied.created, applied.validated, applied.flagged), (1, 1, 2));
        assert!(batch.iter().all(|f| f.processed));
        assert_eq!(lib.apply_findings(&mut batch).skipped, 2);
        let skill = lib.skills.get(&SEVERE_LOSS_GUARD_ID.into()).unwrap();
        assert_eq!(skill.stats.flagged, 2);
    }

    #[test]
    fn validations_promote_to_high_priority() {
        let lib = librarian();
        for _ in 0..6 {
            lib.record_lesson("lesson.weekend", "weekend dips recover", 0.6, None, Value::Null);
        }
        let promoted = lib.promote();
        assert_eq!(promoted.len(), 1);
        let context = lib.high_priority_context(5);
        assert_eq!(context, vec!["[lesson.weekend] weekend dips recover".to_string()]);
        assert!(lib.promote().is_empty());
    }

    #[test]
    fn demotion_turns_off_auto_execution_and_logs() {
        let lib = librarian();
        let id: SkillId = SEVERE_LOSS_GUARD_ID.into();
        let before = lib.skills.get(&id).unwrap();
        let updated = lib
            .apply_mutation(&SkillMutation {
                skill_id: id.clone(),
                change: MutationChange::DemoteToApproval,
                reason: "accuracy 0.60".into(),
                stats: SkillStats::default(),
                accuracy: 0.6,
            })
            .unwrap();
        assert_eq!(updated.as_rule().map(|r| r.auto_execute), Some(false));
        assert!(updated.enabled);
        assert_eq!(updated.version, before.version + 1);
        assert_eq!(
            lib.query(&KnowledgeQuery::default().of_kind(KnowledgeKind::Mutation)).len(),
            1
        );
    }

    #[test]
    fn mutation_of_non_rule_is_refused() {
        let lib = librarian();
        let err = lib
            .apply_mutation(&SkillMutation {
                skill_id: autopilot_skills::seed::META_SKILL_ID.into(),
                change: MutationChange::Disable,
                reason: String::new(),
                stats: SkillStats::default(),
                accuracy: 0.0,
            })
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::Skill(SkillError::WrongKind { .. })));
    }
}
