use autopilot_actions::{ActionKind, ActionQueue};
use autopilot_knowledge::{Librarian, MutationChange, Outcome, SkillMutation};
use autopilot_skills::SkillId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::reflection::ReflectionLog;

/// Evolution policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionPolicy {
    /// Correct plus wrong outcomes needed before a rule is judged.
    pub min_outcomes: u32,
    /// Accuracy below which a rule is disabled.
    pub disable_below: f64,
    /// Accuracy below which an auto-executing rule is demoted.
    pub demote_below: f64,
    /// Rejection rate above which a review proposal is emitted.
    pub rejection_rate: f64,
    /// Reviews needed before the rejection rate counts.
    pub min_reviews: usize,
}

impl Default for EvolutionPolicy {
    fn default() -> Self {
        Self {
            min_outcomes: 3,
            disable_below: 0.5,
            demote_below: 0.7,
            rejection_rate: 0.5,
            min_reviews: 10,
        }
    }
}

/// Reflected outcomes for one action kind and skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeGroup {
    /// Operation.
    pub kind: ActionKind,
    /// Originating skill.
    pub skill_id: Option<SkillId>,
    /// Correct outcomes.
    pub correct: u32,
    /// Wrong outcomes.
    pub wrong: u32,
    /// Unclear outcomes.
    pub unclear: u32,
}

/// What one evolution run saw and did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvolutionReport {
    /// Outcomes grouped by kind and skill.
    pub groups: Vec<OutcomeGroup>,
    /// Mutations applied.
    pub applied: Vec<SkillMutation>,
    /// Mutations the librarian refused, with the error.
    pub refused: Vec<(SkillId, String)>,
    /// Human rejection rate, when enough reviews exist.
    pub rejection_rate: Option<f64>,
    /// Review-tightening proposal, recorded but never applied.
    pub proposal: Option<String>,
}

/// Retunes rule skills from aggregated reflections.
#[derive(Debug, Clone)]
pub struct EvolutionEngine {
    librarian: Librarian,
    policy: EvolutionPolicy,
}

impl EvolutionEngine {
    /// Engine with the default policy.
    #[must_use]
    pub fn new(librarian: Librarian) -> Self {
        Self {
            librarian,
            policy: EvolutionPolicy::default(),
        }
    }

    /// Overrides the policy.
    #[must_use]
    pub fn with_policy(mut self, policy: EvolutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Groups reflections by kind and skill.
    #[must_use]
    pub fn group(log: &ReflectionLog) -> Vec<OutcomeGroup> {
        let mut groups: IndexMap<(ActionKind, Option<SkillId>), OutcomeGroup> = IndexMap::new();
        for record in log.all() {
            let group = groups
                .entry((record.kind, record.skill_id.clone()))
                .or_insert_with(|| OutcomeGroup {
                    kind: record.kind,
                    skill_id: record.skill_id.clone(),
                    correct: 0,
                    wrong: 0,
                    unclear: 0,
                });
            match record.outcome {
                Outcome::Correct => group.correct += 1,
                Outcome::Wrong => group.wrong += 1,
                Outcome::Unclear => group.unclear += 1,
            }
        }
        groups.into_values().collect()
    }

    /// Mutations warranted by the current skill stats. Disabled rules are never revisited.
    #[must_use]
    pub fn plan(&self) -> Vec<SkillMutation> {
        let p = &self.policy;
        self.librarian
            .skills()
            .active_rules()
            .into_iter()
            .filter_map(|skill| {
                let stats = skill.stats;
                if stats.decided() < p.min_outcomes {
                    return None;
                }
                let accuracy = stats.accuracy()?;
                let auto = skill.as_rule().is_some_and(|rule| rule.auto_execute);
                let change = if accuracy < p.disable_below {
                    MutationChange::Disable
                } else if accuracy < p.demote_below && auto {
                    MutationChange::DemoteToApproval
                } else {
                    return None;
                };
                Some(SkillMutation {
                    skill_id: skill.id.clone(),
                    change,
                    reason: format!(
                        "accuracy {accuracy:.2} over {} decided outcomes ({} correct, {} wrong)",
                        stats.decided(),
                        stats.correct,
                        stats.wrong
                    ),
                    stats,
                    accuracy,
                })
            })
            .collect()
    }

    /// Runs one evolution pass.
    pub fn run(&self, log: &ReflectionLog, queue: &ActionQueue) -> EvolutionReport {
        let mut report = EvolutionReport {
            groups: Self::group(log),
            ..EvolutionReport::default()
        };
        for mutation in self.plan() {
            match self.librarian.apply_mutation(&mutation) {
                Ok(_) => report.applied.push(mutation),
                Err(err) => {
                    warn!(skill = %mutation.skill_id, error = %err, "mutation refused");
                    report.refused.push((mutation.skill_id, err.to_string()));
                }
            }
        }

        let (reviewed, rejected) = queue.review_counts();
        if reviewed >= self.policy.min_reviews && reviewed > 0 {
            #[allow(clippy::cast_precision_loss)]
            let rate = rejected as f64 / reviewed as f64;
            report.rejection_rate = Some(rate);
            if rate > self.policy.rejection_rate {
                let content = format!(
                    "reviewers rejected {rejected} of {reviewed} proposals ({:.0}%); tighten the \
                     screening and decision criteria before proposing more",
                    rate * 100.0
                );
                self.librarian.record_proposal(
                    "evolution.review_criteria",
                    content.clone(),
                    json!({ "reviewed": reviewed, "rejected": rejected, "rate": rate }),
                );
                report.proposal = Some(content);
            }
        }
        info!(
            groups = report.groups.len(),
            applied = report.applied.len(),
            proposal = report.proposal.is_some(),
            "evolution pass complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_actions::ProposedAction;
    use autopilot_knowledge::KnowledgeBase;
    use autopilot_skills::{seed::SEVERE_LOSS_GUARD_ID, SkillStats, SkillStore};

    fn librarian_with(stats: SkillStats) -> Librarian {
        let store = SkillStore::bootstrap();
        store
            .update_stats(&SEVERE_LOSS_GUARD_ID.into(), |s| *s = stats)
            .unwrap();
        Librarian::new(store, KnowledgeBase::new())
    }

    #[test]
    fn inaccurate_rule_is_disabled_and_stays_disabled() {
        let librarian = librarian_with(SkillStats {
            correct: 1,
            wrong: 4,
            ..SkillStats::default()
        });
        let engine = EvolutionEngine::new(librarian.clone());
        let report = engine.run(&ReflectionLog::new(), &ActionQueue::new());
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.applied[0].change, MutationChange::Disable);
        let id: SkillId = SEVERE_LOSS_GUARD_ID.into();
        assert!(!librarian.skills().get(&id).unwrap().enabled);

        librarian
            .skills()
            .update_stats(&id, |s| s.correct += 50)
            .unwrap();
        let again = engine.run(&ReflectionLog::new(), &ActionQueue::new());
        assert!(again.applied.is_empty());
        assert!(!librarian.skills().get(&id).unwrap().enabled);
    }

    #[test]
    fn mediocre_auto_rule_is_demoted() {
        let librarian = librarian_with(SkillStats {
            correct: 3,
            wrong: 2,
            ..SkillStats::default()
        });
        let report =
            EvolutionEngine::new(librarian.clone()).run(&ReflectionLog::new(), &ActionQueue::new());
        assert_eq!(report.applied[0].change, MutationChange::DemoteToApproval);
        let skill = librarian.skills().get(&SEVERE_LOSS_GUARD_ID.into()).unwrap();
        assert!(skill.enabled);
        assert_eq!(skill.as_rule().map(|r| r.auto_execute), Some(false));
    }

    #[test]
    fn too_few_outcomes_change_nothing() {
        let librarian = librarian_with(SkillStats {
            wrong: 2,
            unclear: 9,
            ..SkillStats::default()
        });
        assert!(EvolutionEngine::new(librarian).plan().is_empty());
    }

    #[test]
    fn high_rejection_rate_emits_unapplied_proposal() {
        let librarian = librarian_with(SkillStats::default());
        let queue = ActionQueue::new();
        for idx in 0..4 {
            let action = queue
                .submit(ProposedAction::new(format!("c{idx}"), ActionKind::Pause, "loss"))
                .unwrap();
            if idx == 0 {
                queue
                    .transition(action.id, autopilot_actions::ActionStatus::Approved, None)
                    .unwrap();
            } else {
                queue
                    .transition(
                        action.id,
                        autopilot_actions::ActionStatus::Rejected,
                        Some("no".into()),
                    )
                    .unwrap();
            }
        }
        let engine = EvolutionEngine::new(librarian.clone()).with_policy(EvolutionPolicy {
            min_reviews: 4,
            ..EvolutionPolicy::default()
        });
        let report = engine.run(&ReflectionLog::new(), &queue);
        assert_eq!(report.rejection_rate, Some(0.75));
        assert!(report.proposal.is_some());
        assert!(librarian
            .knowledge()
            .by_topic("evolution.review_criteria")
            .is_some());
    }
}
