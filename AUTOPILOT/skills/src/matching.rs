use std::cmp::Reverse;

use serde::{Deserialize, Serialize};

use crate::{
    condition::Facts,
    skill::{EntityScope, GoalSkill, Skill, SkillBody, SkillId, SkillScope, Verdict},
    thresholds::{ClassifierThresholds, ThresholdConfig},
};

/// Result of matching one entity against the rule set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    /// Winning rule skill, if any.
    pub skill_id: Option<SkillId>,
    /// Verdict forced by the winning rule.
    pub verdict: Option<Verdict>,
    /// Whether the winning rule allows auto execution.
    pub auto_execute: Option<bool>,
    /// Classifier thresholds after default ← goal ← rule merging.
    pub thresholds: ClassifierThresholds,
}

/// Stateless matching engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SkillMatcher;

impl SkillMatcher {
    /// Whether every declared scope filter matches the entity (case-insensitive).
    #[must_use]
    pub fn scope_matches(filter: &SkillScope, entity: &EntityScope) -> bool {
        field_matches(filter.product.as_deref(), entity.product.as_deref())
            && field_matches(filter.platform.as_deref(), entity.platform.as_deref())
            && field_matches(filter.account.as_deref(), entity.account.as_deref())
            && field_matches(filter.channel.as_deref(), entity.channel.as_deref())
    }

    /// Scope filter plus, for rule skills, the condition expression.
    ///
    /// Enablement is not considered here; see [`SkillMatcher::resolve`].
    #[must_use]
    pub fn matches(skill: &Skill, facts: &Facts) -> bool {
        if !Self::scope_matches(&skill.scope, &facts.scope) {
            return false;
        }
        match &skill.body {
            SkillBody::Rule(rule) => rule.conditions.evaluate(facts),
            _ => true,
        }
    }

    /// Picks the single winning active rule: highest priority, then earliest registration.
    #[must_use]
    pub fn resolve<'a>(skills: &'a [Skill], facts: &Facts) -> Option<&'a Skill> {
        skills
            .iter()
            .filter(|skill| skill.is_active() && skill.as_rule().is_some())
            .filter(|skill| Self::matches(skill, facts))
            .max_by_key(|skill| (skill.priority, Reverse(skill.ordinal)))
    }

    /// Full match: winning rule plus merged classifier thresholds.
    #[must_use]
    pub fn match_entity(
        skills: &[Skill],
        config: &ThresholdConfig,
        goal: Option<&GoalSkill>,
        facts: &Facts,
    ) -> MatchOutcome {
        let mut thresholds = config.classifier.clone();
        if let Some(goal) = goal {
            thresholds = thresholds.merged(&goal.as_overrides());
        }
        let winner = Self::resolve(skills, facts);
        let rule = winner.and_then(Skill::as_rule);
        if let Some(rule) = rule {
            thresholds = thresholds.merged(&rule.overrides);
        }
        MatchOutcome {
            skill_id: winner.map(|skill| skill.id.clone()),
            verdict: rule.and_then(|rule| rule.verdict),
            auto_execute: rule.map(|rule| rule.auto_execute),
            thresholds,
        }
    }
}

fn field_matches(filter: Option<&str>, value: Option<&str>) -> bool {
    match (filter, value) {
        (None, _) => true,
        (Some(expected), Some(actual)) => expected.eq_ignore_ascii_case(actual),
        (Some(_), None) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        condition::{Comparison, Condition, ConditionList},
        skill::RuleSkill,
        ThresholdOverrides,
    };

    fn facts() -> Facts {
        Facts::new(EntityScope {
            product: Some("Shoes".into()),
            platform: Some("meta".into()),
            account: Some("acct-1".into()),
            channel: None,
        })
        .with("roas_3d", 0.15)
        .with("spend_3d", 120.0)
    }

    fn rule(id: &str, priority: i32, ordinal: u64, verdict: Verdict) -> Skill {
        let mut skill = Skill::rule(
            id,
            id,
            RuleSkill {
                verdict: Some(verdict),
                ..RuleSkill::default()
            },
        )
        .with_priority(priority);
        skill.ordinal = ordinal;
        skill
    }

    #[test]
    fn wildcard_matches_everything() {
        let skill = rule("any", 0, 0, Verdict::Watch);
        assert!(SkillMatcher::matches(&skill, &facts()));
        assert!(SkillMatcher::matches(&skill, &Facts::default()));
    }

    #[test]
    fn failing_condition_flips_match() {
        let mut skill = rule("any", 0, 0, Verdict::Watch);
        if let SkillBody::Rule(rule) = &mut skill.body {
            rule.conditions =
                ConditionList::new().and(Condition::new("roas_3d", Comparison::Gt, 5.0));
        }
        assert!(!SkillMatcher::matches(&skill, &facts()));
    }

    #[test]
    fn scope_is_case_insensitive_and_strict_on_missing() {
        let skill = rule("shoes", 0, 0, Verdict::Watch)
            .with_scope(SkillScope::wildcard().product("shoes"));
        assert!(SkillMatcher::matches(&skill, &facts()));
        let skill =
            rule("chan", 0, 0, Verdict::Watch).with_scope(SkillScope::wildcard().channel("feed"));
        assert!(!SkillMatcher::matches(&skill, &facts()));
    }

    #[test]
    fn priority_then_registration_order() {
        let skills = vec![
            rule("late-high", 10, 3, Verdict::Skip),
            rule("early-high", 10, 1, Verdict::NeedsDecision),
            rule("low", 1, 0, Verdict::Watch),
        ];
        let winner = SkillMatcher::resolve(&skills, &facts()).unwrap();
        assert_eq!(winner.id.as_str(), "early-high");
    }

    #[test]
    fn disabled_rules_never_win() {
        let mut top = rule("top", 100, 0, Verdict::Skip);
        top.enabled = false;
        let skills = vec![top, rule("fallback", 0, 1, Verdict::Watch)];
        let winner = SkillMatcher::resolve(&skills, &facts()).unwrap();
        assert_eq!(winner.id.as_str(), "fallback");
    }

    #[test]
    fn rule_overrides_win_over_goal() {
        let mut skill = rule("override", 0, 0, Verdict::NeedsDecision);
        if let SkillBody::Rule(rule) = &mut skill.body {
            rule.overrides = ThresholdOverrides {
                good_roas: Some(2.0),
                ..ThresholdOverrides::default()
            };
        }
        let goal = GoalSkill {
            product: "shoes".into(),
            target_roas: Some(3.5),
            min_roas: Some(1.2),
            max_daily_budget: None,
        };
        let outcome = SkillMatcher::match_entity(
            &[skill],
            &ThresholdConfig::default(),
            Some(&goal),
            &facts(),
        );
        assert!((outcome.thresholds.good_roas - 2.0).abs() < 1e-9);
        assert!((outcome.thresholds.mild_roas - 1.2).abs() < 1e-9);
        assert_eq!(outcome.verdict, Some(Verdict::NeedsDecision));
    }
}
