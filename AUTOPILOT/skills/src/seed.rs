use crate::{
    condition::{Comparison, Condition, ConditionList},
    skill::{ConfigSkill, MetaSkill, RuleSkill, Skill, SkillBody, Verdict},
    thresholds::ThresholdConfig,
};

/// Id of the seeded configuration skill.
pub const CONFIG_SKILL_ID: &str = "config.thresholds";
/// Id of the seeded knowledge policy skill.
pub const META_SKILL_ID: &str = "meta.knowledge_policy";
/// Id of the low-spend skip guardrail.
pub const LOW_SPEND_GUARD_ID: &str = "guard.low_spend_skip";
/// Id of the paused-entity skip guardrail.
pub const PAUSED_GUARD_ID: &str = "guard.paused_skip";
/// Id of the severe-loss escalation guardrail.
pub const SEVERE_LOSS_GUARD_ID: &str = "guard.severe_loss";

/// Skill set registered at bootstrap.
#[must_use]
pub fn bootstrap_skills() -> Vec<Skill> {
    let defaults = ThresholdConfig::default();
    vec![
        Skill::new(
            CONFIG_SKILL_ID,
            "System thresholds",
            SkillBody::Config(ConfigSkill {
                thresholds: defaults.clone(),
            }),
        ),
        Skill::new(
            META_SKILL_ID,
            "Knowledge decay and promotion",
            SkillBody::Meta(MetaSkill::default()),
        ),
        Skill::rule(
            PAUSED_GUARD_ID,
            "Paused entities are not screened",
            RuleSkill {
                conditions: ConditionList::new().and(Condition::new(
                    "active",
                    Comparison::Eq,
                    0.0,
                )),
                verdict: Some(Verdict::Skip),
                ..RuleSkill::default()
            },
        )
        .with_priority(110),
        Skill::rule(
            LOW_SPEND_GUARD_ID,
            "Negligible three-day spend",
            RuleSkill {
                conditions: ConditionList::new().and(Condition::new(
                    "spend_3d",
                    Comparison::Lt,
                    defaults.screening.min_spend_3d,
                )),
                verdict: Some(Verdict::Skip),
                ..RuleSkill::default()
            },
        )
        .with_priority(100),
        Skill::rule(
            SEVERE_LOSS_GUARD_ID,
            "Severe sustained loss",
            RuleSkill {
                conditions: ConditionList::new()
                    .and(Condition::new(
                        "roas_3d",
                        Comparison::Lt,
                        defaults.classifier.severe_roas,
                    ))
                    .and(Condition::new(
                        "spend_3d",
                        Comparison::Ge,
                        defaults.classifier.severe_min_spend,
                    )),
                verdict: Some(Verdict::NeedsDecision),
                auto_execute: true,
                ..RuleSkill::default()
            },
        )
        .with_priority(50),
    ]
}
