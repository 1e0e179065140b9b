#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Skill memory for the autopilot: the five skill shapes, the condition language
//! used by rule skills, the matching engine, and the versioned threshold config.

/// Condition language evaluated against entity facts.
pub mod condition;
/// Rule matching with deterministic tie-breaks.
pub mod matching;
/// Bootstrap skill set.
pub mod seed;
/// Skill envelope and the tagged skill bodies.
pub mod skill;
/// Thread-safe skill registry.
pub mod store;
/// Versioned thresholds and signal constants.
pub mod thresholds;

pub use condition::{Clause, Comparison, Condition, ConditionList, Connector, Facts};
pub use matching::{MatchOutcome, SkillMatcher};
pub use seed::bootstrap_skills;
pub use skill::{
    ConfigSkill, EntityScope, ExperienceSkill, GoalSkill, MetaSkill, RuleSkill, Skill, SkillBody,
    SkillId, SkillKind, SkillScope, SkillStats, Verdict,
};
pub use store::{SkillError, SkillStore};
pub use thresholds::{
    AnomalyConstants, ClassifierThresholds, DecisionThresholds, Penalty, QualityConstants,
    ReflectionThresholds, ScreeningThresholds, SignalConstants, ThresholdConfig,
    ThresholdOverrides, TrendConstants,
};
