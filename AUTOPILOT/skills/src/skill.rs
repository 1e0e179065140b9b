use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{condition::ConditionList, thresholds::ThresholdConfig, ThresholdOverrides};

/// Stable identifier of a skill.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkillId(pub String);

impl SkillId {
    /// Creates an identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrowed string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SkillId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SkillId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Screener triage verdict. Rule skills may force any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Hand the entity to the classifier and decision engine.
    NeedsDecision,
    /// Keep an eye on the entity; no decision this cycle.
    Watch,
    /// Ignore the entity this cycle.
    Skip,
}

impl Verdict {
    /// Wire label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::NeedsDecision => "needs_decision",
            Self::Watch => "watch",
            Self::Skip => "skip",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Scope attributes of a managed entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityScope {
    /// Product the entity advertises.
    pub product: Option<String>,
    /// Ad platform.
    pub platform: Option<String>,
    /// Ad account.
    pub account: Option<String>,
    /// Channel or placement family.
    pub channel: Option<String>,
}

/// Optional scope filter declared by a skill. Absent fields are wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillScope {
    /// Product filter.
    pub product: Option<String>,
    /// Platform filter.
    pub platform: Option<String>,
    /// Account filter.
    pub account: Option<String>,
    /// Channel filter.
    pub channel: Option<String>,
}

impl SkillScope {
    /// Scope that matches everything.
    #[must_use]
    pub fn wildcard() -> Self {
        Self::default()
    }

    /// Restricts to a product.
    #[must_use]
    pub fn product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    /// Restricts to a platform.
    #[must_use]
    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    /// Restricts to an account.
    #[must_use]
    pub fn account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// Restricts to a channel.
    #[must_use]
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Whether no filter is declared.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self == &Self::default()
    }
}

/// Rolling outcome counters attributed to a skill.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillStats {
    /// Reflections judged correct.
    pub correct: u32,
    /// Reflections judged wrong.
    pub wrong: u32,
    /// Reflections without a clear verdict.
    pub unclear: u32,
    /// Times the skill won a screening match.
    pub triggered: u32,
    /// Audit findings attributed to the skill.
    pub flagged: u32,
}

impl SkillStats {
    /// Outcomes with a clear verdict.
    #[must_use]
    pub const fn decided(&self) -> u32 {
        self.correct + self.wrong
    }

    /// Share of correct outcomes among decided ones.
    #[must_use]
    pub fn accuracy(&self) -> Option<f64> {
        let decided = self.decided();
        (decided > 0).then(|| f64::from(self.correct) / f64::from(decided))
    }
}

/// Guardrail/heuristic rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSkill {
    /// Ordered AND/OR condition list.
    pub conditions: ConditionList,
    /// Verdict forced on the screener when the rule matches.
    pub verdict: Option<Verdict>,
    /// Classifier threshold overrides.
    pub overrides: ThresholdOverrides,
    /// Whether proposals attributed to this rule may skip the approval gate.
    pub auto_execute: bool,
}

/// Encoded experience: what happened and what was learned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperienceSkill {
    /// Situation description.
    pub scenario: String,
    /// Observed outcome.
    pub outcome: String,
    /// Lesson to apply next time.
    pub lesson: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Times the experience was confirmed.
    pub validations: u32,
}

/// Per-product target constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoalSkill {
    /// Product the goal applies to.
    pub product: String,
    /// Ratio considered good for the product.
    pub target_roas: Option<f64>,
    /// Break-even ratio for the product.
    pub min_roas: Option<f64>,
    /// Daily budget ceiling for the product.
    pub max_daily_budget: Option<f64>,
}

impl GoalSkill {
    /// Goal expressed as classifier overrides.
    #[must_use]
    pub fn as_overrides(&self) -> ThresholdOverrides {
        ThresholdOverrides {
            good_roas: self.target_roas,
            mild_roas: self.min_roas,
            ..ThresholdOverrides::default()
        }
    }
}

/// Knowledge decay and promotion policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaSkill {
    /// Days without validation before an entry decays.
    pub decay_after_days: i64,
    /// Confidence removed per decay step.
    pub decay_step: f64,
    /// Entries below this confidence are archived on decay.
    pub archive_floor: f64,
    /// Validations needed for promotion.
    pub promote_after: u32,
    /// Confidence granted on promotion.
    pub promoted_confidence: f64,
}

impl Default for MetaSkill {
    fn default() -> Self {
        Self {
            decay_after_days: 30,
            decay_step: 0.1,
            archive_floor: 0.3,
            promote_after: 5,
            promoted_confidence: 0.9,
        }
    }
}

/// Static configuration knob holding the versioned thresholds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSkill {
    /// Threshold configuration.
    pub thresholds: ThresholdConfig,
}

/// The five skill shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkillBody {
    /// Condition list and forced verdict.
    Rule(RuleSkill),
    /// Scenario, outcome and lesson.
    Experience(ExperienceSkill),
    /// Product target constraints.
    Goal(GoalSkill),
    /// Decay/promotion policy.
    Meta(MetaSkill),
    /// Static configuration.
    Config(ConfigSkill),
}

/// Discriminant of [`SkillBody`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillKind {
    /// Rule skill.
    Rule,
    /// Experience skill.
    Experience,
    /// Goal skill.
    Goal,
    /// Meta skill.
    Meta,
    /// Config skill.
    Config,
}

impl SkillBody {
    /// Discriminant of the body.
    #[must_use]
    pub const fn kind(&self) -> SkillKind {
        match self {
            Self::Rule(_) => SkillKind::Rule,
            Self::Experience(_) => SkillKind::Experience,
            Self::Goal(_) => SkillKind::Goal,
            Self::Meta(_) => SkillKind::Meta,
            Self::Config(_) => SkillKind::Config,
        }
    }
}

/// Versioned unit of agent memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    /// Identifier.
    pub id: SkillId,
    /// Human readable name.
    pub name: String,
    /// Bumped on every configuration mutation.
    pub version: u32,
    /// Higher priority wins rule ties.
    pub priority: i32,
    /// Registration order, assigned by the store.
    pub ordinal: u64,
    /// Disabled skills never match.
    pub enabled: bool,
    /// Archived skills are retained but inert.
    pub archived: bool,
    /// Scope filter.
    pub scope: SkillScope,
    /// Rolling outcome counters.
    pub stats: SkillStats,
    /// Shape-specific payload.
    pub body: SkillBody,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Skill {
    /// Creates an enabled, wildcard-scoped skill.
    #[must_use]
    pub fn new(id: impl Into<SkillId>, name: impl Into<String>, body: SkillBody) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            version: 1,
            priority: 0,
            ordinal: 0,
            enabled: true,
            archived: false,
            scope: SkillScope::wildcard(),
            stats: SkillStats::default(),
            body,
            created_at: now,
            updated_at: now,
        }
    }

    /// Convenience constructor for rule skills.
    #[must_use]
    pub fn rule(id: impl Into<SkillId>, name: impl Into<String>, rule: RuleSkill) -> Self {
        Self::new(id, name, SkillBody::Rule(rule))
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the scope filter.
    #[must_use]
    pub fn with_scope(mut self, scope: SkillScope) -> Self {
        self.scope = scope;
        self
    }

    /// Enabled and not archived.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.enabled && !self.archived
    }

    /// Shape discriminant.
    #[must_use]
    pub const fn kind(&self) -> SkillKind {
        self.body.kind()
    }

    /// Rule payload, when this is a rule skill.
    #[must_use]
    pub const fn as_rule(&self) -> Option<&RuleSkill> {
        match &self.body {
            SkillBody::Rule(rule) => Some(rule),
            _ => None,
        }
    }
}

impl From<String> for SkillId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_serializes_with_kind_tag() {
        let skill = Skill::new(
            "goal.shoes",
            "Shoes goal",
            SkillBody::Goal(GoalSkill {
                product: "shoes".into(),
                target_roas: Some(2.5),
                ..GoalSkill::default()
            }),
        );
        let json = serde_json::to_value(&skill).unwrap();
        assert_eq!(json["body"]["kind"], "goal");
        let back: Skill = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), SkillKind::Goal);
    }

    #[test]
    fn accuracy_ignores_unclear() {
        let stats = SkillStats {
            correct: 1,
            wrong: 4,
            unclear: 7,
            ..SkillStats::default()
        };
        assert_eq!(stats.decided(), 5);
        assert!((stats.accuracy().unwrap() - 0.2).abs() < 1e-9);
        assert!(SkillStats::default().accuracy().is_none());
    }
}
