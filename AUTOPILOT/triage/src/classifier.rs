use std::fmt;

use autopilot_signals::CampaignMetrics;
use autopilot_skills::{ClassifierThresholds, SkillId};
use serde::{Deserialize, Serialize};

/// Performance state of an entity. Exactly one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    /// Not enough spend or history to judge.
    Observing,
    /// Sustained heavy loss.
    LossSevere,
    /// Short-term ratio well below the longer-term one and falling.
    Declining,
    /// Below break-even.
    LossMild,
    /// Strong ratio with enough conversions to scale.
    HighPotential,
    /// Comfortably profitable.
    StableGood,
    /// Everything else.
    StableNormal,
}

impl Label {
    /// Wire label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Observing => "observing",
            Self::LossSevere => "loss_severe",
            Self::Declining => "declining",
            Self::LossMild => "loss_mild",
            Self::HighPotential => "high_potential",
            Self::StableGood => "stable_good",
            Self::StableNormal => "stable_normal",
        }
    }

    /// Loss-making states the auditor treats as actionable.
    #[must_use]
    pub const fn is_loss(self) -> bool {
        matches!(self, Self::LossSevere | Self::LossMild | Self::Declining)
    }

    /// States where leaving the entity alone is correct.
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::StableGood | Self::StableNormal)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of the cascade for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Entity identifier.
    pub entity_id: String,
    /// Assigned label.
    pub label: Label,
    /// Thresholds and observed values behind the label.
    pub reason: String,
    /// Thresholds the cascade ran with.
    pub thresholds: ClassifierThresholds,
    /// Rule skill whose overrides were applied, if any.
    pub skill_id: Option<SkillId>,
}

/// Stateless classifier. First matching step wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct Classifier;

impl Classifier {
    /// Runs the cascade.
    #[must_use]
    pub fn classify(
        metrics: &CampaignMetrics,
        thresholds: &ClassifierThresholds,
        skill_id: Option<SkillId>,
    ) -> Classification {
        let t = thresholds;
        let roas_3d = metrics.roas_3d();
        let roas_7d = metrics.roas_7d();
        let spend_3d = metrics.last_3d.spend;
        let conversions_3d = metrics.last_3d.conversions;
        let days = metrics.days_of_data();
        let streak = metrics.streak_below(t.severe_roas);
        let decline_bar = roas_7d * (1.0 - t.decline_drop);

        let (label, reason) = if spend_3d < t.observe_min_spend || days < t.observe_min_days {
            (
                Label::Observing,
                format!(
                    "spend_3d {spend_3d:.2} (min {:.2}), days of data {days} (min {})",
                    t.observe_min_spend, t.observe_min_days
                ),
            )
        } else if roas_3d < t.severe_roas
            && spend_3d >= t.severe_min_spend
            && streak >= t.severe_streak_days
        {
            (
                Label::LossSevere,
                format!(
                    "roas_3d {roas_3d:.2} < {:.2}, spend_3d {spend_3d:.2} >= {:.2}, \
                     {streak} days below floor (min {})",
                    t.severe_roas, t.severe_min_spend, t.severe_streak_days
                ),
            )
        } else if roas_3d < decline_bar && metrics.trend_slope < 0.0 {
            (
                Label::Declining,
                format!(
                    "roas_3d {roas_3d:.2} < {decline_bar:.2} \
                     ({:.0}% under roas_7d {roas_7d:.2}), slope {:.3}",
                    t.decline_drop * 100.0,
                    metrics.trend_slope
                ),
            )
        } else if roas_3d < t.mild_roas {
            (
                Label::LossMild,
                format!("roas_3d {roas_3d:.2} < {:.2}", t.mild_roas),
            )
        } else if roas_3d >= t.high_roas && conversions_3d >= t.high_min_conversions {
            (
                Label::HighPotential,
                format!(
                    "roas_3d {roas_3d:.2} >= {:.2} with {conversions_3d:.0} conversions \
                     (min {:.0})",
                    t.high_roas, t.high_min_conversions
                ),
            )
        } else if roas_3d >= t.good_roas {
            (
                Label::StableGood,
                format!("roas_3d {roas_3d:.2} >= {:.2}", t.good_roas),
            )
        } else {
            (
                Label::StableNormal,
                format!(
                    "roas_3d {roas_3d:.2} between {:.2} and {:.2}",
                    t.mild_roas, t.good_roas
                ),
            )
        };

        Classification {
            entity_id: metrics.entity_id.clone(),
            label,
            reason,
            thresholds: thresholds.clone(),
            skill_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn entity(days: &[(f64, f64, f64)]) -> CampaignMetrics {
        let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        days.iter()
            .enumerate()
            .fold(CampaignMetrics::builder("c1"), |builder, (idx, (s, r, c))| {
                builder.day(
                    start + chrono::Duration::days(i64::try_from(idx).unwrap()),
                    *s,
                    *r,
                    *c,
                )
            })
            .build()
            .unwrap()
    }

    fn label(days: &[(f64, f64, f64)]) -> Label {
        Classifier::classify(&entity(days), &ClassifierThresholds::default(), None).label
    }

    #[test]
    fn sustained_heavy_loss_is_severe() {
        let metrics = entity(&[(40.0, 6.0, 0.0), (40.0, 6.0, 0.0), (40.0, 6.0, 0.0)]);
        let result = Classifier::classify(&metrics, &ClassifierThresholds::default(), None);
        assert_eq!(result.label, Label::LossSevere);
        assert!(result.reason.contains("0.15 < 0.20"));
        assert!(result.reason.contains("120.00 >= 50.00"));
    }

    #[test]
    fn small_spend_is_observed() {
        assert_eq!(label(&[(5.0, 0.0, 0.0), (5.0, 0.0, 0.0)]), Label::Observing);
        assert_eq!(label(&[(90.0, 10.0, 0.0)]), Label::Observing);
    }

    #[test]
    fn cascade_order_is_respected() {
        // 7-day ratio 2.0 collapsing to under 1.0 over the last three days
        let declining = [
            (20.0, 40.0, 1.0),
            (20.0, 40.0, 1.0),
            (20.0, 40.0, 1.0),
            (20.0, 40.0, 1.0),
            (20.0, 16.0, 1.0),
            (20.0, 16.0, 1.0),
            (20.0, 16.0, 1.0),
        ];
        assert_eq!(label(&declining), Label::Declining);
        assert_eq!(
            label(&[(20.0, 18.0, 1.0), (20.0, 18.0, 1.0), (20.0, 18.0, 1.0)]),
            Label::LossMild
        );
        assert_eq!(
            label(&[(20.0, 70.0, 2.0), (20.0, 70.0, 1.0), (20.0, 70.0, 1.0)]),
            Label::HighPotential
        );
        assert_eq!(
            label(&[(20.0, 70.0, 1.0), (20.0, 70.0, 0.0), (20.0, 70.0, 0.0)]),
            Label::StableGood
        );
        assert_eq!(
            label(&[(20.0, 25.0, 1.0), (20.0, 25.0, 1.0), (20.0, 25.0, 1.0)]),
            Label::StableNormal
        );
    }

    #[test]
    fn overrides_shift_the_cascade_and_rerun_is_stable() {
        let metrics = entity(&[(20.0, 25.0, 1.0), (20.0, 25.0, 1.0), (20.0, 25.0, 1.0)]);
        let strict = ClassifierThresholds {
            mild_roas: 1.5,
            ..ClassifierThresholds::default()
        };
        let first = Classifier::classify(&metrics, &strict, Some("rule".into()));
        let second = Classifier::classify(&metrics, &strict, Some("rule".into()));
        assert_eq!(first.label, Label::LossMild);
        assert_eq!(first, second);
    }
}
