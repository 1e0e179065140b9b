use autopilot_skills::{Penalty, QualityConstants};
use serde::{Deserialize, Serialize};

use crate::metrics::CampaignMetrics;

/// Readings the quality score is computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityInput {
    /// Spend on the reference day.
    pub spend: f64,
    /// Hours of the reference day elapsed.
    pub hours_elapsed: f64,
    /// Conversions on the reference day.
    pub conversions: f64,
    /// Revenue on the reference day.
    pub revenue: f64,
    /// Spend of the previous sample, if any.
    pub previous_spend: Option<f64>,
}

impl QualityInput {
    /// Reference-day readings of an entity.
    #[must_use]
    pub fn from_metrics(metrics: &CampaignMetrics) -> Self {
        Self {
            spend: metrics.today.spend,
            hours_elapsed: metrics.hours_elapsed,
            conversions: metrics.today.conversions,
            revenue: metrics.today.revenue,
            previous_spend: metrics.previous_day().map(|sample| sample.spend),
        }
    }

    fn roas(&self) -> f64 {
        if self.spend > 0.0 {
            self.revenue / self.spend
        } else {
            0.0
        }
    }
}

/// A penalty that fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityPenalty {
    /// Penalty name.
    pub name: String,
    /// Factor applied.
    pub factor: f64,
}

/// Data-quality confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    /// Confidence in `[floor, 1]`.
    pub confidence: f64,
    /// Whether the confidence is above the reliability bar.
    pub reliable: bool,
    /// Every penalty that fired, in evaluation order.
    pub penalties: Vec<QualityPenalty>,
}

impl QualityScore {
    /// Names of the fired penalties.
    #[must_use]
    pub fn penalty_names(&self) -> Vec<&str> {
        self.penalties.iter().map(|p| p.name.as_str()).collect()
    }
}

/// Scores how much the reference-day readings can be trusted.
#[must_use]
pub fn assess_quality(input: &QualityInput, constants: &QualityConstants) -> QualityScore {
    let mut penalties = Vec::new();
    let mut push = |name: &str, factor: f64| {
        penalties.push(QualityPenalty {
            name: name.to_string(),
            factor: factor.clamp(0.0, 1.0),
        });
    };

    if let Some(factor) = Penalty::tiered(&constants.spend_tiers, input.spend) {
        push("low_spend", factor);
    }
    if let Some(factor) = Penalty::tiered(&constants.hour_tiers, input.hours_elapsed) {
        push("early_in_day", factor);
    }
    if input.spend > 0.0 && input.conversions <= 0.0 && input.revenue <= 0.0 {
        push("zero_value", constants.zero_value_factor);
    }
    if let Some(previous) = input.previous_spend.filter(|p| *p > 0.0) {
        if input.spend > previous * constants.spend_jump_ratio {
            push("spend_jump", constants.spend_jump_factor);
        }
    }
    if input.spend > 0.0
        && input.spend < constants.implausible_max_spend
        && input.roas() > constants.implausible_roas
    {
        push("implausible_ratio", constants.implausible_factor);
    }

    let raw: f64 = penalties.iter().map(|p| p.factor).product();
    let confidence = raw.clamp(constants.confidence_floor, 1.0);
    QualityScore {
        confidence,
        reliable: confidence > constants.reliable_above,
        penalties,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy() -> QualityInput {
        QualityInput {
            spend: 80.0,
            hours_elapsed: 20.0,
            conversions: 4.0,
            revenue: 160.0,
            previous_spend: Some(70.0),
        }
    }

    #[test]
    fn healthy_day_is_fully_reliable() {
        let score = assess_quality(&healthy(), &QualityConstants::default());
        assert!((score.confidence - 1.0).abs() < 1e-12);
        assert!(score.reliable);
        assert!(score.penalties.is_empty());
    }

    #[test]
    fn penalties_compound_and_are_named() {
        let input = QualityInput {
            spend: 8.0,
            hours_elapsed: 6.0,
            revenue: 16.0,
            ..healthy()
        };
        let score = assess_quality(&input, &QualityConstants::default());
        assert!((score.confidence - 0.16).abs() < 1e-9);
        assert_eq!(score.penalty_names(), vec!["low_spend", "early_in_day"]);
        assert!(!score.reliable);
    }

    #[test]
    fn confidence_never_drops_below_floor() {
        let input = QualityInput {
            spend: 4.0,
            hours_elapsed: 1.0,
            conversions: 0.0,
            revenue: 0.0,
            previous_spend: Some(1.0),
        };
        let score = assess_quality(&input, &QualityConstants::default());
        assert!((score.confidence - 0.05).abs() < 1e-12);
        assert_eq!(score.penalties.len(), 4);
    }

    #[test]
    fn more_penalties_never_raise_confidence() {
        let constants = QualityConstants::default();
        let base = assess_quality(&healthy(), &constants).confidence;
        let jumped = assess_quality(
            &QualityInput {
                previous_spend: Some(10.0),
                ..healthy()
            },
            &constants,
        )
        .confidence;
        let implausible = assess_quality(
            &QualityInput {
                spend: 15.0,
                revenue: 180.0,
                previous_spend: Some(1.0),
                ..healthy()
            },
            &constants,
        )
        .confidence;
        assert!(jumped <= base);
        assert!(implausible <= jumped);
        assert!((0.05..=1.0).contains(&implausible));
    }
}
