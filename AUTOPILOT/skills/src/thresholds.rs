use serde::{Deserialize, Serialize};

/// Multiplicative penalty applied when a measured value is below `below`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Penalty {
    /// Exclusive upper bound that triggers the penalty.
    pub below: f64,
    /// Factor in `(0, 1]` multiplied into the confidence.
    pub factor: f64,
}

impl Penalty {
    /// Creates a penalty tier.
    #[must_use]
    pub const fn new(below: f64, factor: f64) -> Self {
        Self { below, factor }
    }

    /// Returns the factor of the tightest tier that applies to `value`.
    ///
    /// Tiers are checked from the lowest bound upwards so `<5` wins over `<10`.
    #[must_use]
    pub fn tiered(tiers: &[Self], value: f64) -> Option<f64> {
        let mut sorted: Vec<&Self> = tiers.iter().collect();
        sorted.sort_by(|a, b| a.below.total_cmp(&b.below));
        sorted
            .into_iter()
            .find(|tier| value < tier.below)
            .map(|tier| tier.factor.clamp(0.0, 1.0))
    }
}

/// Constants used by the data-quality confidence score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QualityConstants {
    /// Low-spend tiers.
    pub spend_tiers: Vec<Penalty>,
    /// Early time-of-day tiers, in elapsed hours.
    pub hour_tiers: Vec<Penalty>,
    /// Factor when there is spend but neither conversions nor value.
    pub zero_value_factor: f64,
    /// Spend growth vs the previous sample that counts as a jump.
    pub spend_jump_ratio: f64,
    /// Factor applied on a spend jump.
    pub spend_jump_factor: f64,
    /// Ratio above which a low-spend reading is implausible.
    pub implausible_roas: f64,
    /// Spend below which a high ratio is considered implausible.
    pub implausible_max_spend: f64,
    /// Factor applied on an implausible ratio.
    pub implausible_factor: f64,
    /// Lowest confidence ever reported.
    pub confidence_floor: f64,
    /// Confidence strictly above this is reliable.
    pub reliable_above: f64,
}

impl Default for QualityConstants {
    fn default() -> Self {
        Self {
            spend_tiers: vec![
                Penalty::new(5.0, 0.2),
                Penalty::new(10.0, 0.4),
                Penalty::new(30.0, 0.7),
            ],
            hour_tiers: vec![
                Penalty::new(4.0, 0.15),
                Penalty::new(8.0, 0.4),
                Penalty::new(12.0, 0.7),
            ],
            zero_value_factor: 0.5,
            spend_jump_ratio: 3.0,
            spend_jump_factor: 0.6,
            implausible_roas: 10.0,
            implausible_max_spend: 20.0,
            implausible_factor: 0.5,
            confidence_floor: 0.05,
            reliable_above: 0.5,
        }
    }
}

/// Breakpoints for the trend classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrendConstants {
    /// Minimum valid samples before a trend is computed.
    pub min_points: usize,
    /// Relative slope at or below which the series is crashing.
    pub crash_slope: f64,
    /// Relative slope at or below which the series is declining.
    pub decline_slope: f64,
    /// Relative slope at or above which the series is rising.
    pub rise_slope: f64,
    /// Relative acceleration that turns a decline into a recovery.
    pub recovery_accel: f64,
    /// Points needed for full trend confidence.
    pub full_confidence_points: f64,
    /// Coefficient of variation above which the trend is volatile.
    pub volatility_bound: f64,
    /// Confidence factor applied to volatile series.
    pub volatility_factor: f64,
}

impl Default for TrendConstants {
    fn default() -> Self {
        Self {
            min_points: 3,
            crash_slope: -0.15,
            decline_slope: -0.05,
            rise_slope: 0.05,
            recovery_accel: 0.05,
            full_confidence_points: 8.0,
            volatility_bound: 0.5,
            volatility_factor: 0.7,
        }
    }
}

/// Constants for anomaly detection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnomalyConstants {
    /// Spend ratios vs history mean mapping to severities 3, 4 and 5.
    pub spike_ratios: [f64; 3],
    /// Ratio drops vs history mean mapping to severities 3, 4 and 5.
    pub crash_drops: [f64; 3],
    /// Spend a full day may burn without a conversion.
    pub zero_conversion_daily_allowance: f64,
    /// Minimum fraction of the daily allowance, however early in the day.
    pub zero_conversion_min_fraction: f64,
    /// Relative gap below the peer average that counts as underperformance.
    pub peer_gap: f64,
    /// Relative gap below the peer average that raises severity.
    pub peer_severe_gap: f64,
    /// Minimum peers (excluding the entity) for a peer comparison.
    pub peer_min_group: usize,
    /// Ratio floor used by the account-wide check.
    pub account_floor_roas: f64,
    /// Entities below the floor needed for an account-wide anomaly.
    pub account_min_entities: usize,
    /// Three-day spend required before an entity counts toward peer checks.
    pub peer_min_spend: f64,
}

impl Default for AnomalyConstants {
    fn default() -> Self {
        Self {
            spike_ratios: [3.0, 5.0, 8.0],
            crash_drops: [0.5, 0.7, 0.9],
            zero_conversion_daily_allowance: 50.0,
            zero_conversion_min_fraction: 0.25,
            peer_gap: 0.5,
            peer_severe_gap: 0.25,
            peer_min_group: 2,
            account_floor_roas: 0.5,
            account_min_entities: 3,
            peer_min_spend: 10.0,
        }
    }
}

/// Everything the trend and quality engine reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SignalConstants {
    /// Quality score constants.
    pub quality: QualityConstants,
    /// Trend breakpoints.
    pub trend: TrendConstants,
    /// Anomaly constants.
    pub anomaly: AnomalyConstants,
}

/// Screener table constants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScreeningThresholds {
    /// Three-day spend below which the entity is skipped.
    pub min_spend_3d: f64,
    /// Today's spend counted as low when there is no trend.
    pub low_spend_today: f64,
    /// Anomaly severity that forces a decision.
    pub escalate_severity: u8,
    /// Confidence below which a crash forces a decision.
    pub low_confidence: f64,
    /// Three-day spend needed before a loss ratio forces a decision.
    pub loss_min_spend_3d: f64,
}

impl Default for ScreeningThresholds {
    fn default() -> Self {
        Self {
            min_spend_3d: 5.0,
            low_spend_today: 10.0,
            escalate_severity: 4,
            low_confidence: 0.5,
            loss_min_spend_3d: 20.0,
        }
    }
}

/// Classifier cascade thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierThresholds {
    /// Three-day spend below which the entity is still observed.
    pub observe_min_spend: f64,
    /// Days of data below which the entity is still observed.
    pub observe_min_days: usize,
    /// Ratio floor for a severe loss.
    pub severe_roas: f64,
    /// Three-day spend needed for a severe loss.
    pub severe_min_spend: f64,
    /// Consecutive days below the severe floor.
    pub severe_streak_days: usize,
    /// Relative drop of the 3-day ratio vs the 7-day ratio counted as decline.
    pub decline_drop: f64,
    /// Ratio floor for a mild loss.
    pub mild_roas: f64,
    /// Ratio for high potential.
    pub high_roas: f64,
    /// Three-day conversions needed for high potential.
    pub high_min_conversions: f64,
    /// Ratio for stable good.
    pub good_roas: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            observe_min_spend: 20.0,
            observe_min_days: 2,
            severe_roas: 0.2,
            severe_min_spend: 50.0,
            severe_streak_days: 3,
            decline_drop: 0.3,
            mild_roas: 1.0,
            high_roas: 3.0,
            high_min_conversions: 3.0,
            good_roas: 1.5,
        }
    }
}

/// Field-by-field classifier overrides carried by rule skills.
///
/// `None` (or JSON `null`) means "fall back to the inherited value".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThresholdOverrides {
    /// Override for [`ClassifierThresholds::observe_min_spend`].
    pub observe_min_spend: Option<f64>,
    /// Override for [`ClassifierThresholds::observe_min_days`].
    pub observe_min_days: Option<usize>,
    /// Override for [`ClassifierThresholds::severe_roas`].
    pub severe_roas: Option<f64>,
    /// Override for [`ClassifierThresholds::severe_min_spend`].
    pub severe_min_spend: Option<f64>,
    /// Override for [`ClassifierThresholds::severe_streak_days`].
    pub severe_streak_days: Option<usize>,
    /// Override for [`ClassifierThresholds::decline_drop`].
    pub decline_drop: Option<f64>,
    /// Override for [`ClassifierThresholds::mild_roas`].
    pub mild_roas: Option<f64>,
    /// Override for [`ClassifierThresholds::high_roas`].
    pub high_roas: Option<f64>,
    /// Override for [`ClassifierThresholds::high_min_conversions`].
    pub high_min_conversions: Option<f64>,
    /// Override for [`ClassifierThresholds::good_roas`].
    pub good_roas: Option<f64>,
}

impl ThresholdOverrides {
    /// Whether no field is overridden.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

impl ClassifierThresholds {
    /// Returns a copy with every present override applied.
    #[must_use]
    pub fn merged(&self, overrides: &ThresholdOverrides) -> Self {
        Self {
            observe_min_spend: overrides.observe_min_spend.unwrap_or(self.observe_min_spend),
            observe_min_days: overrides.observe_min_days.unwrap_or(self.observe_min_days),
            severe_roas: overrides.severe_roas.unwrap_or(self.severe_roas),
            severe_min_spend: overrides.severe_min_spend.unwrap_or(self.severe_min_spend),
            severe_streak_days: overrides
                .severe_streak_days
                .unwrap_or(self.severe_streak_days),
            decline_drop: overrides.decline_drop.unwrap_or(self.decline_drop),
            mild_roas: overrides.mild_roas.unwrap_or(self.mild_roas),
            high_roas: overrides.high_roas.unwrap_or(self.high_roas),
            high_min_conversions: overrides
                .high_min_conversions
                .unwrap_or(self.high_min_conversions),
            good_roas: overrides.good_roas.unwrap_or(self.good_roas),
        }
    }
}

/// Decision engine constants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecisionThresholds {
    /// Hours after an action during which the entity is left alone.
    pub cooldown_hours: i64,
    /// Three-day spend without conversions that auto-pauses.
    pub zero_conversion_spend_3d: f64,
    /// Daily budget ceiling for automated increases.
    pub budget_ceiling: f64,
    /// Relative budget increase proposed for high-potential entities.
    pub budget_step: f64,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            cooldown_hours: 24,
            zero_conversion_spend_3d: 100.0,
            budget_ceiling: 500.0,
            budget_step: 0.25,
        }
    }
}

/// Constants for the deterministic reflection rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReflectionThresholds {
    /// Relative ratio recovery after a pause that makes the pause wrong.
    pub pause_recovery: f64,
    /// Relative ratio loss tolerated after a budget increase.
    pub budget_tolerance: f64,
    /// Relative ratio loss after a budget increase that makes it wrong.
    pub budget_collapse: f64,
}

impl Default for ReflectionThresholds {
    fn default() -> Self {
        Self {
            pause_recovery: 0.5,
            budget_tolerance: 0.2,
            budget_collapse: 0.3,
        }
    }
}

/// The single versioned configuration object, persisted as a `config` skill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Schema/config version, bumped on every edit.
    pub version: u32,
    /// Trend, quality and anomaly constants.
    pub signals: SignalConstants,
    /// Screener table constants.
    pub screening: ScreeningThresholds,
    /// System-wide classifier defaults.
    pub classifier: ClassifierThresholds,
    /// Decision constants.
    pub decision: DecisionThresholds,
    /// Reflection rule constants.
    pub reflection: ReflectionThresholds,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            version: 1,
            signals: SignalConstants::default(),
            screening: ScreeningThresholds::default(),
            classifier: ClassifierThresholds::default(),
            decision: DecisionThresholds::default(),
            reflection: ReflectionThresholds::default(),
        }
    }
}
