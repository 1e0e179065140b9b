use autopilot_skills::TrendConstants;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One observation of a series: the ratio for a day plus the spend behind it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// Day observed.
    pub date: NaiveDate,
    /// Observed ratio.
    pub value: f64,
    /// Spend behind the observation.
    pub spend: f64,
}

impl SeriesPoint {
    /// Finite value and non-negative spend.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.value.is_finite() && self.spend.is_finite() && self.spend >= 0.0
    }
}

/// Direction of a ratio series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    /// Falling fast.
    Crashing,
    /// Falling.
    Declining,
    /// Falling but decelerating.
    Recovering,
    /// Flat.
    Stable,
    /// Climbing.
    Rising,
    /// Too few valid points.
    InsufficientData,
}

impl TrendDirection {
    /// Wire label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Crashing => "crashing",
            Self::Declining => "declining",
            Self::Recovering => "recovering",
            Self::Stable => "stable",
            Self::Rising => "rising",
            Self::InsufficientData => "insufficient_data",
        }
    }
}

/// Trend analysis of one series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    /// Classified direction.
    pub direction: TrendDirection,
    /// OLS slope over the sample index.
    pub slope: f64,
    /// OLS slope of the first differences.
    pub acceleration: f64,
    /// Slope normalized by the mean value.
    pub relative_slope: f64,
    /// Acceleration normalized by the mean value.
    pub relative_acceleration: f64,
    /// Population standard deviation.
    pub volatility: f64,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Valid points used.
    pub points: usize,
}

impl TrendReport {
    fn insufficient(points: usize) -> Self {
        Self {
            direction: TrendDirection::InsufficientData,
            slope: 0.0,
            acceleration: 0.0,
            relative_slope: 0.0,
            relative_acceleration: 0.0,
            volatility: 0.0,
            confidence: 0.0,
            points,
        }
    }
}

/// Ordinary least squares slope of `values` against their index.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn ols_slope(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;
    let (mut num, mut den) = (0.0, 0.0);
    for (idx, value) in values.iter().enumerate() {
        let dx = idx as f64 - mean_x;
        num += dx * (value - mean_y);
        den += dx * dx;
    }
    (den > 0.0).then(|| num / den)
}

fn normalized(value: f64, mean: f64) -> f64 {
    if mean.abs() > f64::EPSILON {
        value / mean.abs()
    } else {
        value
    }
}

/// Classifies a series. Invalid points are ignored.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn analyze_trend(points: &[SeriesPoint], constants: &TrendConstants) -> TrendReport {
    let values: Vec<f64> = points
        .iter()
        .filter(|point| point.is_valid())
        .map(|point| point.value)
        .collect();
    if values.len() < constants.min_points.max(2) {
        return TrendReport::insufficient(values.len());
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let slope = ols_slope(&values).unwrap_or(0.0);
    let diffs: Vec<f64> = values.windows(2).map(|pair| pair[1] - pair[0]).collect();
    let acceleration = ols_slope(&diffs).unwrap_or(0.0);
    let volatility = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();

    let relative_slope = normalized(slope, mean);
    let relative_acceleration = normalized(acceleration, mean);
    let direction = if relative_slope <= constants.crash_slope {
        TrendDirection::Crashing
    } else if relative_slope <= constants.decline_slope {
        if relative_acceleration > constants.recovery_accel {
            TrendDirection::Recovering
        } else {
            TrendDirection::Declining
        }
    } else if relative_slope >= constants.rise_slope {
        TrendDirection::Rising
    } else {
        TrendDirection::Stable
    };

    let mut confidence = (n / constants.full_confidence_points).min(1.0);
    if mean.abs() > f64::EPSILON && volatility / mean.abs() > constants.volatility_bound {
        confidence *= constants.volatility_factor;
    }

    TrendReport {
        direction,
        slope,
        acceleration,
        relative_slope,
        relative_acceleration,
        volatility,
        confidence,
        points: values.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[f64]) -> Vec<SeriesPoint> {
        values
            .iter()
            .enumerate()
            .map(|(idx, value)| SeriesPoint {
                date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
                    + chrono::Duration::days(i64::try_from(idx).unwrap()),
                value: *value,
                spend: 50.0,
            })
            .collect()
    }

    #[test]
    fn fewer_than_three_valid_points_is_insufficient() {
        let constants = TrendConstants::default();
        let report = analyze_trend(&series(&[2.0, f64::NAN, 1.0]), &constants);
        assert_eq!(report.direction, TrendDirection::InsufficientData);
        assert_eq!(report.points, 2);
    }

    #[test]
    fn steep_fall_is_crashing() {
        let report = analyze_trend(&series(&[3.0, 2.0, 1.0, 0.5]), &TrendConstants::default());
        assert_eq!(report.direction, TrendDirection::Crashing);
    }

    #[test]
    fn gentle_decline_that_flattens_is_recovering() {
        // relative slope -0.056, differences -0.5, -0.2, 0.0, 0.1
        let report = analyze_trend(
            &series(&[3.0, 2.5, 2.3, 2.3, 2.4]),
            &TrendConstants::default(),
        );
        assert!(report.relative_slope < -0.05 && report.relative_slope > -0.15);
        assert_eq!(report.direction, TrendDirection::Recovering);
    }

    #[test]
    fn flat_series_is_stable_and_confidence_scales() {
        let report = analyze_trend(&series(&[2.0, 2.0, 2.0, 2.0]), &TrendConstants::default());
        assert_eq!(report.direction, TrendDirection::Stable);
        assert!((report.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn rising_series() {
        let report = analyze_trend(&series(&[1.0, 1.2, 1.4, 1.6]), &TrendConstants::default());
        assert_eq!(report.direction, TrendDirection::Rising);
    }

    #[test]
    fn ols_matches_hand_computation() {
        assert!((ols_slope(&[1.0, 2.0, 3.0]).unwrap() - 1.0).abs() < 1e-12);
        assert!(ols_slope(&[1.0]).is_none());
    }
}
