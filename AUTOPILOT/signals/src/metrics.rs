use autopilot_skills::{EntityScope, Facts};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{
    trend::{ols_slope, SeriesPoint},
    SignalError,
};

/// Delivery status of a managed entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityStatus {
    /// Delivering.
    #[default]
    #[serde(alias = "active", alias = "enabled", alias = "ENABLED")]
    Active,
    /// Not delivering.
    #[serde(alias = "paused", alias = "disabled", alias = "DISABLED")]
    Paused,
}

impl EntityStatus {
    /// Platform label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Paused => "PAUSED",
        }
    }
}

/// One day of performance for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailySample {
    /// Day covered.
    pub date: NaiveDate,
    /// Spend.
    pub spend: f64,
    /// Attributed revenue.
    pub revenue: f64,
    /// Conversions.
    pub conversions: f64,
}

impl DailySample {
    /// Revenue over spend; NaN when nothing was spent.
    #[must_use]
    pub fn roas(&self) -> f64 {
        if self.spend > 0.0 {
            self.revenue / self.spend
        } else {
            f64::NAN
        }
    }

    /// Series point for trend and anomaly analysis.
    #[must_use]
    pub fn point(&self) -> SeriesPoint {
        SeriesPoint {
            date: self.date,
            value: self.roas(),
            spend: self.spend,
        }
    }
}

/// Sums over a window of days.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowTotals {
    /// Total spend.
    pub spend: f64,
    /// Total revenue.
    pub revenue: f64,
    /// Total conversions.
    pub conversions: f64,
    /// Days with a sample.
    pub days: usize,
}

impl WindowTotals {
    fn over<'a>(samples: impl Iterator<Item = &'a DailySample>) -> Self {
        samples.fold(Self::default(), |mut acc, sample| {
            acc.spend += sample.spend;
            acc.revenue += sample.revenue;
            acc.conversions += sample.conversions;
            acc.days += 1;
            acc
        })
    }

    /// Revenue over spend; zero when nothing was spent.
    #[must_use]
    pub fn roas(&self) -> f64 {
        if self.spend > 0.0 {
            self.revenue / self.spend
        } else {
            0.0
        }
    }
}

/// Immutable windowed snapshot of one entity, regenerated every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignMetrics {
    /// Entity identifier.
    pub entity_id: String,
    /// Display name.
    pub name: String,
    /// Scope attributes.
    pub scope: EntityScope,
    /// Delivery status.
    pub status: EntityStatus,
    /// Configured daily budget.
    pub daily_budget: f64,
    /// Hours of the reference day elapsed.
    pub hours_elapsed: f64,
    /// Reference day ("today").
    pub as_of: NaiveDate,
    /// Daily samples within the 7-day window, oldest first.
    pub daily: Vec<DailySample>,
    /// Reference day totals.
    pub today: WindowTotals,
    /// Last three days, reference day included.
    pub last_3d: WindowTotals,
    /// Last seven days, reference day included.
    pub last_7d: WindowTotals,
    /// OLS slope of the daily ratio over the window.
    pub trend_slope: f64,
    /// Consecutive most recent days below the severe floor.
    pub low_roas_streak: usize,
}

impl CampaignMetrics {
    /// Starts a builder.
    #[must_use]
    pub fn builder(entity_id: impl Into<String>) -> CampaignMetricsBuilder {
        CampaignMetricsBuilder::new(entity_id)
    }

    /// Three-day ratio.
    #[must_use]
    pub fn roas_3d(&self) -> f64 {
        self.last_3d.roas()
    }

    /// Seven-day ratio.
    #[must_use]
    pub fn roas_7d(&self) -> f64 {
        self.last_7d.roas()
    }

    /// Days with at least some spend.
    #[must_use]
    pub fn days_of_data(&self) -> usize {
        self.daily.iter().filter(|sample| sample.spend > 0.0).count()
    }

    /// Whether the entity is delivering.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == EntityStatus::Active
    }

    /// Series points for the window, oldest first.
    #[must_use]
    pub fn series(&self) -> Vec<SeriesPoint> {
        self.daily.iter().map(DailySample::point).collect()
    }

    /// Consecutive most recent days with spend and a ratio below `floor`.
    #[must_use]
    pub fn streak_below(&self, floor: f64) -> usize {
        streak_below(&self.daily, floor)
    }

    /// Sample immediately before the reference day.
    #[must_use]
    pub fn previous_day(&self) -> Option<&DailySample> {
        self.daily.iter().rev().find(|sample| sample.date < self.as_of)
    }

    /// Numeric facts used by skill conditions.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn facts(&self) -> Facts {
        Facts::new(self.scope.clone())
            .with("active", if self.is_active() { 1.0 } else { 0.0 })
            .with("daily_budget", self.daily_budget)
            .with("hours_elapsed", self.hours_elapsed)
            .with("spend_today", self.today.spend)
            .with("roas_today", self.today.roas())
            .with("conversions_today", self.today.conversions)
            .with("spend_3d", self.last_3d.spend)
            .with("roas_3d", self.roas_3d())
            .with("conversions_3d", self.last_3d.conversions)
            .with("spend_7d", self.last_7d.spend)
            .with("roas_7d", self.roas_7d())
            .with("conversions_7d", self.last_7d.conversions)
            .with("trend_slope", self.trend_slope)
            .with("low_roas_streak", self.low_roas_streak as f64)
            .with("days_of_data", self.days_of_data() as f64)
    }
}

fn streak_below(daily: &[DailySample], floor: f64) -> usize {
    daily
        .iter()
        .rev()
        .take_while(|sample| sample.spend > 0.0 && sample.roas() < floor)
        .count()
}

/// Builder producing [`CampaignMetrics`]; the only way to construct them.
#[derive(Debug, Clone)]
pub struct CampaignMetricsBuilder {
    entity_id: String,
    name: Option<String>,
    scope: EntityScope,
    status: EntityStatus,
    daily_budget: f64,
    hours_elapsed: f64,
    as_of: Option<NaiveDate>,
    streak_floor: f64,
    samples: Vec<DailySample>,
}

impl CampaignMetricsBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            name: None,
            scope: EntityScope::default(),
            status: EntityStatus::Active,
            daily_budget: 0.0,
            hours_elapsed: 24.0,
            as_of: None,
            streak_floor: 0.2,
            samples: Vec::new(),
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the scope attributes.
    #[must_use]
    pub fn scope(mut self, scope: EntityScope) -> Self {
        self.scope = scope;
        self
    }

    /// Sets the delivery status.
    #[must_use]
    pub const fn status(mut self, status: EntityStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the daily budget.
    #[must_use]
    pub const fn daily_budget(mut self, budget: f64) -> Self {
        self.daily_budget = budget;
        self
    }

    /// Sets elapsed hours of the reference day (clamped to 0..=24).
    #[must_use]
    pub fn hours_elapsed(mut self, hours: f64) -> Self {
        self.hours_elapsed = hours.clamp(0.0, 24.0);
        self
    }

    /// Sets the reference day. Defaults to the latest sample's day.
    #[must_use]
    pub const fn as_of(mut self, date: NaiveDate) -> Self {
        self.as_of = Some(date);
        self
    }

    /// Ratio below which a day extends the loss streak.
    #[must_use]
    pub const fn streak_floor(mut self, floor: f64) -> Self {
        self.streak_floor = floor;
        self
    }

    /// Adds a daily sample; a later sample for the same day replaces the earlier one.
    #[must_use]
    pub fn sample(mut self, sample: DailySample) -> Self {
        self.samples.retain(|existing| existing.date != sample.date);
        self.samples.push(sample);
        self
    }

    /// Convenience for [`Self::sample`].
    #[must_use]
    pub fn day(self, date: NaiveDate, spend: f64, revenue: f64, conversions: f64) -> Self {
        self.sample(DailySample {
            date,
            spend,
            revenue,
            conversions,
        })
    }

    /// Produces the immutable snapshot.
    pub fn build(mut self) -> Result<CampaignMetrics, SignalError> {
        if self.entity_id.trim().is_empty() {
            return Err(SignalError::MissingEntityId);
        }
        self.samples.sort_by_key(|sample| sample.date);
        let as_of = self
            .as_of
            .or_else(|| self.samples.last().map(|sample| sample.date))
            .ok_or_else(|| SignalError::NoReferenceDate(self.entity_id.clone()))?;
        let window_start = as_of - Duration::days(6);
        let daily: Vec<DailySample> = self
            .samples
            .into_iter()
            .filter(|sample| sample.date >= window_start && sample.date <= as_of)
            .collect();

        let since = |days: i64| {
            let start = as_of - Duration::days(days - 1);
            WindowTotals::over(daily.iter().filter(move |sample| sample.date >= start))
        };
        let today = since(1);
        let last_3d = since(3);
        let last_7d = since(7);

        let ratios: Vec<f64> = daily
            .iter()
            .map(DailySample::roas)
            .filter(|value| value.is_finite())
            .collect();
        let trend_slope = ols_slope(&ratios).unwrap_or(0.0);
        let low_roas_streak = streak_below(&daily, self.streak_floor);

        Ok(CampaignMetrics {
            name: self.name.unwrap_or_else(|| self.entity_id.clone()),
            entity_id: self.entity_id,
            scope: self.scope,
            status: self.status,
            daily_budget: self.daily_budget,
            hours_elapsed: self.hours_elapsed,
            as_of,
            daily,
            today,
            last_3d,
            last_7d,
            trend_slope,
            low_roas_streak,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn windows_include_the_reference_day() {
        let metrics = CampaignMetrics::builder("c1")
            .day(day(1), 100.0, 100.0, 1.0)
            .day(day(8), 40.0, 6.0, 0.0)
            .day(day(9), 40.0, 6.0, 0.0)
            .day(day(10), 40.0, 6.0, 0.0)
            .build()
            .unwrap();
        assert_eq!(metrics.as_of, day(10));
        assert_eq!(metrics.daily.len(), 3);
        assert!((metrics.last_3d.spend - 120.0).abs() < 1e-9);
        assert!((metrics.roas_3d() - 0.15).abs() < 1e-9);
        assert!((metrics.today.spend - 40.0).abs() < 1e-9);
        assert_eq!(metrics.low_roas_streak, 3);
    }

    #[test]
    fn zero_spend_day_breaks_streak() {
        let metrics = CampaignMetrics::builder("c1")
            .day(day(1), 40.0, 4.0, 0.0)
            .day(day(2), 0.0, 0.0, 0.0)
            .day(day(3), 40.0, 4.0, 0.0)
            .build()
            .unwrap();
        assert_eq!(metrics.low_roas_streak, 1);
        assert_eq!(metrics.days_of_data(), 2);
    }

    #[test]
    fn empty_id_is_rejected() {
        assert_eq!(
            CampaignMetrics::builder(" ").as_of(day(1)).build(),
            Err(SignalError::MissingEntityId)
        );
        assert!(matches!(
            CampaignMetrics::builder("c1").build(),
            Err(SignalError::NoReferenceDate(_))
        ));
    }

    #[test]
    fn facts_expose_windowed_values() {
        let metrics = CampaignMetrics::builder("c1")
            .status(EntityStatus::Paused)
            .day(day(3), 10.0, 30.0, 1.0)
            .build()
            .unwrap();
        let facts = metrics.facts();
        assert_eq!(facts.get("active"), Some(0.0));
        assert_eq!(facts.get("roas_3d"), Some(3.0));
    }
}
