use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::metrics::EntityStatus;

/// One provider row for one entity and one day. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSample {
    /// Entity identifier.
    pub entity_id: Option<String>,
    /// Calendar day the row covers.
    pub date: Option<NaiveDate>,
    /// Display name.
    pub name: Option<String>,
    /// Product advertised.
    pub product: Option<String>,
    /// Ad platform.
    pub platform: Option<String>,
    /// Ad account.
    pub account: Option<String>,
    /// Channel.
    pub channel: Option<String>,
    /// Delivery status.
    pub status: Option<EntityStatus>,
    /// Configured daily budget.
    pub daily_budget: Option<f64>,
    /// Spend for the day.
    pub spend: Option<f64>,
    /// Attributed revenue for the day.
    pub revenue: Option<f64>,
    /// Conversions for the day.
    pub conversions: Option<f64>,
    /// Hours of the day elapsed when the row was produced.
    pub hours_elapsed: Option<f64>,
}

impl RawSample {
    /// Row with an id, a date and the three volume fields.
    #[must_use]
    pub fn daily(
        entity_id: impl Into<String>,
        date: NaiveDate,
        spend: f64,
        revenue: f64,
        conversions: f64,
    ) -> Self {
        Self {
            entity_id: Some(entity_id.into()),
            date: Some(date),
            spend: Some(spend),
            revenue: Some(revenue),
            conversions: Some(conversions),
            ..Self::default()
        }
    }

    /// Fills every missing field from a lower-priority row. Returns the number filled.
    pub fn fill_from(&mut self, other: &Self) -> usize {
        fill(&mut self.name, other.name.as_ref())
            + fill(&mut self.product, other.product.as_ref())
            + fill(&mut self.platform, other.platform.as_ref())
            + fill(&mut self.account, other.account.as_ref())
            + fill(&mut self.channel, other.channel.as_ref())
            + fill(&mut self.status, other.status.as_ref())
            + fill(&mut self.daily_budget, other.daily_budget.as_ref())
            + fill(&mut self.spend, other.spend.as_ref())
            + fill(&mut self.revenue, other.revenue.as_ref())
            + fill(&mut self.conversions, other.conversions.as_ref())
            + fill(&mut self.hours_elapsed, other.hours_elapsed.as_ref())
    }

    fn volumes(&self) -> [Option<f64>; 5] {
        [
            self.spend,
            self.revenue,
            self.conversions,
            self.daily_budget,
            self.hours_elapsed,
        ]
    }
}

fn fill<T: Clone>(slot: &mut Option<T>, other: Option<&T>) -> usize {
    match (slot.as_ref(), other) {
        (None, Some(value)) => {
            *slot = Some(value.clone());
            1
        }
        _ => 0,
    }
}

/// Why a raw row was dropped at ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// No (or blank) entity id.
    MissingEntityId,
    /// No date.
    MissingDate,
    /// NaN or infinite numeric field.
    NonFiniteValue,
    /// Negative spend, revenue, conversions or budget.
    NegativeVolume,
}

impl DropReason {
    /// Stable label used as the counter key.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::MissingEntityId => "missing_entity_id",
            Self::MissingDate => "missing_date",
            Self::NonFiniteValue => "non_finite_value",
            Self::NegativeVolume => "negative_volume",
        }
    }
}

/// Counters describing one ingestion pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Rows received from every provider.
    pub received: usize,
    /// Rows that passed validation.
    pub accepted: usize,
    /// Dropped rows per reason label.
    pub dropped: IndexMap<String, usize>,
    /// Providers that failed or timed out.
    pub failed_sources: Vec<String>,
    /// Fields filled from lower-priority providers.
    pub gaps_filled: usize,
    /// Entities produced.
    pub entities: usize,
}

impl IngestReport {
    /// Total dropped rows.
    #[must_use]
    pub fn dropped_total(&self) -> usize {
        self.dropped.values().sum()
    }

    fn record_drop(&mut self, reason: DropReason) {
        *self.dropped.entry(reason.label().to_string()).or_default() += 1;
    }
}

fn check(sample: &RawSample) -> Result<(), DropReason> {
    if sample
        .entity_id
        .as_deref()
        .map_or(true, |id| id.trim().is_empty())
    {
        return Err(DropReason::MissingEntityId);
    }
    if sample.date.is_none() {
        return Err(DropReason::MissingDate);
    }
    let volumes = sample.volumes();
    if volumes.iter().flatten().any(|value| !value.is_finite()) {
        return Err(DropReason::NonFiniteValue);
    }
    if volumes.iter().flatten().any(|value| *value < 0.0) {
        return Err(DropReason::NegativeVolume);
    }
    Ok(())
}

/// Drops malformed rows, counting each drop by reason.
pub fn validate_samples(
    samples: Vec<RawSample>,
    report: &mut IngestReport,
) -> Vec<RawSample> {
    report.received += samples.len();
    let mut accepted = Vec::with_capacity(samples.len());
    for sample in samples {
        match check(&sample) {
            Ok(()) => accepted.push(sample),
            Err(reason) => {
                debug!(
                    entity = sample.entity_id.as_deref().unwrap_or("-"),
                    reason = reason.label(),
                    "sample dropped"
                );
                report.record_drop(reason);
            }
        }
    }
    report.accepted += accepted.len();
    let dropped = report.dropped_total();
    if dropped > 0 {
        warn!(dropped, received = report.received, "ingestion dropped malformed samples");
    }
    accepted
}

/// Merges validated rows from several providers.
///
/// `batches` must be ordered from highest to lowest priority. The first row seen for an
/// `(entity, date)` key wins; later rows only fill its gaps.
pub fn merge_samples(
    batches: Vec<Vec<RawSample>>,
    report: &mut IngestReport,
) -> Vec<RawSample> {
    let mut merged: IndexMap<(String, NaiveDate), RawSample> = IndexMap::new();
    for batch in batches {
        for sample in batch {
            let (Some(id), Some(date)) = (sample.entity_id.clone(), sample.date) else {
                continue;
            };
            match merged.get_mut(&(id.clone(), date)) {
                Some(existing) => report.gaps_filled += existing.fill_from(&sample),
                None => {
                    merged.insert((id, date), sample);
                }
            }
        }
    }
    merged.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn malformed_rows_are_counted_per_reason() {
        let mut report = IngestReport::default();
        let rows = vec![
            RawSample::daily("c1", day(1), 10.0, 20.0, 1.0),
            RawSample {
                date: Some(day(1)),
                ..RawSample::default()
            },
            RawSample {
                entity_id: Some("c2".into()),
                ..RawSample::default()
            },
            RawSample::daily("c3", day(1), f64::NAN, 0.0, 0.0),
            RawSample::daily("c4", day(1), -1.0, 0.0, 0.0),
        ];
        let accepted = validate_samples(rows, &mut report);
        assert_eq!(accepted.len(), 1);
        assert_eq!(report.received, 5);
        assert_eq!(report.dropped_total(), 4);
        assert_eq!(report.dropped["negative_volume"], 1);
        assert_eq!(report.dropped["missing_date"], 1);
    }

    #[test]
    fn higher_priority_wins_and_gaps_are_filled() {
        let mut report = IngestReport::default();
        let primary = RawSample {
            revenue: None,
            status: Some(EntityStatus::Paused),
            ..RawSample::daily("c1", day(2), 40.0, 0.0, 2.0)
        };
        let secondary = RawSample {
            status: Some(EntityStatus::Active),
            product: Some("shoes".into()),
            ..RawSample::daily("c1", day(2), 35.0, 90.0, 3.0)
        };
        let merged = merge_samples(vec![vec![primary], vec![secondary]], &mut report);
        assert_eq!(merged.len(), 1);
        let row = &merged[0];
        assert_eq!(row.spend, Some(40.0));
        assert_eq!(row.revenue, Some(90.0));
        assert_eq!(row.status, Some(EntityStatus::Paused));
        assert_eq!(row.product.as_deref(), Some("shoes"));
        assert_eq!(report.gaps_filled, 2);
    }
}
