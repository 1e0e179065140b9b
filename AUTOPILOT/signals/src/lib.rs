#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Trend and quality engine.
//!
//! Raw provider samples are validated and merged into immutable [`CampaignMetrics`]; the
//! pure functions in [`quality`], [`trend`] and [`anomaly`] then turn each entity's history
//! into a confidence score, a trend direction and a list of anomalies.

/// Anomaly detectors, including peer and account-wide checks.
pub mod anomaly;
/// Per-entity analysis over a whole batch.
pub mod engine;
/// Windowed per-entity metrics and their builder.
pub mod metrics;
/// Data-quality confidence score.
pub mod quality;
/// Raw samples, validation and provider merging.
pub mod sample;
/// Metrics providers and the gateway that merges them.
pub mod source;
/// OLS trend classification.
pub mod trend;

use thiserror::Error;

pub use anomaly::{Anomaly, AnomalyKind, PeerBenchmarks, PeerStat};
pub use engine::{SignalBatch, SignalEngine, SignalReport};
pub use metrics::{CampaignMetrics, CampaignMetricsBuilder, DailySample, EntityStatus, WindowTotals};
pub use quality::{assess_quality, QualityInput, QualityPenalty, QualityScore};
pub use sample::{merge_samples, validate_samples, DropReason, IngestReport, RawSample};
pub use source::{
    DateRange, FetchScope, GatewayOutcome, JsonFileSource, MetricsGateway, MetricsSource,
    SourceError,
};
pub use trend::{analyze_trend, ols_slope, SeriesPoint, TrendDirection, TrendReport};

/// Errors raised while assembling metrics.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalError {
    /// Builder was given an empty entity id.
    #[error("metrics require a non-empty entity id")]
    MissingEntityId,
    /// Neither samples nor a reference date were supplied.
    #[error("no samples and no reference date for entity {0}")]
    NoReferenceDate(String),
}
