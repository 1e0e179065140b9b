use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use autopilot_skills::EntityScope;
use chrono::{Duration as ChronoDuration, NaiveDate};
use futures::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    metrics::{CampaignMetrics, DailySample},
    sample::{merge_samples, validate_samples, IngestReport, RawSample},
};

/// Errors raised by metrics providers.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Provider is down or refused the request.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    /// Provider did not answer in time.
    #[error("provider timed out after {0:?}")]
    Timeout(Duration),
    /// I/O failure reading a local provider.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// First day.
    pub start: NaiveDate,
    /// Last day.
    pub end: NaiveDate,
}

impl DateRange {
    /// The `days` days ending at `end`, both inclusive.
    #[must_use]
    pub fn ending(end: NaiveDate, days: i64) -> Self {
        Self {
            start: end - ChronoDuration::days((days - 1).max(0)),
            end,
        }
    }

    /// Whether the day falls inside the range.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Which entities to fetch. Empty lists mean everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchScope {
    /// Accounts to include.
    pub accounts: Vec<String>,
    /// Products to include.
    pub products: Vec<String>,
}

impl FetchScope {
    /// Whether a raw row is inside the scope.
    #[must_use]
    pub fn admits(&self, sample: &RawSample) -> bool {
        let allowed = |filter: &[String], value: Option<&String>| {
            filter.is_empty()
                || value.is_some_and(|value| filter.iter().any(|f| f.eq_ignore_ascii_case(value)))
        };
        allowed(&self.accounts, sample.account.as_ref())
            && allowed(&self.products, sample.product.as_ref())
    }
}

/// A metrics provider. Higher priority wins merges.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Provider name for logs and reports.
    fn name(&self) -> &str;

    /// Merge priority.
    fn priority(&self) -> u8;

    /// Fetches raw rows for the scope and range.
    async fn fetch(
        &self,
        scope: &FetchScope,
        range: &DateRange,
    ) -> Result<Vec<RawSample>, SourceError>;
}

/// Provider backed by a JSON array of [`RawSample`] on disk.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    name: String,
    path: PathBuf,
    priority: u8,
}

impl JsonFileSource {
    /// Creates the provider.
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, priority: u8) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            priority,
        }
    }
}

#[async_trait]
impl MetricsSource for JsonFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    async fn fetch(
        &self,
        scope: &FetchScope,
        range: &DateRange,
    ) -> Result<Vec<RawSample>, SourceError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let rows: Vec<RawSample> = serde_json::from_str(&raw)?;
        Ok(rows
            .into_iter()
            .filter(|row| scope.admits(row))
            // Rows without a date are kept so validation can count them.
            .filter(|row| row.date.map_or(true, |date| range.contains(date)))
            .collect())
    }
}

/// Merged metrics plus the ingestion counters.
#[derive(Debug, Clone, Default)]
pub struct GatewayOutcome {
    /// One snapshot per entity.
    pub metrics: Vec<CampaignMetrics>,
    /// Ingestion counters.
    pub report: IngestReport,
}

/// Fans out to every provider, then validates, merges and groups the rows.
#[derive(Clone)]
pub struct MetricsGateway {
    sources: Vec<Arc<dyn MetricsSource>>,
    timeout: Duration,
    streak_floor: f64,
}

impl std::fmt::Debug for MetricsGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsGateway")
            .field(
                "sources",
                &self.sources.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for MetricsGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsGateway {
    /// Creates a gateway with no providers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            timeout: Duration::from_secs(30),
            streak_floor: 0.2,
        }
    }

    /// Adds a provider.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Per-provider timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ratio below which a day extends the loss streak.
    #[must_use]
    pub const fn with_streak_floor(mut self, floor: f64) -> Self {
        self.streak_floor = floor;
        self
    }

    /// Number of providers.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Fetches, validates, merges and groups. Failing providers are logged and skipped.
    pub async fn collect(
        &self,
        scope: &FetchScope,
        range: &DateRange,
        as_of: NaiveDate,
    ) -> GatewayOutcome {
        let mut ordered = self.sources.clone();
        ordered.sort_by_key(|source| std::cmp::Reverse(source.priority()));

        let fetches = ordered.iter().map(|source| {
            let source = Arc::clone(source);
            async move {
                let result = tokio::time::timeout(self.timeout, source.fetch(scope, range))
                    .await
                    .unwrap_or(Err(SourceError::Timeout(self.timeout)));
                (source.name().to_string(), result)
            }
        });
        let results = join_all(fetches).await;

        let mut report = IngestReport::default();
        let mut batches = Vec::with_capacity(results.len());
        for (name, result) in results {
            match result {
                Ok(rows) => batches.push(validate_samples(rows, &mut report)),
                Err(err) => {
                    warn!(source = %name, error = %err, "metrics provider failed");
                    report.failed_sources.push(name);
                }
            }
        }
        let merged = merge_samples(batches, &mut report);
        let metrics = self.group(merged, as_of);
        report.entities = metrics.len();
        info!(
            entities = report.entities,
            received = report.received,
            dropped = report.dropped_total(),
            failed_sources = report.failed_sources.len(),
            "metrics collected"
        );
        GatewayOutcome { metrics, report }
    }

    fn group(&self, rows: Vec<RawSample>, as_of: NaiveDate) -> Vec<CampaignMetrics> {
        let mut by_entity: IndexMap<String, Vec<RawSample>> = IndexMap::new();
        for row in rows {
            if let Some(id) = row.entity_id.clone() {
                by_entity.entry(id).or_default().push(row);
            }
        }
        by_entity
            .into_iter()
            .filter_map(|(id, mut rows)| {
                rows.sort_by_key(|row| row.date);
                // Entity-level attributes come from the newest row that carries them.
                let latest = |pick: &dyn Fn(&RawSample) -> Option<String>| {
                    rows.iter().rev().find_map(pick)
                };
                let scope = EntityScope {
                    product: latest(&|row| row.product.clone()),
                    platform: latest(&|row| row.platform.clone()),
                    account: latest(&|row| row.account.clone()),
                    channel: latest(&|row| row.channel.clone()),
                };
                let name = latest(&|row| row.name.clone());
                let status = rows.iter().rev().find_map(|row| row.status);
                let budget = rows.iter().rev().find_map(|row| row.daily_budget);
                let hours = rows
                    .iter()
                    .find(|row| row.date == Some(as_of))
                    .and_then(|row| row.hours_elapsed);

                let mut builder = CampaignMetrics::builder(id.clone())
                    .scope(scope)
                    .as_of(as_of)
                    .streak_floor(self.streak_floor)
                    .daily_budget(budget.unwrap_or(0.0))
                    .hours_elapsed(hours.unwrap_or(24.0));
                if let Some(name) = name {
                    builder = builder.name(name);
                }
                if let Some(status) = status {
                    builder = builder.status(status);
                }
                for row in &rows {
                    if let Some(date) = row.date {
                        builder = builder.sample(DailySample {
                            date,
                            spend: row.spend.unwrap_or(0.0),
                            revenue: row.revenue.unwrap_or(0.0),
                            conversions: row.conversions.unwrap_or(0.0),
                        });
                    }
                }
                match builder.build() {
                    Ok(metrics) => Some(metrics),
                    Err(err) => {
                        warn!(entity = %id, error = %err, "metrics build failed");
                        None
                    }
                }
            })
            .collect()
    }
}
