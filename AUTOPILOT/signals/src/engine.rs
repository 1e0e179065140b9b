use autopilot_skills::SignalConstants;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    anomaly::{
        detect_account_anomaly, detect_history_anomalies, detect_peer_anomaly,
        detect_zero_conversion, Anomaly, AnomalyKind, PeerBenchmarks,
    },
    metrics::CampaignMetrics,
    quality::{assess_quality, QualityInput, QualityScore},
    trend::{analyze_trend, TrendReport},
};

/// Everything the engine derived for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalReport {
    /// Entity identifier.
    pub entity_id: String,
    /// Data-quality confidence.
    pub quality: QualityScore,
    /// Trend of the daily ratio.
    pub trend: TrendReport,
    /// Detected anomalies.
    pub anomalies: Vec<Anomaly>,
}

impl SignalReport {
    /// Highest anomaly severity, zero when none.
    #[must_use]
    pub fn max_severity(&self) -> u8 {
        self.anomalies.iter().map(|a| a.severity).max().unwrap_or(0)
    }

    /// Whether an anomaly of the given kind fired.
    #[must_use]
    pub fn has(&self, kind: AnomalyKind) -> bool {
        self.anomalies.iter().any(|a| a.kind == kind)
    }
}

/// Reports for a whole batch plus the peer benchmarks they were computed against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalBatch {
    /// Reports keyed by entity id, in input order.
    pub reports: IndexMap<String, SignalReport>,
    /// Peer averages.
    pub benchmarks: PeerBenchmarks,
    /// Accounts with an account-wide alert.
    pub alerting_accounts: Vec<String>,
}

impl SignalBatch {
    /// Report for an entity.
    #[must_use]
    pub fn report(&self, entity_id: &str) -> Option<&SignalReport> {
        self.reports.get(entity_id)
    }
}

/// Pure trend, quality and anomaly analysis parameterized by the versioned constants.
#[derive(Debug, Clone, Default)]
pub struct SignalEngine {
    constants: SignalConstants,
}

impl SignalEngine {
    /// Creates the engine.
    #[must_use]
    pub const fn new(constants: SignalConstants) -> Self {
        Self { constants }
    }

    /// Constants in use.
    #[must_use]
    pub const fn constants(&self) -> &SignalConstants {
        &self.constants
    }

    /// Analyzes one entity against precomputed benchmarks.
    #[must_use]
    pub fn analyze_entity(
        &self,
        metrics: &CampaignMetrics,
        benchmarks: &PeerBenchmarks,
    ) -> SignalReport {
        let series = metrics.series();
        let quality = assess_quality(&QualityInput::from_metrics(metrics), &self.constants.quality);
        let trend = analyze_trend(&series, &self.constants.trend);
        let anomaly = &self.constants.anomaly;
        let mut anomalies =
            detect_history_anomalies(&series, anomaly, self.constants.trend.min_points);
        anomalies.extend(detect_zero_conversion(metrics, anomaly));
        anomalies.extend(detect_peer_anomaly(metrics, benchmarks, anomaly));
        anomalies.extend(detect_account_anomaly(metrics, benchmarks, anomaly));
        SignalReport {
            entity_id: metrics.entity_id.clone(),
            quality,
            trend,
            anomalies,
        }
    }

    /// Analyzes a batch; peers are drawn from the same batch.
    #[must_use]
    pub fn analyze(&self, metrics: &[CampaignMetrics]) -> SignalBatch {
        let benchmarks = PeerBenchmarks::compute(metrics, &self.constants.anomaly);
        let alerting_accounts = benchmarks.alerting_accounts(&self.constants.anomaly);
        let reports = metrics
            .iter()
            .map(|entity| {
                let report = self.analyze_entity(entity, &benchmarks);
                debug!(
                    entity = %entity.entity_id,
                    trend = report.trend.direction.label(),
                    confidence = report.quality.confidence,
                    anomalies = report.anomalies.len(),
                    "signals computed"
                );
                (entity.entity_id.clone(), report)
            })
            .collect();
        SignalBatch {
            reports,
            benchmarks,
            alerting_accounts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trend::TrendDirection;
    use chrono::NaiveDate;

    #[test]
    fn batch_report_covers_every_entity() {
        let day = |d| NaiveDate::from_ymd_opt(2024, 5, d).unwrap();
        let crashing = CampaignMetrics::builder("c1")
            .day(day(1), 50.0, 150.0, 3.0)
            .day(day(2), 50.0, 100.0, 2.0)
            .day(day(3), 50.0, 40.0, 1.0)
            .day(day(4), 50.0, 5.0, 0.0)
            .build()
            .unwrap();
        let fresh = CampaignMetrics::builder("c2")
            .day(day(4), 12.0, 30.0, 1.0)
            .build()
            .unwrap();
        let batch = SignalEngine::default().analyze(&[crashing, fresh]);
        assert_eq!(batch.reports.len(), 2);
        let report = batch.report("c1").unwrap();
        assert_eq!(report.trend.direction, TrendDirection::Crashing);
        assert!(report.has(AnomalyKind::RoasCrash));
        assert!(report.max_severity() >= 4);
        let fresh = batch.report("c2").unwrap();
        assert_eq!(fresh.trend.direction, TrendDirection::InsufficientData);
        assert!(fresh.anomalies.is_empty());
    }
}
