use autopilot_skills::AnomalyConstants;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{metrics::CampaignMetrics, trend::SeriesPoint};

/// Anomaly families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Spend far above the entity's own history.
    SpendSpike,
    /// Ratio far below the entity's own history.
    RoasCrash,
    /// Spend without conversions beyond the time-prorated allowance.
    ZeroConversionSpend,
    /// Ratio far below the peer group.
    PeerUnderperformance,
    /// Several entities of one account below the floor at once.
    AccountWide,
}

/// One detected anomaly, severity 1 (mild) to 5 (critical).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Family.
    pub kind: AnomalyKind,
    /// Severity in `1..=5`.
    pub severity: u8,
    /// Observed value.
    pub observed: f64,
    /// Reference the value was compared with.
    pub reference: f64,
    /// Human readable description.
    pub detail: String,
}

fn tiered_severity(value: f64, bounds: [f64; 3]) -> Option<u8> {
    if value >= bounds[2] {
        Some(5)
    } else if value >= bounds[1] {
        Some(4)
    } else if value >= bounds[0] {
        Some(3)
    } else {
        None
    }
}

/// Spike and crash of the latest point against the mean of the earlier ones.
///
/// Needs at least `min_points` valid points in total; below that nothing fires.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn detect_history_anomalies(
    points: &[SeriesPoint],
    constants: &AnomalyConstants,
    min_points: usize,
) -> Vec<Anomaly> {
    let valid: Vec<&SeriesPoint> = points.iter().filter(|point| point.is_valid()).collect();
    let Some((latest, history)) = valid.split_last() else {
        return Vec::new();
    };
    if valid.len() < min_points.max(2) {
        return Vec::new();
    }
    let count = history.len() as f64;
    let mean_spend = history.iter().map(|point| point.spend).sum::<f64>() / count;
    let mean_value = history.iter().map(|point| point.value).sum::<f64>() / count;

    let mut found = Vec::new();
    if mean_spend > 0.0 {
        let ratio = latest.spend / mean_spend;
        if let Some(severity) = tiered_severity(ratio, constants.spike_ratios) {
            found.push(Anomaly {
                kind: AnomalyKind::SpendSpike,
                severity,
                observed: latest.spend,
                reference: mean_spend,
                detail: format!(
                    "spend {:.2} is {ratio:.1}x the trailing mean {mean_spend:.2}",
                    latest.spend
                ),
            });
        }
    }
    if mean_value > 0.0 {
        let drop = 1.0 - latest.value / mean_value;
        if let Some(severity) = tiered_severity(drop, constants.crash_drops) {
            found.push(Anomaly {
                kind: AnomalyKind::RoasCrash,
                severity,
                observed: latest.value,
                reference: mean_value,
                detail: format!(
                    "roas {:.2} is {:.0}% below the trailing mean {mean_value:.2}",
                    latest.value,
                    drop * 100.0
                ),
            });
        }
    }
    found
}

/// Reference-day spend without a conversion beyond the prorated allowance.
#[must_use]
pub fn detect_zero_conversion(
    metrics: &CampaignMetrics,
    constants: &AnomalyConstants,
) -> Option<Anomaly> {
    if metrics.today.conversions > 0.0 || metrics.today.spend <= 0.0 {
        return None;
    }
    let elapsed = (metrics.hours_elapsed / 24.0).clamp(constants.zero_conversion_min_fraction, 1.0);
    let allowance = constants.zero_conversion_daily_allowance * elapsed;
    if metrics.today.spend <= allowance {
        return None;
    }
    let severity = if metrics.today.spend >= allowance * 2.0 { 4 } else { 3 };
    Some(Anomaly {
        kind: AnomalyKind::ZeroConversionSpend,
        severity,
        observed: metrics.today.spend,
        reference: allowance,
        detail: format!(
            "spent {:.2} with no conversion after {:.1}h (allowance {allowance:.2})",
            metrics.today.spend, metrics.hours_elapsed
        ),
    })
}

/// Aggregate over one peer group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerStat {
    /// Eligible entities in the group.
    pub entities: usize,
    /// Summed three-day spend.
    pub spend: f64,
    /// Summed three-day revenue.
    pub revenue: f64,
    /// Sum of the per-entity three-day ratios.
    pub roas_sum: f64,
    /// Entities below the account floor.
    pub below_floor: usize,
}

impl PeerStat {
    /// Unweighted mean of the per-entity ratios.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_roas(&self) -> f64 {
        if self.entities == 0 {
            0.0
        } else {
            self.roas_sum / self.entities as f64
        }
    }

    /// Spend-weighted ratio of the group.
    #[must_use]
    pub fn pooled_roas(&self) -> f64 {
        if self.spend > 0.0 {
            self.revenue / self.spend
        } else {
            0.0
        }
    }

    /// Mean ratio of the other members, with their count.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_excluding(&self, own_roas: f64) -> Option<(f64, usize)> {
        let others = self.entities.checked_sub(1)?;
        (others > 0).then(|| ((self.roas_sum - own_roas) / others as f64, others))
    }
}

/// Per-account and per-product averages over the eligible entities of a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerBenchmarks {
    /// Groups keyed by account.
    pub by_account: IndexMap<String, PeerStat>,
    /// Groups keyed by product.
    pub by_product: IndexMap<String, PeerStat>,
}

fn eligible(metrics: &CampaignMetrics, constants: &AnomalyConstants) -> bool {
    metrics.is_active() && metrics.last_3d.spend >= constants.peer_min_spend
}

fn group_key(value: Option<&String>) -> Option<String> {
    value.map(|key| key.to_ascii_lowercase())
}

impl PeerBenchmarks {
    /// Aggregates a batch.
    #[must_use]
    pub fn compute(metrics: &[CampaignMetrics], constants: &AnomalyConstants) -> Self {
        let mut benchmarks = Self::default();
        for entity in metrics.iter().filter(|m| eligible(m, constants)) {
            let roas = entity.roas_3d();
            let below = roas < constants.account_floor_roas;
            let add = |stat: &mut PeerStat| {
                stat.entities += 1;
                stat.spend += entity.last_3d.spend;
                stat.revenue += entity.last_3d.revenue;
                stat.roas_sum += roas;
                stat.below_floor += usize::from(below);
            };
            if let Some(account) = group_key(entity.scope.account.as_ref()) {
                add(benchmarks.by_account.entry(account).or_default());
            }
            if let Some(product) = group_key(entity.scope.product.as_ref()) {
                add(benchmarks.by_product.entry(product).or_default());
            }
        }
        benchmarks
    }

    /// Group for an account (case-insensitive).
    #[must_use]
    pub fn account(&self, account: &str) -> Option<&PeerStat> {
        self.by_account.get(&account.to_ascii_lowercase())
    }

    /// Group for a product (case-insensitive).
    #[must_use]
    pub fn product(&self, product: &str) -> Option<&PeerStat> {
        self.by_product.get(&product.to_ascii_lowercase())
    }

    /// Peer group of an entity: its product, else its account.
    #[must_use]
    pub fn peer_group(&self, metrics: &CampaignMetrics) -> Option<&PeerStat> {
        metrics
            .scope
            .product
            .as_deref()
            .and_then(|product| self.product(product))
            .or_else(|| {
                metrics
                    .scope
                    .account
                    .as_deref()
                    .and_then(|account| self.account(account))
            })
    }

    /// Accounts with enough entities simultaneously below the floor.
    #[must_use]
    pub fn alerting_accounts(&self, constants: &AnomalyConstants) -> Vec<String> {
        self.by_account
            .iter()
            .filter(|(_, stat)| stat.below_floor >= constants.account_min_entities)
            .map(|(account, _)| account.clone())
            .collect()
    }
}

/// Ratio far below the average of the entity's peers.
#[must_use]
pub fn detect_peer_anomaly(
    metrics: &CampaignMetrics,
    benchmarks: &PeerBenchmarks,
    constants: &AnomalyConstants,
) -> Option<Anomaly> {
    if !eligible(metrics, constants) {
        return None;
    }
    let own = metrics.roas_3d();
    let (peer_mean, peers) = benchmarks.peer_group(metrics)?.mean_excluding(own)?;
    if peers < constants.peer_min_group || peer_mean <= 0.0 {
        return None;
    }
    let severity = if own < peer_mean * constants.peer_severe_gap {
        3
    } else if own < peer_mean * constants.peer_gap {
        2
    } else {
        return None;
    };
    Some(Anomaly {
        kind: AnomalyKind::PeerUnderperformance,
        severity,
        observed: own,
        reference: peer_mean,
        detail: format!("roas {own:.2} vs peer mean {peer_mean:.2} across {peers} peers"),
    })
}

/// Account-wide alert attached to every entity of an alerting account.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn detect_account_anomaly(
    metrics: &CampaignMetrics,
    benchmarks: &PeerBenchmarks,
    constants: &AnomalyConstants,
) -> Option<Anomaly> {
    let account = metrics.scope.account.as_deref()?;
    let stat = benchmarks.account(account)?;
    if stat.below_floor < constants.account_min_entities {
        return None;
    }
    Some(Anomaly {
        kind: AnomalyKind::AccountWide,
        severity: 3,
        observed: stat.below_floor as f64,
        reference: constants.account_floor_roas,
        detail: format!(
            "{} of {} entities in account {account} below roas {:.2}",
            stat.below_floor, stat.entities, constants.account_floor_roas
        ),
    })
}
