use std::sync::Arc;

use autopilot_actions::MetricsSnapshot;
use autopilot_signals::CampaignMetrics;
use autopilot_triage::ScreenRecord;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;

/// Screening records kept for the auditor.
#[derive(Debug, Clone, Default)]
pub struct ScreenHistory {
    records: Arc<RwLock<Vec<ScreenRecord>>>,
}

impl ScreenHistory {
    /// Empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one cycle's records.
    pub fn extend(&self, records: impl IntoIterator<Item = ScreenRecord>) {
        self.records.write().extend(records);
    }

    /// Records screened at or after `since`.
    #[must_use]
    pub fn since(&self, since: DateTime<Utc>) -> Vec<ScreenRecord> {
        self.records
            .read()
            .iter()
            .filter(|record| record.screened_at >= since)
            .cloned()
            .collect()
    }

    /// Drops records older than `before`; returns how many went.
    pub fn prune(&self, before: DateTime<Utc>) -> usize {
        let mut guard = self.records.write();
        let len = guard.len();
        guard.retain(|record| record.screened_at >= before);
        len - guard.len()
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

/// Latest metrics per entity, replaced every monitor phase.
#[derive(Debug, Clone, Default)]
pub struct MetricsBoard {
    latest: Arc<RwLock<IndexMap<String, CampaignMetrics>>>,
}

impl MetricsBoard {
    /// Empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the board with one cycle's metrics.
    pub fn replace(&self, metrics: &[CampaignMetrics]) {
        let fresh = metrics
            .iter()
            .map(|m| (m.entity_id.clone(), m.clone()))
            .collect();
        *self.latest.write() = fresh;
    }

    /// Copy of the latest metrics.
    #[must_use]
    pub fn current(&self) -> IndexMap<String, CampaignMetrics> {
        self.latest.read().clone()
    }

    /// Compact snapshots for reflection.
    #[must_use]
    pub fn snapshots(&self) -> IndexMap<String, MetricsSnapshot> {
        self.latest
            .read()
            .iter()
            .map(|(id, m)| (id.clone(), MetricsSnapshot::from_metrics(m)))
            .collect()
    }
}
