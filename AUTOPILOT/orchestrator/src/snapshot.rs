use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cycle phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    /// Metrics collection.
    Monitor,
    /// Screener verdicts.
    Screen,
    /// Classifier labels.
    Classify,
    /// Action proposals.
    Decide,
    /// Platform execution.
    Execute,
    /// Summary delivery.
    Notify,
    /// Hindsight grading.
    Reflect,
}

impl CyclePhase {
    /// Label used in event names.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Monitor => "monitor",
            Self::Screen => "screen",
            Self::Classify => "classify",
            Self::Decide => "decide",
            Self::Execute => "execute",
            Self::Notify => "notify",
            Self::Reflect => "reflect",
        }
    }

    /// Phase that runs after `last`; `None` means the cycle had not started one.
    #[must_use]
    pub const fn after(last: Option<Self>) -> Option<Self> {
        match last {
            None => Some(Self::Monitor),
            Some(Self::Monitor) => Some(Self::Screen),
            Some(Self::Screen) => Some(Self::Classify),
            Some(Self::Classify) => Some(Self::Decide),
            Some(Self::Decide) => Some(Self::Execute),
            Some(Self::Execute) => Some(Self::Notify),
            Some(Self::Notify) => Some(Self::Reflect),
            Some(Self::Reflect) => None,
        }
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Snapshot lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    /// Cycle in progress.
    Running,
    /// Every phase completed.
    Completed,
    /// A phase failed or the deadline passed.
    Failed,
}

/// One record per cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Cycle identifier.
    pub id: Uuid,
    /// Cycle start.
    pub started_at: DateTime<Utc>,
    /// Cycle end.
    pub finished_at: Option<DateTime<Utc>>,
    /// Lifecycle state.
    pub status: SnapshotStatus,
    /// Last phase that finished.
    pub last_phase: Option<CyclePhase>,
    /// Failure cause.
    pub error: Option<String>,
    /// Entities with metrics this cycle.
    pub entities: usize,
    /// Raw rows dropped at ingestion.
    pub dropped_rows: usize,
    /// Providers that failed.
    pub failed_sources: Vec<String>,
    /// Verdict counts by label.
    pub verdicts: IndexMap<String, usize>,
    /// Classifier label counts.
    pub labels: IndexMap<String, usize>,
    /// Strategy that produced the proposals.
    pub strategy: Option<String>,
    /// Why earlier strategies were skipped.
    pub fallback_reasons: Vec<String>,
    /// Proposals from the decision phase.
    pub proposals: usize,
    /// Proposals accepted by the queue.
    pub queued: usize,
    /// Proposals refused as duplicates.
    pub duplicates: usize,
    /// Entities held back by the cooldown.
    pub cooled_down: usize,
    /// Actions executed this cycle.
    pub executed: usize,
    /// Actions that exhausted their retries this cycle.
    pub failed: usize,
    /// Actions waiting for a human.
    pub pending_approval: usize,
    /// Proposals that expired unanswered.
    pub expired: usize,
    /// Entities escalated since the previous cycle.
    pub escalated: Vec<String>,
    /// Actions reflected on.
    pub reflected: usize,
}

impl Snapshot {
    /// Running snapshot.
    #[must_use]
    pub fn start(now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: now,
            finished_at: None,
            status: SnapshotStatus::Running,
            last_phase: None,
            error: None,
            entities: 0,
            dropped_rows: 0,
            failed_sources: Vec::new(),
            verdicts: IndexMap::new(),
            labels: IndexMap::new(),
            strategy: None,
            fallback_reasons: Vec::new(),
            proposals: 0,
            queued: 0,
            duplicates: 0,
            cooled_down: 0,
            executed: 0,
            failed: 0,
            pending_approval: 0,
            expired: 0,
            escalated: Vec::new(),
            reflected: 0,
        }
    }

    /// Whether the snapshot is sealed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status != SnapshotStatus::Running
    }

    /// Records a finished phase.
    pub fn phase_done(&mut self, phase: CyclePhase) {
        self.last_phase = Some(phase);
    }

    /// Seals the snapshot as completed.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        if !self.is_terminal() {
            self.status = SnapshotStatus::Completed;
            self.finished_at = Some(now);
        }
    }

    /// Seals the snapshot as failed.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        if !self.is_terminal() {
            self.status = SnapshotStatus::Failed;
            self.error = Some(error.into());
            self.finished_at = Some(now);
        }
    }
}

/// Append-only snapshot history, in memory and optionally as JSON lines.
#[derive(Debug, Clone, Default)]
pub struct SnapshotLedger {
    entries: Arc<RwLock<Vec<Snapshot>>>,
    file: Option<Arc<Mutex<File>>>,
    path: Option<PathBuf>,
}

impl SnapshotLedger {
    /// In-memory ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger mirrored to `path`, preloaded with the snapshots already there.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating ledger dir {}", parent.display()))?;
        }
        let existing = if path.exists() {
            Self::read(&path)?
        } else {
            Vec::new()
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening snapshot ledger {}", path.display()))?;
        Ok(Self {
            entries: Arc::new(RwLock::new(existing)),
            file: Some(Arc::new(Mutex::new(file))),
            path: Some(path),
        })
    }

    fn read(path: &Path) -> Result<Vec<Snapshot>> {
        let file = File::open(path)
            .with_context(|| format!("reading snapshot ledger {}", path.display()))?;
        Ok(BufReader::new(file)
            .lines()
            .map_while(std::result::Result::ok)
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect())
    }

    /// Ledger file, when mirrored.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Appends a sealed snapshot.
    pub fn append(&self, snapshot: &Snapshot) -> Result<()> {
        if !snapshot.is_terminal() {
            bail!("snapshot {} is still running", snapshot.id);
        }
        if let Some(file) = &self.file {
            let mut writer = file.lock();
            serde_json::to_writer(&mut *writer, snapshot)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        self.entries.write().push(snapshot.clone());
        Ok(())
    }

    /// Every snapshot, oldest first.
    #[must_use]
    pub fn all(&self) -> Vec<Snapshot> {
        self.entries.read().clone()
    }

    /// Newest snapshot.
    #[must_use]
    pub fn latest(&self) -> Option<Snapshot> {
        self.entries.read().last().cloned()
    }

    /// Number of snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no cycle has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sealed_snapshot_does_not_change() {
        let now = Utc::now();
        let mut snapshot = Snapshot::start(now);
        snapshot.phase_done(CyclePhase::Decide);
        snapshot.fail("metrics unavailable", now);
        snapshot.complete(now);
        assert_eq!(snapshot.status, SnapshotStatus::Failed);
        assert_eq!(snapshot.last_phase, Some(CyclePhase::Decide));
        assert_eq!(snapshot.error.as_deref(), Some("metrics unavailable"));
    }

    #[test]
    fn ledger_refuses_running_snapshots_and_reloads_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snapshots.jsonl");
        let ledger = SnapshotLedger::open(&path).unwrap();
        let mut snapshot = Snapshot::start(Utc::now());
        assert!(ledger.append(&snapshot).is_err());
        snapshot.complete(Utc::now());
        ledger.append(&snapshot).unwrap();

        let reopened = SnapshotLedger::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.latest().unwrap().id, snapshot.id);
    }
}
