#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Autopilot orchestrator.
//!
//! Sequences one cycle (Monitor, Screen, Classify, Decide, Execute, Notify, Reflect), seals
//! it into a [`Snapshot`], and runs the audit and evolution jobs on their own schedules.

/// Verdict/label cache diffed between cycles.
pub mod cache;
/// TOML configuration.
pub mod config;
/// Screening records and latest metrics shared with the background jobs.
pub mod history;
/// Audit, knowledge upkeep and evolution jobs.
pub mod maintenance;
/// Cycle summaries and notification sinks.
pub mod notify;
/// The cycle itself.
pub mod pipeline;
/// Cycle snapshots and their ledger.
pub mod snapshot;
/// Structured logs and bus events for cycles and jobs.
pub mod telemetry;

pub use cache::{CycleCache, EntityState};
pub use config::{
    AuditSettings, CycleSettings, EvolutionSettings, ExecutionSettings, MetricsFile, PathSettings,
    PipelineConfig, ReflectionSettings,
};
pub use history::{MetricsBoard, ScreenHistory};
pub use maintenance::{AuditOutcome, BackgroundJobs, Maintenance};
pub use notify::{
    deliver, ActionBrief, CycleSummary, EventBusNotifier, NotificationSink, TracingNotifier,
};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use snapshot::{CyclePhase, Snapshot, SnapshotLedger, SnapshotStatus};
pub use telemetry::{PipelineTelemetry, PipelineTelemetryBuilder};
