use std::{fs, path::Path, path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use autopilot_actions::RetryPolicy;
use autopilot_learning::{EvolutionPolicy, MAX_DELAY_HOURS, MIN_DELAY_HOURS};
use autopilot_reasoning::ReasoningSettings;
use autopilot_signals::FetchScope;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Cycle cadence and fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleSettings {
    /// Seconds between cycles when looping.
    pub interval_secs: u64,
    /// Hard deadline for one cycle.
    pub deadline_secs: u64,
    /// Screening worker pool size.
    pub max_concurrency: usize,
    /// Days of history fetched per cycle.
    pub lookback_days: i64,
    /// Per-provider fetch deadline.
    pub source_timeout_secs: u64,
    /// Accounts and products to fetch.
    pub scope: FetchScope,
    /// High-priority knowledge entries handed to the decision phase.
    pub knowledge_context: usize,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            deadline_secs: 900,
            max_concurrency: 8,
            lookback_days: 7,
            source_timeout_secs: 30,
            scope: FetchScope::default(),
            knowledge_context: 10,
        }
    }
}

/// Platform execution and approval window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Attempts per action, including the first.
    pub max_attempts: u32,
    /// Backoff unit in seconds.
    pub backoff_secs: u64,
    /// Deadline of each platform call.
    pub call_timeout_secs: u64,
    /// Hours a proposal waits for a human before expiring.
    pub approval_ttl_hours: i64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_secs: 30,
            call_timeout_secs: 20,
            approval_ttl_hours: 48,
        }
    }
}

impl ExecutionSettings {
    /// Retry policy for the executor.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: Duration::from_secs(self.backoff_secs),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
        }
    }
}

/// Reflection timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionSettings {
    /// Hours between execution and reflection.
    pub delay_hours: i64,
}

impl Default for ReflectionSettings {
    fn default() -> Self {
        Self { delay_hours: 6 }
    }
}

/// Evolution schedule and policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionSettings {
    /// Seconds between evolution runs.
    pub interval_secs: u64,
    /// Mutation policy.
    #[serde(flatten)]
    pub policy: EvolutionPolicy,
}

impl Default for EvolutionSettings {
    fn default() -> Self {
        Self {
            interval_secs: 604_800,
            policy: EvolutionPolicy::default(),
        }
    }
}

/// Audit schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// Seconds between audits.
    pub interval_secs: u64,
    /// Hours of history each audit re-checks.
    pub lookback_hours: i64,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            interval_secs: 7_200,
            lookback_hours: 24,
        }
    }
}

/// One JSON metrics file provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsFile {
    /// Provider name.
    pub name: String,
    /// JSON array of raw samples.
    pub path: PathBuf,
    /// Merge priority; higher wins.
    #[serde(default)]
    pub priority: u8,
}

/// Files the runner reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Metrics providers.
    pub metrics: Vec<MetricsFile>,
    /// Snapshot JSONL ledger.
    pub snapshots: Option<PathBuf>,
    /// Structured JSON log.
    pub log: Option<PathBuf>,
    /// Event JSONL file.
    pub events: Option<PathBuf>,
}

/// Complete runner configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Cycle cadence.
    pub cycle: CycleSettings,
    /// Reasoning service connection.
    pub reasoning: ReasoningSettings,
    /// Execution and approvals.
    pub execution: ExecutionSettings,
    /// Reflection timing.
    pub reflection: ReflectionSettings,
    /// Evolution schedule and policy.
    pub evolution: EvolutionSettings,
    /// Audit schedule.
    pub audit: AuditSettings,
    /// Files.
    pub paths: PathSettings,
}

impl PipelineConfig {
    /// Parses TOML; missing fields take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("parsing pipeline config")
    }

    /// Loads, overlays the environment and validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&raw)?.with_env_overrides().validated()
    }

    /// Overlays the reasoning endpoint and key from the environment.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.reasoning = self.reasoning.with_env_overrides();
        self
    }

    /// Rejects unusable values and clamps the reflection delay.
    pub fn validated(mut self) -> Result<Self> {
        if self.execution.max_attempts == 0 {
            bail!("execution.max_attempts must be at least 1");
        }
        if self.cycle.max_concurrency == 0 {
            bail!("cycle.max_concurrency must be at least 1");
        }
        if self.cycle.lookback_days < 3 {
            bail!("cycle.lookback_days must cover the 3-day window");
        }
        if self.cycle.interval_secs == 0 || self.cycle.deadline_secs == 0 {
            bail!("cycle.interval_secs and cycle.deadline_secs must be positive");
        }
        if self.audit.interval_secs == 0 || self.evolution.interval_secs == 0 {
            bail!("audit and evolution intervals must be positive");
        }
        let delay = self.reflection.delay_hours;
        let clamped = delay.clamp(MIN_DELAY_HOURS, MAX_DELAY_HOURS);
        if clamped != delay {
            warn!(requested = delay, used = clamped, "reflection delay clamped");
            self.reflection.delay_hours = clamped;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults_and_clamps_delay() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [cycle]
            max_concurrency = 4

            [reflection]
            delay_hours = 72

            [evolution]
            min_outcomes = 5

            [[paths.metrics]]
            name = "ads"
            path = "data/ads.json"
            priority = 2
            "#,
        )
        .unwrap()
        .validated()
        .unwrap();
        assert_eq!(config.cycle.max_concurrency, 4);
        assert_eq!(config.cycle.lookback_days, 7);
        assert_eq!(config.reflection.delay_hours, 24);
        assert_eq!(config.evolution.policy.min_outcomes, 5);
        assert_eq!(config.evolution.interval_secs, 604_800);
        assert_eq!(config.paths.metrics[0].priority, 2);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let config = PipelineConfig::from_toml_str("[execution]\nmax_attempts = 0\n").unwrap();
        let err = config.validated().unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn retry_policy_follows_settings() {
        let policy = ExecutionSettings::default().retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay(2), Duration::from_secs(60));
    }
}
