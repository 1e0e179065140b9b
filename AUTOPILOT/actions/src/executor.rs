use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use autopilot_signals::EntityStatus;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    action::{Action, ActionId, ActionKind, ActionStatus},
    queue::ActionQueue,
    ActionError,
};

/// Platform call failures. Every variant is retryable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// The platform answered with an error code, including soft errors inside a 200.
    #[error("platform error {code}: {message}")]
    Rejected {
        /// Platform error code.
        code: String,
        /// Platform message.
        message: String,
    },
    /// Transport failure.
    #[error("platform unavailable: {0}")]
    Unavailable(String),
    /// The call exceeded its deadline.
    #[error("platform call timed out after {0:?}")]
    Timeout(Duration),
}

/// Write surface of the ad platform.
#[async_trait]
pub trait PlatformExecutor: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    /// Sets the delivery status.
    async fn set_status(&self, entity_id: &str, status: EntityStatus) -> Result<(), PlatformError>;

    /// Sets the daily budget.
    async fn set_budget(&self, entity_id: &str, amount: f64) -> Result<(), PlatformError>;
}

/// Bounded retries with linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Backoff unit; the wait after attempt `n` is `backoff * n`.
    pub backoff: Duration,
    /// Deadline of each platform call.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(30),
            call_timeout: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// Wait after the given 1-based attempt.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

/// Outcome of one execution pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Actions applied.
    pub executed: Vec<ActionId>,
    /// Actions that exhausted their retries.
    pub failed: Vec<ActionId>,
    /// Actions not attempted, with the reason.
    pub skipped: Vec<(ActionId, String)>,
}

/// Applies executable actions with retries, timeouts and the claim set.
#[derive(Clone)]
pub struct ActionExecutor {
    queue: ActionQueue,
    platform: Arc<dyn PlatformExecutor>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for ActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionExecutor")
            .field("platform", &self.platform.name())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ActionExecutor {
    /// Creates an executor over a queue.
    #[must_use]
    pub fn new(queue: ActionQueue, platform: Arc<dyn PlatformExecutor>) -> Self {
        Self {
            queue,
            platform,
            policy: RetryPolicy::default(),
        }
    }

    /// Overrides the retry policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Retry policy in use.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    async fn call(&self, action: &Action) -> Result<(), PlatformError> {
        let platform = Arc::clone(&self.platform);
        let entity = action.entity_id.as_str();
        let fut = async {
            match (action.kind.target_status(), action.kind) {
                (Some(status), _) => platform.set_status(entity, status).await,
                (None, ActionKind::AdjustBudget) => match action.params.new_budget {
                    Some(amount) => platform.set_budget(entity, amount).await,
                    None => Err(PlatformError::Rejected {
                        code: "missing_budget".into(),
                        message: "adjust_budget without new_budget".into(),
                    }),
                },
                (None, _) => Ok(()),
            }
        };
        tokio::time::timeout(self.policy.call_timeout, fut)
            .await
            .map_err(|_| PlatformError::Timeout(self.policy.call_timeout))?
    }

    /// Executes one action to a terminal state. Dropping the future mid-flight releases the
    /// claim and leaves the action executable.
    ///
    /// # Errors
    /// Claim failures; platform failures are recorded on the action, not returned.
    pub async fn execute(&self, id: ActionId) -> Result<Action, ActionError> {
        let claim = self.queue.claim(id)?;
        self.run_attempts(claim.action()).await
    }

    async fn run_attempts(&self, action: &Action) -> Result<Action, ActionError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.call(action).await {
                Ok(()) => {
                    self.queue.record_attempt(action.id, None)?;
                    info!(
                        action = %action.id,
                        entity = %action.entity_id,
                        kind = action.kind.label(),
                        attempt,
                        "action executed"
                    );
                    return self.queue.transition(action.id, ActionStatus::Executed, None);
                }
                Err(err) => {
                    last_error = err.to_string();
                    self.queue.record_attempt(action.id, Some(last_error.clone()))?;
                    warn!(
                        action = %action.id,
                        attempt,
                        max = attempts,
                        error = %last_error,
                        "platform call failed"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.delay(attempt)).await;
                    }
                }
            }
        }
        self.queue
            .transition(action.id, ActionStatus::Failed, Some(last_error))
    }

    /// Executes every ready action.
    pub async fn execute_ready(&self) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        for action in self.queue.executable() {
            match self.execute(action.id).await {
                Ok(done) if done.status == ActionStatus::Executed => report.executed.push(done.id),
                Ok(done) => report.failed.push(done.id),
                Err(err) => report.skipped.push((action.id, err.to_string())),
            }
        }
        report
    }
}

/// Platform executor that only logs and records calls.
#[derive(Debug, Default)]
pub struct DryRunExecutor {
    calls: Mutex<Vec<String>>,
}

impl DryRunExecutor {
    /// Creates the executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl PlatformExecutor for DryRunExecutor {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn set_status(&self, entity_id: &str, status: EntityStatus) -> Result<(), PlatformError> {
        info!(entity = entity_id, status = status.label(), "dry-run set_status");
        self.calls
            .lock()
            .push(format!("set_status {entity_id} {}", status.label()));
        Ok(())
    }

    async fn set_budget(&self, entity_id: &str, amount: f64) -> Result<(), PlatformError> {
        info!(entity = entity_id, amount, "dry-run set_budget");
        self.calls
            .lock()
            .push(format!("set_budget {entity_id} {amount:.2}"));
        Ok(())
    }
}
