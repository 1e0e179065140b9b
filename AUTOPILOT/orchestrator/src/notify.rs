use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use autopilot_actions::Action;
use serde::{Deserialize, Serialize};
use shared_event_bus::{EventPublisher, EventRecord};
use tracing::{info, warn};
use uuid::Uuid;

use crate::snapshot::{Snapshot, SnapshotStatus};

/// Pending or failed action as shown to humans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionBrief {
    /// Action id.
    pub id: Uuid,
    /// Entity.
    pub entity_id: String,
    /// Operation label.
    pub kind: String,
    /// Why it was proposed.
    pub rationale: String,
    /// Last platform error, for failed actions.
    pub last_error: Option<String>,
}

impl From<&Action> for ActionBrief {
    fn from(action: &Action) -> Self {
        Self {
            id: action.id,
            entity_id: action.entity_id.clone(),
            kind: action.kind.label().to_string(),
            rationale: action.rationale.clone(),
            last_error: action.last_error.clone(),
        }
    }
}

/// Structured summary handed to notification sinks once per cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    /// Cycle id.
    pub cycle_id: Uuid,
    /// Snapshot state when the summary was built.
    pub status: SnapshotStatus,
    /// Entities seen.
    pub entities: usize,
    /// Entities handed to the decision phase.
    pub needs_decision: usize,
    /// Actions queued.
    pub queued: usize,
    /// Actions executed.
    pub executed: usize,
    /// Entities that got worse since the previous cycle.
    pub escalated: Vec<String>,
    /// Actions awaiting approval.
    pub pending: Vec<ActionBrief>,
    /// Actions that exhausted their retries.
    pub failed: Vec<ActionBrief>,
}

impl CycleSummary {
    /// Builds the summary from the running snapshot and the approval desk's lists.
    #[must_use]
    pub fn new(snapshot: &Snapshot, pending: &[Action], failed: &[Action]) -> Self {
        Self {
            cycle_id: snapshot.id,
            status: snapshot.status,
            entities: snapshot.entities,
            needs_decision: snapshot.verdicts.get("needs_decision").copied().unwrap_or(0),
            queued: snapshot.queued,
            executed: snapshot.executed,
            escalated: snapshot.escalated.clone(),
            pending: pending.iter().map(ActionBrief::from).collect(),
            failed: failed.iter().map(ActionBrief::from).collect(),
        }
    }

    /// One-line human rendering.
    #[must_use]
    pub fn headline(&self) -> String {
        format!(
            "{} entities, {} need a decision, {} queued, {} executed, \
             {} awaiting approval, {} failed, {} escalated",
            self.entities,
            self.needs_decision,
            self.queued,
            self.executed,
            self.pending.len(),
            self.failed.len(),
            self.escalated.len()
        )
    }
}

/// Receives cycle summaries. Failures are logged by the caller and never stop a cycle.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Sink name for logs.
    fn name(&self) -> &str;

    /// Delivers one summary.
    async fn notify(&self, summary: &CycleSummary) -> Result<()>;
}

/// Publishes summaries as `autopilot.cycle.summary` events.
pub struct EventBusNotifier {
    publisher: Arc<dyn EventPublisher>,
}

impl EventBusNotifier {
    /// Notifier over a publisher.
    #[must_use]
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl NotificationSink for EventBusNotifier {
    fn name(&self) -> &str {
        "event-bus"
    }

    async fn notify(&self, summary: &CycleSummary) -> Result<()> {
        let payload = serde_json::to_value(summary)?;
        self.publisher
            .publish(EventRecord::new("orchestrator", "autopilot.cycle.summary", payload))
            .await
    }
}

/// Writes summaries to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationSink for TracingNotifier {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn notify(&self, summary: &CycleSummary) -> Result<()> {
        info!(cycle = %summary.cycle_id, "{}", summary.headline());
        for action in &summary.failed {
            warn!(
                action = %action.id,
                entity = %action.entity_id,
                error = action.last_error.as_deref().unwrap_or(""),
                "action failed"
            );
        }
        Ok(())
    }
}

/// Delivers to every sink, logging and swallowing failures. Returns the sinks that failed.
pub async fn deliver(sinks: &[Arc<dyn NotificationSink>], summary: &CycleSummary) -> Vec<String> {
    let mut failed = Vec::new();
    for sink in sinks {
        if let Err(err) = sink.notify(summary).await {
            warn!(sink = sink.name(), error = %err, "notification failed");
            failed.push(sink.name().to_string());
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use chrono::Utc;
    use shared_event_bus::MemoryEventBus;

    struct Broken;

    #[async_trait]
    impl NotificationSink for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn notify(&self, _summary: &CycleSummary) -> Result<()> {
            Err(anyhow!("webhook down"))
        }
    }

    #[tokio::test]
    async fn failing_sink_does_not_block_the_others() {
        let bus = Arc::new(MemoryEventBus::new(8));
        let sinks: Vec<Arc<dyn NotificationSink>> = vec![
            Arc::new(Broken),
            Arc::new(EventBusNotifier::new(bus.clone())),
            Arc::new(TracingNotifier),
        ];
        let mut snapshot = Snapshot::start(Utc::now());
        snapshot.entities = 4;
        snapshot.verdicts.insert("needs_decision".into(), 2);
        let summary = CycleSummary::new(&snapshot, &[], &[]);
        assert_eq!(deliver(&sinks, &summary).await, vec!["broken".to_string()]);
        let events = bus.events_of("autopilot.cycle.summary");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["needs_decision"], 2);
        assert!(summary.headline().starts_with("4 entities, 2 need a decision"));
    }
}
