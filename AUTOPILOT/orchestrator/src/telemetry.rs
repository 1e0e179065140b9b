use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use tracing::warn;
use uuid::Uuid;

use crate::snapshot::CyclePhase;

/// Builder for [`PipelineTelemetry`].
pub struct PipelineTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl PipelineTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            event_publisher: None,
        }
    }

    /// Sets the JSON log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds the handle.
    pub fn build(self) -> Result<PipelineTelemetry> {
        let logger = self.log_path.map(JsonLogger::new).transpose()?;
        Ok(PipelineTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
                publisher: self.event_publisher,
            }),
        })
    }
}

/// Cycle telemetry: JSON log lines plus `autopilot.<phase>.<event>` bus events.
///
/// Sink failures are logged through `tracing` and never fail the cycle.
#[derive(Clone)]
pub struct PipelineTelemetry {
    inner: Arc<TelemetryInner>,
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl fmt::Debug for PipelineTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineTelemetry")
            .field("module", &self.inner.module)
            .field("logger", &self.inner.logger.is_some())
            .field("events", &self.inner.publisher.is_some())
            .finish()
    }
}

impl Default for PipelineTelemetry {
    fn default() -> Self {
        Self::disabled()
    }
}

impl PipelineTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> PipelineTelemetryBuilder {
        PipelineTelemetryBuilder::new(module)
    }

    /// Handle with no sinks.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                module: "autopilot".into(),
                logger: None,
                publisher: None,
            }),
        }
    }

    /// Writes one structured log line.
    pub fn log(
        &self,
        level: LogLevel,
        message: &str,
        cycle_id: Option<Uuid>,
        metadata: Value,
    ) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            let mut record =
                LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
            if let Some(id) = cycle_id {
                record = record.with_cycle(id);
            }
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Publishes one event.
    pub async fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        if let Some(publisher) = &self.inner.publisher {
            publisher
                .publish(EventRecord::new(&self.inner.module, event_type, payload))
                .await?;
        }
        Ok(())
    }

    /// Logs and publishes one named event, swallowing sink failures.
    pub async fn emit(&self, name: &str, cycle_id: Option<Uuid>, payload: Value) {
        let level = if name.ends_with(".failed") {
            LogLevel::Error
        } else {
            LogLevel::Info
        };
        if let Err(err) = self.log(level, name, cycle_id, payload.clone()) {
            warn!(event = %name, error = %err, "telemetry log failed");
        }
        let payload = match (payload, cycle_id) {
            (Value::Object(mut map), Some(id)) => {
                map.insert("cycle_id".into(), Value::String(id.to_string()));
                Value::Object(map)
            }
            (other, _) => other,
        };
        if let Err(err) = self.event(name, payload).await {
            warn!(event = %name, error = %err, "telemetry event failed");
        }
    }

    /// Emits `autopilot.<phase>.<event>` for a cycle.
    pub async fn phase(&self, cycle_id: Uuid, phase: CyclePhase, event: &str, payload: Value) {
        let name = format!("autopilot.{}.{event}", phase.label());
        self.emit(&name, Some(cycle_id), payload).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_event_bus::MemoryEventBus;
    use tempfile::tempdir;

    #[tokio::test]
    async fn phase_events_reach_log_and_bus() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("pipeline.log");
        let bus = Arc::new(MemoryEventBus::new(16));
        let telemetry = PipelineTelemetry::builder("orchestrator")
            .log_path(&path)
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let cycle = Uuid::new_v4();
        telemetry
            .phase(cycle, CyclePhase::Screen, "completed", json!({ "screened": 3 }))
            .await;
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("autopilot.screen.completed"));
        assert!(content.contains(&cycle.to_string()));
        let events = bus.events_of("autopilot.screen.completed");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["screened"], 3);
    }
}
