use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use autopilot_actions::DryRunExecutor;
use autopilot_orchestrator::{
    EventBusNotifier, Pipeline, PipelineConfig, PipelineTelemetry, TracingNotifier,
};
use autopilot_reasoning::{HttpReasoningService, ReasoningService};
use autopilot_signals::JsonFileSource;
use autopilot_skills::SkillStore;
use chrono::Utc;
use clap::Parser;
use shared_event_bus::{EventPublisher, FileEventPublisher};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "autopilot", version, about = "Campaign autopilot cycle runner")]
struct Cli {
    /// TOML config; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Run a single cycle, then audit and evolve once, and exit.
    #[arg(long)]
    once: bool,
    /// Extra metrics file, added to the configured providers.
    #[arg(long)]
    metrics: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default().with_env_overrides().validated()?,
    };

    let mut pipeline = build(&config, &cli.metrics)?;
    if cli.once {
        let snapshot = pipeline.run_cycle(Utc::now()).await;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        let maintenance = pipeline.maintenance();
        let audit = maintenance.audit(Utc::now()).await;
        let evolution = maintenance.evolve().await;
        info!(
            findings = audit.report.findings.len(),
            mutations = evolution.applied.len(),
            "maintenance pass complete"
        );
        return Ok(());
    }

    let jobs = pipeline.maintenance().spawn();
    let mut ticker = tokio::time::interval(Duration::from_secs(config.cycle.interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = pipeline.run_cycle(Utc::now()).await;
                println!("{}", serde_json::to_string(&snapshot)?);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }
    jobs.shutdown().await;
    Ok(())
}

fn build(config: &PipelineConfig, extra_metrics: &[PathBuf]) -> Result<Pipeline> {
    let mut telemetry = PipelineTelemetry::builder("orchestrator");
    if let Some(path) = &config.paths.log {
        telemetry = telemetry.log_path(path);
    }
    let publisher: Option<Arc<dyn EventPublisher>> = match &config.paths.events {
        Some(path) => Some(Arc::new(
            FileEventPublisher::new(path).context("opening event file")?,
        )),
        None => None,
    };
    if let Some(publisher) = &publisher {
        telemetry = telemetry.event_publisher(Arc::clone(publisher));
    }

    let reasoning: Option<Arc<dyn ReasoningService>> = if config.reasoning.is_configured() {
        Some(Arc::new(HttpReasoningService::new(config.reasoning.clone())?))
    } else {
        warn!("reasoning service not configured; deterministic strategies only");
        None
    };

    let mut builder = Pipeline::builder(config.clone())
        .skills(SkillStore::bootstrap())
        .platform(Arc::new(DryRunExecutor::new()))
        .reasoning(reasoning)
        .telemetry(telemetry.build()?)
        .sink(Arc::new(TracingNotifier));
    if let Some(publisher) = publisher {
        builder = builder.sink(Arc::new(EventBusNotifier::new(publisher)));
    }
    for file in &config.paths.metrics {
        builder = builder.source(Arc::new(JsonFileSource::new(
            file.name.clone(),
            file.path.clone(),
            file.priority,
        )));
    }
    for (idx, path) in extra_metrics.iter().enumerate() {
        builder = builder.source(Arc::new(JsonFileSource::new(
            format!("cli-{idx}"),
            path.clone(),
            0,
        )));
    }
    builder.build()
}
