//! Cost Agent - cluster cost optimization daemon
//!
//! Samples utilization on a schedule, decides which right-sizing actions
//! to take and applies the safe ones. Serves health, metrics and the
//! operator API on one port.

use agent_lib::{
    executor::{ControlSurface, DryRunControlSurface, HttpControlSurface},
    health::{components, HealthRegistry},
    operator::OperatorService,
    sampler::HttpTelemetrySource,
    scheduler::{OptimizerContextBuilder, SchedulerLoop},
    scoring::HttpReasoningService,
};
use anyhow::{Context, Result};
use cost_agent::{api, config};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting cost-agent");

    let config = config::AgentConfig::load()?;
    info!(
        cluster = %config.cluster_name,
        dry_run = config.dry_run(),
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let telemetry = HttpTelemetrySource::new(&config.telemetry_config())?;
    let control: Arc<dyn ControlSurface> = match &config.control_url {
        Some(url) => Arc::new(HttpControlSurface::new(
            url,
            Duration::from_secs(config.executor.call_timeout_secs),
        )?),
        None => {
            warn!("No control surface configured, mutations will be simulated");
            Arc::new(DryRunControlSurface::new())
        }
    };

    let mut builder = OptimizerContextBuilder::new(config.cluster_name.clone())
        .telemetry(Arc::new(telemetry))
        .control(control)
        .policy(config.policy.clone())
        .sampler_config(config.sampler_config())
        .generator_config(config.generator_config())
        .executor_config(config.executor_config())
        .window_config(config.window_config())
        .worker_limit(config.worker_limit)
        .health(health_registry.clone());
    if let Some(url) = &config.reasoning_url {
        builder = builder.reasoning(Arc::new(HttpReasoningService::new(
            url,
            config.reasoning_timeout(),
        )?));
    }
    if let Some(dir) = &config.state_dir {
        builder = builder.state_dir(dir.clone());
    }
    let context = Arc::new(builder.build().context("Failed to build optimizer")?);

    context.logger.log_startup(AGENT_VERSION, config.dry_run());

    // Finish whatever a previous process left half done
    for result in context.executor.resume_unfinished().await {
        match result {
            Ok(record) => info!(action = %record.id, state = %record.state, "Resumed action"),
            Err(e) => warn!(error = %e, "Failed to resume action"),
        }
    }

    let (shutdown_tx, _) = broadcast::channel(1);

    let operator = OperatorService::new(context.clone());
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), operator));

    let scheduler_handle = tokio::spawn(SchedulerLoop::new(context.clone()).run(shutdown_tx.subscribe()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, shutdown_tx.subscribe()));

    health_registry.set_healthy(components::SCHEDULER).await;
    health_registry.set_ready(true).await;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    context.logger.log_shutdown("SIGINT received");
    info!("Shutting down");

    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());

    if let Err(e) = scheduler_handle.await {
        warn!(error = %e, "Scheduler task failed");
    }
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server failed"),
        Err(e) => warn!(error = %e, "API task failed"),
        Ok(Ok(())) => {}
    }
    if let Err(e) = context.windows.flush().await {
        warn!(error = %e, "Failed to persist sample window on shutdown");
    }

    Ok(())
}
