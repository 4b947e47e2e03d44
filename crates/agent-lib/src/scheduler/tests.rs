use super::*;
use crate::error::OptimizerResult;
use crate::executor::DryRunControlSurface;
use crate::models::{
    ActionState, DataPoint, DecisionOutcome, ResourceDescriptor, ResourceKind, SampleWindow,
    UtilizationSample, METRIC_CPU_UTILIZATION, METRIC_IO_OPS,
};
use crate::sampler::{async_trait, InMemoryTelemetry, ResourceSelector, SamplerConfig, TelemetrySource};
use crate::test_support::series_ending;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

fn idle_volume(id: &str, now: chrono::DateTime<Utc>) -> ResourceDescriptor {
    let mut vol = ResourceDescriptor::new(id, ResourceKind::Volume);
    vol.size_gb = Some(100.0);
    vol.last_active_at = Some((now - chrono::Duration::days(40)).timestamp());
    vol
}

fn oversized_instance(id: &str) -> ResourceDescriptor {
    let mut vm = ResourceDescriptor::new(id, ResourceKind::ComputeInstance);
    vm.instance_class = Some("t3.large".into());
    vm
}

fn context(
    telemetry: Arc<dyn TelemetrySource>,
    surface: Arc<DryRunControlSurface>,
) -> Arc<OptimizerContext> {
    Arc::new(
        OptimizerContextBuilder::new("test-cluster")
            .telemetry(telemetry)
            .control(surface)
            .sampler_config(SamplerConfig {
                lookback: Duration::from_secs(26 * 3600),
                ..Default::default()
            })
            .worker_limit(4)
            .build()
            .unwrap(),
    )
}

fn completed(outcome: RunOutcome) -> RunReport {
    match outcome {
        RunOutcome::Completed(report) => report,
        RunOutcome::Skipped => panic!("run was skipped"),
    }
}

#[tokio::test]
async fn test_partial_telemetry_failure_is_isolated() {
    let now = Utc::now();
    let telemetry = Arc::new(InMemoryTelemetry::new());
    for i in 0..10 {
        let id = format!("vol-{i}");
        telemetry.upsert_resource(idle_volume(&id, now));
        telemetry.set_series(&id, METRIC_IO_OPS, series_ending(now, 12, 300, 0.0));
    }
    telemetry.fail_resource("vol-3");
    telemetry.fail_resource("vol-7");

    let ctx = context(telemetry, Arc::new(DryRunControlSurface::new()));
    let report = completed(ctx.run_once().await);

    assert_eq!(report.resources_seen, 10);
    assert_eq!(report.resources_evaluated, 8);
    assert_eq!(report.decisions(), 8);
    assert_eq!(report.held, 8);
    assert_eq!(report.errors.len(), 2);
    assert!(report.errors.iter().all(|e| e.kind == "telemetry_unavailable"));
    let mut failed: Vec<&str> = report.errors.iter().map(|e| e.resource_id.as_str()).collect();
    failed.sort();
    assert_eq!(failed, vec!["vol-3", "vol-7"]);
    assert!(report.summary_error.is_none());

    assert_eq!(ctx.audit.pending().await.len(), 8);
    assert_eq!(ctx.last_run().await, Some(report));
}

#[tokio::test]
async fn test_held_candidates_are_not_duplicated() {
    let now = Utc::now();
    let telemetry = Arc::new(InMemoryTelemetry::new());
    telemetry.upsert_resource(idle_volume("vol-1", now));

    let ctx = context(telemetry, Arc::new(DryRunControlSurface::new()));
    assert_eq!(completed(ctx.run_once().await).held, 1);

    let second = completed(ctx.run_once().await);
    assert_eq!(second.decisions(), 0);
    assert_eq!(ctx.audit.pending().await.len(), 1);
}

#[tokio::test]
async fn test_inventory_outage_degrades_to_no_op() {
    let telemetry = Arc::new(InMemoryTelemetry::new());
    telemetry.upsert_resource(oversized_instance("vm-1"));
    telemetry.set_outage(true);

    let ctx = context(telemetry.clone(), Arc::new(DryRunControlSurface::new()));
    let report = completed(ctx.run_once().await);

    assert!(report.is_degraded());
    assert!(report
        .summary_error
        .as_deref()
        .unwrap()
        .starts_with("resource inventory failed"));
    assert!(report.errors.is_empty());
    assert_eq!(report.decisions(), 0);
    assert_eq!(telemetry.query_count(), 0);
}

#[tokio::test]
async fn test_total_telemetry_failure_collapses_to_summary() {
    let telemetry = Arc::new(InMemoryTelemetry::new());
    for id in ["vm-1", "vm-2", "vm-3"] {
        telemetry.upsert_resource(oversized_instance(id));
        telemetry.fail_resource(id);
    }

    let ctx = context(telemetry, Arc::new(DryRunControlSurface::new()));
    let report = completed(ctx.run_once().await);

    assert!(report.errors.is_empty());
    assert_eq!(
        report.summary_error.as_deref(),
        Some("telemetry unavailable for all 3 resources")
    );
}

#[tokio::test]
async fn test_control_surface_outage_skips_sampling() {
    let telemetry = Arc::new(InMemoryTelemetry::new());
    telemetry.upsert_resource(oversized_instance("vm-1"));
    let surface = Arc::new(DryRunControlSurface::new());
    surface.set_unreachable(true);

    let ctx = context(telemetry.clone(), surface);
    let report = completed(ctx.run_once().await);

    assert!(report
        .summary_error
        .as_deref()
        .unwrap()
        .starts_with("control surface unreachable"));
    assert_eq!(report.resources_seen, 0);
    assert_eq!(telemetry.query_count(), 0);
}

#[tokio::test]
async fn test_auto_apply_verify_and_roll_back() {
    let now = Utc::now();
    let telemetry = Arc::new(InMemoryTelemetry::new());
    telemetry.upsert_resource(oversized_instance("vm-1"));
    telemetry.set_series(
        "vm-1",
        METRIC_CPU_UTILIZATION,
        series_ending(now, 313, 300, 10.0),
    );
    let surface = Arc::new(DryRunControlSurface::new());
    surface.seed(&oversized_instance("vm-1"));
    let ctx = context(telemetry, surface.clone());

    // 10% mean CPU on t3.large: confident, low risk, applied right away
    let first = completed(ctx.run_once().await);
    assert_eq!(first.auto_approved, 1);
    assert_eq!(first.actions_applied, 1);
    assert!((first.approved_monthly_savings - 29.952).abs() < 1e-6);
    assert_eq!(
        surface.state("vm-1").unwrap().instance_class.as_deref(),
        Some("t3.medium")
    );
    let action_id = ctx.actions.list(None).await[0].id.clone();

    // No samples since the change yet: the action stays in flight
    let second = completed(ctx.run_once().await);
    assert_eq!(second.rejected, 1);
    assert_eq!(second.actions_applied, 0);
    let decisions = ctx.audit.decisions(1).await;
    assert_eq!(decisions[0].decision.outcome, DecisionOutcome::Rejected);
    assert!(decisions[0].decision.reason.contains(&action_id));

    // Utilization after the change regresses past the threshold
    let later = Utc::now() + chrono::Duration::minutes(10);
    let regressed = UtilizationSample::new(
        "vm-1",
        ResourceKind::ComputeInstance,
        METRIC_CPU_UTILIZATION,
        vec![DataPoint::new(later.timestamp(), 96.0)],
        SampleWindow::ending_at(later, 600, 300),
        "test",
    );
    ctx.windows.ingest(&[regressed], Utc::now()).await;

    let third = completed(ctx.run_once().await);
    assert_eq!(third.rolled_back, 1);
    let record = ctx.actions.get(&action_id).await.unwrap();
    assert_eq!(record.state, ActionState::RolledBack);
    assert!(surface.calls().iter().any(|m| matches!(
        m,
        crate::executor::Mutation::Resize { instance_class, .. } if instance_class == "t3.large"
    )));
}

/// Telemetry source that answers slowly
struct SlowTelemetry {
    inner: InMemoryTelemetry,
    delay: Duration,
}

#[async_trait]
impl TelemetrySource for SlowTelemetry {
    async fn list_resources(
        &self,
        selector: &ResourceSelector,
    ) -> OptimizerResult<Vec<ResourceDescriptor>> {
        self.inner.list_resources(selector).await
    }

    async fn query(
        &self,
        resource: &ResourceDescriptor,
        metric: &str,
        window: &SampleWindow,
    ) -> OptimizerResult<Vec<DataPoint>> {
        tokio::time::sleep(self.delay).await;
        self.inner.query(resource, metric, window).await
    }

    fn source_tag(&self) -> &str {
        "slow"
    }
}

fn slow_context(resources: usize, delay: Duration, workers: usize) -> Arc<OptimizerContext> {
    let inner = InMemoryTelemetry::new();
    for i in 0..resources {
        inner.upsert_resource(oversized_instance(&format!("vm-{i}")));
    }
    Arc::new(
        OptimizerContextBuilder::new("test-cluster")
            .telemetry(Arc::new(SlowTelemetry { inner, delay }))
            .control(Arc::new(DryRunControlSurface::new()))
            .worker_limit(workers)
            .build()
            .unwrap(),
    )
}

#[tokio::test]
async fn test_overlapping_run_is_skipped() {
    let ctx = slow_context(2, Duration::from_millis(200), 2);

    let running = {
        let ctx = ctx.clone();
        tokio::spawn(async move { ctx.run_once().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(ctx.is_running());
    assert_eq!(ctx.run_once().await, RunOutcome::Skipped);

    let report = completed(running.await.unwrap());
    assert_eq!(report.resources_evaluated, 2);
    assert!(!ctx.is_running());
}

#[tokio::test]
async fn test_cancel_stops_dispatch_between_resources() {
    let ctx = slow_context(5, Duration::from_millis(100), 1);

    let running = {
        let ctx = ctx.clone();
        tokio::spawn(async move { ctx.run_once().await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    ctx.cancel();

    let report = completed(running.await.unwrap());
    assert!(report.cancelled);
    assert!(report.resources_evaluated >= 1);
    assert!(report.resources_evaluated < 5);
    assert!(report.errors.is_empty());
}

#[tokio::test]
async fn test_scheduler_loop_runs_and_shuts_down() {
    let telemetry = Arc::new(InMemoryTelemetry::new());
    telemetry.upsert_resource(oversized_instance("vm-1"));
    let ctx = context(telemetry, Arc::new(DryRunControlSurface::new()));

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let handle = tokio::spawn(SchedulerLoop::new(ctx.clone()).run(shutdown_rx));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while ctx.last_run().await.is_none() {
        assert!(tokio::time::Instant::now() < deadline, "no run completed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler loop did not stop")
        .unwrap();
    assert_eq!(ctx.last_run().await.unwrap().run, 1);
}

#[test]
fn test_builder_requires_sources() {
    let missing_control = OptimizerContextBuilder::new("c")
        .telemetry(Arc::new(InMemoryTelemetry::new()))
        .build();
    assert!(missing_control.is_err());

    let zero_workers = OptimizerContextBuilder::new("c")
        .telemetry(Arc::new(InMemoryTelemetry::new()))
        .control(Arc::new(DryRunControlSurface::new()))
        .worker_limit(0)
        .build();
    assert!(zero_workers.is_err());
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let now = Utc::now();
    let build = || {
        let telemetry = Arc::new(InMemoryTelemetry::new());
        telemetry.upsert_resource(idle_volume("vol-1", now));
        Arc::new(
            OptimizerContextBuilder::new("test-cluster")
                .telemetry(telemetry)
                .control(Arc::new(DryRunControlSurface::new()))
                .state_dir(dir.path())
                .build()
                .unwrap(),
        )
    };

    let ctx = build();
    completed(ctx.run_once().await);
    ctx.policy
        .update(&crate::policy::PolicyUpdate {
            confidence_floor: Some(0.8),
            ..Default::default()
        })
        .await
        .unwrap();
    drop(ctx);

    let restarted = build();
    let pending = restarted.audit.pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].candidate.resource_id, "vol-1");
    let policy = restarted.policy.snapshot().await;
    assert_eq!(policy.version, 2);
    assert_eq!(policy.confidence_floor, 0.8);
}

#[tokio::test]
async fn test_failed_apply_does_not_stop_other_candidates() {
    let dir = tempfile::tempdir().unwrap();
    let now = Utc::now();
    let telemetry = Arc::new(InMemoryTelemetry::new());
    telemetry.upsert_resource(oversized_instance("vm-1"));
    telemetry.set_series(
        "vm-1",
        METRIC_CPU_UTILIZATION,
        series_ending(now, 313, 300, 10.0),
    );
    telemetry.upsert_resource(idle_volume("vol-1", now));
    let surface = Arc::new(DryRunControlSurface::new());
    surface.seed(&oversized_instance("vm-1"));
    let ctx = Arc::new(
        OptimizerContextBuilder::new("test-cluster")
            .telemetry(telemetry)
            .control(surface.clone())
            .sampler_config(SamplerConfig {
                lookback: Duration::from_secs(26 * 3600),
                ..Default::default()
            })
            .state_dir(dir.path())
            .build()
            .unwrap(),
    );

    // A non-empty directory where the action snapshot goes makes every insert fail
    let actions = dir.path().join("actions.json");
    let _ = std::fs::remove_file(&actions);
    std::fs::create_dir_all(actions.join("blocker")).unwrap();

    let report = completed(ctx.run_once().await);
    assert_eq!(report.resources_evaluated, 2);
    assert_eq!(report.auto_approved, 1);
    assert_eq!(report.actions_applied, 0);
    assert_eq!(report.held, 1);
    assert!(report.summary_error.is_none());
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].resource_id, "vm-1");
    assert_eq!(report.errors[0].kind, "storage");

    assert!(ctx.actions.in_flight_for("vm-1").await.is_none());
    assert_eq!(surface.call_count(), 0);
    assert_eq!(ctx.audit.pending().await.len(), 1);
}

#[tokio::test]
async fn test_abandoned_rollback_degrades_health() {
    let now = Utc::now();
    let telemetry = Arc::new(InMemoryTelemetry::new());
    telemetry.upsert_resource(oversized_instance("vm-1"));
    telemetry.set_series(
        "vm-1",
        METRIC_CPU_UTILIZATION,
        series_ending(now, 313, 300, 10.0),
    );
    let surface = Arc::new(DryRunControlSurface::new());
    surface.seed(&oversized_instance("vm-1"));
    let ctx = context(telemetry, surface.clone());

    let first = completed(ctx.run_once().await);
    assert_eq!(first.actions_applied, 1);
    let action_id = ctx.actions.list(None).await[0].id.clone();

    let later = Utc::now() + chrono::Duration::minutes(10);
    let regressed = UtilizationSample::new(
        "vm-1",
        ResourceKind::ComputeInstance,
        METRIC_CPU_UTILIZATION,
        vec![DataPoint::new(later.timestamp(), 96.0)],
        SampleWindow::ending_at(later, 600, 300),
        "test",
    );
    ctx.windows.ingest(&[regressed], Utc::now()).await;
    surface.fail_next(
        "vm-1",
        crate::error::OptimizerError::ControlSurfacePermanent("quota".into()),
        1,
    );

    let second = completed(ctx.run_once().await);
    assert_eq!(second.rolled_back, 0);
    assert_eq!(second.actions_abandoned, 1);
    assert_eq!(
        ctx.actions.get(&action_id).await.unwrap().state,
        ActionState::Abandoned
    );
    let health = ctx.health.health().await;
    assert_eq!(
        health.components[crate::health::components::ROLLBACK].status,
        crate::health::ComponentStatus::Degraded
    );
    assert!(health.components[crate::health::components::ROLLBACK]
        .message
        .as_deref()
        .unwrap()
        .contains(&action_id));
}

#[tokio::test]
async fn test_persistent_stores_keep_configured_limits() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = OptimizerContextBuilder::new("test-cluster")
        .telemetry(Arc::new(InMemoryTelemetry::new()))
        .control(Arc::new(DryRunControlSurface::new()))
        .window_config(crate::store::WindowConfig {
            retention: Duration::from_secs(24 * 3600),
            max_points_per_series: 3,
            persistence_path: None,
        })
        .pattern_config(crate::patterns::PatternStoreConfig {
            max_per_resource: 2,
            persistence_path: None,
        })
        .state_dir(dir.path())
        .build()
        .unwrap();

    let now = Utc::now();
    let sample = UtilizationSample::new(
        "vm-1",
        ResourceKind::ComputeInstance,
        METRIC_CPU_UTILIZATION,
        series_ending(now, 8, 300, 20.0),
        SampleWindow::ending_at(now, 8 * 300, 300),
        "test",
    );
    ctx.windows.ingest(&[sample], now).await;
    let window = ctx.windows.window("vm-1").await.unwrap();
    assert_eq!(window.points(METRIC_CPU_UTILIZATION).len(), 3);
    assert_eq!(ctx.windows.stats().await.retention_seconds, 24 * 3600);

    for _ in 0..4 {
        ctx.patterns
            .record_outcome(
                "vm-1",
                &[0.2, 0.1],
                crate::models::ActionKind::Rightsize,
                crate::patterns::OutcomeQuality::Success,
            )
            .await
            .unwrap();
    }
    assert_eq!(ctx.patterns.len().await, 2);
    assert!(dir.path().join("patterns.json").exists());
}
