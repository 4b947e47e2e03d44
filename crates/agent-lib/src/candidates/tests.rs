use super::*;
use crate::models::{
    ActionParams, CapacityPool, DataPoint, ResourceDescriptor, ResourceKind, METRIC_AGGREGATE_LOAD,
    METRIC_CPU_UTILIZATION, METRIC_IO_OPS,
};
use crate::store::ResourceWindow;
use crate::test_support::series_ending;
use chrono::{DateTime, Duration, TimeZone, Utc};

fn generator() -> CandidateGenerator {
    CandidateGenerator::new(GeneratorConfig::default(), Arc::new(PatternStore::in_memory()))
}

fn at_hour(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 12, hour, 15, 0).unwrap()
}

fn oversized_vm(now: DateTime<Utc>, cpu: f64) -> (ResourceDescriptor, ResourceWindow) {
    let mut vm = ResourceDescriptor::new("vm-1", ResourceKind::ComputeInstance);
    vm.instance_class = Some("t3.large".into());
    vm.capacity_pool = Some(CapacityPool::OnDemand);
    let window = ResourceWindow::new("vm-1", ResourceKind::ComputeInstance)
        .with_series(METRIC_CPU_UTILIZATION, series_ending(now, 25, 3600, cpu));
    (vm, window)
}

fn replica_set(now: DateTime<Utc>, replicas: u32, load: f64) -> (ResourceDescriptor, ResourceWindow) {
    let mut rs = ResourceDescriptor::new("rs-1", ResourceKind::WorkloadReplicaSet);
    rs.replicas = Some(replicas);
    rs.replica_capacity = Some(150.0);
    let window = ResourceWindow::new("rs-1", ResourceKind::WorkloadReplicaSet)
        .with_series(METRIC_AGGREGATE_LOAD, series_ending(now, 13, 300, load))
        .with_series(METRIC_CPU_UTILIZATION, series_ending(now, 13, 300, 25.0));
    (rs, window)
}

fn idle_volume(now: DateTime<Utc>, idle_days: i64) -> (ResourceDescriptor, ResourceWindow) {
    let mut vol = ResourceDescriptor::new("vol-1", ResourceKind::Volume);
    vol.size_gb = Some(100.0);
    vol.last_active_at = Some((now - Duration::days(idle_days)).timestamp());
    let window = ResourceWindow::new("vol-1", ResourceKind::Volume)
        .with_series(METRIC_IO_OPS, series_ending(now, 12, 300, 0.0));
    (vol, window)
}

#[test]
fn test_interpolation() {
    assert_eq!(interpolate(30.0, 30.0, 5.0), 0.0);
    assert_eq!(interpolate(5.0, 30.0, 5.0), 1.0);
    assert_eq!(interpolate(0.0, 30.0, 5.0), 1.0);
    assert!((interpolate(17.5, 30.0, 5.0) - 0.5).abs() < 1e-9);
    assert!((interpolate(45.0, 30.0, 60.0) - 0.5).abs() < 1e-9);
}

#[test]
fn test_projection_divides_by_remaining_replicas() {
    assert_eq!(projected_per_replica_load(150.0, 3), Some(75.0));
    assert_eq!(projected_per_replica_load(150.0, 1), None);
}

#[tokio::test]
async fn test_rightsize_fires_below_watermark() {
    let now = at_hour(12);
    let (vm, window) = oversized_vm(now, 10.0);
    let drafts = generator()
        .generate(&RuleInput { resource: &vm, window: &window, now })
        .await;

    assert_eq!(drafts.len(), 1);
    let draft = &drafts[0];
    assert_eq!(
        draft.action,
        ActionParams::Rightsize {
            current_class: "t3.large".into(),
            target_class: "t3.medium".into()
        }
    );
    assert!((draft.provisional_confidence - 0.8).abs() < 1e-9);
    assert!((draft.estimated_monthly_savings - 29.952).abs() < 1e-6);
    assert_eq!(draft.fingerprint.len(), crate::patterns::FINGERPRINT_LEN);
    assert_eq!(draft.id.len(), 24);
}

#[tokio::test]
async fn test_rightsize_needs_minimum_evidence() {
    let now = at_hour(12);
    let mut vm = ResourceDescriptor::new("vm-1", ResourceKind::ComputeInstance);
    vm.instance_class = Some("t3.large".into());
    let short = ResourceWindow::new("vm-1", ResourceKind::ComputeInstance)
        .with_series(METRIC_CPU_UTILIZATION, series_ending(now, 12, 3600, 5.0));

    let drafts = generator()
        .generate(&RuleInput { resource: &vm, window: &short, now })
        .await;
    assert!(drafts.is_empty());
}

#[tokio::test]
async fn test_rightsize_rejects_gappy_observation() {
    let now = at_hour(12);
    let mut vm = ResourceDescriptor::new("vm-1", ResourceKind::ComputeInstance);
    vm.instance_class = Some("t3.large".into());
    let t = now.timestamp();
    let gappy = ResourceWindow::new("vm-1", ResourceKind::ComputeInstance).with_series(
        METRIC_CPU_UTILIZATION,
        vec![DataPoint::new(t - 30 * 3600, 5.0), DataPoint::new(t, 5.0)],
    );

    let drafts = generator()
        .generate(&RuleInput { resource: &vm, window: &gappy, now })
        .await;
    assert!(drafts.is_empty());
}

#[tokio::test]
async fn test_rightsize_quiet_at_watermark_and_bottom_of_ladder() {
    let now = at_hour(12);
    let (vm, busy) = oversized_vm(now, 30.0);
    assert!(generator()
        .generate(&RuleInput { resource: &vm, window: &busy, now })
        .await
        .is_empty());

    let (mut smallest, window) = oversized_vm(now, 5.0);
    smallest.instance_class = Some("t3.micro".into());
    assert!(generator()
        .generate(&RuleInput { resource: &smallest, window: &window, now })
        .await
        .is_empty());
}

#[tokio::test]
async fn test_scale_replicas_projection() {
    let now = at_hour(12);
    let (rs, window) = replica_set(now, 3, 150.0);
    let drafts = generator()
        .generate(&RuleInput { resource: &rs, window: &window, now })
        .await;

    assert_eq!(drafts.len(), 1);
    match &drafts[0].action {
        ActionParams::ScaleReplicas {
            current_replicas,
            target_replicas,
            aggregate_load,
            projected_per_replica_load,
        } => {
            assert_eq!(*current_replicas, 3);
            assert_eq!(*target_replicas, 2);
            assert_eq!(*aggregate_load, 150.0);
            assert_eq!(*projected_per_replica_load, 75.0);
        }
        other => panic!("unexpected action {other:?}"),
    }
}

#[tokio::test]
async fn test_scale_replicas_respects_safety_ceiling() {
    let now = at_hour(12);
    // 2 replicas at 40% each would become 1 replica at 80%, above the 70% ceiling
    let (rs, window) = replica_set(now, 2, 120.0);
    assert!(generator()
        .generate(&RuleInput { resource: &rs, window: &window, now })
        .await
        .is_empty());
}

#[tokio::test]
async fn test_spot_only_during_off_peak() {
    let (mut vm, window) = oversized_vm(at_hour(3), 45.0);
    vm.tags.interruption_tolerant = true;

    let off_peak = generator()
        .generate(&RuleInput { resource: &vm, window: &window, now: at_hour(3) })
        .await;
    assert_eq!(off_peak.len(), 1);
    assert_eq!(off_peak[0].action.kind(), ActionKind::MigrateSpot);
    // 60% of the t3.large on-demand price
    assert!((off_peak[0].estimated_monthly_savings - 0.0832 * 0.6 * 720.0).abs() < 1e-6);

    let (vm_day, window_day) = oversized_vm(at_hour(14), 45.0);
    let mut vm_day = vm_day;
    vm_day.tags.interruption_tolerant = true;
    let peak = generator()
        .generate(&RuleInput { resource: &vm_day, window: &window_day, now: at_hour(14) })
        .await;
    assert!(peak.is_empty());
}

#[test]
fn test_off_peak_window_wraps_midnight() {
    let config = MigrateSpotConfig {
        off_peak_start_hour: 22,
        off_peak_end_hour: 4,
        ..Default::default()
    };
    assert!(config.is_off_peak(23));
    assert!(config.is_off_peak(0));
    assert!(config.is_off_peak(4));
    assert!(!config.is_off_peak(12));
}

#[tokio::test]
async fn test_idle_volume_fires_delete() {
    let now = at_hour(12);
    let (vol, window) = idle_volume(now, 40);
    let drafts = generator()
        .generate(&RuleInput { resource: &vol, window: &window, now })
        .await;

    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].action.kind(), ActionKind::DeleteUnusedStorage);
    assert!((drafts[0].estimated_monthly_savings - 10.0).abs() < 1e-9);
    assert!((drafts[0].provisional_confidence - 1.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_attached_or_recently_active_volume_is_kept() {
    let now = at_hour(12);
    let (mut attached, window) = idle_volume(now, 40);
    attached.attachments = 1;
    assert!(generator()
        .generate(&RuleInput { resource: &attached, window: &window, now })
        .await
        .is_empty());

    let (vol, _) = idle_volume(now, 40);
    let active = ResourceWindow::new("vol-1", ResourceKind::Volume)
        .with_series(METRIC_IO_OPS, series_ending(now, 12, 300, 3.0));
    assert!(generator()
        .generate(&RuleInput { resource: &vol, window: &active, now })
        .await
        .is_empty());
}

#[tokio::test]
async fn test_disabled_rule_never_fires() {
    let now = at_hour(12);
    let (vm, window) = oversized_vm(now, 10.0);
    let mut config = GeneratorConfig::default();
    config.disabled.insert(ActionKind::Rightsize);
    let generator = CandidateGenerator::new(config, Arc::new(PatternStore::in_memory()));

    assert!(!generator.is_enabled(ActionKind::Rightsize));
    assert!(generator
        .generate(&RuleInput { resource: &vm, window: &window, now })
        .await
        .is_empty());
}

#[tokio::test]
async fn test_pattern_history_moves_confidence_within_bounds() {
    let patterns = Arc::new(PatternStore::in_memory());
    let generator = CandidateGenerator::new(GeneratorConfig::default(), patterns.clone());
    let fp = vec![0.1, 0.0, 0.1, 0.0];

    // No history leaves confidence untouched
    assert_eq!(generator.adjust_confidence(0.6, ActionKind::Rightsize, &fp).await, 0.6);

    patterns
        .record_outcome("vm-9", &fp, ActionKind::Rightsize, OutcomeQuality::Success)
        .await
        .unwrap();
    let up = generator.adjust_confidence(0.6, ActionKind::Rightsize, &fp).await;
    assert!(up > 0.6 && up < 1.0, "up was {up}");
    assert_eq!(generator.adjust_confidence(1.0, ActionKind::Rightsize, &fp).await, 1.0);

    // History for other action kinds is ignored
    assert_eq!(generator.adjust_confidence(0.6, ActionKind::MigrateSpot, &fp).await, 0.6);

    for _ in 0..3 {
        patterns
            .record_outcome("vm-8", &fp, ActionKind::Rightsize, OutcomeQuality::Regression)
            .await
            .unwrap();
    }
    let down = generator.adjust_confidence(0.6, ActionKind::Rightsize, &fp).await;
    assert!(down < 0.6 && down > 0.0, "down was {down}");
    assert_eq!(generator.adjust_confidence(0.0, ActionKind::Rightsize, &fp).await, 0.0);
}

#[tokio::test]
async fn test_distant_patterns_are_ignored() {
    let patterns = Arc::new(PatternStore::in_memory());
    let generator = CandidateGenerator::new(GeneratorConfig::default(), patterns.clone());
    patterns
        .record_outcome("vm-9", &[0.9, 0.3, 1.0, 0.5], ActionKind::Rightsize, OutcomeQuality::Regression)
        .await
        .unwrap();

    let adjusted = generator
        .adjust_confidence(0.6, ActionKind::Rightsize, &[0.1, 0.0, 0.1, 0.0])
        .await;
    assert_eq!(adjusted, 0.6);
}

#[tokio::test]
async fn test_candidate_ids_are_unique() {
    let now = at_hour(3);
    let (mut vm, window) = oversized_vm(now, 10.0);
    vm.tags.interruption_tolerant = true;
    let generator = generator();

    let first = generator.generate(&RuleInput { resource: &vm, window: &window, now }).await;
    let second = generator.generate(&RuleInput { resource: &vm, window: &window, now }).await;
    assert_eq!(first.len(), 2);
    let mut ids: Vec<_> = first.iter().chain(&second).map(|d| d.id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);
}
