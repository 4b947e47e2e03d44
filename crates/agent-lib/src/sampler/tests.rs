use super::*;
use crate::models::{METRIC_AGGREGATE_LOAD, METRIC_CPU_UTILIZATION};
use crate::test_support::series_ending;
use chrono::Utc;

/// Source whose series queries never complete
struct HangingSource;

#[async_trait]
impl TelemetrySource for HangingSource {
    async fn list_resources(
        &self,
        _selector: &ResourceSelector,
    ) -> OptimizerResult<Vec<ResourceDescriptor>> {
        Ok(vec![ResourceDescriptor::new("vm-1", ResourceKind::ComputeInstance)])
    }

    async fn query(
        &self,
        _resource: &ResourceDescriptor,
        _metric: &str,
        _window: &SampleWindow,
    ) -> OptimizerResult<Vec<DataPoint>> {
        std::future::pending().await
    }

    fn source_tag(&self) -> &str {
        "hanging"
    }
}

fn fast_config() -> SamplerConfig {
    SamplerConfig {
        call_timeout: Duration::from_millis(50),
        ..Default::default()
    }
}

fn populated() -> Arc<InMemoryTelemetry> {
    let telemetry = Arc::new(InMemoryTelemetry::new());
    let now = Utc::now();
    telemetry.upsert_resource(ResourceDescriptor::new("vm-1", ResourceKind::ComputeInstance));
    telemetry.upsert_resource(ResourceDescriptor::new("rs-1", ResourceKind::WorkloadReplicaSet));
    telemetry.upsert_resource(ResourceDescriptor::new("vol-1", ResourceKind::Volume));
    telemetry.set_series("vm-1", METRIC_CPU_UTILIZATION, series_ending(now, 12, 300, 10.0));
    telemetry.set_series("rs-1", METRIC_CPU_UTILIZATION, series_ending(now, 12, 300, 20.0));
    telemetry.set_series("rs-1", METRIC_AGGREGATE_LOAD, series_ending(now, 12, 300, 150.0));
    telemetry
}

#[test]
fn test_selector_matching() {
    let vm = ResourceDescriptor::new("vm-1", ResourceKind::ComputeInstance);
    let vol = ResourceDescriptor::new("vol-1", ResourceKind::Volume);

    assert!(ResourceSelector::all().matches(&vm));
    assert!(ResourceSelector::single("vm-1").matches(&vm));
    assert!(!ResourceSelector::single("vm-1").matches(&vol));
    assert!(ResourceSelector::of_kinds(vec![ResourceKind::Volume]).matches(&vol));
    assert!(!ResourceSelector::of_kinds(vec![ResourceKind::Volume]).matches(&vm));
}

#[tokio::test]
async fn test_resolve_filters_inventory() {
    let sampler = MetricSampler::new(populated(), fast_config());
    let all = sampler.resolve(&ResourceSelector::all()).await.unwrap();
    assert_eq!(all.len(), 3);

    let volumes = sampler
        .resolve(&ResourceSelector::of_kinds(vec![ResourceKind::Volume]))
        .await
        .unwrap();
    assert_eq!(volumes.len(), 1);
    assert_eq!(volumes[0].id, "vol-1");
}

#[tokio::test]
async fn test_sample_streams_one_item_per_metric() {
    let telemetry = populated();
    let sampler = MetricSampler::new(telemetry.clone(), fast_config());
    let targets = sampler.resolve(&ResourceSelector::all()).await.unwrap();
    let window = sampler.window_ending(Utc::now());

    let items: Vec<_> = sampler.sample(targets, window).collect().await;
    // vm-1: cpu, rs-1: cpu + aggregate load, vol-1: io
    assert_eq!(items.len(), 4);
    assert!(items.iter().all(|i| i.is_ok()));
    assert_eq!(telemetry.query_count(), 4);

    let rs: Vec<_> = items
        .into_iter()
        .flatten()
        .filter(|s| s.resource_id == "rs-1")
        .collect();
    assert_eq!(rs.len(), 2);
    assert!(rs.iter().all(|s| s.points.len() == 12 && s.source == "memory"));
}

#[tokio::test]
async fn test_empty_series_is_not_an_error() {
    let sampler = MetricSampler::new(populated(), fast_config());
    let vol = ResourceDescriptor::new("vol-1", ResourceKind::Volume);
    let samples = sampler
        .sample_resource(&vol, sampler.window_ending(Utc::now()))
        .await
        .unwrap();
    assert_eq!(samples.len(), 1);
    assert!(samples[0].is_empty());
}

#[tokio::test]
async fn test_failing_resource_only_affects_its_scope() {
    let telemetry = populated();
    telemetry.fail_resource("vm-1");
    let sampler = MetricSampler::new(telemetry, fast_config());
    let window = sampler.window_ending(Utc::now());

    let vm = ResourceDescriptor::new("vm-1", ResourceKind::ComputeInstance);
    let err = sampler.sample_resource(&vm, window).await.unwrap_err();
    assert!(matches!(err, OptimizerError::TelemetryUnavailable { ref scope, .. } if scope == "vm-1"));

    let rs = ResourceDescriptor::new("rs-1", ResourceKind::WorkloadReplicaSet);
    assert_eq!(sampler.sample_resource(&rs, window).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_query_timeout_maps_to_unavailable() {
    let sampler = MetricSampler::new(Arc::new(HangingSource), fast_config());
    let vm = ResourceDescriptor::new("vm-1", ResourceKind::ComputeInstance);

    let err = sampler
        .sample_resource(&vm, sampler.window_ending(Utc::now()))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(err.to_string().contains("timed out"));
}

#[tokio::test]
async fn test_outage_fails_inventory() {
    let telemetry = populated();
    telemetry.set_outage(true);
    let sampler = MetricSampler::new(telemetry, fast_config());
    assert!(matches!(
        sampler.resolve(&ResourceSelector::all()).await,
        Err(OptimizerError::TelemetryUnavailable { .. })
    ));
}
