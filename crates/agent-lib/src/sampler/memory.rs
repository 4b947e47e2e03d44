//! In-memory telemetry source
//!
//! Holds a scripted inventory and series. Used by tests and local demos,
//! and able to simulate per-resource or full outages.

use super::{async_trait, ResourceSelector, TelemetrySource};
use crate::error::{OptimizerError, OptimizerResult};
use crate::models::{DataPoint, ResourceDescriptor, SampleWindow};
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

/// Scripted telemetry source
#[derive(Default)]
pub struct InMemoryTelemetry {
    resources: RwLock<Vec<ResourceDescriptor>>,
    series: DashMap<(String, String), Vec<DataPoint>>,
    failing: DashSet<String>,
    outage: AtomicBool,
    queries: AtomicUsize,
}

impl InMemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a resource in the inventory
    pub fn upsert_resource(&self, resource: ResourceDescriptor) {
        if let Ok(mut resources) = self.resources.write() {
            resources.retain(|r| r.id != resource.id);
            resources.push(resource);
        }
    }

    pub fn remove_resource(&self, resource_id: &str) {
        if let Ok(mut resources) = self.resources.write() {
            resources.retain(|r| r.id != resource_id);
        }
    }

    /// Replace the series of one metric
    pub fn set_series(&self, resource_id: &str, metric: &str, points: Vec<DataPoint>) {
        self.series
            .insert((resource_id.to_string(), metric.to_string()), points);
    }

    /// Append points to the series of one metric
    pub fn push_points(&self, resource_id: &str, metric: &str, points: &[DataPoint]) {
        self.series
            .entry((resource_id.to_string(), metric.to_string()))
            .or_default()
            .extend_from_slice(points);
    }

    /// Make every query for this resource fail as unavailable
    pub fn fail_resource(&self, resource_id: &str) {
        self.failing.insert(resource_id.to_string());
    }

    pub fn recover_resource(&self, resource_id: &str) {
        self.failing.remove(resource_id);
    }

    /// Make every call fail as unavailable
    pub fn set_outage(&self, outage: bool) {
        self.outage.store(outage, Ordering::SeqCst);
    }

    /// Number of series queries served so far
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TelemetrySource for InMemoryTelemetry {
    async fn list_resources(
        &self,
        selector: &ResourceSelector,
    ) -> OptimizerResult<Vec<ResourceDescriptor>> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(OptimizerError::telemetry_unavailable(
                "inventory",
                "telemetry source unreachable",
            ));
        }
        let resources = self
            .resources
            .read()
            .map_err(|_| OptimizerError::telemetry_unavailable("inventory", "inventory lock poisoned"))?;
        Ok(resources
            .iter()
            .filter(|r| selector.matches(r))
            .cloned()
            .collect())
    }

    async fn query(
        &self,
        resource: &ResourceDescriptor,
        metric: &str,
        window: &SampleWindow,
    ) -> OptimizerResult<Vec<DataPoint>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.outage.load(Ordering::SeqCst) || self.failing.contains(&resource.id) {
            return Err(OptimizerError::telemetry_unavailable(
                &resource.id,
                "telemetry source unreachable",
            ));
        }

        let key = (resource.id.clone(), metric.to_string());
        Ok(self
            .series
            .get(&key)
            .map(|points| {
                points
                    .iter()
                    .filter(|p| p.timestamp >= window.start && p.timestamp <= window.end)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn source_tag(&self) -> &str {
        "memory"
    }
}
