//! Rolling window of utilization samples
//!
//! Each sampling cycle merges freshly queried points into a per-resource,
//! per-metric series. Points older than the retention period are evicted,
//! so candidate rules always see the recent history of a resource even
//! when a single query covered only part of it.

use crate::models::{DataPoint, ResourceKind, UtilizationSample, UtilizationSummary};
use crate::patterns::summarize;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default retention period (48 hours)
const DEFAULT_RETENTION: Duration = Duration::from_secs(48 * 60 * 60);

/// Default maximum number of points kept per series
const DEFAULT_MAX_POINTS: usize = 10_000;

/// Configuration for the sample window store
#[derive(Debug, Clone)]
pub struct WindowConfig {
    /// Points older than this are evicted
    pub retention: Duration,
    /// Hard cap per series, oldest points dropped first
    pub max_points_per_series: usize,
    /// Snapshot file (optional)
    pub persistence_path: Option<PathBuf>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            max_points_per_series: DEFAULT_MAX_POINTS,
            persistence_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResourceSeries {
    kind: ResourceKind,
    source: String,
    series: HashMap<String, Vec<DataPoint>>,
}

/// Read-only snapshot of everything known about one resource
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceWindow {
    pub resource_id: String,
    pub kind: ResourceKind,
    series: HashMap<String, Vec<DataPoint>>,
}

impl ResourceWindow {
    pub fn new(resource_id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            resource_id: resource_id.into(),
            kind,
            series: HashMap::new(),
        }
    }

    /// Attach a series, sorting and de-duplicating it
    pub fn with_series(mut self, metric: impl Into<String>, mut points: Vec<DataPoint>) -> Self {
        points.retain(|p| p.value.is_finite());
        points.sort_by_key(|p| p.timestamp);
        points.dedup_by_key(|p| p.timestamp);
        self.series.insert(metric.into(), points);
        self
    }

    /// Points of one metric, ordered by timestamp
    pub fn points(&self, metric: &str) -> &[DataPoint] {
        self.series.get(metric).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Points strictly after `timestamp`
    pub fn points_after(&self, metric: &str, timestamp: i64) -> &[DataPoint] {
        let points = self.points(metric);
        let idx = points.partition_point(|p| p.timestamp <= timestamp);
        &points[idx..]
    }

    pub fn summary(&self, metric: &str) -> UtilizationSummary {
        summarize(self.points(metric))
    }

    /// Covered time span of a metric in seconds
    pub fn span_secs(&self, metric: &str) -> i64 {
        match (self.points(metric).first(), self.points(metric).last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0,
        }
    }

    /// Largest gap between two consecutive points of a metric
    pub fn max_gap_secs(&self, metric: &str) -> i64 {
        self.points(metric)
            .windows(2)
            .map(|w| w[1].timestamp - w[0].timestamp)
            .max()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(Vec::is_empty)
    }
}

/// Statistics about the window store
#[derive(Debug, Clone)]
pub struct WindowStats {
    pub resources: usize,
    pub series: usize,
    pub points: usize,
    pub retention_seconds: u64,
}

/// In-memory rolling window with optional snapshot persistence
pub struct SampleWindowStore {
    resources: RwLock<HashMap<String, ResourceSeries>>,
    config: WindowConfig,
    dirty: AtomicBool,
}

impl SampleWindowStore {
    pub fn new(config: WindowConfig) -> Self {
        Self {
            resources: RwLock::new(HashMap::new()),
            config,
            dirty: AtomicBool::new(false),
        }
    }

    /// Create a store snapshotting to `path` and load the previous snapshot if one exists
    pub fn with_persistence(path: PathBuf, config: WindowConfig) -> Self {
        let config = WindowConfig {
            persistence_path: Some(path.clone()),
            ..config
        };

        let mut resources = HashMap::new();
        match super::read_json::<HashMap<String, ResourceSeries>>(&path) {
            Ok(Some(loaded)) => {
                info!(path = %path.display(), resources = loaded.len(), "Loaded sample window from disk");
                resources = loaded;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Failed to load persisted sample window, starting fresh");
            }
        }

        Self {
            resources: RwLock::new(resources),
            config,
            dirty: AtomicBool::new(false),
        }
    }

    /// Merge samples into the window and evict anything outside retention
    pub async fn ingest(&self, samples: &[UtilizationSample], now: DateTime<Utc>) {
        let cutoff = self.cutoff(now);
        let mut resources = self.resources.write().await;

        for sample in samples {
            let entry = resources
                .entry(sample.resource_id.clone())
                .or_insert_with(|| ResourceSeries {
                    kind: sample.kind,
                    source: sample.source.clone(),
                    series: HashMap::new(),
                });
            entry.kind = sample.kind;
            entry.source = sample.source.clone();

            let series = entry.series.entry(sample.metric.clone()).or_default();
            merge_points(series, &sample.points);
            series.retain(|p| p.timestamp >= cutoff);
            if series.len() > self.config.max_points_per_series {
                let excess = series.len() - self.config.max_points_per_series;
                series.drain(..excess);
            }
        }

        self.dirty.store(true, Ordering::Relaxed);
    }

    /// Snapshot of one resource
    pub async fn window(&self, resource_id: &str) -> Option<ResourceWindow> {
        let resources = self.resources.read().await;
        resources.get(resource_id).map(|entry| ResourceWindow {
            resource_id: resource_id.to_string(),
            kind: entry.kind,
            series: entry.series.clone(),
        })
    }

    /// Drop points older than the retention period and forget empty resources
    pub async fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = self.cutoff(now);
        let mut resources = self.resources.write().await;
        let mut evicted = 0;

        for entry in resources.values_mut() {
            for series in entry.series.values_mut() {
                let before = series.len();
                series.retain(|p| p.timestamp >= cutoff);
                evicted += before - series.len();
            }
            entry.series.retain(|_, points| !points.is_empty());
        }
        resources.retain(|_, entry| !entry.series.is_empty());

        if evicted > 0 {
            self.dirty.store(true, Ordering::Relaxed);
            debug!(evicted, "Evicted expired samples");
        }
        evicted
    }

    /// Write the snapshot if anything changed since the last flush
    pub async fn flush(&self) -> Result<()> {
        let Some(path) = self.config.persistence_path.as_ref() else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::Relaxed) {
            return Ok(());
        }

        let resources = self.resources.read().await;
        if let Err(e) = super::write_json_atomic(path, &*resources) {
            self.dirty.store(true, Ordering::Relaxed);
            return Err(e);
        }
        debug!(path = %path.display(), resources = resources.len(), "Sample window flushed to disk");
        Ok(())
    }

    pub async fn stats(&self) -> WindowStats {
        let resources = self.resources.read().await;
        WindowStats {
            resources: resources.len(),
            series: resources.values().map(|r| r.series.len()).sum(),
            points: resources
                .values()
                .flat_map(|r| r.series.values())
                .map(Vec::len)
                .sum(),
            retention_seconds: self.config.retention.as_secs(),
        }
    }

    fn cutoff(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp() - self.config.retention.as_secs() as i64
    }
}

/// Merge sorted `incoming` into sorted `series`; newer values win on equal timestamps
fn merge_points(series: &mut Vec<DataPoint>, incoming: &[DataPoint]) {
    if incoming.is_empty() {
        return;
    }
    if series.last().map_or(true, |last| last.timestamp < incoming[0].timestamp) {
        series.extend_from_slice(incoming);
        return;
    }

    let mut merged: Vec<DataPoint> = Vec::with_capacity(series.len() + incoming.len());
    let (mut i, mut j) = (0, 0);
    while i < series.len() && j < incoming.len() {
        let (a, b) = (series[i], incoming[j]);
        if a.timestamp < b.timestamp {
            merged.push(a);
            i += 1;
        } else if a.timestamp > b.timestamp {
            merged.push(b);
            j += 1;
        } else {
            merged.push(b);
            i += 1;
            j += 1;
        }
    }
    merged.extend_from_slice(&series[i..]);
    merged.extend_from_slice(&incoming[j..]);
    *series = merged;
}
