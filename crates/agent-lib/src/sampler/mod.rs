//! Metric sampling from the external telemetry source
//!
//! The sampler turns resource inventory plus time-series queries into
//! normalized [`UtilizationSample`]s. Results are streamed so a caller can
//! start working on the first resource before the last one is queried.
//! Every call to the source is bounded by a timeout; a slow or failing
//! source surfaces as `TelemetryUnavailable` for the affected scope only.

mod http;
mod memory;

#[cfg(test)]
mod tests;

pub use http::{HttpTelemetryConfig, HttpTelemetrySource};
pub use memory::InMemoryTelemetry;

use crate::error::{OptimizerError, OptimizerResult};
use crate::models::{DataPoint, ResourceDescriptor, ResourceKind, SampleWindow, UtilizationSample};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

pub use async_trait::async_trait;

/// Stream of samples produced by one sampling call
pub type SampleStream = ReceiverStream<OptimizerResult<UtilizationSample>>;

/// External source of inventory and time series
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Resources matching the selector
    async fn list_resources(
        &self,
        selector: &ResourceSelector,
    ) -> OptimizerResult<Vec<ResourceDescriptor>>;

    /// Raw points of one metric of one resource inside the window
    async fn query(
        &self,
        resource: &ResourceDescriptor,
        metric: &str,
        window: &SampleWindow,
    ) -> OptimizerResult<Vec<DataPoint>>;

    /// Tag recorded on every sample from this source
    fn source_tag(&self) -> &str;
}

/// Which resources a sampling call covers; empty lists match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSelector {
    pub ids: Vec<String>,
    pub kinds: Vec<ResourceKind>,
}

impl ResourceSelector {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn single(id: impl Into<String>) -> Self {
        Self {
            ids: vec![id.into()],
            kinds: Vec::new(),
        }
    }

    pub fn of_kinds(kinds: Vec<ResourceKind>) -> Self {
        Self {
            ids: Vec::new(),
            kinds,
        }
    }

    pub fn matches(&self, resource: &ResourceDescriptor) -> bool {
        (self.ids.is_empty() || self.ids.iter().any(|id| id == &resource.id))
            && (self.kinds.is_empty() || self.kinds.contains(&resource.kind))
    }
}

/// Sampler configuration
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Upper bound on every call to the telemetry source
    pub call_timeout: Duration,
    /// How far back each sampling cycle queries
    pub lookback: Duration,
    /// Query resolution
    pub step: Duration,
    /// Samples buffered ahead of the consumer
    pub prefetch: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            lookback: Duration::from_secs(24 * 60 * 60),
            step: Duration::from_secs(300),
            prefetch: 8,
        }
    }
}

/// Pulls utilization samples from a telemetry source
#[derive(Clone)]
pub struct MetricSampler {
    source: Arc<dyn TelemetrySource>,
    config: SamplerConfig,
}

impl MetricSampler {
    pub fn new(source: Arc<dyn TelemetrySource>, config: SamplerConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn source_tag(&self) -> &str {
        self.source.source_tag()
    }

    /// Window ending at `now` covering the configured lookback
    pub fn window_ending(&self, now: chrono::DateTime<chrono::Utc>) -> SampleWindow {
        SampleWindow::ending_at(now, self.config.lookback.as_secs(), self.config.step.as_secs())
    }

    /// Resolve a selector against the source's inventory
    pub async fn resolve(
        &self,
        selector: &ResourceSelector,
    ) -> OptimizerResult<Vec<ResourceDescriptor>> {
        let listed = tokio::time::timeout(
            self.config.call_timeout,
            self.source.list_resources(selector),
        )
        .await
        .map_err(|_| {
            OptimizerError::telemetry_unavailable(
                "inventory",
                format!("listing timed out after {:?}", self.config.call_timeout),
            )
        })??;

        Ok(listed.into_iter().filter(|r| selector.matches(r)).collect())
    }

    /// Stream one sample per (resource, metric) pair
    ///
    /// Querying happens on a background task and stays at most `prefetch`
    /// samples ahead of the consumer. Dropping the stream stops the task.
    pub fn sample(&self, targets: Vec<ResourceDescriptor>, window: SampleWindow) -> SampleStream {
        let (tx, rx) = mpsc::channel(self.config.prefetch.max(1));
        let source = self.source.clone();
        let call_timeout = self.config.call_timeout;

        tokio::spawn(async move {
            for resource in targets {
                for metric in resource.kind.metrics() {
                    let result = query_one(source.as_ref(), &resource, metric, &window, call_timeout).await;
                    if let Err(e) = &result {
                        warn!(resource = %resource.id, metric = %metric, error = %e, "Telemetry query failed");
                    }
                    if tx.send(result).await.is_err() {
                        debug!("Sample consumer dropped, stopping sampler task");
                        return;
                    }
                }
            }
        });

        ReceiverStream::new(rx)
    }

    /// Sample a single resource, failing on the first unavailable metric
    pub async fn sample_resource(
        &self,
        resource: &ResourceDescriptor,
        window: SampleWindow,
    ) -> OptimizerResult<Vec<UtilizationSample>> {
        let mut stream = self.sample(vec![resource.clone()], window);
        let mut samples = Vec::with_capacity(resource.kind.metrics().len());
        while let Some(item) = stream.next().await {
            samples.push(item?);
        }
        Ok(samples)
    }
}

async fn query_one(
    source: &dyn TelemetrySource,
    resource: &ResourceDescriptor,
    metric: &str,
    window: &SampleWindow,
    call_timeout: Duration,
) -> OptimizerResult<UtilizationSample> {
    let points = tokio::time::timeout(call_timeout, source.query(resource, metric, window))
        .await
        .map_err(|_| {
            OptimizerError::telemetry_unavailable(
                &resource.id,
                format!("query for {metric} timed out after {call_timeout:?}"),
            )
        })??;

    Ok(UtilizationSample::new(
        &resource.id,
        resource.kind,
        metric,
        points,
        *window,
        source.source_tag(),
    ))
}
