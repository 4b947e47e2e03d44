//! HTTP telemetry source
//!
//! Reads the inventory from a JSON endpoint and time series from a
//! Prometheus-compatible `query_range` API. Series are selected by a
//! `resource_id` label on the metric.

use super::{async_trait, ResourceSelector, TelemetrySource};
use crate::error::{OptimizerError, OptimizerResult};
use crate::models::{DataPoint, ResourceDescriptor, SampleWindow};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Endpoints and limits for [`HttpTelemetrySource`]
#[derive(Debug, Clone)]
pub struct HttpTelemetryConfig {
    /// Base URL of the Prometheus-compatible API
    pub metrics_url: String,
    /// Full URL of the inventory endpoint
    pub inventory_url: String,
    pub request_timeout: Duration,
}

impl Default for HttpTelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_url: "http://prometheus:9090".to_string(),
            inventory_url: "http://inventory:8080/api/v1/resources".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Telemetry source backed by HTTP APIs
pub struct HttpTelemetrySource {
    client: Client,
    query_url: Url,
    inventory_url: Url,
}

#[derive(Debug, Deserialize)]
struct QueryRangeResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryRangeData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryRangeData {
    #[serde(rename = "resultType")]
    result_type: String,
    result: Vec<RangeSeries>,
}

#[derive(Debug, Deserialize)]
struct RangeSeries {
    values: Vec<(f64, String)>,
}

impl HttpTelemetrySource {
    pub fn new(config: &HttpTelemetryConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let base = Url::parse(&config.metrics_url).context("Invalid telemetry URL")?;
        let query_url = base
            .join("/api/v1/query_range")
            .context("Invalid telemetry URL")?;
        let inventory_url = Url::parse(&config.inventory_url).context("Invalid inventory URL")?;

        Ok(Self {
            client,
            query_url,
            inventory_url,
        })
    }

    /// PromQL selector for one metric of one resource
    pub fn selector(metric: &str, resource_id: &str) -> String {
        format!("{metric}{{resource_id=\"{resource_id}\"}}")
    }
}

#[async_trait]
impl TelemetrySource for HttpTelemetrySource {
    async fn list_resources(
        &self,
        selector: &ResourceSelector,
    ) -> OptimizerResult<Vec<ResourceDescriptor>> {
        let response = self
            .client
            .get(self.inventory_url.clone())
            .send()
            .await
            .map_err(|e| request_error("inventory", e))?;

        let response = check_status("inventory", response).await?;
        let resources: Vec<ResourceDescriptor> = response
            .json()
            .await
            .map_err(|e| OptimizerError::telemetry_malformed("inventory", e))?;

        Ok(resources.into_iter().filter(|r| selector.matches(r)).collect())
    }

    async fn query(
        &self,
        resource: &ResourceDescriptor,
        metric: &str,
        window: &SampleWindow,
    ) -> OptimizerResult<Vec<DataPoint>> {
        let query = Self::selector(metric, &resource.id);
        let params = [
            ("query", query),
            ("start", window.start.to_string()),
            ("end", window.end.to_string()),
            ("step", format!("{}s", window.step_secs)),
        ];

        let response = self
            .client
            .get(self.query_url.clone())
            .query(&params)
            .send()
            .await
            .map_err(|e| request_error(&resource.id, e))?;

        let response = check_status(&resource.id, response).await?;
        let body: QueryRangeResponse = response
            .json()
            .await
            .map_err(|e| OptimizerError::telemetry_malformed(&resource.id, e))?;

        parse_range(&resource.id, body)
    }

    fn source_tag(&self) -> &str {
        "prometheus"
    }
}

fn parse_range(scope: &str, body: QueryRangeResponse) -> OptimizerResult<Vec<DataPoint>> {
    if body.status != "success" {
        return Err(OptimizerError::telemetry_malformed(
            scope,
            body.error.unwrap_or_else(|| format!("status {}", body.status)),
        ));
    }
    let data = body
        .data
        .ok_or_else(|| OptimizerError::telemetry_malformed(scope, "missing data"))?;
    if data.result_type != "matrix" {
        return Err(OptimizerError::telemetry_malformed(
            scope,
            format!("unexpected result type {}", data.result_type),
        ));
    }

    let mut points = Vec::new();
    for series in data.result {
        for (ts, raw) in series.values {
            let value: f64 = raw.parse().map_err(|_| {
                OptimizerError::telemetry_malformed(scope, format!("non-numeric value {raw:?}"))
            })?;
            points.push(DataPoint::new(ts as i64, value));
        }
    }
    Ok(points)
}

fn request_error(scope: &str, err: reqwest::Error) -> OptimizerError {
    if err.is_decode() {
        OptimizerError::telemetry_malformed(scope, err)
    } else {
        OptimizerError::telemetry_unavailable(scope, err)
    }
}

async fn check_status(
    scope: &str,
    response: reqwest::Response,
) -> OptimizerResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let reason = format!("HTTP {status}: {body}");
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(OptimizerError::telemetry_unavailable(scope, reason))
    } else {
        Err(OptimizerError::telemetry_malformed(scope, reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> OptimizerResult<Vec<DataPoint>> {
        parse_range("vm-1", serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_selector() {
        assert_eq!(
            HttpTelemetrySource::selector("cpu_utilization", "vm-1"),
            "cpu_utilization{resource_id=\"vm-1\"}"
        );
    }

    #[test]
    fn test_parse_matrix() {
        let points = parse(
            r#"{"status":"success","data":{"resultType":"matrix","result":[
                {"metric":{"resource_id":"vm-1"},"values":[[1700000000,"12.5"],[1700000300,"NaN"]]}
            ]}}"#,
        )
        .unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0], DataPoint::new(1_700_000_000, 12.5));
        assert!(points[1].value.is_nan());
    }

    #[test]
    fn test_parse_error_status() {
        let err = parse(r#"{"status":"error","error":"bad query"}"#).unwrap_err();
        assert_eq!(
            err,
            OptimizerError::telemetry_malformed("vm-1", "bad query")
        );
    }

    #[test]
    fn test_parse_non_numeric_value() {
        let err = parse(
            r#"{"status":"success","data":{"resultType":"matrix","result":[{"values":[[1,"abc"]]}]}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, OptimizerError::TelemetryMalformed { .. }));
    }

    #[test]
    fn test_new_rejects_bad_url() {
        let config = HttpTelemetryConfig {
            metrics_url: "not a url".into(),
            ..Default::default()
        };
        assert!(HttpTelemetrySource::new(&config).is_err());
    }
}
