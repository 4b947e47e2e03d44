//! Advisory reasoning service
//!
//! The service receives a utilization summary and a description of the
//! proposed action and answers with a rationale and an advisory confidence.
//! Answers often wrap the JSON object in prose, so the span from the first
//! `{` to the last `}` is extracted before parsing.

use crate::error::{OptimizerError, OptimizerResult};
use crate::models::{ResourceKind, UtilizationSummary};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// What the reasoning service is asked about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningRequest {
    pub resource_id: String,
    pub resource_kind: ResourceKind,
    pub action: String,
    pub summary: UtilizationSummary,
    pub rule_confidence: f64,
    pub rule_rationale: String,
}

/// Validated advisory answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningOpinion {
    pub rationale: String,
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
struct RawOpinion {
    #[serde(alias = "reasoning")]
    rationale: Option<String>,
    #[serde(alias = "confidence_score")]
    confidence: Option<f64>,
}

/// External advisory model
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn assess(&self, request: &ReasoningRequest) -> OptimizerResult<ReasoningOpinion>;
}

/// Parse a possibly prose-wrapped answer into a validated opinion
pub fn parse_opinion(text: &str) -> OptimizerResult<ReasoningOpinion> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if e > s => &text[s..=e],
        _ => {
            return Err(OptimizerError::ReasoningMalformed(
                "no JSON object in response".to_string(),
            ))
        }
    };

    let raw: RawOpinion = serde_json::from_str(json)
        .map_err(|e| OptimizerError::ReasoningMalformed(e.to_string()))?;

    let confidence = raw
        .confidence
        .ok_or_else(|| OptimizerError::ReasoningMalformed("missing confidence".to_string()))?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(OptimizerError::ReasoningMalformed(format!(
            "confidence {confidence} outside [0, 1]"
        )));
    }

    let rationale = raw
        .rationale
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .ok_or_else(|| OptimizerError::ReasoningMalformed("missing rationale".to_string()))?;

    Ok(ReasoningOpinion {
        rationale,
        confidence,
    })
}

/// Reasoning service reached over HTTP
///
/// The request is POSTed as JSON; the response body is the model's raw text.
pub struct HttpReasoningService {
    client: Client,
    endpoint: Url,
}

impl HttpReasoningService {
    pub fn new(endpoint: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create HTTP client")?;
        let endpoint = Url::parse(endpoint).context("Invalid reasoning service URL")?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl ReasoningService for HttpReasoningService {
    async fn assess(&self, request: &ReasoningRequest) -> OptimizerResult<ReasoningOpinion> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| OptimizerError::ReasoningServiceUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = format!("HTTP {status}: {body}");
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                OptimizerError::ReasoningServiceUnavailable(reason)
            } else {
                OptimizerError::ReasoningMalformed(reason)
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| OptimizerError::ReasoningServiceUnavailable(e.to_string()))?;
        parse_opinion(&text)
    }
}
