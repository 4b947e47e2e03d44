//! API client for communicating with the cost agent's operator API

use anyhow::{Context, Result};
use reqwest::{Client, Method, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Non-success answer from the agent
#[derive(Debug, Error)]
#[error("API error ({status}): {message}")]
pub struct ApiError {
    pub status: u16,
    /// Error label from the body, e.g. `not_found`
    pub kind: Option<String>,
    pub message: String,
}

/// API client for the operator API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(Method::GET, path, None::<&()>).await?;
        response.json().await.context("Failed to parse response")
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self.send(Method::POST, path, Some(body)).await?;
        response.json().await.context("Failed to parse response")
    }

    /// Make a PUT request with JSON body
    pub async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self.send(Method::PUT, path, Some(body)).await?;
        response.json().await.context("Failed to parse response")
    }

    async fn send<B: Serialize>(&self, method: Method, path: &str, body: Option<&B>) -> Result<Response> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.context("Failed to send request")?;

        // 409 on a trigger still carries a meaningful body
        let status = response.status();
        if status.is_success() || (status == reqwest::StatusCode::CONFLICT && path == RUNS_PATH) {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let (kind, message) = match serde_json::from_str::<ErrorResponse>(&text) {
            Ok(body) => (Some(body.kind), body.error),
            Err(_) => (None, text),
        };
        Err(ApiError {
            status: status.as_u16(),
            kind,
            message,
        }
        .into())
    }
}

pub const RUNS_PATH: &str = "api/v1/runs";

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub resource_id: String,
    pub resource_kind: String,
    /// Tagged action payload, `kind` names the action
    pub action: serde_json::Value,
    pub estimated_monthly_savings: f64,
    pub confidence: f64,
    pub risk: String,
    pub rationale: String,
    pub created_at: String,
}

impl Candidate {
    pub fn action_kind(&self) -> &str {
        self.action
            .get("kind")
            .and_then(|k| k.as_str())
            .unwrap_or("UNKNOWN")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub candidate_id: String,
    pub resource_id: String,
    pub outcome: String,
    pub reason: String,
    pub policy_version: u64,
    pub decided_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub candidate_id: String,
    pub verdict: String,
    pub reviewer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub reviewed_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingDecision {
    pub candidate: Candidate,
    pub decision: Decision,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionView {
    pub candidate: Candidate,
    pub decision: Decision,
    #[serde(default)]
    pub review: Option<Review>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub reviewer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChange {
    #[serde(default)]
    pub from: Option<String>,
    pub to: String,
    pub at: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: String,
    pub candidate_id: String,
    pub resource_id: String,
    pub action: serde_json::Value,
    pub state: String,
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: String,
    #[serde(default)]
    pub applied_at: Option<String>,
    #[serde(default)]
    pub verified_at: Option<String>,
    #[serde(default)]
    pub history: Vec<StateChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoApply {
    pub low: bool,
    pub medium: bool,
    pub high: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub version: u64,
    pub confidence_floor: f64,
    pub reject_floor: f64,
    pub auto_apply: AutoApply,
    pub sampling_interval_secs: u64,
}

/// Partial policy change; unset fields are left alone
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_floor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject_floor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_apply_low: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_apply_medium: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_apply_high: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceError {
    pub resource_id: String,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run: u64,
    pub started_at: String,
    pub finished_at: String,
    pub policy_version: u64,
    pub resources_seen: usize,
    pub resources_evaluated: usize,
    pub candidates: usize,
    pub auto_approved: usize,
    pub held: usize,
    pub rejected: usize,
    pub actions_applied: usize,
    pub actions_abandoned: usize,
    pub verified: usize,
    pub rolled_back: usize,
    pub approved_monthly_savings: f64,
    #[serde(default)]
    pub errors: Vec<ResourceError>,
    #[serde(default)]
    pub summary_error: Option<String>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub started: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: std::collections::BTreeMap<String, ComponentHealth>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_parses_pending_decisions() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/decisions/pending")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{
                    "candidate": {
                        "id": "c1", "resource_id": "vol-1", "resource_kind": "volume",
                        "action": {"kind": "DELETE_UNUSED_STORAGE", "target_handle": "vol-1", "idle_days": 40.0},
                        "estimated_monthly_savings": 8.0, "confidence": 0.33, "risk": "low",
                        "rationale": "idle", "summary": {}, "fingerprint": [],
                        "created_at": "2024-01-01T00:00:00Z"
                    },
                    "decision": {
                        "candidate_id": "c1", "resource_id": "vol-1", "outcome": "held_for_approval",
                        "reason": "confidence below floor", "policy_version": 1,
                        "decided_at": "2024-01-01T00:00:00Z"
                    }
                }]"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let pending: Vec<PendingDecision> = client.get("api/v1/decisions/pending").await.unwrap();

        mock.assert_async().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].candidate.action_kind(), "DELETE_UNUSED_STORAGE");
        assert_eq!(pending[0].decision.outcome, "held_for_approval");
    }

    #[tokio::test]
    async fn test_error_body_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/decisions/c9/approve")
            .with_status(404)
            .with_body(r#"{"error": "not found: decision for candidate c9", "kind": "not_found"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let request = ReviewRequest {
            reviewer: "alice".into(),
            reason: None,
        };
        let err = client
            .post::<ActionRecord, _>("api/v1/decisions/c9/approve", &request)
            .await
            .unwrap_err();

        let api = err.downcast_ref::<ApiError>().unwrap();
        assert_eq!(api.status, 404);
        assert_eq!(api.kind.as_deref(), Some("not_found"));
        assert!(api.message.contains("c9"));
    }

    #[tokio::test]
    async fn test_put_sends_only_changed_fields() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/api/v1/policy")
            .match_body(mockito::Matcher::Json(serde_json::json!({"confidence_floor": 0.8})))
            .with_status(200)
            .with_body(
                r#"{"version": 2, "confidence_floor": 0.8, "reject_floor": 0.3,
                    "auto_apply": {"low": true, "medium": false, "high": false},
                    "sampling_interval_secs": 900}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let update = PolicyUpdate {
            confidence_floor: Some(0.8),
            ..Default::default()
        };
        let policy: Policy = client.put("api/v1/policy", &update).await.unwrap();

        mock.assert_async().await;
        assert_eq!(policy.version, 2);
    }

    #[tokio::test]
    async fn test_trigger_conflict_is_not_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/runs")
            .with_status(409)
            .with_body(r#"{"started": false}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let response: TriggerResponse = client.post(RUNS_PATH, &()).await.unwrap();
        assert!(!response.started);
    }
}
