//! Cluster control surface
//!
//! Mutations are idempotent: applying one whose target state already holds
//! reports [`MutationOutcome::AlreadyApplied`] and changes nothing.

use crate::error::{OptimizerError, OptimizerResult};
use crate::models::{ActionParams, CapacityPool};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// A single change sent to the control surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    Resize {
        resource_id: String,
        instance_class: String,
    },
    SetReplicaCount {
        resource_id: String,
        replicas: u32,
    },
    MigrateCapacityPool {
        resource_id: String,
        pool: CapacityPool,
    },
    DeleteVolume {
        resource_id: String,
        handle: String,
    },
}

impl Mutation {
    /// Mutation that carries out an action
    pub fn forward(resource_id: &str, params: &ActionParams) -> Self {
        let resource_id = resource_id.to_string();
        match params {
            ActionParams::Rightsize { target_class, .. } => Mutation::Resize {
                resource_id,
                instance_class: target_class.clone(),
            },
            ActionParams::ScaleReplicas {
                target_replicas, ..
            } => Mutation::SetReplicaCount {
                resource_id,
                replicas: *target_replicas,
            },
            ActionParams::MigrateSpot { target_pool, .. } => Mutation::MigrateCapacityPool {
                resource_id,
                pool: *target_pool,
            },
            ActionParams::DeleteUnusedStorage { target_handle, .. } => Mutation::DeleteVolume {
                resource_id,
                handle: target_handle.clone(),
            },
        }
    }

    /// Mutation that restores the pre-action state, if one exists
    pub fn compensating(resource_id: &str, params: &ActionParams) -> Option<Self> {
        let resource_id = resource_id.to_string();
        match params {
            ActionParams::Rightsize { current_class, .. } => Some(Mutation::Resize {
                resource_id,
                instance_class: current_class.clone(),
            }),
            ActionParams::ScaleReplicas {
                current_replicas, ..
            } => Some(Mutation::SetReplicaCount {
                resource_id,
                replicas: *current_replicas,
            }),
            ActionParams::MigrateSpot { current_pool, .. } => {
                Some(Mutation::MigrateCapacityPool {
                    resource_id,
                    pool: *current_pool,
                })
            }
            ActionParams::DeleteUnusedStorage { .. } => None,
        }
    }

    pub fn resource_id(&self) -> &str {
        match self {
            Mutation::Resize { resource_id, .. }
            | Mutation::SetReplicaCount { resource_id, .. }
            | Mutation::MigrateCapacityPool { resource_id, .. }
            | Mutation::DeleteVolume { resource_id, .. } => resource_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mutation::Resize { .. } => "resize",
            Mutation::SetReplicaCount { .. } => "set_replica_count",
            Mutation::MigrateCapacityPool { .. } => "migrate_capacity_pool",
            Mutation::DeleteVolume { .. } => "delete_volume",
        }
    }
}

/// Successful result of a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOutcome {
    Applied,
    /// Target state already held; nothing changed
    AlreadyApplied,
}

/// Something that can change the cluster
#[async_trait]
pub trait ControlSurface: Send + Sync {
    async fn apply(&self, mutation: &Mutation) -> OptimizerResult<MutationOutcome>;

    /// Cheap reachability check
    async fn ping(&self) -> OptimizerResult<()>;
}

/// Control surface reached over a JSON HTTP API
///
/// | mutation                | request                                   |
/// |-------------------------|-------------------------------------------|
/// | resize                  | `POST /v1/resources/{id}/resize`          |
/// | set replica count       | `POST /v1/resources/{id}/replicas`        |
/// | migrate capacity pool   | `POST /v1/resources/{id}/capacity-pool`   |
/// | delete volume           | `DELETE /v1/volumes/{handle}`             |
pub struct HttpControlSurface {
    client: Client,
    base_url: Url,
}

#[derive(Debug, Default, Deserialize)]
struct MutationResponse {
    #[serde(default)]
    status: Option<String>,
}

impl HttpControlSurface {
    pub fn new(base_url: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create HTTP client")?;
        let base_url = Url::parse(base_url).context("Invalid control surface URL")?;
        Ok(Self { client, base_url })
    }

    /// Base URL with `segments` appended below its path, each percent-encoded
    fn url(&self, segments: &[&str]) -> OptimizerResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                OptimizerError::ControlSurfacePermanent(format!(
                    "control surface URL {} cannot carry a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request<'a>(
        &self,
        mutation: &'a Mutation,
    ) -> (Method, Vec<&'a str>, Option<serde_json::Value>) {
        match mutation {
            Mutation::Resize {
                resource_id,
                instance_class,
            } => (
                Method::POST,
                vec!["v1", "resources", resource_id.as_str(), "resize"],
                Some(serde_json::json!({ "instance_class": instance_class })),
            ),
            Mutation::SetReplicaCount {
                resource_id,
                replicas,
            } => (
                Method::POST,
                vec!["v1", "resources", resource_id.as_str(), "replicas"],
                Some(serde_json::json!({ "replicas": replicas })),
            ),
            Mutation::MigrateCapacityPool { resource_id, pool } => (
                Method::POST,
                vec!["v1", "resources", resource_id.as_str(), "capacity-pool"],
                Some(serde_json::json!({ "pool": pool })),
            ),
            Mutation::DeleteVolume { handle, .. } => {
                (Method::DELETE, vec!["v1", "volumes", handle.as_str()], None)
            }
        }
    }
}

/// Classify a non-success HTTP status
pub(crate) fn classify_status(status: StatusCode, body: &str) -> OptimizerError {
    let reason = format!("HTTP {status}: {body}");
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        OptimizerError::ControlSurfaceTransient(reason)
    } else {
        OptimizerError::ControlSurfacePermanent(reason)
    }
}

fn classify_send_error(err: reqwest::Error) -> OptimizerError {
    if err.is_builder() {
        OptimizerError::ControlSurfacePermanent(err.to_string())
    } else {
        OptimizerError::ControlSurfaceTransient(err.to_string())
    }
}

#[async_trait]
impl ControlSurface for HttpControlSurface {
    async fn apply(&self, mutation: &Mutation) -> OptimizerResult<MutationOutcome> {
        let (method, segments, body) = self.request(mutation);
        let mut request = self.client.request(method, self.url(&segments)?);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(classify_send_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        // An empty or unrecognised body on success counts as applied
        let text = response.text().await.unwrap_or_default();
        let parsed: MutationResponse = serde_json::from_str(&text).unwrap_or_default();
        Ok(match parsed.status.as_deref() {
            Some("already_applied") => MutationOutcome::AlreadyApplied,
            _ => MutationOutcome::Applied,
        })
    }

    async fn ping(&self) -> OptimizerResult<()> {
        let response = self
            .client
            .get(self.url(&["healthz"])?)
            .send()
            .await
            .map_err(classify_send_error)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            // Any failing health check means the surface is not usable right now
            Err(OptimizerError::ControlSurfaceTransient(format!(
                "HTTP {status}: {body}"
            )))
        }
    }
}
