//! Simulated control surface
//!
//! Keeps an in-memory copy of the mutable state of each resource and
//! applies mutations to it. Used when the agent runs without a real
//! control endpoint and by tests that need to script failures.

use super::control::{ControlSurface, Mutation, MutationOutcome};
use crate::error::{OptimizerError, OptimizerResult};
use crate::models::{CapacityPool, ResourceDescriptor};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

/// Most recent mutations kept for inspection
const CALL_LOG_LIMIT: usize = 1024;

/// Mutable state of one simulated resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedResource {
    pub instance_class: Option<String>,
    pub replicas: Option<u32>,
    pub pool: Option<CapacityPool>,
    pub deleted: bool,
}

impl From<&ResourceDescriptor> for SimulatedResource {
    fn from(desc: &ResourceDescriptor) -> Self {
        Self {
            instance_class: desc.instance_class.clone(),
            replicas: desc.replicas,
            pool: desc.capacity_pool,
            deleted: false,
        }
    }
}

#[derive(Default)]
pub struct DryRunControlSurface {
    resources: DashMap<String, SimulatedResource>,
    missing: DashSet<String>,
    scripted_failures: DashMap<String, (OptimizerError, u32)>,
    unreachable: AtomicBool,
    latency: Option<Duration>,
    calls: Mutex<VecDeque<Mutation>>,
    total_calls: AtomicUsize,
    active: DashMap<String, usize>,
    peak_concurrency: AtomicUsize,
}

impl DryRunControlSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every mutation by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Start a resource from its inventory facts
    pub fn seed(&self, desc: &ResourceDescriptor) {
        self.resources.insert(desc.id.clone(), desc.into());
    }

    pub fn state(&self, resource_id: &str) -> Option<SimulatedResource> {
        self.resources.get(resource_id).map(|r| r.value().clone())
    }

    /// Make the next `times` mutations of a resource fail with `err`
    pub fn fail_next(&self, resource_id: &str, err: OptimizerError, times: u32) {
        self.scripted_failures
            .insert(resource_id.to_string(), (err, times));
    }

    /// Remove a resource; later mutations of it fail permanently
    pub fn remove(&self, resource_id: &str) {
        self.resources.remove(resource_id);
        self.missing.insert(resource_id.to_string());
    }

    /// Fail every call as if the surface were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// The most recent mutations, in arrival order
    pub fn calls(&self) -> Vec<Mutation> {
        self.calls
            .lock()
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Mutations received since creation, including ones no longer logged
    pub fn call_count(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    /// Most mutations ever observed in progress on one resource at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak_concurrency.load(Ordering::SeqCst)
    }

    fn scripted_failure(&self, resource_id: &str) -> Option<OptimizerError> {
        let mut entry = self.scripted_failures.get_mut(resource_id)?;
        let (err, remaining) = entry.value_mut();
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(err.clone())
    }

    fn mutate(&self, mutation: &Mutation) -> OptimizerResult<MutationOutcome> {
        let id = mutation.resource_id();
        if let Some(err) = self.scripted_failure(id) {
            return Err(err);
        }
        if self.missing.contains(id) {
            return Err(OptimizerError::ControlSurfacePermanent(format!(
                "resource {id} does not exist"
            )));
        }

        let mut resource = self.resources.entry(id.to_string()).or_default();
        if resource.deleted {
            return match mutation {
                Mutation::DeleteVolume { .. } => Ok(MutationOutcome::AlreadyApplied),
                _ => Err(OptimizerError::ControlSurfacePermanent(format!(
                    "resource {id} has been deleted"
                ))),
            };
        }

        let changed = match mutation {
            Mutation::Resize { instance_class, .. } => {
                replace(&mut resource.instance_class, instance_class.clone())
            }
            Mutation::SetReplicaCount { replicas, .. } => replace(&mut resource.replicas, *replicas),
            Mutation::MigrateCapacityPool { pool, .. } => replace(&mut resource.pool, *pool),
            Mutation::DeleteVolume { .. } => {
                resource.deleted = true;
                true
            }
        };

        Ok(if changed {
            MutationOutcome::Applied
        } else {
            MutationOutcome::AlreadyApplied
        })
    }
}

fn replace<T: PartialEq>(slot: &mut Option<T>, value: T) -> bool {
    if slot.as_ref() == Some(&value) {
        return false;
    }
    *slot = Some(value);
    true
}

#[async_trait]
impl ControlSurface for DryRunControlSurface {
    async fn apply(&self, mutation: &Mutation) -> OptimizerResult<MutationOutcome> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(OptimizerError::ControlSurfaceTransient(
                "simulated outage".to_string(),
            ));
        }
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut calls) = self.calls.lock() {
            if calls.len() == CALL_LOG_LIMIT {
                calls.pop_front();
            }
            calls.push_back(mutation.clone());
        }

        let id = mutation.resource_id().to_string();
        let in_progress = {
            let mut active = self.active.entry(id.clone()).or_insert(0);
            *active += 1;
            *active
        };
        self.peak_concurrency.fetch_max(in_progress, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let result = self.mutate(mutation);

        if let Some(mut active) = self.active.get_mut(&id) {
            *active -= 1;
        }

        info!(
            mutation = mutation.name(),
            resource_id = %id,
            outcome = ?result,
            "Dry-run mutation"
        );
        result
    }

    async fn ping(&self) -> OptimizerResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(OptimizerError::ControlSurfaceTransient(
                "simulated outage".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}
