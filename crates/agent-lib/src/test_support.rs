//! Shared fixtures for unit tests

use crate::models::{
    ActionKind, ActionParams, Candidate, CapacityPool, DataPoint, RiskLevel, UtilizationSummary,
};
use chrono::{DateTime, Utc};

pub fn params_for(kind: ActionKind, resource_id: &str) -> ActionParams {
    match kind {
        ActionKind::Rightsize => ActionParams::Rightsize {
            current_class: "t3.large".into(),
            target_class: "t3.medium".into(),
        },
        ActionKind::ScaleReplicas => ActionParams::ScaleReplicas {
            current_replicas: 4,
            target_replicas: 3,
            aggregate_load: 150.0,
            projected_per_replica_load: 50.0,
        },
        ActionKind::MigrateSpot => ActionParams::MigrateSpot {
            current_pool: CapacityPool::OnDemand,
            target_pool: CapacityPool::Spot,
        },
        ActionKind::DeleteUnusedStorage => ActionParams::DeleteUnusedStorage {
            target_handle: resource_id.into(),
            idle_days: 40.0,
        },
    }
}

pub fn candidate(resource_id: &str, kind: ActionKind, confidence: f64) -> Candidate {
    let resource_kind = match kind {
        ActionKind::Rightsize | ActionKind::MigrateSpot => crate::models::ResourceKind::ComputeInstance,
        ActionKind::ScaleReplicas => crate::models::ResourceKind::WorkloadReplicaSet,
        ActionKind::DeleteUnusedStorage => crate::models::ResourceKind::Volume,
    };
    Candidate {
        id: format!("cand-{resource_id}-{kind}"),
        resource_id: resource_id.into(),
        resource_kind,
        action: params_for(kind, resource_id),
        estimated_monthly_savings: 30.0,
        confidence,
        risk: RiskLevel::Low,
        rationale: "fixture".into(),
        summary: UtilizationSummary {
            mean: 10.0,
            peak: 15.0,
            std_dev: 2.0,
            slope_per_hour: 0.0,
            samples: 25,
            span_secs: 24 * 3600,
        },
        fingerprint: vec![0.1, 0.02, 0.15, 0.0],
        created_at: Utc::now(),
    }
}

/// `count` points spaced `step_secs` apart, ending at `end`
pub fn series_ending(end: DateTime<Utc>, count: usize, step_secs: i64, value: f64) -> Vec<DataPoint> {
    let end = end.timestamp();
    (0..count)
        .map(|i| DataPoint::new(end - (count - 1 - i) as i64 * step_secs, value))
        .collect()
}
