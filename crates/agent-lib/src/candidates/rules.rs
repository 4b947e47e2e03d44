//! Candidate rules, one per action kind
//!
//! Each rule looks at the inventory facts and the rolling window of a single
//! resource and either stays quiet or fires with proposed parameters, a
//! provisional confidence and a savings estimate.

use super::ladder::{InstanceLadder, HOURS_PER_MONTH};
use crate::models::{
    ActionKind, ActionParams, CapacityPool, ResourceDescriptor, ResourceKind,
    METRIC_AGGREGATE_LOAD, METRIC_CPU_UTILIZATION, METRIC_IO_OPS,
};
use crate::patterns::mean;
use crate::store::ResourceWindow;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Everything a rule may look at
pub struct RuleInput<'a> {
    pub resource: &'a ResourceDescriptor,
    pub window: &'a ResourceWindow,
    pub now: DateTime<Utc>,
}

/// A rule that fired
#[derive(Debug, Clone, PartialEq)]
pub struct RuleFiring {
    pub action: ActionParams,
    pub provisional_confidence: f64,
    pub estimated_monthly_savings: f64,
    pub rationale: String,
}

/// A single candidate rule
pub trait Rule: Send + Sync {
    fn kind(&self) -> ActionKind;

    fn evaluate(&self, input: &RuleInput<'_>) -> Option<RuleFiring>;
}

/// Linear position of `value` between `threshold` (0) and `saturation` (1)
///
/// Works in both directions, so a "below the watermark" rule passes a
/// saturation point smaller than its threshold.
pub fn interpolate(value: f64, threshold: f64, saturation: f64) -> f64 {
    if (saturation - threshold).abs() < f64::EPSILON {
        return 1.0;
    }
    ((value - threshold) / (saturation - threshold)).clamp(0.0, 1.0)
}

/// Per-replica load after removing one replica
pub fn projected_per_replica_load(aggregate_load: f64, replicas: u32) -> Option<f64> {
    if replicas < 2 {
        return None;
    }
    Some(aggregate_load / (replicas - 1) as f64)
}

// ---------------------------------------------------------------------------
// RIGHTSIZE
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RightsizeConfig {
    /// Mean CPU percent below which an instance is oversized
    pub low_watermark: f64,
    /// Mean CPU percent at which confidence reaches 1
    pub saturation: f64,
    /// Minimum span of observations
    pub min_evidence_secs: i64,
    /// Larger gaps break continuous observation
    pub max_gap_secs: i64,
}

impl Default for RightsizeConfig {
    fn default() -> Self {
        Self {
            low_watermark: 30.0,
            saturation: 5.0,
            min_evidence_secs: 24 * 3600,
            max_gap_secs: 3600,
        }
    }
}

pub struct RightsizeRule {
    pub config: RightsizeConfig,
    pub ladder: InstanceLadder,
}

impl Rule for RightsizeRule {
    fn kind(&self) -> ActionKind {
        ActionKind::Rightsize
    }

    fn evaluate(&self, input: &RuleInput<'_>) -> Option<RuleFiring> {
        let resource = input.resource;
        if resource.kind != ResourceKind::ComputeInstance {
            return None;
        }
        let current = resource.instance_class.as_deref()?;
        let target = self.ladder.next_smaller(current)?;

        let window = input.window;
        if window.span_secs(METRIC_CPU_UTILIZATION) < self.config.min_evidence_secs
            || window.max_gap_secs(METRIC_CPU_UTILIZATION) > self.config.max_gap_secs
        {
            return None;
        }

        let cpu = mean(window.points(METRIC_CPU_UTILIZATION));
        if cpu >= self.config.low_watermark {
            return None;
        }

        let current_price = resource
            .hourly_cost
            .or_else(|| self.ladder.hourly_price(current))?;
        let savings = ((current_price - target.hourly_price) * HOURS_PER_MONTH).max(0.0);

        Some(RuleFiring {
            action: ActionParams::Rightsize {
                current_class: current.to_string(),
                target_class: target.name.clone(),
            },
            provisional_confidence: interpolate(
                cpu,
                self.config.low_watermark,
                self.config.saturation,
            ),
            estimated_monthly_savings: savings,
            rationale: format!(
                "Mean CPU {:.1}% over {:.0}h is below the {:.0}% watermark",
                cpu,
                window.span_secs(METRIC_CPU_UTILIZATION) as f64 / 3600.0,
                self.config.low_watermark
            ),
        })
    }
}

// ---------------------------------------------------------------------------
// SCALE_REPLICAS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleReplicasConfig {
    /// Per-replica load, as a fraction of capacity, below which a set is over-provisioned
    pub per_replica_floor: f64,
    /// Fraction of capacity at which confidence reaches 1
    pub saturation: f64,
    /// Projected per-replica load must stay at or below this fraction of capacity
    pub safety_ceiling: f64,
    pub min_replicas: u32,
    /// Cost of one replica when the inventory does not report it
    pub replica_hourly_cost: f64,
    pub min_evidence_secs: i64,
}

impl Default for ScaleReplicasConfig {
    fn default() -> Self {
        Self {
            per_replica_floor: 0.5,
            saturation: 0.1,
            safety_ceiling: 0.7,
            min_replicas: 1,
            replica_hourly_cost: 0.0416,
            min_evidence_secs: 3600,
        }
    }
}

pub struct ScaleReplicasRule {
    pub config: ScaleReplicasConfig,
}

impl Rule for ScaleReplicasRule {
    fn kind(&self) -> ActionKind {
        ActionKind::ScaleReplicas
    }

    fn evaluate(&self, input: &RuleInput<'_>) -> Option<RuleFiring> {
        let resource = input.resource;
        if resource.kind != ResourceKind::WorkloadReplicaSet {
            return None;
        }
        let replicas = resource.replicas?;
        let capacity = resource.replica_capacity.filter(|c| *c > 0.0)?;
        if replicas <= self.config.min_replicas {
            return None;
        }

        let window = input.window;
        let load = window.points(METRIC_AGGREGATE_LOAD);
        if load.is_empty() || window.span_secs(METRIC_AGGREGATE_LOAD) < self.config.min_evidence_secs
        {
            return None;
        }

        let aggregate = mean(load);
        let per_replica = aggregate / replicas as f64 / capacity;
        if per_replica >= self.config.per_replica_floor {
            return None;
        }

        let projected = projected_per_replica_load(aggregate, replicas)?;
        if projected > self.config.safety_ceiling * capacity {
            return None;
        }

        let replica_cost = resource
            .hourly_cost
            .map(|total| total / replicas as f64)
            .unwrap_or(self.config.replica_hourly_cost);

        Some(RuleFiring {
            action: ActionParams::ScaleReplicas {
                current_replicas: replicas,
                target_replicas: replicas - 1,
                aggregate_load: aggregate,
                projected_per_replica_load: projected,
            },
            provisional_confidence: interpolate(
                per_replica,
                self.config.per_replica_floor,
                self.config.saturation,
            ),
            estimated_monthly_savings: replica_cost * HOURS_PER_MONTH,
            rationale: format!(
                "Per-replica load {:.0}% of capacity; {} replicas would carry {:.1} each ({:.0}% of capacity)",
                per_replica * 100.0,
                replicas - 1,
                projected,
                projected / capacity * 100.0
            ),
        })
    }
}

// ---------------------------------------------------------------------------
// MIGRATE_SPOT
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrateSpotConfig {
    /// First off-peak hour (UTC, inclusive)
    pub off_peak_start_hour: u32,
    /// Last off-peak hour (UTC, inclusive); may wrap past midnight
    pub off_peak_end_hour: u32,
    /// Mean CPU percent at or above which a workload stays on-demand
    pub cpu_ceiling: f64,
    pub saturation: f64,
    /// Fraction of the on-demand price saved on spot capacity
    pub spot_discount: f64,
}

impl Default for MigrateSpotConfig {
    fn default() -> Self {
        Self {
            off_peak_start_hour: 2,
            off_peak_end_hour: 6,
            cpu_ceiling: 60.0,
            saturation: 20.0,
            spot_discount: 0.6,
        }
    }
}

impl MigrateSpotConfig {
    pub fn is_off_peak(&self, hour: u32) -> bool {
        let (start, end) = (self.off_peak_start_hour, self.off_peak_end_hour);
        if start <= end {
            hour >= start && hour <= end
        } else {
            hour >= start || hour <= end
        }
    }
}

pub struct MigrateSpotRule {
    pub config: MigrateSpotConfig,
    pub ladder: InstanceLadder,
}

impl Rule for MigrateSpotRule {
    fn kind(&self) -> ActionKind {
        ActionKind::MigrateSpot
    }

    fn evaluate(&self, input: &RuleInput<'_>) -> Option<RuleFiring> {
        let resource = input.resource;
        if resource.kind == ResourceKind::Volume
            || !resource.tags.interruption_tolerant
            || resource.capacity_pool != Some(CapacityPool::OnDemand)
            || !self.config.is_off_peak(input.now.hour())
        {
            return None;
        }

        let cpu_points = input.window.points(METRIC_CPU_UTILIZATION);
        if cpu_points.is_empty() {
            return None;
        }
        let cpu = mean(cpu_points);
        if cpu >= self.config.cpu_ceiling {
            return None;
        }

        let on_demand = resource.hourly_cost.or_else(|| {
            let class_price = self.ladder.hourly_price(resource.instance_class.as_deref()?)?;
            Some(class_price * resource.replicas.unwrap_or(1) as f64)
        })?;

        Some(RuleFiring {
            action: ActionParams::MigrateSpot {
                current_pool: CapacityPool::OnDemand,
                target_pool: CapacityPool::Spot,
            },
            provisional_confidence: interpolate(
                cpu,
                self.config.cpu_ceiling,
                self.config.saturation,
            ),
            estimated_monthly_savings: on_demand * self.config.spot_discount * HOURS_PER_MONTH,
            rationale: format!(
                "Interruption-tolerant workload at {:.1}% mean CPU on on-demand capacity",
                cpu
            ),
        })
    }
}

// ---------------------------------------------------------------------------
// DELETE_UNUSED_STORAGE
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnusedStorageConfig {
    pub idle_days: f64,
    /// Idle days at which confidence reaches 1
    pub saturation_days: f64,
    pub gb_month_price: f64,
}

impl Default for UnusedStorageConfig {
    fn default() -> Self {
        Self {
            idle_days: 30.0,
            saturation_days: 60.0,
            gb_month_price: 0.10,
        }
    }
}

pub struct UnusedStorageRule {
    pub config: UnusedStorageConfig,
}

impl Rule for UnusedStorageRule {
    fn kind(&self) -> ActionKind {
        ActionKind::DeleteUnusedStorage
    }

    fn evaluate(&self, input: &RuleInput<'_>) -> Option<RuleFiring> {
        let resource = input.resource;
        if resource.kind != ResourceKind::Volume || resource.attachments > 0 {
            return None;
        }

        let last_io = input
            .window
            .points(METRIC_IO_OPS)
            .iter()
            .rev()
            .find(|p| p.value > 0.0)
            .map(|p| p.timestamp);
        let last_active = match (resource.last_active_at.or(resource.created_at), last_io) {
            (Some(a), Some(b)) => a.max(b),
            (a, b) => a.or(b)?,
        };

        let idle_days = (input.now.timestamp() - last_active) as f64 / 86_400.0;
        if idle_days < self.config.idle_days {
            return None;
        }

        let savings = match (resource.size_gb, resource.hourly_cost) {
            (Some(gb), _) => gb * self.config.gb_month_price,
            (None, Some(hourly)) => hourly * HOURS_PER_MONTH,
            (None, None) => 0.0,
        };

        Some(RuleFiring {
            action: ActionParams::DeleteUnusedStorage {
                target_handle: resource.id.clone(),
                idle_days,
            },
            provisional_confidence: interpolate(
                idle_days,
                self.config.idle_days,
                self.config.saturation_days,
            ),
            estimated_monthly_savings: savings,
            rationale: format!(
                "Unattached volume with no reads or writes for {:.0} days",
                idle_days
            ),
        })
    }
}
