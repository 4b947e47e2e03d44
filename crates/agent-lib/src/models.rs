//! Core data models for the cost optimization engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// CPU utilization in percent (0-100)
pub const METRIC_CPU_UTILIZATION: &str = "cpu_utilization";
/// Aggregate load across all replicas of a replica set, in load units
pub const METRIC_AGGREGATE_LOAD: &str = "aggregate_load";
/// Read plus write operations per sampling step on a volume
pub const METRIC_IO_OPS: &str = "io_ops";

/// Kind of resource the engine can act on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    ComputeInstance,
    WorkloadReplicaSet,
    Volume,
}

impl ResourceKind {
    /// Metrics sampled for this kind of resource
    pub fn metrics(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::ComputeInstance => &[METRIC_CPU_UTILIZATION],
            ResourceKind::WorkloadReplicaSet => &[METRIC_CPU_UTILIZATION, METRIC_AGGREGATE_LOAD],
            ResourceKind::Volume => &[METRIC_IO_OPS],
        }
    }

    /// Metric used for fingerprints and post-action verification
    pub fn primary_metric(&self) -> &'static str {
        match self {
            ResourceKind::ComputeInstance | ResourceKind::WorkloadReplicaSet => {
                METRIC_CPU_UTILIZATION
            }
            ResourceKind::Volume => METRIC_IO_OPS,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::ComputeInstance => write!(f, "compute-instance"),
            ResourceKind::WorkloadReplicaSet => write!(f, "workload-replica-set"),
            ResourceKind::Volume => write!(f, "volume"),
        }
    }
}

/// Capacity pool a compute resource runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapacityPool {
    OnDemand,
    Spot,
}

impl fmt::Display for CapacityPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapacityPool::OnDemand => write!(f, "on-demand"),
            CapacityPool::Spot => write!(f, "spot"),
        }
    }
}

/// Operator-assigned tags that change how the engine treats a resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTags {
    #[serde(default)]
    pub production_critical: bool,
    #[serde(default)]
    pub interruption_tolerant: bool,
}

/// Inventory facts reported by the telemetry source for one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub id: String,
    pub kind: ResourceKind,
    #[serde(default)]
    pub instance_class: Option<String>,
    #[serde(default)]
    pub replicas: Option<u32>,
    /// Load units a single replica can serve
    #[serde(default)]
    pub replica_capacity: Option<f64>,
    #[serde(default)]
    pub capacity_pool: Option<CapacityPool>,
    #[serde(default)]
    pub attachments: u32,
    #[serde(default)]
    pub size_gb: Option<f64>,
    /// Unix seconds of the last observed read/write on a volume
    #[serde(default)]
    pub last_active_at: Option<i64>,
    /// Unix seconds the resource was created
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub hourly_cost: Option<f64>,
    #[serde(default)]
    pub tags: ResourceTags,
}

impl ResourceDescriptor {
    /// Minimal descriptor for the given id and kind
    pub fn new(id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            instance_class: None,
            replicas: None,
            replica_capacity: None,
            capacity_pool: None,
            attachments: 0,
            size_gb: None,
            last_active_at: None,
            created_at: None,
            hourly_cost: None,
            tags: ResourceTags::default(),
        }
    }
}

/// A single telemetry observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Unix seconds
    pub timestamp: i64,
    pub value: f64,
}

impl DataPoint {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Requested time range for sampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleWindow {
    /// Unix seconds, inclusive
    pub start: i64,
    /// Unix seconds, inclusive
    pub end: i64,
    /// Resolution in seconds
    pub step_secs: u64,
}

impl SampleWindow {
    /// Window ending at `end` and reaching back `lookback_secs`
    pub fn ending_at(end: DateTime<Utc>, lookback_secs: u64, step_secs: u64) -> Self {
        let end = end.timestamp();
        Self {
            start: end - lookback_secs as i64,
            end,
            step_secs: step_secs.max(1),
        }
    }

    pub fn duration_secs(&self) -> i64 {
        (self.end - self.start).max(0)
    }
}

/// Normalized, immutable time series for one metric of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSample {
    pub resource_id: String,
    pub kind: ResourceKind,
    pub metric: String,
    /// Ordered by timestamp, no duplicate timestamps
    pub points: Vec<DataPoint>,
    pub window: SampleWindow,
    pub source: String,
}

impl UtilizationSample {
    /// Build a sample, sorting and de-duplicating the points
    pub fn new(
        resource_id: impl Into<String>,
        kind: ResourceKind,
        metric: impl Into<String>,
        mut points: Vec<DataPoint>,
        window: SampleWindow,
        source: impl Into<String>,
    ) -> Self {
        points.retain(|p| p.value.is_finite());
        points.sort_by_key(|p| p.timestamp);
        points.dedup_by_key(|p| p.timestamp);
        Self {
            resource_id: resource_id.into(),
            kind,
            metric: metric.into(),
            points,
            window,
            source: source.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Action kinds the engine can propose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Rightsize,
    ScaleReplicas,
    MigrateSpot,
    DeleteUnusedStorage,
}

impl ActionKind {
    pub const ALL: [ActionKind; 4] = [
        ActionKind::Rightsize,
        ActionKind::ScaleReplicas,
        ActionKind::MigrateSpot,
        ActionKind::DeleteUnusedStorage,
    ];

    /// Whether a compensating mutation exists for this kind
    pub fn is_reversible(&self) -> bool {
        !matches!(self, ActionKind::DeleteUnusedStorage)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Rightsize => write!(f, "RIGHTSIZE"),
            ActionKind::ScaleReplicas => write!(f, "SCALE_REPLICAS"),
            ActionKind::MigrateSpot => write!(f, "MIGRATE_SPOT"),
            ActionKind::DeleteUnusedStorage => write!(f, "DELETE_UNUSED_STORAGE"),
        }
    }
}

/// Proposed parameters, one shape per action kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionParams {
    Rightsize {
        current_class: String,
        target_class: String,
    },
    ScaleReplicas {
        current_replicas: u32,
        target_replicas: u32,
        aggregate_load: f64,
        projected_per_replica_load: f64,
    },
    MigrateSpot {
        current_pool: CapacityPool,
        target_pool: CapacityPool,
    },
    DeleteUnusedStorage {
        target_handle: String,
        idle_days: f64,
    },
}

impl ActionParams {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionParams::Rightsize { .. } => ActionKind::Rightsize,
            ActionParams::ScaleReplicas { .. } => ActionKind::ScaleReplicas,
            ActionParams::MigrateSpot { .. } => ActionKind::MigrateSpot,
            ActionParams::DeleteUnusedStorage { .. } => ActionKind::DeleteUnusedStorage,
        }
    }

    /// One-line description used in rationales and reasoning requests
    pub fn describe(&self, resource_id: &str) -> String {
        match self {
            ActionParams::Rightsize {
                current_class,
                target_class,
            } => format!("Right-size {resource_id} from {current_class} to {target_class}"),
            ActionParams::ScaleReplicas {
                current_replicas,
                target_replicas,
                ..
            } => format!(
                "Scale down {resource_id} from {current_replicas} to {target_replicas} replicas"
            ),
            ActionParams::MigrateSpot {
                current_pool,
                target_pool,
            } => format!("Migrate {resource_id} from {current_pool} to {target_pool} capacity"),
            ActionParams::DeleteUnusedStorage {
                target_handle,
                idle_days,
            } => format!("Delete volume {target_handle} idle for {idle_days:.0} days"),
        }
    }
}

/// Risk tier of a candidate action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// One tier up, saturating at high
    pub fn escalate(self) -> Self {
        match self {
            RiskLevel::Low => RiskLevel::Medium,
            RiskLevel::Medium | RiskLevel::High => RiskLevel::High,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// Summary statistics of a utilization window
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct UtilizationSummary {
    pub mean: f64,
    pub peak: f64,
    pub std_dev: f64,
    /// Change per hour from a least-squares fit
    pub slope_per_hour: f64,
    pub samples: usize,
    pub span_secs: i64,
}

/// Rule output before risk classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftCandidate {
    pub id: String,
    pub resource_id: String,
    pub resource_kind: ResourceKind,
    pub action: ActionParams,
    pub estimated_monthly_savings: f64,
    pub provisional_confidence: f64,
    pub rationale: String,
    pub summary: UtilizationSummary,
    pub fingerprint: Vec<f64>,
    pub created_at: DateTime<Utc>,
}

/// Fully scored optimization proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub resource_id: String,
    pub resource_kind: ResourceKind,
    pub action: ActionParams,
    pub estimated_monthly_savings: f64,
    pub confidence: f64,
    pub risk: RiskLevel,
    pub rationale: String,
    /// Pre-change utilization, kept for verification and pattern feedback
    pub summary: UtilizationSummary,
    pub fingerprint: Vec<f64>,
    pub created_at: DateTime<Utc>,
}

impl Candidate {
    pub fn kind(&self) -> ActionKind {
        self.action.kind()
    }
}

/// Outcome of the decision policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    AutoApproved,
    HeldForApproval,
    Rejected,
}

impl fmt::Display for DecisionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionOutcome::AutoApproved => write!(f, "auto_approved"),
            DecisionOutcome::HeldForApproval => write!(f, "held_for_approval"),
            DecisionOutcome::Rejected => write!(f, "rejected"),
        }
    }
}

/// Immutable audit record of a policy decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub candidate_id: String,
    pub resource_id: String,
    pub outcome: DecisionOutcome,
    pub reason: String,
    pub policy_version: u64,
    pub decided_at: DateTime<Utc>,
}

/// Operator verdict on a held decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approved,
    Rejected,
}

/// Operator review appended after a held decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub candidate_id: String,
    pub verdict: ReviewVerdict,
    pub reviewer: String,
    pub reason: Option<String>,
    pub reviewed_at: DateTime<Utc>,
}

/// Lifecycle state of an action record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionState {
    Pending,
    Executing,
    Applied,
    Failed,
    Abandoned,
    RolledBack,
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionState::Pending => "PENDING",
            ActionState::Executing => "EXECUTING",
            ActionState::Applied => "APPLIED",
            ActionState::Failed => "FAILED",
            ActionState::Abandoned => "ABANDONED",
            ActionState::RolledBack => "ROLLED_BACK",
        };
        write!(f, "{s}")
    }
}

/// How an action record came to exist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ApprovalSource {
    Automatic,
    Manual { reviewer: String },
}

/// One entry in an action record's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub from: Option<ActionState>,
    pub to: ActionState,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Post-action utilization delta measured by a later sampling cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObservedEffect {
    pub metric_before: f64,
    pub metric_after: f64,
    pub delta: f64,
    pub observed_at: DateTime<Utc>,
}

/// Execution lifecycle record for an approved candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: String,
    pub candidate_id: String,
    pub resource_id: String,
    pub resource_kind: ResourceKind,
    pub action: ActionParams,
    pub state: ActionState,
    pub attempts: u32,
    /// Verification cycles whose compensating mutation failed
    #[serde(default)]
    pub rollback_attempts: u32,
    pub last_error: Option<String>,
    pub approval: ApprovalSource,
    pub created_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
    pub rolled_back_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    /// Mean of the primary metric before the change
    pub baseline: f64,
    pub fingerprint: Vec<f64>,
    pub observed_effect: Option<ObservedEffect>,
    pub history: Vec<StateChange>,
}
