//! Decision policy
//!
//! [`decide`] is a pure function of a candidate, a policy snapshot and the
//! in-flight state of the candidate's resource. The live policy sits behind
//! a [`PolicyHandle`]; every update bumps its version, and every decision
//! records the version it was taken under. With a state directory the
//! updated policy is saved and outlives the process.

use crate::error::{OptimizerError, OptimizerResult};
use crate::models::{Candidate, Decision, DecisionOutcome, RiskLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Shortest sampling interval accepted at runtime
pub const MIN_SAMPLING_INTERVAL_SECS: u64 = 60;

/// Whether auto-approved candidates may execute without a human, per risk tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoApply {
    pub low: bool,
    pub medium: bool,
    pub high: bool,
}

impl Default for AutoApply {
    fn default() -> Self {
        Self {
            low: true,
            medium: false,
            high: false,
        }
    }
}

impl AutoApply {
    pub fn allows(&self, risk: RiskLevel) -> bool {
        match risk {
            RiskLevel::Low => self.low,
            RiskLevel::Medium => self.medium,
            RiskLevel::High => self.high,
        }
    }
}

/// Thresholds and toggles governing decisions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub version: u64,
    /// Auto-approval requires confidence strictly above this
    pub confidence_floor: f64,
    /// Candidates strictly below this are rejected outright
    pub reject_floor: f64,
    pub auto_apply: AutoApply,
    pub sampling_interval_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            version: 1,
            confidence_floor: 0.7,
            reject_floor: 0.3,
            auto_apply: AutoApply::default(),
            sampling_interval_secs: 900,
        }
    }
}

impl PolicyConfig {
    pub fn validate(&self) -> OptimizerResult<()> {
        if !(0.0..=1.0).contains(&self.confidence_floor) {
            return Err(OptimizerError::PolicyViolation(format!(
                "confidence floor {} outside [0, 1]",
                self.confidence_floor
            )));
        }
        if !(0.0..=1.0).contains(&self.reject_floor) {
            return Err(OptimizerError::PolicyViolation(format!(
                "reject floor {} outside [0, 1]",
                self.reject_floor
            )));
        }
        if self.reject_floor > self.confidence_floor {
            return Err(OptimizerError::PolicyViolation(format!(
                "reject floor {} above confidence floor {}",
                self.reject_floor, self.confidence_floor
            )));
        }
        if self.sampling_interval_secs < MIN_SAMPLING_INTERVAL_SECS {
            return Err(OptimizerError::PolicyViolation(format!(
                "sampling interval {}s below minimum {}s",
                self.sampling_interval_secs, MIN_SAMPLING_INTERVAL_SECS
            )));
        }
        Ok(())
    }
}

/// Partial runtime update; absent fields keep their value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_floor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_floor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_apply_low: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_apply_medium: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_apply_high: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling_interval_secs: Option<u64>,
}

impl PolicyUpdate {
    pub fn is_empty(&self) -> bool {
        self == &PolicyUpdate::default()
    }

    fn apply_to(&self, policy: &mut PolicyConfig) {
        if let Some(v) = self.confidence_floor {
            policy.confidence_floor = v;
        }
        if let Some(v) = self.reject_floor {
            policy.reject_floor = v;
        }
        if let Some(v) = self.auto_apply_low {
            policy.auto_apply.low = v;
        }
        if let Some(v) = self.auto_apply_medium {
            policy.auto_apply.medium = v;
        }
        if let Some(v) = self.auto_apply_high {
            policy.auto_apply.high = v;
        }
        if let Some(v) = self.sampling_interval_secs {
            policy.sampling_interval_secs = v;
        }
    }
}

/// Shared, versioned policy
#[derive(Clone)]
pub struct PolicyHandle {
    inner: Arc<RwLock<PolicyConfig>>,
    persistence_path: Option<PathBuf>,
}

impl PolicyHandle {
    pub fn new(initial: PolicyConfig) -> OptimizerResult<Self> {
        initial.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(initial)),
            persistence_path: None,
        })
    }

    /// Handle that saves every update to `path`
    ///
    /// A valid policy saved by an earlier process takes precedence over
    /// `initial`, keeping its version.
    pub fn with_persistence(initial: PolicyConfig, path: PathBuf) -> OptimizerResult<Self> {
        let policy = match crate::store::read_json::<PolicyConfig>(&path) {
            Ok(Some(saved)) => match saved.validate() {
                Ok(()) => {
                    info!(path = %path.display(), version = saved.version, "Loaded decision policy from disk");
                    saved
                }
                Err(e) => {
                    warn!(error = %e, "Persisted decision policy is invalid, using configured policy");
                    initial
                }
            },
            Ok(None) => initial,
            Err(e) => {
                warn!(error = %e, "Failed to load persisted decision policy, using configured policy");
                initial
            }
        };
        policy.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(policy)),
            persistence_path: Some(path),
        })
    }

    /// Copy of the current policy, stable for the duration of a run
    pub async fn snapshot(&self) -> PolicyConfig {
        self.inner.read().await.clone()
    }

    /// Apply an update and bump the version; invalid updates change nothing
    pub async fn update(&self, update: &PolicyUpdate) -> OptimizerResult<PolicyConfig> {
        let mut current = self.inner.write().await;
        let mut next = current.clone();
        update.apply_to(&mut next);
        next.validate()?;
        next.version = current.version + 1;
        if let Some(path) = self.persistence_path.as_ref() {
            crate::store::write_json_atomic(path, &next).map_err(OptimizerError::storage)?;
        }
        *current = next.clone();
        Ok(next)
    }
}

/// Decide what happens to a candidate
///
/// `in_flight` is the id of an action already in flight on the candidate's
/// resource, if any.
pub fn decide(
    candidate: &Candidate,
    policy: &PolicyConfig,
    in_flight: Option<&str>,
    now: DateTime<Utc>,
) -> Decision {
    let (outcome, reason) = if let Some(action_id) = in_flight {
        (
            DecisionOutcome::Rejected,
            OptimizerError::ConflictingInFlightAction {
                resource_id: candidate.resource_id.clone(),
                action_id: action_id.to_string(),
            }
            .to_string(),
        )
    } else if candidate.confidence < policy.reject_floor {
        (
            DecisionOutcome::Rejected,
            format!(
                "confidence {:.2} below rejection floor {:.2}",
                candidate.confidence, policy.reject_floor
            ),
        )
    } else if candidate.confidence <= policy.confidence_floor {
        (
            DecisionOutcome::HeldForApproval,
            format!(
                "confidence {:.2} not above auto-approval floor {:.2}",
                candidate.confidence, policy.confidence_floor
            ),
        )
    } else if !policy.auto_apply.allows(candidate.risk) {
        (
            DecisionOutcome::HeldForApproval,
            format!("auto-apply disabled for {} risk", candidate.risk),
        )
    } else {
        (
            DecisionOutcome::AutoApproved,
            format!(
                "confidence {:.2} above floor {:.2}, {} risk auto-apply enabled",
                candidate.confidence, policy.confidence_floor, candidate.risk
            ),
        )
    };

    Decision {
        candidate_id: candidate.id.clone(),
        resource_id: candidate.resource_id.clone(),
        outcome,
        reason,
        policy_version: policy.version,
        decided_at: now,
    }
}

/// Order candidates lowest risk first, then highest savings first
pub fn rank(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        a.risk.cmp(&b.risk).then_with(|| {
            b.estimated_monthly_savings
                .total_cmp(&a.estimated_monthly_savings)
        })
    });
}
