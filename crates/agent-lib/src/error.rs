//! Error taxonomy for the optimization pipeline
//!
//! Every failure the pipeline can surface to an operator maps onto one of
//! these variants. The display strings double as the human-readable reason
//! attached to held, rejected, abandoned and rolled-back outcomes.

use crate::models::ActionState;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// Errors raised by the optimization pipeline
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptimizerError {
    #[error("telemetry unavailable for {scope}: {reason}")]
    TelemetryUnavailable { scope: String, reason: String },

    #[error("telemetry malformed for {scope}: {reason}")]
    TelemetryMalformed { scope: String, reason: String },

    #[error("reasoning service unavailable: {0}")]
    ReasoningServiceUnavailable(String),

    #[error("reasoning service returned malformed output: {0}")]
    ReasoningMalformed(String),

    #[error("control surface transient failure: {0}")]
    ControlSurfaceTransient(String),

    #[error("control surface permanent failure: {0}")]
    ControlSurfacePermanent(String),

    #[error("conflicting in-flight action {action_id} on resource {resource_id}")]
    ConflictingInFlightAction {
        resource_id: String,
        action_id: String,
    },

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("invalid action transition from {from} to {to}")]
    InvalidTransition { from: ActionState, to: ActionState },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl OptimizerError {
    pub fn telemetry_unavailable(scope: impl Into<String>, reason: impl ToString) -> Self {
        Self::TelemetryUnavailable {
            scope: scope.into(),
            reason: reason.to_string(),
        }
    }

    pub fn telemetry_malformed(scope: impl Into<String>, reason: impl ToString) -> Self {
        Self::TelemetryMalformed {
            scope: scope.into(),
            reason: reason.to_string(),
        }
    }

    /// Wrap a persistence failure, keeping the full context chain
    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{err:#}"))
    }

    /// Whether the same call may succeed if retried later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OptimizerError::TelemetryUnavailable { .. }
                | OptimizerError::ReasoningServiceUnavailable(_)
                | OptimizerError::ControlSurfaceTransient(_)
                | OptimizerError::ConflictingInFlightAction { .. }
        )
    }

    /// Stable label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            OptimizerError::TelemetryUnavailable { .. } => "telemetry_unavailable",
            OptimizerError::TelemetryMalformed { .. } => "telemetry_malformed",
            OptimizerError::ReasoningServiceUnavailable(_) => "reasoning_unavailable",
            OptimizerError::ReasoningMalformed(_) => "reasoning_malformed",
            OptimizerError::ControlSurfaceTransient(_) => "control_surface_transient",
            OptimizerError::ControlSurfacePermanent(_) => "control_surface_permanent",
            OptimizerError::ConflictingInFlightAction { .. } => "conflicting_in_flight_action",
            OptimizerError::PolicyViolation(_) => "policy_violation",
            OptimizerError::InvalidTransition { .. } => "invalid_transition",
            OptimizerError::NotFound(_) => "not_found",
            OptimizerError::Storage(_) => "storage",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(OptimizerError::telemetry_unavailable("vm-1", "timeout").is_retryable());
        assert!(OptimizerError::ControlSurfaceTransient("503".into()).is_retryable());
        assert!(!OptimizerError::ControlSurfacePermanent("forbidden".into()).is_retryable());
        assert!(!OptimizerError::PolicyViolation("below floor".into()).is_retryable());
        assert!(!OptimizerError::telemetry_malformed("vm-1", "bad json").is_retryable());
    }

    #[test]
    fn test_reason_strings_are_human_readable() {
        let err = OptimizerError::ConflictingInFlightAction {
            resource_id: "vm-1".into(),
            action_id: "abc".into(),
        };
        assert_eq!(
            err.to_string(),
            "conflicting in-flight action abc on resource vm-1"
        );
        assert_eq!(err.kind(), "conflicting_in_flight_action");
    }

    #[test]
    fn test_storage_keeps_context_chain() {
        let inner = anyhow::anyhow!("disk full").context("Failed to write actions.json");
        let err = OptimizerError::storage(inner);
        assert_eq!(
            err.to_string(),
            "storage error: Failed to write actions.json: disk full"
        );
    }
}
