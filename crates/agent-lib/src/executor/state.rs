//! Action record lifecycle
//!
//! ```text
//! PENDING -> EXECUTING -> APPLIED -> ROLLED_BACK
//!                |           |
//!                v           | (rollback failed for good)
//!             FAILED -> EXECUTING (retry)
//!                |           |
//!                v           |
//!            ABANDONED <-----+
//! ```

use crate::error::{OptimizerError, OptimizerResult};
use crate::models::{ActionRecord, ActionState, ApprovalSource, Candidate, StateChange};
use chrono::{DateTime, Utc};

/// Whether `from -> to` is an edge of the lifecycle graph
pub fn is_valid_transition(from: ActionState, to: ActionState) -> bool {
    use ActionState::*;
    matches!(
        (from, to),
        (Pending, Executing)
            | (Executing, Applied)
            | (Executing, Failed)
            | (Failed, Executing)
            | (Failed, Abandoned)
            | (Applied, RolledBack)
            | (Applied, Abandoned)
    )
}

impl ActionState {
    /// No further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionState::Abandoned | ActionState::RolledBack)
    }
}

impl ActionRecord {
    /// New PENDING record for an approved candidate
    pub fn for_candidate(
        id: impl Into<String>,
        candidate: &Candidate,
        approval: ApprovalSource,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            candidate_id: candidate.id.clone(),
            resource_id: candidate.resource_id.clone(),
            resource_kind: candidate.resource_kind,
            action: candidate.action.clone(),
            state: ActionState::Pending,
            attempts: 0,
            rollback_attempts: 0,
            last_error: None,
            approval,
            created_at: now,
            applied_at: None,
            rolled_back_at: None,
            verified_at: None,
            baseline: candidate.summary.mean,
            fingerprint: candidate.fingerprint.clone(),
            observed_effect: None,
            history: vec![StateChange {
                from: None,
                to: ActionState::Pending,
                at: now,
                note: None,
            }],
        }
    }

    /// Move to `to`, appending to the history
    pub fn transition(
        &mut self,
        to: ActionState,
        at: DateTime<Utc>,
        note: Option<String>,
    ) -> OptimizerResult<()> {
        if !is_valid_transition(self.state, to) {
            return Err(OptimizerError::InvalidTransition {
                from: self.state,
                to,
            });
        }

        match to {
            ActionState::Executing => self.attempts += 1,
            ActionState::Applied => self.applied_at = Some(at),
            ActionState::RolledBack => self.rolled_back_at = Some(at),
            ActionState::Failed | ActionState::Abandoned => {
                if note.is_some() {
                    self.last_error = note.clone();
                }
            }
            ActionState::Pending => {}
        }

        self.history.push(StateChange {
            from: Some(self.state),
            to,
            at,
            note,
        });
        self.state = to;
        Ok(())
    }

    /// Applied and its effect not yet measured
    pub fn awaits_verification(&self) -> bool {
        self.state == ActionState::Applied && self.verified_at.is_none()
    }

    /// Blocks other actions on the same resource
    pub fn is_in_flight(&self) -> bool {
        match self.state {
            ActionState::Pending | ActionState::Executing | ActionState::Failed => true,
            ActionState::Applied => self.verified_at.is_none(),
            ActionState::Abandoned | ActionState::RolledBack => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::candidate;
    use crate::models::ActionKind;

    fn record() -> ActionRecord {
        let c = candidate("vm-1", ActionKind::Rightsize, 0.9);
        ActionRecord::for_candidate("act-1", &c, ApprovalSource::Automatic, Utc::now())
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut r = record();
        assert_eq!(r.state, ActionState::Pending);
        assert!(r.is_in_flight());

        r.transition(ActionState::Executing, Utc::now(), None).unwrap();
        assert_eq!(r.attempts, 1);
        r.transition(ActionState::Applied, Utc::now(), None).unwrap();
        assert!(r.applied_at.is_some());
        assert!(r.awaits_verification());
        assert!(r.is_in_flight());

        r.verified_at = Some(Utc::now());
        assert!(!r.is_in_flight());
        assert_eq!(r.history.len(), 3);
    }

    #[test]
    fn test_retry_then_abandon() {
        let mut r = record();
        r.transition(ActionState::Executing, Utc::now(), None).unwrap();
        r.transition(ActionState::Failed, Utc::now(), Some("503".into()))
            .unwrap();
        r.transition(ActionState::Executing, Utc::now(), None).unwrap();
        assert_eq!(r.attempts, 2);
        r.transition(ActionState::Failed, Utc::now(), Some("503 again".into()))
            .unwrap();
        r.transition(ActionState::Abandoned, Utc::now(), Some("retries exhausted".into()))
            .unwrap();

        assert!(r.state.is_terminal());
        assert!(!r.is_in_flight());
        assert_eq!(r.last_error.as_deref(), Some("retries exhausted"));
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut r = record();
        let err = r
            .transition(ActionState::Applied, Utc::now(), None)
            .unwrap_err();
        assert_eq!(
            err,
            OptimizerError::InvalidTransition {
                from: ActionState::Pending,
                to: ActionState::Applied
            }
        );
        assert_eq!(r.state, ActionState::Pending);
        assert_eq!(r.history.len(), 1);

        assert!(!is_valid_transition(ActionState::RolledBack, ActionState::Applied));
        assert!(!is_valid_transition(ActionState::Abandoned, ActionState::Executing));
        assert!(!is_valid_transition(ActionState::Applied, ActionState::Failed));
    }

    #[test]
    fn test_applied_can_be_abandoned_after_failed_rollback() {
        let mut r = record();
        r.transition(ActionState::Executing, Utc::now(), None).unwrap();
        r.transition(ActionState::Applied, Utc::now(), None).unwrap();
        r.transition(ActionState::Abandoned, Utc::now(), Some("rollback failed: quota".into()))
            .unwrap();

        assert!(r.state.is_terminal());
        assert!(!r.is_in_flight());
        assert_eq!(r.last_error.as_deref(), Some("rollback failed: quota"));
        assert!(!is_valid_transition(ActionState::Abandoned, ActionState::RolledBack));
    }
}
