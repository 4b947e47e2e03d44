//! Operator actions on the running optimizer
//!
//! Everything the HTTP surface exposes goes through [`OperatorService`]:
//! reviewing held decisions, inspecting actions, changing the policy and
//! triggering runs.

use crate::error::{OptimizerError, OptimizerResult};
use crate::models::{ActionRecord, ActionState, ApprovalSource, Review, ReviewVerdict};
use crate::policy::{PolicyConfig, PolicyUpdate};
use crate::scheduler::{OptimizerContext, RunReport};
use crate::store::{DecisionView, PendingDecision};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct OperatorService {
    context: Arc<OptimizerContext>,
}

impl OperatorService {
    pub fn new(context: Arc<OptimizerContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<OptimizerContext> {
        &self.context
    }

    /// Held decisions awaiting review, oldest first
    pub async fn pending(&self) -> Vec<PendingDecision> {
        self.context.audit.pending().await
    }

    /// Decision audit trail, newest first
    pub async fn decisions(&self, limit: usize) -> Vec<DecisionView> {
        self.context.audit.decisions(limit).await
    }

    /// Approve a held decision and start executing it
    ///
    /// The action record is admitted before the review is written, so an
    /// approval that conflicts with an in-flight action leaves the decision
    /// pending. If the review cannot be written the admitted record is
    /// withdrawn again. Execution continues in the background; the returned
    /// record is the freshly admitted one.
    pub async fn approve(
        &self,
        candidate_id: &str,
        reviewer: &str,
        reason: Option<String>,
    ) -> OptimizerResult<ActionRecord> {
        let held = self.context.audit.pending_for(candidate_id).await?;
        let record = self
            .context
            .executor
            .admit(
                &held.candidate,
                ApprovalSource::Manual {
                    reviewer: reviewer.to_string(),
                },
            )
            .await?;

        let review = Review {
            candidate_id: candidate_id.to_string(),
            verdict: ReviewVerdict::Approved,
            reviewer: reviewer.to_string(),
            reason,
            reviewed_at: Utc::now(),
        };
        if let Err(e) = self.context.audit.record_review(&review).await {
            if let Err(withdraw) = self.context.actions.withdraw(&record.id).await {
                warn!(
                    action = %record.id,
                    error = %withdraw,
                    "Failed to withdraw action after unrecorded approval"
                );
            }
            return Err(e);
        }

        info!(
            candidate = %candidate_id,
            action = %record.id,
            reviewer = %reviewer,
            "Held decision approved"
        );

        let executor = self.context.executor.clone();
        let action_id = record.id.clone();
        tokio::spawn(async move {
            if let Err(e) = executor.execute(&action_id).await {
                warn!(action = %action_id, error = %e, "Approved action failed to execute");
            }
        });

        Ok(record)
    }

    /// Reject a held decision; nothing is executed
    pub async fn reject(
        &self,
        candidate_id: &str,
        reviewer: &str,
        reason: Option<String>,
    ) -> OptimizerResult<Review> {
        let review = Review {
            candidate_id: candidate_id.to_string(),
            verdict: ReviewVerdict::Rejected,
            reviewer: reviewer.to_string(),
            reason,
            reviewed_at: Utc::now(),
        };
        self.context.audit.record_review(&review).await?;
        info!(candidate = %candidate_id, reviewer = %reviewer, "Held decision rejected");
        Ok(review)
    }

    pub async fn actions(&self, state: Option<ActionState>) -> Vec<ActionRecord> {
        self.context.actions.list(state).await
    }

    pub async fn action(&self, id: &str) -> OptimizerResult<ActionRecord> {
        self.context.actions.get(id).await
    }

    pub async fn policy(&self) -> PolicyConfig {
        self.context.policy.snapshot().await
    }

    /// Apply a partial policy change; takes effect from the next run
    pub async fn update_policy(&self, update: &PolicyUpdate) -> OptimizerResult<PolicyConfig> {
        if update.is_empty() {
            return Err(OptimizerError::PolicyViolation(
                "policy update changes nothing".to_string(),
            ));
        }
        let policy = self.context.policy.update(update).await?;
        self.context.logger.log_policy_updated(
            policy.version,
            policy.confidence_floor,
            policy.sampling_interval_secs,
        );
        Ok(policy)
    }

    pub async fn last_run(&self) -> Option<RunReport> {
        self.context.last_run().await
    }

    /// Start a run in the background; `false` if one is already going
    pub fn trigger_run(&self) -> bool {
        if self.context.is_running() {
            return false;
        }
        let context = self.context.clone();
        tokio::spawn(async move {
            context.run_once().await;
        });
        true
    }
}
