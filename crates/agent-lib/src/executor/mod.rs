//! Action execution
//!
//! Turns approved candidates into [`ActionRecord`]s and drives them through
//! their lifecycle against a [`ControlSurface`]:
//!
//! - at most one in-flight record per resource (token table plus an
//!   exclusive insert into the action table)
//! - transient control-surface failures are retried with exponential
//!   backoff up to a bounded number of attempts
//! - permanent failures abandon the record immediately
//! - applied reversible actions are verified against the next window
//!   and rolled back when utilization regresses; a rollback that keeps
//!   failing abandons the record

mod control;
mod dry_run;
mod locks;
mod state;


pub use control::{ControlSurface, HttpControlSurface, Mutation, MutationOutcome};
pub use dry_run::{DryRunControlSurface, SimulatedResource};
pub use locks::{ResourceLocks, ResourceToken};
pub use state::is_valid_transition;

use crate::error::{OptimizerError, OptimizerResult};
use crate::models::{
    ActionRecord, ActionState, ApprovalSource, Candidate, ObservedEffect,
};
use crate::observability::{OptimizerMetrics, StructuredLogger};
use crate::patterns::{mean, OutcomeQuality, PatternStore};
use crate::store::{ActionTable, ResourceWindow};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Retry, timeout and verification settings
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Retries after the first attempt before a record is abandoned
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Per control-surface call
    pub call_timeout: Duration,
    /// Mean primary-metric value after the change above which it is rolled back
    pub regression_threshold: f64,
    /// Post-change points needed before a verdict
    pub min_verification_samples: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            call_timeout: Duration::from_secs(30),
            regression_threshold: 90.0,
            min_verification_samples: 1,
        }
    }
}

/// Result of checking one applied action against fresh samples
#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    /// No regression; effect recorded
    Confirmed(ObservedEffect),
    RolledBack { observed: f64 },
    /// Regression seen but the compensating mutation failed; retried next cycle
    RollbackFailed { observed: f64, error: OptimizerError },
    /// The compensating mutation failed permanently or too often; record abandoned
    RollbackAbandoned { observed: f64, error: OptimizerError },
    /// Not enough post-change samples yet
    AwaitingSamples,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationReport {
    pub action_id: String,
    pub outcome: Verification,
}

pub struct ActionExecutor {
    control: Arc<dyn ControlSurface>,
    actions: Arc<ActionTable>,
    patterns: Arc<PatternStore>,
    locks: ResourceLocks,
    config: ExecutorConfig,
    metrics: OptimizerMetrics,
    logger: StructuredLogger,
    sequence: AtomicU64,
}

impl ActionExecutor {
    pub fn new(
        control: Arc<dyn ControlSurface>,
        actions: Arc<ActionTable>,
        patterns: Arc<PatternStore>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            control,
            actions,
            patterns,
            locks: ResourceLocks::new(),
            config,
            metrics: OptimizerMetrics::new(),
            logger: StructuredLogger::new("default"),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn locks(&self) -> &ResourceLocks {
        &self.locks
    }

    /// Create a PENDING record, refusing if the resource has one in flight
    pub async fn admit(
        &self,
        candidate: &Candidate,
        approval: ApprovalSource,
    ) -> OptimizerResult<ActionRecord> {
        let now = Utc::now();
        let record = ActionRecord::for_candidate(
            self.action_id(&candidate.id, now),
            candidate,
            approval,
            now,
        );
        self.actions.insert_exclusive(record.clone()).await?;
        self.logger.log_transition(&record);
        Ok(record)
    }

    /// Admit and execute in one step
    pub async fn apply(
        &self,
        candidate: &Candidate,
        approval: ApprovalSource,
    ) -> OptimizerResult<ActionRecord> {
        let record = self.admit(candidate, approval).await?;
        self.execute(&record.id).await
    }

    /// Drive a PENDING or FAILED record to APPLIED or ABANDONED
    ///
    /// Holds the resource token for the whole attempt loop. Returns the
    /// settled record; an abandoned action is not an `Err`.
    pub async fn execute(&self, action_id: &str) -> OptimizerResult<ActionRecord> {
        let record = self.actions.get(action_id).await?;
        let _token = self.locks.acquire(&record.resource_id, &record.id).await;

        // Re-read under the token; another task may have settled it meanwhile
        let mut record = self.actions.get(action_id).await?;
        match record.state {
            ActionState::Pending | ActionState::Failed => {}
            ActionState::Executing => {
                return Err(OptimizerError::InvalidTransition {
                    from: ActionState::Executing,
                    to: ActionState::Executing,
                })
            }
            _ => return Ok(record),
        }

        let mutation = Mutation::forward(&record.resource_id, &record.action);
        let mut backoff = self.config.initial_backoff;

        loop {
            self.advance(&mut record, ActionState::Executing, None).await?;

            match self.call(&mutation).await {
                Ok(outcome) => {
                    let note = match outcome {
                        MutationOutcome::Applied => None,
                        MutationOutcome::AlreadyApplied => {
                            Some("target state already held".to_string())
                        }
                    };
                    self.advance(&mut record, ActionState::Applied, note).await?;
                    if !record.action.kind().is_reversible() {
                        // Nothing to roll back to, so nothing to verify
                        record.verified_at = record.applied_at;
                        self.actions.update(&record).await?;
                    }
                    self.metrics.inc_action_outcome(ActionState::Applied);
                    return Ok(record);
                }
                Err(e) => {
                    self.advance(&mut record, ActionState::Failed, Some(e.to_string()))
                        .await?;

                    if !e.is_retryable() || record.attempts > self.config.max_retries {
                        let note = if e.is_retryable() {
                            format!("gave up after {} attempts: {e}", record.attempts)
                        } else {
                            e.to_string()
                        };
                        self.advance(&mut record, ActionState::Abandoned, Some(note))
                            .await?;
                        self.metrics.inc_action_outcome(ActionState::Abandoned);
                        return Ok(record);
                    }

                    debug!(
                        action_id = %record.id,
                        attempt = record.attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "Retrying mutation"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, self.config.max_backoff);
                }
            }
        }
    }

    /// Check applied actions on a resource against its current window
    pub async fn verify(
        &self,
        resource_id: &str,
        window: &ResourceWindow,
        now: DateTime<Utc>,
    ) -> OptimizerResult<Vec<VerificationReport>> {
        let mut reports = Vec::new();

        for mut record in self.actions.awaiting_verification(resource_id).await {
            let Some(applied_at) = record.applied_at else {
                continue;
            };
            let metric = record.resource_kind.primary_metric();
            let after = window.points_after(metric, applied_at.timestamp());
            if after.len() < self.config.min_verification_samples.max(1) {
                reports.push(VerificationReport {
                    action_id: record.id.clone(),
                    outcome: Verification::AwaitingSamples,
                });
                continue;
            }

            let observed = mean(after);
            let effect = ObservedEffect {
                metric_before: record.baseline,
                metric_after: observed,
                delta: observed - record.baseline,
                observed_at: now,
            };

            let outcome = if observed > self.config.regression_threshold {
                self.roll_back(&mut record, effect).await?
            } else {
                record.verified_at = Some(now);
                record.observed_effect = Some(effect);
                self.actions.update(&record).await?;
                self.record_pattern(&record, OutcomeQuality::Success).await;
                info!(
                    action_id = %record.id,
                    resource_id = %record.resource_id,
                    before = effect.metric_before,
                    after = effect.metric_after,
                    "Action effect verified"
                );
                Verification::Confirmed(effect)
            };

            reports.push(VerificationReport {
                action_id: record.id.clone(),
                outcome,
            });
        }

        Ok(reports)
    }

    /// Restart records a previous process left unsettled
    ///
    /// A record caught in EXECUTING is marked FAILED first; the mutation is
    /// idempotent so sending it again is harmless.
    pub async fn resume_unfinished(&self) -> Vec<OptimizerResult<ActionRecord>> {
        let mut results = Vec::new();
        for mut record in self.actions.unfinished().await {
            if record.state == ActionState::Executing {
                let interrupted = self
                    .advance(
                        &mut record,
                        ActionState::Failed,
                        Some("interrupted by restart".to_string()),
                    )
                    .await;
                if let Err(e) = interrupted {
                    results.push(Err(e));
                    continue;
                }
            }
            info!(action_id = %record.id, state = %record.state, "Resuming unfinished action");
            results.push(self.execute(&record.id).await);
        }
        results
    }

    /// Reachability of the control surface
    pub async fn ping(&self) -> OptimizerResult<()> {
        tokio::time::timeout(self.config.call_timeout, self.control.ping())
            .await
            .unwrap_or_else(|_| {
                Err(OptimizerError::ControlSurfaceTransient(format!(
                    "health check timed out after {:?}",
                    self.config.call_timeout
                )))
            })
    }

    async fn roll_back(
        &self,
        record: &mut ActionRecord,
        effect: ObservedEffect,
    ) -> OptimizerResult<Verification> {
        let observed = effect.metric_after;
        let Some(compensation) = Mutation::compensating(&record.resource_id, &record.action)
        else {
            // Irreversible actions are verified when applied and never get here
            record.verified_at = Some(effect.observed_at);
            record.observed_effect = Some(effect);
            self.actions.update(record).await?;
            return Ok(Verification::Confirmed(effect));
        };

        let _token = self.locks.acquire(&record.resource_id, &record.id).await;
        let mut backoff = self.config.initial_backoff;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.call(&compensation).await {
                Ok(_) => break,
                Err(e) if e.is_retryable() && attempt <= self.config.max_retries => {
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, self.config.max_backoff);
                }
                Err(e) => {
                    record.rollback_attempts += 1;
                    if e.is_retryable() && record.rollback_attempts <= self.config.max_retries {
                        warn!(
                            action_id = %record.id,
                            resource_id = %record.resource_id,
                            rollback_attempts = record.rollback_attempts,
                            error = %e,
                            "Compensating mutation failed, action stays applied"
                        );
                        record.last_error = Some(format!("rollback failed: {e}"));
                        self.actions.update(record).await?;
                        return Ok(Verification::RollbackFailed { observed, error: e });
                    }
                    return self.abandon_rollback(record, effect, e).await;
                }
            }
        }

        record.verified_at = Some(effect.observed_at);
        record.observed_effect = Some(effect);
        record.transition(
            ActionState::RolledBack,
            Utc::now(),
            Some(format!(
                "mean {observed:.1} above regression threshold {:.1}",
                self.config.regression_threshold
            )),
        )?;
        self.actions.update(record).await?;
        self.logger.log_transition(record);
        self.logger
            .log_rollback(record, observed, self.config.regression_threshold);
        self.metrics.inc_action_outcome(ActionState::RolledBack);
        self.record_pattern(record, OutcomeQuality::Regression).await;

        Ok(Verification::RolledBack { observed })
    }

    /// Give up on reverting a regressed action; the change stays in place
    async fn abandon_rollback(
        &self,
        record: &mut ActionRecord,
        effect: ObservedEffect,
        error: OptimizerError,
    ) -> OptimizerResult<Verification> {
        let observed = effect.metric_after;
        error!(
            action_id = %record.id,
            resource_id = %record.resource_id,
            rollback_attempts = record.rollback_attempts,
            error = %error,
            "Compensating mutation keeps failing, regressed action abandoned"
        );
        record.verified_at = Some(effect.observed_at);
        record.observed_effect = Some(effect);
        record.transition(
            ActionState::Abandoned,
            Utc::now(),
            Some(format!("rollback failed: {error}")),
        )?;
        self.actions.update(record).await?;
        self.logger.log_transition(record);
        self.metrics.inc_action_outcome(ActionState::Abandoned);
        self.record_pattern(record, OutcomeQuality::Regression).await;

        Ok(Verification::RollbackAbandoned { observed, error })
    }

    async fn record_pattern(&self, record: &ActionRecord, outcome: OutcomeQuality) {
        if let Err(e) = self
            .patterns
            .record_outcome(
                &record.resource_id,
                &record.fingerprint,
                record.action.kind(),
                outcome,
            )
            .await
        {
            warn!(action_id = %record.id, error = %e, "Failed to record pattern outcome");
        }
    }

    async fn advance(
        &self,
        record: &mut ActionRecord,
        to: ActionState,
        note: Option<String>,
    ) -> OptimizerResult<()> {
        record.transition(to, Utc::now(), note)?;
        self.actions.update(record).await?;
        self.logger.log_transition(record);
        Ok(())
    }

    async fn call(&self, mutation: &Mutation) -> OptimizerResult<MutationOutcome> {
        tokio::time::timeout(self.config.call_timeout, self.control.apply(mutation))
            .await
            .unwrap_or_else(|_| {
                Err(OptimizerError::ControlSurfaceTransient(format!(
                    "{} timed out after {:?}",
                    mutation.name(),
                    self.config.call_timeout
                )))
            })
    }

    fn action_id(&self, candidate_id: &str, now: DateTime<Utc>) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut hasher = Sha256::new();
        hasher.update(candidate_id.as_bytes());
        hasher.update(now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
        hasher.update(seq.to_le_bytes());
        format!("act-{}", hex::encode(&hasher.finalize()[..8]))
    }
}
