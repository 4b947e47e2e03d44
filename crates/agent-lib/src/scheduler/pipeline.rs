//! One optimization run

use super::context::OptimizerContext;
use super::{ResourceError, RunOutcome, RunReport};
use crate::candidates::RuleInput;
use crate::error::{OptimizerError, OptimizerResult};
use crate::executor::Verification;
use crate::health::components;
use crate::models::{
    ActionState, ApprovalSource, DecisionOutcome, ResourceDescriptor, SampleWindow,
};
use crate::policy::{decide, rank, PolicyConfig};
use crate::scoring::ReasoningStatus;
use crate::store::ResourceWindow;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Counts contributed by one resource
#[derive(Debug, Default)]
struct ResourceTally {
    candidates: usize,
    auto_approved: usize,
    held: usize,
    rejected: usize,
    applied: usize,
    abandoned: usize,
    verified: usize,
    rolled_back: usize,
    approved_savings: f64,
    /// Failures confined to one candidate; the rest of the resource went on
    errors: Vec<OptimizerError>,
}

impl RunReport {
    fn absorb(&mut self, resource_id: &str, tally: ResourceTally) {
        self.resources_evaluated += 1;
        self.candidates += tally.candidates;
        self.auto_approved += tally.auto_approved;
        self.held += tally.held;
        self.rejected += tally.rejected;
        self.actions_applied += tally.applied;
        self.actions_abandoned += tally.abandoned;
        self.verified += tally.verified;
        self.rolled_back += tally.rolled_back;
        self.approved_monthly_savings += tally.approved_savings;
        for e in tally.errors {
            self.errors.push(ResourceError {
                resource_id: resource_id.to_string(),
                kind: e.kind().to_string(),
                message: e.to_string(),
            });
        }
    }
}

impl OptimizerContext {
    /// Run the pipeline once over every selected resource
    ///
    /// Returns [`RunOutcome::Skipped`] without doing anything if another run
    /// is in progress.
    pub async fn run_once(self: &Arc<Self>) -> RunOutcome {
        let Some(slot) = self.begin_run() else {
            warn!(cluster = %self.cluster, "Previous run still in progress, skipping");
            self.metrics.inc_runs_skipped();
            return RunOutcome::Skipped;
        };

        let clock = Instant::now();
        let started_at = Utc::now();
        let policy = self.policy.snapshot().await;
        let mut report = RunReport::new(slot.run, policy.version, started_at);

        if let Err(summary) = self.execute_run(&policy, started_at, &mut report).await {
            report.errors.clear();
            report.summary_error = Some(summary.clone());
            self.logger.log_run_degraded(slot.run, &summary);
            self.health
                .set_degraded(components::SCHEDULER, summary)
                .await;
        } else {
            self.health.set_healthy(components::SCHEDULER).await;
            self.logger.log_run_completed(
                slot.run,
                report.decisions(),
                report.errors.len(),
                report.cancelled,
                clock.elapsed().as_millis() as u64,
            );
        }

        if let Err(e) = self.windows.flush().await {
            warn!(error = %e, "Failed to persist sample window");
            self.health
                .set_degraded(components::STORE, format!("{e:#}"))
                .await;
        }

        report.finished_at = Utc::now();
        self.metrics.observe_run_duration(clock.elapsed().as_secs_f64());
        self.metrics
            .set_resources_evaluated(report.resources_evaluated as i64);
        self.metrics.set_estimated_savings(report.approved_monthly_savings);
        self.store_report(report.clone()).await;

        drop(slot);
        RunOutcome::Completed(report)
    }

    /// Fill `report`; `Err` carries the summary of an outage that made the run a no-op
    async fn execute_run(
        self: &Arc<Self>,
        policy: &PolicyConfig,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) -> Result<(), String> {
        let ping = self.executor.ping().await;
        self.health
            .observe(components::EXECUTOR, ping.as_ref().map(|_| ()))
            .await;
        if let Err(e) = ping {
            return Err(format!("control surface unreachable: {e}"));
        }

        let resources = match self.sampler.resolve(&self.selector).await {
            Ok(resources) => {
                self.health.set_healthy(components::SAMPLER).await;
                resources
            }
            Err(e) => {
                self.health.observe(components::SAMPLER, Err(&e)).await;
                return Err(format!("resource inventory failed: {e}"));
            }
        };
        report.resources_seen = resources.len();
        self.logger.log_run_started(report.run, resources.len());

        let evicted = self.windows.evict_expired(now).await;
        if evicted > 0 {
            debug!(points = evicted, "Evicted expired samples");
        }

        let window = self.sampler.window_ending(now);
        let semaphore = Arc::new(Semaphore::new(self.worker_limit.max(1)));
        let mut tasks = JoinSet::new();

        for resource in resources {
            if self.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            // Waiting for a worker may have taken a while
            if self.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let ctx = Arc::clone(self);
            let policy = policy.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let resource_id = resource.id.clone();
                let result = ctx.process_resource(resource, window, &policy, now).await;
                (resource_id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((resource_id, Ok(tally))) => {
                    for e in &tally.errors {
                        self.metrics.inc_resource_error(e.kind());
                    }
                    report.absorb(&resource_id, tally);
                }
                Ok((resource_id, Err(e))) => {
                    warn!(resource = %resource_id, error = %e, "Resource evaluation failed");
                    self.metrics.inc_resource_error(e.kind());
                    report.errors.push(ResourceError {
                        resource_id,
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Resource worker panicked");
                    report.errors.push(ResourceError {
                        resource_id: "unknown".to_string(),
                        kind: "panic".to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let all_unavailable = !report.errors.is_empty()
            && report.resources_evaluated == 0
            && report
                .errors
                .iter()
                .all(|e| e.kind == "telemetry_unavailable");
        if all_unavailable {
            let summary = format!(
                "telemetry unavailable for all {} resources",
                report.errors.len()
            );
            self.health
                .set_degraded(components::SAMPLER, summary.clone())
                .await;
            return Err(summary);
        }

        Ok(())
    }

    async fn process_resource(
        &self,
        resource: ResourceDescriptor,
        window: SampleWindow,
        policy: &PolicyConfig,
        now: DateTime<Utc>,
    ) -> OptimizerResult<ResourceTally> {
        let mut tally = ResourceTally::default();

        let samples = self.sampler.sample_resource(&resource, window).await?;
        self.windows.ingest(&samples, now).await;
        let resource_window = self
            .windows
            .window(&resource.id)
            .await
            .unwrap_or_else(|| ResourceWindow::new(resource.id.clone(), resource.kind));

        for report in self
            .executor
            .verify(&resource.id, &resource_window, now)
            .await?
        {
            match report.outcome {
                Verification::Confirmed(_) => tally.verified += 1,
                Verification::RolledBack { .. } => tally.rolled_back += 1,
                Verification::RollbackFailed { error, .. } => {
                    self.health.observe(components::EXECUTOR, Err(&error)).await;
                }
                Verification::RollbackAbandoned { error, .. } => {
                    tally.abandoned += 1;
                    self.health
                        .set_degraded(
                            components::ROLLBACK,
                            format!("rollback of {} abandoned: {error}", report.action_id),
                        )
                        .await;
                }
                Verification::AwaitingSamples => {}
            }
        }

        let input = RuleInput {
            resource: &resource,
            window: &resource_window,
            now,
        };
        let mut candidates = Vec::new();
        for draft in self.generator.generate(&input).await {
            let kind = draft.action.kind();
            if self.audit.has_pending(&resource.id, kind).await {
                debug!(resource = %resource.id, kind = %kind, "Held decision still awaiting review");
                continue;
            }

            let scored = self.scoring.score(draft, &resource).await;
            match &scored.reasoning {
                ReasoningStatus::Failed(e) => {
                    self.health
                        .set_degraded(components::SCORING, e.to_string())
                        .await
                }
                ReasoningStatus::Used => self.health.set_healthy(components::SCORING).await,
                ReasoningStatus::Skipped => {}
            }
            candidates.push(scored.candidate);
        }
        tally.candidates = candidates.len();
        self.metrics.inc_candidates(candidates.len() as u64);
        rank(&mut candidates);

        for candidate in candidates {
            let in_flight = self.actions.in_flight_for(&resource.id).await;
            let decision = decide(&candidate, policy, in_flight.as_deref(), now);
            if let Err(e) = self.audit.record(&candidate, &decision).await {
                warn!(candidate = %candidate.id, error = %e, "Failed to record decision, skipping candidate");
                tally.errors.push(e);
                continue;
            }
            self.metrics.inc_decision(decision.outcome);
            self.logger.log_decision(
                &decision,
                &candidate.kind().to_string(),
                candidate.confidence,
                candidate.estimated_monthly_savings,
            );

            match decision.outcome {
                DecisionOutcome::Rejected => tally.rejected += 1,
                DecisionOutcome::HeldForApproval => tally.held += 1,
                DecisionOutcome::AutoApproved => {
                    tally.auto_approved += 1;
                    tally.approved_savings += candidate.estimated_monthly_savings;
                    match self
                        .executor
                        .apply(&candidate, ApprovalSource::Automatic)
                        .await
                    {
                        Ok(record) => match record.state {
                            ActionState::Applied => tally.applied += 1,
                            ActionState::Abandoned => tally.abandoned += 1,
                            _ => {}
                        },
                        Err(e) => {
                            warn!(
                                candidate = %candidate.id,
                                resource = %resource.id,
                                error = %e,
                                "Auto-approved candidate could not be applied"
                            );
                            tally.errors.push(e);
                        }
                    }
                }
            }
        }

        Ok(tally)
    }
}
