//! Observability infrastructure for the optimization engine
//!
//! Provides:
//! - Prometheus metrics (run latency, decisions, action outcomes, savings)
//! - Structured JSON logging with tracing

use crate::models::{ActionRecord, ActionState, Decision, DecisionOutcome};
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for run durations (in seconds)
const RUN_DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

static GLOBAL_METRICS: OnceLock<OptimizerMetricsInner> = OnceLock::new();

struct OptimizerMetricsInner {
    run_duration_seconds: Histogram,
    runs_total: IntCounter,
    runs_skipped: IntCounter,
    resources_evaluated: IntGauge,
    candidates_generated: IntCounter,
    decisions: IntCounterVec,
    action_outcomes: IntCounterVec,
    rollbacks: IntCounter,
    resource_errors: IntCounterVec,
    estimated_monthly_savings: Gauge,
}

impl OptimizerMetricsInner {
    fn new() -> Self {
        Self {
            run_duration_seconds: register_histogram!(
                "cost_optimizer_run_duration_seconds",
                "Wall time of one optimization run",
                RUN_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register run_duration_seconds"),

            runs_total: register_int_counter!(
                "cost_optimizer_runs_total",
                "Completed optimization runs"
            )
            .expect("Failed to register runs_total"),

            runs_skipped: register_int_counter!(
                "cost_optimizer_runs_skipped_total",
                "Runs skipped because another run was still in progress"
            )
            .expect("Failed to register runs_skipped"),

            resources_evaluated: register_int_gauge!(
                "cost_optimizer_resources_evaluated",
                "Resources evaluated by the last run"
            )
            .expect("Failed to register resources_evaluated"),

            candidates_generated: register_int_counter!(
                "cost_optimizer_candidates_generated_total",
                "Candidates produced by the rule set"
            )
            .expect("Failed to register candidates_generated"),

            decisions: register_int_counter_vec!(
                "cost_optimizer_decisions_total",
                "Policy decisions by outcome",
                &["outcome"]
            )
            .expect("Failed to register decisions"),

            action_outcomes: register_int_counter_vec!(
                "cost_optimizer_action_outcomes_total",
                "Action records reaching a settled state",
                &["state"]
            )
            .expect("Failed to register action_outcomes"),

            rollbacks: register_int_counter!(
                "cost_optimizer_rollbacks_total",
                "Applied actions rolled back after a regression"
            )
            .expect("Failed to register rollbacks"),

            resource_errors: register_int_counter_vec!(
                "cost_optimizer_resource_errors_total",
                "Per-resource pipeline errors by kind",
                &["kind"]
            )
            .expect("Failed to register resource_errors"),

            estimated_monthly_savings: register_gauge!(
                "cost_optimizer_estimated_monthly_savings",
                "Estimated monthly savings of candidates approved in the last run"
            )
            .expect("Failed to register estimated_monthly_savings"),
        }
    }
}

/// Handle to the global optimizer metrics
///
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct OptimizerMetrics {
    _private: (),
}

impl Default for OptimizerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OptimizerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OptimizerMetricsInner {
        GLOBAL_METRICS.get_or_init(OptimizerMetricsInner::new)
    }

    pub fn observe_run_duration(&self, duration_secs: f64) {
        self.inner().run_duration_seconds.observe(duration_secs);
        self.inner().runs_total.inc();
    }

    pub fn inc_runs_skipped(&self) {
        self.inner().runs_skipped.inc();
    }

    pub fn set_resources_evaluated(&self, count: i64) {
        self.inner().resources_evaluated.set(count);
    }

    pub fn inc_candidates(&self, count: u64) {
        self.inner().candidates_generated.inc_by(count);
    }

    pub fn inc_decision(&self, outcome: DecisionOutcome) {
        self.inner()
            .decisions
            .with_label_values(&[&outcome.to_string()])
            .inc();
    }

    pub fn inc_action_outcome(&self, state: ActionState) {
        self.inner()
            .action_outcomes
            .with_label_values(&[&state.to_string()])
            .inc();
        if state == ActionState::RolledBack {
            self.inner().rollbacks.inc();
        }
    }

    pub fn inc_resource_error(&self, kind: &str) {
        self.inner().resource_errors.with_label_values(&[kind]).inc();
    }

    pub fn set_estimated_savings(&self, monthly: f64) {
        self.inner().estimated_monthly_savings.set(monthly);
    }
}

/// Structured logger for optimizer events
///
/// Emits one named `event` per significant pipeline step so the JSON
/// log stream can be filtered without parsing messages.
#[derive(Clone)]
pub struct StructuredLogger {
    cluster: String,
}

impl StructuredLogger {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    pub fn log_run_started(&self, run: u64, resources: usize) {
        info!(
            event = "run_started",
            cluster = %self.cluster,
            run = run,
            resources = resources,
            "Optimization run started"
        );
    }

    pub fn log_run_completed(
        &self,
        run: u64,
        decisions: usize,
        errors: usize,
        cancelled: bool,
        duration_ms: u64,
    ) {
        info!(
            event = "run_completed",
            cluster = %self.cluster,
            run = run,
            decisions = decisions,
            errors = errors,
            cancelled = cancelled,
            duration_ms = duration_ms,
            "Optimization run completed"
        );
    }

    /// Run degraded to a no-op by an outage
    pub fn log_run_degraded(&self, run: u64, reason: &str) {
        warn!(
            event = "run_completed",
            cluster = %self.cluster,
            run = run,
            degraded = true,
            reason = %reason,
            "Optimization run degraded to a no-op"
        );
    }

    pub fn log_decision(&self, decision: &Decision, kind: &str, confidence: f64, savings: f64) {
        info!(
            event = "decision_recorded",
            cluster = %self.cluster,
            candidate_id = %decision.candidate_id,
            resource_id = %decision.resource_id,
            action = %kind,
            outcome = %decision.outcome,
            confidence = confidence,
            estimated_monthly_savings = savings,
            policy_version = decision.policy_version,
            reason = %decision.reason,
            "Decision recorded"
        );
    }

    pub fn log_transition(&self, record: &ActionRecord) {
        match record.state {
            ActionState::Failed | ActionState::Abandoned => {
                warn!(
                    event = "action_transition",
                    cluster = %self.cluster,
                    action_id = %record.id,
                    resource_id = %record.resource_id,
                    state = %record.state,
                    attempts = record.attempts,
                    error = ?record.last_error,
                    "Action transitioned"
                );
            }
            _ => {
                info!(
                    event = "action_transition",
                    cluster = %self.cluster,
                    action_id = %record.id,
                    resource_id = %record.resource_id,
                    state = %record.state,
                    attempts = record.attempts,
                    "Action transitioned"
                );
            }
        }
    }

    pub fn log_rollback(&self, record: &ActionRecord, observed: f64, threshold: f64) {
        warn!(
            event = "action_rolled_back",
            cluster = %self.cluster,
            action_id = %record.id,
            resource_id = %record.resource_id,
            action = %record.action.kind(),
            baseline = record.baseline,
            observed = observed,
            threshold = threshold,
            "Regression detected, action rolled back"
        );
    }

    pub fn log_policy_updated(&self, version: u64, confidence_floor: f64, interval_secs: u64) {
        info!(
            event = "policy_updated",
            cluster = %self.cluster,
            version = version,
            confidence_floor = confidence_floor,
            sampling_interval_secs = interval_secs,
            "Decision policy updated"
        );
    }

    pub fn log_startup(&self, version: &str, dry_run: bool) {
        info!(
            event = "agent_started",
            cluster = %self.cluster,
            agent_version = %version,
            dry_run = dry_run,
            "Cost optimization agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            cluster = %self.cluster,
            reason = %reason,
            "Cost optimization agent shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimizer_metrics_creation() {
        // Metrics live in the process-wide registry; creating several
        // handles must not register twice.
        let metrics = OptimizerMetrics::new();
        let again = OptimizerMetrics::new();

        metrics.observe_run_duration(0.4);
        metrics.inc_runs_skipped();
        metrics.set_resources_evaluated(10);
        metrics.inc_candidates(3);
        again.inc_decision(DecisionOutcome::HeldForApproval);
        again.inc_action_outcome(ActionState::RolledBack);
        again.inc_resource_error("telemetry_unavailable");
        again.set_estimated_savings(42.0);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-cluster");
        assert_eq!(logger.cluster, "test-cluster");
    }
}
