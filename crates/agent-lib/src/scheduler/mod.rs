//! Periodic optimization runs
//!
//! A run samples every selected resource, verifies earlier actions, generates
//! and scores candidates, records a decision for each and executes the
//! auto-approved ones. Resources are processed concurrently on a bounded
//! worker pool; a failure on one resource never stops the others.

mod context;
mod pipeline;
mod r#loop;

#[cfg(test)]
mod tests;

pub use context::{OptimizerContext, OptimizerContextBuilder};
pub use r#loop::SchedulerLoop;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Failure confined to one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceError {
    pub resource_id: String,
    /// Stable error label, see [`crate::error::OptimizerError::kind`]
    pub kind: String,
    pub message: String,
}

/// What one run did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub policy_version: u64,
    pub resources_seen: usize,
    pub resources_evaluated: usize,
    pub candidates: usize,
    pub auto_approved: usize,
    pub held: usize,
    pub rejected: usize,
    pub actions_applied: usize,
    pub actions_abandoned: usize,
    pub verified: usize,
    pub rolled_back: usize,
    /// Savings of candidates auto-approved in this run
    pub approved_monthly_savings: f64,
    pub errors: Vec<ResourceError>,
    /// Set when an outage turned the run into a no-op
    pub summary_error: Option<String>,
    pub cancelled: bool,
}

impl RunReport {
    fn new(run: u64, policy_version: u64, started_at: DateTime<Utc>) -> Self {
        Self {
            run,
            started_at,
            finished_at: started_at,
            policy_version,
            resources_seen: 0,
            resources_evaluated: 0,
            candidates: 0,
            auto_approved: 0,
            held: 0,
            rejected: 0,
            actions_applied: 0,
            actions_abandoned: 0,
            verified: 0,
            rolled_back: 0,
            approved_monthly_savings: 0.0,
            errors: Vec::new(),
            summary_error: None,
            cancelled: false,
        }
    }

    pub fn decisions(&self) -> usize {
        self.auto_approved + self.held + self.rejected
    }

    pub fn is_degraded(&self) -> bool {
        self.summary_error.is_some()
    }
}

/// Result of asking for a run
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunReport),
    /// Another run was still in progress
    Skipped,
}
