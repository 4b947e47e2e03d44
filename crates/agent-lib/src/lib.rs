//! Cost optimization engine
//!
//! This crate provides the core functionality for:
//! - Sampling utilization telemetry into a rolling window
//! - Generating and scoring right-sizing candidates
//! - Deciding, executing and verifying actions against a cluster
//! - Learning from past outcomes through a pattern store
//! - Health checks and observability

pub mod candidates;
pub mod error;
pub mod executor;
pub mod health;
pub mod models;
pub mod observability;
pub mod operator;
pub mod patterns;
pub mod policy;
pub mod sampler;
pub mod scheduler;
pub mod scoring;
pub mod store;

#[cfg(test)]
mod test_support;

pub use error::{OptimizerError, OptimizerResult};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{OptimizerMetrics, StructuredLogger};
pub use operator::OperatorService;
pub use policy::{PolicyConfig, PolicyHandle, PolicyUpdate};
pub use scheduler::{
    OptimizerContext, OptimizerContextBuilder, RunOutcome, RunReport, SchedulerLoop,
};
