//! Agent configuration
//!
//! Loaded from an optional file named by `OPTIMIZER_CONFIG_FILE`, then
//! overridden by `OPTIMIZER_*` environment variables. Nested keys use `__`,
//! e.g. `OPTIMIZER_POLICY__CONFIDENCE_FLOOR=0.8`.

use agent_lib::candidates::GeneratorConfig;
use agent_lib::executor::ExecutorConfig;
use agent_lib::policy::PolicyConfig;
use agent_lib::sampler::{HttpTelemetryConfig, SamplerConfig};
use agent_lib::store::WindowConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming an optional config file
pub const CONFIG_FILE_ENV: &str = "OPTIMIZER_CONFIG_FILE";

/// Accepted range of the rolling window retention, in hours
pub const RETENTION_HOURS: std::ops::RangeInclusive<u64> = 24..=72;

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Cluster name attached to every log line
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Port of the health, metrics and operator API
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Directory holding samples, audit log, actions and patterns
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    /// Control surface base URL; without one mutations are simulated
    #[serde(default)]
    pub control_url: Option<String>,

    /// Optional advisory reasoning service
    #[serde(default)]
    pub reasoning_url: Option<String>,

    /// Resources evaluated concurrently
    #[serde(default = "default_worker_limit")]
    pub worker_limit: usize,

    #[serde(default)]
    pub telemetry: TelemetrySettings,

    #[serde(default)]
    pub executor: ExecutorSettings,

    /// Initial decision policy; changeable at runtime through the API
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Candidate rule thresholds, instance ladder and switched-off rules
    #[serde(default)]
    pub rules: GeneratorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySettings {
    #[serde(default = "default_metrics_url")]
    pub metrics_url: String,

    #[serde(default = "default_inventory_url")]
    pub inventory_url: String,

    #[serde(default = "default_telemetry_timeout")]
    pub timeout_secs: u64,

    /// How far back each run samples
    #[serde(default = "default_lookback")]
    pub lookback_secs: u64,

    #[serde(default = "default_step")]
    pub step_secs: u64,

    /// Samples kept in the rolling window
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    #[serde(default = "default_regression_threshold")]
    pub regression_threshold: f64,

    #[serde(default = "default_reasoning_timeout")]
    pub reasoning_timeout_secs: u64,
}

fn default_cluster_name() -> String {
    std::env::var("CLUSTER_NAME").unwrap_or_else(|_| "default".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_worker_limit() -> usize {
    8
}

fn default_metrics_url() -> String {
    HttpTelemetryConfig::default().metrics_url
}

fn default_inventory_url() -> String {
    HttpTelemetryConfig::default().inventory_url
}

fn default_telemetry_timeout() -> u64 {
    10
}

fn default_lookback() -> u64 {
    26 * 3600
}

fn default_step() -> u64 {
    300
}

fn default_retention_hours() -> u64 {
    48
}

fn default_max_retries() -> u32 {
    3
}

fn default_call_timeout() -> u64 {
    30
}

fn default_regression_threshold() -> f64 {
    90.0
}

fn default_reasoning_timeout() -> u64 {
    15
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            metrics_url: default_metrics_url(),
            inventory_url: default_inventory_url(),
            timeout_secs: default_telemetry_timeout(),
            lookback_secs: default_lookback(),
            step_secs: default_step(),
            retention_hours: default_retention_hours(),
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            call_timeout_secs: default_call_timeout(),
            regression_threshold: default_regression_threshold(),
            reasoning_timeout_secs: default_reasoning_timeout(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment and config file
    pub fn load() -> Result<Self> {
        Self::from_file(std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from))
    }

    /// Load with an explicit optional file, still honouring the environment
    pub fn from_file(file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = &file {
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("OPTIMIZER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| match &file {
                Some(path) => format!("Failed to read configuration from {:?}", path),
                None => "Failed to read configuration".to_string(),
            })?;

        let parsed: AgentConfig = config
            .try_deserialize()
            .context("Invalid agent configuration")?;
        parsed
            .policy
            .validate()
            .context("Invalid decision policy in configuration")?;
        if !RETENTION_HOURS.contains(&parsed.telemetry.retention_hours) {
            anyhow::bail!(
                "telemetry.retention_hours must be between {} and {}, got {}",
                RETENTION_HOURS.start(),
                RETENTION_HOURS.end(),
                parsed.telemetry.retention_hours
            );
        }
        Ok(parsed)
    }

    /// Whether mutations only hit the simulated cluster
    pub fn dry_run(&self) -> bool {
        self.control_url.is_none()
    }

    pub fn telemetry_config(&self) -> HttpTelemetryConfig {
        HttpTelemetryConfig {
            metrics_url: self.telemetry.metrics_url.clone(),
            inventory_url: self.telemetry.inventory_url.clone(),
            request_timeout: Duration::from_secs(self.telemetry.timeout_secs),
        }
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            call_timeout: Duration::from_secs(self.telemetry.timeout_secs),
            lookback: Duration::from_secs(self.telemetry.lookback_secs),
            step: Duration::from_secs(self.telemetry.step_secs),
            ..Default::default()
        }
    }

    pub fn window_config(&self) -> WindowConfig {
        WindowConfig {
            retention: Duration::from_secs(self.telemetry.retention_hours * 3600),
            ..Default::default()
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_retries: self.executor.max_retries,
            call_timeout: Duration::from_secs(self.executor.call_timeout_secs),
            regression_threshold: self.executor.regression_threshold,
            ..Default::default()
        }
    }

    pub fn generator_config(&self) -> GeneratorConfig {
        self.rules.clone()
    }

    pub fn reasoning_timeout(&self) -> Duration {
        Duration::from_secs(self.executor.reasoning_timeout_secs)
    }
}
