//! Shared state of the optimization pipeline
//!
//! Everything a run touches hangs off one [`OptimizerContext`], built once
//! at startup and passed explicitly to the scheduler and operator surface.

use super::RunReport;
use crate::candidates::{CandidateGenerator, GeneratorConfig};
use crate::executor::{ActionExecutor, ControlSurface, ExecutorConfig};
use crate::health::HealthRegistry;
use crate::observability::{OptimizerMetrics, StructuredLogger};
use crate::patterns::{PatternStore, PatternStoreConfig};
use crate::policy::{PolicyConfig, PolicyHandle};
use crate::sampler::{MetricSampler, ResourceSelector, SamplerConfig, TelemetrySource};
use crate::scoring::{ReasoningService, ScoringConfig, ScoringEngine};
use crate::store::{ActionTable, AuditLog, SampleWindowStore, StatePaths, WindowConfig};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Default number of resources processed concurrently
const DEFAULT_WORKER_LIMIT: usize = 8;

pub struct OptimizerContext {
    pub cluster: String,
    pub policy: PolicyHandle,
    pub sampler: MetricSampler,
    pub windows: Arc<SampleWindowStore>,
    pub generator: Arc<CandidateGenerator>,
    pub scoring: Arc<ScoringEngine>,
    pub executor: Arc<ActionExecutor>,
    pub audit: Arc<AuditLog>,
    pub actions: Arc<ActionTable>,
    pub patterns: Arc<PatternStore>,
    pub health: HealthRegistry,
    pub metrics: OptimizerMetrics,
    pub logger: StructuredLogger,
    pub selector: ResourceSelector,
    pub worker_limit: usize,
    cancel: AtomicBool,
    running: AtomicBool,
    last_run: RwLock<Option<RunReport>>,
    runs: AtomicU64,
}

impl OptimizerContext {
    /// Ask the current run to stop dispatching resources
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Report of the most recent finished run
    pub async fn last_run(&self) -> Option<RunReport> {
        self.last_run.read().await.clone()
    }

    pub(super) async fn store_report(&self, report: RunReport) {
        *self.last_run.write().await = Some(report);
    }

    /// Claim the single run slot; `None` if a run is already in progress
    pub(super) fn begin_run(&self) -> Option<RunSlot<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        self.cancel.store(false, Ordering::SeqCst);
        Some(RunSlot {
            running: &self.running,
            run: self.runs.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }
}

/// Held for the duration of a run; frees the slot on drop
pub(super) struct RunSlot<'a> {
    running: &'a AtomicBool,
    pub run: u64,
}

impl Drop for RunSlot<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Builder for [`OptimizerContext`]
pub struct OptimizerContextBuilder {
    cluster: String,
    telemetry: Option<Arc<dyn TelemetrySource>>,
    control: Option<Arc<dyn ControlSurface>>,
    reasoning: Option<Arc<dyn ReasoningService>>,
    policy: PolicyConfig,
    sampler: SamplerConfig,
    generator: GeneratorConfig,
    scoring: ScoringConfig,
    executor: ExecutorConfig,
    window: WindowConfig,
    patterns: PatternStoreConfig,
    state_dir: Option<PathBuf>,
    selector: ResourceSelector,
    worker_limit: usize,
    health: Option<HealthRegistry>,
}

impl OptimizerContextBuilder {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            telemetry: None,
            control: None,
            reasoning: None,
            policy: PolicyConfig::default(),
            sampler: SamplerConfig::default(),
            generator: GeneratorConfig::default(),
            scoring: ScoringConfig::default(),
            executor: ExecutorConfig::default(),
            window: WindowConfig::default(),
            patterns: PatternStoreConfig::default(),
            state_dir: None,
            selector: ResourceSelector::all(),
            worker_limit: DEFAULT_WORKER_LIMIT,
            health: None,
        }
    }

    /// Set the telemetry source
    pub fn telemetry(mut self, source: Arc<dyn TelemetrySource>) -> Self {
        self.telemetry = Some(source);
        self
    }

    /// Set the cluster control surface
    pub fn control(mut self, control: Arc<dyn ControlSurface>) -> Self {
        self.control = Some(control);
        self
    }

    /// Set the optional advisory reasoning service
    pub fn reasoning(mut self, service: Arc<dyn ReasoningService>) -> Self {
        self.reasoning = Some(service);
        self
    }

    pub fn policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    pub fn sampler_config(mut self, config: SamplerConfig) -> Self {
        self.sampler = config;
        self
    }

    pub fn generator_config(mut self, config: GeneratorConfig) -> Self {
        self.generator = config;
        self
    }

    pub fn scoring_config(mut self, config: ScoringConfig) -> Self {
        self.scoring = config;
        self
    }

    pub fn executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor = config;
        self
    }

    pub fn window_config(mut self, config: WindowConfig) -> Self {
        self.window = config;
        self
    }

    /// Pattern store limits; the persistence path follows the state directory
    pub fn pattern_config(mut self, config: PatternStoreConfig) -> Self {
        self.patterns = config;
        self
    }

    /// Persist state under `dir`; without it everything stays in memory
    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    pub fn selector(mut self, selector: ResourceSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Set the number of resources processed concurrently
    pub fn worker_limit(mut self, limit: usize) -> Self {
        self.worker_limit = limit;
        self
    }

    /// Share an existing health registry
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Build the context, loading persisted state if a state directory is set
    pub fn build(self) -> Result<OptimizerContext> {
        let telemetry = self
            .telemetry
            .ok_or_else(|| anyhow::anyhow!("Telemetry source is required"))?;
        let control = self
            .control
            .ok_or_else(|| anyhow::anyhow!("Control surface is required"))?;
        if self.worker_limit == 0 {
            anyhow::bail!("Worker limit must be at least 1");
        }
        let (policy, windows, audit, actions, patterns) = match self.state_dir {
            Some(dir) => {
                let paths = StatePaths::new(dir);
                std::fs::create_dir_all(paths.root()).with_context(|| {
                    format!("Failed to create state directory {:?}", paths.root())
                })?;
                let policy = PolicyHandle::with_persistence(self.policy, paths.policy())
                    .context("Invalid decision policy")?;
                let windows = SampleWindowStore::with_persistence(paths.samples(), self.window);
                let audit = AuditLog::open(paths.audit_log()).context("Failed to open audit log")?;
                let actions = ActionTable::open(paths.actions());
                let patterns = PatternStore::new(PatternStoreConfig {
                    persistence_path: Some(paths.patterns()),
                    ..self.patterns
                });
                (policy, windows, audit, actions, patterns)
            }
            None => (
                PolicyHandle::new(self.policy).context("Invalid decision policy")?,
                SampleWindowStore::new(self.window),
                AuditLog::in_memory(),
                ActionTable::in_memory(),
                PatternStore::new(PatternStoreConfig {
                    persistence_path: None,
                    ..self.patterns
                }),
            ),
        };

        let actions = Arc::new(actions);
        let patterns = Arc::new(patterns);
        let logger = StructuredLogger::new(self.cluster.clone());

        let mut scoring = ScoringEngine::new(self.scoring);
        if let Some(service) = self.reasoning {
            scoring = scoring.with_reasoning(service);
        }

        let executor = ActionExecutor::new(control, actions.clone(), patterns.clone(), self.executor)
            .with_logger(logger.clone());

        Ok(OptimizerContext {
            cluster: self.cluster,
            policy,
            sampler: MetricSampler::new(telemetry, self.sampler),
            windows: Arc::new(windows),
            generator: Arc::new(CandidateGenerator::new(self.generator, patterns.clone())),
            scoring: Arc::new(scoring),
            executor: Arc::new(executor),
            audit: Arc::new(audit),
            actions,
            patterns,
            health: self.health.unwrap_or_default(),
            metrics: OptimizerMetrics::new(),
            logger,
            selector: self.selector,
            worker_limit: self.worker_limit,
            cancel: AtomicBool::new(false),
            running: AtomicBool::new(false),
            last_run: RwLock::new(None),
            runs: AtomicU64::new(0),
        })
    }
}
