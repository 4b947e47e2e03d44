//! Scheduler loop
//!
//! Starts a run every sampling interval. The interval is re-read from the
//! live policy after each tick, so operator changes apply from the next
//! cycle on. A tick that lands while the previous run is still going is
//! skipped.

use super::{OptimizerContext, RunOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant};
use tracing::{info, warn};

pub struct SchedulerLoop {
    context: Arc<OptimizerContext>,
}

impl SchedulerLoop {
    pub fn new(context: Arc<OptimizerContext>) -> Self {
        Self { context }
    }

    async fn current_interval(&self) -> Duration {
        let secs = self.context.policy.snapshot().await.sampling_interval_secs;
        Duration::from_secs(secs.max(1))
    }

    /// Run until `shutdown` fires, then cancel and wait for the current run
    pub async fn run(self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut period = self.current_interval().await;
        info!(
            cluster = %self.context.cluster,
            interval_secs = period.as_secs(),
            "Starting scheduler loop"
        );

        // First tick fires immediately so a run happens at startup
        let mut ticker = interval(period);
        let mut in_progress: Option<JoinHandle<RunOutcome>> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let busy = in_progress.as_ref().is_some_and(|h| !h.is_finished());
                    if busy {
                        warn!(cluster = %self.context.cluster, "Previous run still in progress, skipping tick");
                        self.context.metrics.inc_runs_skipped();
                    } else {
                        let ctx = self.context.clone();
                        in_progress = Some(tokio::spawn(async move { ctx.run_once().await }));
                    }

                    let next = self.current_interval().await;
                    if next != period {
                        info!(
                            old_secs = period.as_secs(),
                            new_secs = next.as_secs(),
                            "Sampling interval changed"
                        );
                        period = next;
                        ticker = interval_at(Instant::now() + period, period);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down scheduler loop");
                    self.context.cancel();
                    if let Some(handle) = in_progress.take() {
                        if let Err(e) = handle.await {
                            warn!(error = %e, "Run task failed during shutdown");
                        }
                    }
                    break;
                }
            }
        }
    }
}
