//! Pattern store: historical utilization fingerprints and their outcomes
//!
//! The executor writes an entry every time it measures the effect of an
//! applied action. Candidate generation reads the nearest entries to nudge
//! the confidence of similar new proposals up (past successes) or down
//! (past regressions).

mod fingerprint;

pub use fingerprint::{
    distance, fingerprint, linear_regression_slope, mean, summarize, FINGERPRINT_LEN,
};

use crate::error::{OptimizerError, OptimizerResult};
use crate::models::ActionKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default number of entries retained per resource
const DEFAULT_MAX_PER_RESOURCE: usize = 64;

/// Measured quality of an applied action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeQuality {
    Success,
    Regression,
}

/// A stored fingerprint with the outcome observed after acting on it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    pub seq: u64,
    pub resource_id: String,
    pub fingerprint: Vec<f64>,
    pub action_kind: ActionKind,
    pub outcome: OutcomeQuality,
    pub recorded_at: DateTime<Utc>,
}

/// Result of a nearest-neighbor lookup
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub resource_id: String,
    pub fingerprint: Vec<f64>,
    pub action_kind: ActionKind,
    pub outcome: OutcomeQuality,
    pub distance: f64,
}

#[derive(Debug, Clone)]
pub struct PatternStoreConfig {
    /// Oldest entries of a resource are evicted past this count
    pub max_per_resource: usize,
    pub persistence_path: Option<PathBuf>,
}

impl Default for PatternStoreConfig {
    fn default() -> Self {
        Self {
            max_per_resource: DEFAULT_MAX_PER_RESOURCE,
            persistence_path: None,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PatternState {
    next_seq: u64,
    records: Vec<PatternRecord>,
}

/// Bounded store of outcome-labelled fingerprints
pub struct PatternStore {
    config: PatternStoreConfig,
    state: RwLock<PatternState>,
}

impl PatternStore {
    pub fn new(config: PatternStoreConfig) -> Self {
        let mut state = PatternState::default();
        if let Some(path) = config.persistence_path.as_ref() {
            match crate::store::read_json::<PatternState>(path) {
                Ok(Some(loaded)) => {
                    info!(path = %path.display(), records = loaded.records.len(), "Loaded pattern store from disk");
                    state = loaded;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Failed to load pattern store, starting empty");
                }
            }
        }
        Self {
            config,
            state: RwLock::new(state),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(PatternStoreConfig::default())
    }

    /// Append an outcome, evicting the resource's oldest entries beyond the cap
    pub async fn record_outcome(
        &self,
        resource_id: &str,
        fingerprint: &[f64],
        action_kind: ActionKind,
        outcome: OutcomeQuality,
    ) -> OptimizerResult<()> {
        let mut state = self.state.write().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.records.push(PatternRecord {
            seq,
            resource_id: resource_id.to_string(),
            fingerprint: fingerprint.to_vec(),
            action_kind,
            outcome,
            recorded_at: Utc::now(),
        });

        let count = state
            .records
            .iter()
            .filter(|r| r.resource_id == resource_id)
            .count();
        if count > self.config.max_per_resource {
            let mut excess = count - self.config.max_per_resource;
            // Records are kept in sequence order, so the first matches are the oldest
            state.records.retain(|r| {
                if excess > 0 && r.resource_id == resource_id {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
        }

        debug!(resource = %resource_id, kind = %action_kind, ?outcome, "Pattern outcome recorded");

        if let Some(path) = self.config.persistence_path.as_ref() {
            crate::store::write_json_atomic(path, &*state).map_err(OptimizerError::storage)?;
        }
        Ok(())
    }

    /// The `k` nearest fingerprints across all action kinds
    pub async fn nearest(&self, fingerprint: &[f64], k: usize) -> Vec<Neighbor> {
        self.search(fingerprint, None, k).await
    }

    /// The `k` nearest fingerprints recorded for `action_kind`
    pub async fn nearest_for(
        &self,
        fingerprint: &[f64],
        action_kind: ActionKind,
        k: usize,
    ) -> Vec<Neighbor> {
        self.search(fingerprint, Some(action_kind), k).await
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn search(
        &self,
        fingerprint: &[f64],
        kind: Option<ActionKind>,
        k: usize,
    ) -> Vec<Neighbor> {
        if k == 0 {
            return Vec::new();
        }
        let state = self.state.read().await;
        let mut scored: Vec<(f64, &PatternRecord)> = state
            .records
            .iter()
            .filter(|r| kind.map_or(true, |k| r.action_kind == k))
            .map(|r| (distance(fingerprint, &r.fingerprint), r))
            .filter(|(d, _)| d.is_finite())
            .collect();

        // Equal distances resolve to the earliest inserted entry
        scored.sort_by(|(da, a), (db, b)| da.total_cmp(db).then_with(|| a.seq.cmp(&b.seq)));

        scored
            .into_iter()
            .take(k)
            .map(|(distance, r)| Neighbor {
                resource_id: r.resource_id.clone(),
                fingerprint: r.fingerprint.clone(),
                action_kind: r.action_kind,
                outcome: r.outcome,
                distance,
            })
            .collect()
    }
}
