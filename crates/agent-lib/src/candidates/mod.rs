//! Candidate generation
//!
//! Runs every enabled rule against one resource, turns each firing into a
//! [`DraftCandidate`] and adjusts its provisional confidence using the
//! outcomes of similar past actions from the pattern store.

mod ladder;
mod rules;

#[cfg(test)]
mod tests;

pub use ladder::{InstanceClass, InstanceLadder, HOURS_PER_MONTH};
pub use rules::{
    interpolate, projected_per_replica_load, MigrateSpotConfig, MigrateSpotRule, RightsizeConfig,
    RightsizeRule, Rule, RuleFiring, RuleInput, ScaleReplicasConfig, ScaleReplicasRule,
    UnusedStorageConfig, UnusedStorageRule,
};

use crate::models::{ActionKind, DraftCandidate};
use crate::patterns::{fingerprint, OutcomeQuality, PatternStore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Rule thresholds and pattern feedback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Rules that are switched off
    pub disabled: BTreeSet<ActionKind>,
    pub rightsize: RightsizeConfig,
    pub scale_replicas: ScaleReplicasConfig,
    pub migrate_spot: MigrateSpotConfig,
    pub unused_storage: UnusedStorageConfig,
    pub ladder: InstanceLadder,
    /// Neighbors consulted per draft
    pub pattern_neighbors: usize,
    /// Neighbors further away than this are ignored
    pub pattern_max_distance: f64,
    /// Largest share of the remaining headroom a unanimous history can move confidence
    pub pattern_max_adjustment: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            disabled: BTreeSet::new(),
            rightsize: RightsizeConfig::default(),
            scale_replicas: ScaleReplicasConfig::default(),
            migrate_spot: MigrateSpotConfig::default(),
            unused_storage: UnusedStorageConfig::default(),
            ladder: InstanceLadder::default(),
            pattern_neighbors: 5,
            pattern_max_distance: 0.25,
            pattern_max_adjustment: 0.3,
        }
    }
}

/// Produces draft candidates for one resource at a time
pub struct CandidateGenerator {
    rules: Vec<Box<dyn Rule>>,
    patterns: Arc<PatternStore>,
    config: GeneratorConfig,
    sequence: AtomicU64,
}

impl CandidateGenerator {
    pub fn new(config: GeneratorConfig, patterns: Arc<PatternStore>) -> Self {
        let rules: Vec<Box<dyn Rule>> = vec![
            Box::new(RightsizeRule {
                config: config.rightsize.clone(),
                ladder: config.ladder.clone(),
            }),
            Box::new(ScaleReplicasRule {
                config: config.scale_replicas.clone(),
            }),
            Box::new(MigrateSpotRule {
                config: config.migrate_spot.clone(),
                ladder: config.ladder.clone(),
            }),
            Box::new(UnusedStorageRule {
                config: config.unused_storage.clone(),
            }),
        ];
        Self {
            rules,
            patterns,
            config,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self, kind: ActionKind) -> bool {
        !self.config.disabled.contains(&kind)
    }

    /// Evaluate every enabled rule; rules that do not fire produce nothing
    pub async fn generate(&self, input: &RuleInput<'_>) -> Vec<DraftCandidate> {
        let summary = input.window.summary(input.resource.kind.primary_metric());
        let fp = fingerprint(&summary);
        let mut drafts = Vec::new();

        for rule in self.rules.iter().filter(|r| self.is_enabled(r.kind())) {
            let Some(firing) = rule.evaluate(input) else {
                continue;
            };
            let kind = rule.kind();
            let confidence = self
                .adjust_confidence(firing.provisional_confidence, kind, &fp)
                .await;

            debug!(
                resource = %input.resource.id,
                kind = %kind,
                provisional = firing.provisional_confidence,
                adjusted = confidence,
                "Rule fired"
            );

            drafts.push(DraftCandidate {
                id: self.candidate_id(&input.resource.id, kind, input.now),
                resource_id: input.resource.id.clone(),
                resource_kind: input.resource.kind,
                action: firing.action,
                estimated_monthly_savings: firing.estimated_monthly_savings,
                provisional_confidence: confidence,
                rationale: firing.rationale,
                summary,
                fingerprint: fp.clone(),
                created_at: input.now,
            });
        }

        drafts
    }

    /// Move confidence toward 1 for similar past successes, toward 0 for regressions
    pub async fn adjust_confidence(&self, confidence: f64, kind: ActionKind, fp: &[f64]) -> f64 {
        let neighbors = self
            .patterns
            .nearest_for(fp, kind, self.config.pattern_neighbors)
            .await;

        let (mut signal, mut weight) = (0.0, 0.0);
        for n in neighbors
            .iter()
            .filter(|n| n.distance <= self.config.pattern_max_distance)
        {
            let w = 1.0 / (1.0 + n.distance);
            signal += match n.outcome {
                OutcomeQuality::Success => w,
                OutcomeQuality::Regression => -w,
            };
            weight += w;
        }
        if weight == 0.0 {
            return confidence;
        }

        let step = self.config.pattern_max_adjustment * (signal / weight);
        let adjusted = if step >= 0.0 {
            confidence + step * (1.0 - confidence)
        } else {
            confidence + step * confidence
        };
        adjusted.clamp(0.0, 1.0)
    }

    fn candidate_id(
        &self,
        resource_id: &str,
        kind: ActionKind,
        now: chrono::DateTime<chrono::Utc>,
    ) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut hasher = Sha256::new();
        hasher.update(resource_id.as_bytes());
        hasher.update(b"|");
        hasher.update(kind.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
        hasher.update(seq.to_le_bytes());
        hex::encode(&hasher.finalize()[..12])
    }
}
