//! Scoring engine: risk classification and final confidence
//!
//! Risk comes from a fixed per-action lookup, escalated one tier for
//! production-critical resources. Confidence starts from the rule-derived
//! value and is optionally blended with an advisory confidence from the
//! reasoning service. The service is never required: when it is missing,
//! slow or returns garbage, the rule-derived score stands.

mod reasoning;

pub use reasoning::{
    parse_opinion, HttpReasoningService, ReasoningOpinion, ReasoningRequest, ReasoningService,
};

use crate::error::OptimizerError;
use crate::models::{ActionKind, Candidate, DraftCandidate, ResourceDescriptor, RiskLevel};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Scoring configuration
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Weight of the advisory confidence in the blend
    pub advisory_weight: f64,
    pub reasoning_timeout: Duration,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            advisory_weight: 0.2,
            reasoning_timeout: Duration::from_secs(15),
        }
    }
}

/// How the reasoning service took part in scoring
#[derive(Debug, Clone, PartialEq)]
pub enum ReasoningStatus {
    /// No service configured
    Skipped,
    Used,
    /// Service failed; the rule-derived score was used alone
    Failed(OptimizerError),
}

/// A finalized candidate plus how it was scored
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub reasoning: ReasoningStatus,
}

/// Base risk tier of an action kind
pub fn base_risk(kind: ActionKind) -> RiskLevel {
    match kind {
        ActionKind::Rightsize => RiskLevel::Low,
        ActionKind::ScaleReplicas => RiskLevel::Low,
        ActionKind::MigrateSpot => RiskLevel::Medium,
        ActionKind::DeleteUnusedStorage => RiskLevel::Low,
    }
}

/// Risk tier for an action on a specific resource
pub fn classify_risk(kind: ActionKind, resource: &ResourceDescriptor) -> RiskLevel {
    let risk = base_risk(kind);
    if resource.tags.production_critical {
        risk.escalate()
    } else {
        risk
    }
}

/// Weighted blend of rule and advisory confidence
pub fn blend(rule_confidence: f64, advisory: f64, weight: f64) -> f64 {
    let weight = weight.clamp(0.0, 1.0);
    ((1.0 - weight) * rule_confidence + weight * advisory).clamp(0.0, 1.0)
}

pub struct ScoringEngine {
    reasoning: Option<Arc<dyn ReasoningService>>,
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self {
            reasoning: None,
            config,
        }
    }

    pub fn with_reasoning(mut self, service: Arc<dyn ReasoningService>) -> Self {
        self.reasoning = Some(service);
        self
    }

    pub fn has_reasoning(&self) -> bool {
        self.reasoning.is_some()
    }

    /// Finalize a draft into a candidate
    pub async fn score(&self, draft: DraftCandidate, resource: &ResourceDescriptor) -> ScoredCandidate {
        let kind = draft.action.kind();
        let risk = classify_risk(kind, resource);
        let mut confidence = draft.provisional_confidence.clamp(0.0, 1.0);
        let mut rationale = draft.rationale.clone();

        let reasoning = match self.reasoning.as_ref() {
            None => ReasoningStatus::Skipped,
            Some(service) => {
                let request = ReasoningRequest {
                    resource_id: draft.resource_id.clone(),
                    resource_kind: draft.resource_kind,
                    action: draft.action.describe(&draft.resource_id),
                    summary: draft.summary,
                    rule_confidence: confidence,
                    rule_rationale: draft.rationale.clone(),
                };

                let answer = tokio::time::timeout(self.config.reasoning_timeout, service.assess(&request))
                    .await
                    .unwrap_or_else(|_| {
                        Err(OptimizerError::ReasoningServiceUnavailable(format!(
                            "no answer within {:?}",
                            self.config.reasoning_timeout
                        )))
                    });

                match answer {
                    Ok(opinion) => {
                        let blended = blend(confidence, opinion.confidence, self.config.advisory_weight);
                        debug!(
                            candidate = %draft.id,
                            rule = confidence,
                            advisory = opinion.confidence,
                            blended,
                            "Advisory confidence blended"
                        );
                        confidence = blended;
                        rationale = format!("{rationale}. Advisory: {}", opinion.rationale);
                        ReasoningStatus::Used
                    }
                    Err(e) => {
                        warn!(candidate = %draft.id, error = %e, "Reasoning service failed, using rule score");
                        ReasoningStatus::Failed(e)
                    }
                }
            }
        };

        ScoredCandidate {
            candidate: Candidate {
                id: draft.id,
                resource_id: draft.resource_id,
                resource_kind: draft.resource_kind,
                action: draft.action,
                estimated_monthly_savings: draft.estimated_monthly_savings,
                confidence,
                risk,
                rationale,
                summary: draft.summary,
                fingerprint: draft.fingerprint,
                created_at: draft.created_at,
            },
            reasoning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OptimizerResult;
    use crate::models::{ResourceKind, UtilizationSummary};
    use crate::test_support::params_for;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedReasoning {
        answer: OptimizerResult<ReasoningOpinion>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReasoningService for FixedReasoning {
        async fn assess(&self, _request: &ReasoningRequest) -> OptimizerResult<ReasoningOpinion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    struct SlowReasoning;

    #[async_trait]
    impl ReasoningService for SlowReasoning {
        async fn assess(&self, _request: &ReasoningRequest) -> OptimizerResult<ReasoningOpinion> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ReasoningOpinion {
                rationale: "late".into(),
                confidence: 1.0,
            })
        }
    }

    fn draft(kind: ActionKind, resource_id: &str, confidence: f64) -> DraftCandidate {
        DraftCandidate {
            id: "draft-1".into(),
            resource_id: resource_id.into(),
            resource_kind: ResourceKind::Volume,
            action: params_for(kind, resource_id),
            estimated_monthly_savings: 10.0,
            provisional_confidence: confidence,
            rationale: "idle".into(),
            summary: UtilizationSummary::default(),
            fingerprint: vec![0.0; 4],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_risk_lookup_and_escalation() {
        let mut vol = ResourceDescriptor::new("vol-1", ResourceKind::Volume);
        assert_eq!(classify_risk(ActionKind::DeleteUnusedStorage, &vol), RiskLevel::Low);
        assert_eq!(classify_risk(ActionKind::MigrateSpot, &vol), RiskLevel::Medium);

        vol.tags.production_critical = true;
        assert_eq!(classify_risk(ActionKind::DeleteUnusedStorage, &vol), RiskLevel::Medium);
        assert_eq!(classify_risk(ActionKind::MigrateSpot, &vol), RiskLevel::High);
    }

    #[test]
    fn test_blend() {
        assert!((blend(0.5, 1.0, 0.2) - 0.6).abs() < 1e-9);
        assert_eq!(blend(0.5, 1.0, 0.0), 0.5);
        assert_eq!(blend(0.5, 0.1, 1.0), 0.1);
    }

    #[tokio::test]
    async fn test_scoring_without_reasoning_keeps_rule_score() {
        let engine = ScoringEngine::new(ScoringConfig::default());
        let vol = ResourceDescriptor::new("vol-1", ResourceKind::Volume);
        let scored = engine
            .score(draft(ActionKind::DeleteUnusedStorage, "vol-1", 0.4), &vol)
            .await;

        assert_eq!(scored.reasoning, ReasoningStatus::Skipped);
        assert_eq!(scored.candidate.confidence, 0.4);
        assert_eq!(scored.candidate.risk, RiskLevel::Low);
        assert_eq!(scored.candidate.rationale, "idle");
    }

    #[tokio::test]
    async fn test_advisory_confidence_is_blended() {
        let service = Arc::new(FixedReasoning {
            answer: Ok(ReasoningOpinion {
                rationale: "no reads in months".into(),
                confidence: 0.9,
            }),
            calls: AtomicUsize::new(0),
        });
        let engine = ScoringEngine::new(ScoringConfig::default()).with_reasoning(service.clone());
        let vol = ResourceDescriptor::new("vol-1", ResourceKind::Volume);

        let scored = engine
            .score(draft(ActionKind::DeleteUnusedStorage, "vol-1", 0.4), &vol)
            .await;
        assert_eq!(scored.reasoning, ReasoningStatus::Used);
        assert!((scored.candidate.confidence - 0.5).abs() < 1e-9);
        assert!(scored.candidate.rationale.contains("no reads in months"));
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reasoning_failure_falls_back() {
        let service = Arc::new(FixedReasoning {
            answer: Err(OptimizerError::ReasoningMalformed("garbage".into())),
            calls: AtomicUsize::new(0),
        });
        let engine = ScoringEngine::new(ScoringConfig::default()).with_reasoning(service);
        let vol = ResourceDescriptor::new("vol-1", ResourceKind::Volume);

        let scored = engine
            .score(draft(ActionKind::DeleteUnusedStorage, "vol-1", 0.4), &vol)
            .await;
        assert!(matches!(scored.reasoning, ReasoningStatus::Failed(_)));
        assert_eq!(scored.candidate.confidence, 0.4);
    }

    #[tokio::test]
    async fn test_reasoning_timeout_falls_back() {
        let engine = ScoringEngine::new(ScoringConfig {
            reasoning_timeout: Duration::from_millis(20),
            ..Default::default()
        })
        .with_reasoning(Arc::new(SlowReasoning));
        let vol = ResourceDescriptor::new("vol-1", ResourceKind::Volume);

        let scored = engine
            .score(draft(ActionKind::DeleteUnusedStorage, "vol-1", 0.4), &vol)
            .await;
        assert!(matches!(
            scored.reasoning,
            ReasoningStatus::Failed(OptimizerError::ReasoningServiceUnavailable(_))
        ));
        assert_eq!(scored.candidate.confidence, 0.4);
    }
}
