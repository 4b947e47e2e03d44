//! Append-only audit log of candidates, decisions and operator reviews
//!
//! Every line of the log file is one JSON entry. Entries are never rewritten;
//! the in-memory index is rebuilt from the file on startup.

use crate::error::{OptimizerError, OptimizerResult};
use crate::models::{ActionKind, Candidate, Decision, DecisionOutcome, Review};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// One line of the audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum AuditEntry {
    Candidate(Candidate),
    Decision(Decision),
    Review(Review),
}

/// A held decision still waiting for an operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDecision {
    pub candidate: Candidate,
    pub decision: Decision,
}

/// A decision together with its candidate and review, if any
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionView {
    pub candidate: Candidate,
    pub decision: Decision,
    pub review: Option<Review>,
}

#[derive(Default)]
struct AuditIndex {
    candidates: HashMap<String, Candidate>,
    decisions: Vec<Decision>,
    decision_by_candidate: HashMap<String, usize>,
    reviews: HashMap<String, Review>,
}

impl AuditIndex {
    fn apply(&mut self, entry: AuditEntry) {
        match entry {
            AuditEntry::Candidate(candidate) => {
                self.candidates.insert(candidate.id.clone(), candidate);
            }
            AuditEntry::Decision(decision) => {
                self.decision_by_candidate
                    .insert(decision.candidate_id.clone(), self.decisions.len());
                self.decisions.push(decision);
            }
            AuditEntry::Review(review) => {
                self.reviews.insert(review.candidate_id.clone(), review);
            }
        }
    }

    fn decision(&self, candidate_id: &str) -> Option<&Decision> {
        self.decision_by_candidate
            .get(candidate_id)
            .and_then(|&idx| self.decisions.get(idx))
    }

    fn is_pending(&self, candidate_id: &str) -> bool {
        self.decision(candidate_id)
            .map_or(false, |d| d.outcome == DecisionOutcome::HeldForApproval)
            && !self.reviews.contains_key(candidate_id)
    }
}

/// Audit log backed by a JSON-lines file (or memory only)
pub struct AuditLog {
    path: Option<PathBuf>,
    index: RwLock<AuditIndex>,
}

impl AuditLog {
    /// Audit log that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            index: RwLock::new(AuditIndex::default()),
        }
    }

    /// Open (or create) the log at `path` and replay existing entries
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let mut index = AuditIndex::default();

        if path.exists() {
            let file = std::fs::File::open(&path)
                .with_context(|| format!("Failed to open audit log {:?}", path))?;
            let mut replayed = 0usize;
            for (line_no, line) in BufReader::new(file).lines().enumerate() {
                let line = line.with_context(|| format!("Failed to read audit log {:?}", path))?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<AuditEntry>(&line) {
                    Ok(entry) => {
                        index.apply(entry);
                        replayed += 1;
                    }
                    Err(e) => {
                        warn!(line = line_no + 1, error = %e, "Skipping unreadable audit entry");
                    }
                }
            }
            info!(path = %path.display(), entries = replayed, "Replayed audit log");
        }

        Ok(Self {
            path: Some(path),
            index: RwLock::new(index),
        })
    }

    /// Record a scored candidate and the policy decision made about it
    pub async fn record(&self, candidate: &Candidate, decision: &Decision) -> OptimizerResult<()> {
        if candidate.id != decision.candidate_id {
            return Err(OptimizerError::PolicyViolation(format!(
                "decision for {} recorded against candidate {}",
                decision.candidate_id, candidate.id
            )));
        }

        let mut index = self.index.write().await;
        if index.decision(&candidate.id).is_some() {
            return Err(OptimizerError::PolicyViolation(format!(
                "candidate {} already has a decision",
                candidate.id
            )));
        }

        let entries = [
            AuditEntry::Candidate(candidate.clone()),
            AuditEntry::Decision(decision.clone()),
        ];
        self.append(&entries)?;
        for entry in entries {
            index.apply(entry);
        }
        Ok(())
    }

    /// Record an operator review for a held decision
    pub async fn record_review(&self, review: &Review) -> OptimizerResult<()> {
        let mut index = self.index.write().await;
        if index.decision(&review.candidate_id).is_none() {
            return Err(OptimizerError::NotFound(format!(
                "decision for candidate {}",
                review.candidate_id
            )));
        }
        if !index.is_pending(&review.candidate_id) {
            return Err(OptimizerError::PolicyViolation(format!(
                "candidate {} is not awaiting approval",
                review.candidate_id
            )));
        }

        let entry = AuditEntry::Review(review.clone());
        self.append(std::slice::from_ref(&entry))?;
        index.apply(entry);
        Ok(())
    }

    /// Held decisions without a review, oldest first
    pub async fn pending(&self) -> Vec<PendingDecision> {
        let index = self.index.read().await;
        index
            .decisions
            .iter()
            .filter(|d| index.is_pending(&d.candidate_id))
            .filter_map(|d| {
                index.candidates.get(&d.candidate_id).map(|c| PendingDecision {
                    candidate: c.clone(),
                    decision: d.clone(),
                })
            })
            .collect()
    }

    /// The held, unreviewed decision for a candidate
    pub async fn pending_for(&self, candidate_id: &str) -> OptimizerResult<PendingDecision> {
        let index = self.index.read().await;
        let decision = index
            .decision(candidate_id)
            .ok_or_else(|| OptimizerError::NotFound(format!("decision for candidate {candidate_id}")))?;
        if !index.is_pending(candidate_id) {
            return Err(OptimizerError::PolicyViolation(format!(
                "candidate {candidate_id} is not awaiting approval"
            )));
        }
        let candidate = index
            .candidates
            .get(candidate_id)
            .ok_or_else(|| OptimizerError::NotFound(format!("candidate {candidate_id}")))?;
        Ok(PendingDecision {
            candidate: candidate.clone(),
            decision: decision.clone(),
        })
    }

    /// Whether a resource already has a held candidate of this kind
    pub async fn has_pending(&self, resource_id: &str, kind: ActionKind) -> bool {
        let index = self.index.read().await;
        index.decisions.iter().any(|d| {
            d.resource_id == resource_id
                && index.is_pending(&d.candidate_id)
                && index
                    .candidates
                    .get(&d.candidate_id)
                    .map_or(false, |c| c.kind() == kind)
        })
    }

    /// Most recent decisions first
    pub async fn decisions(&self, limit: usize) -> Vec<DecisionView> {
        let index = self.index.read().await;
        index
            .decisions
            .iter()
            .rev()
            .take(limit)
            .filter_map(|d| {
                index.candidates.get(&d.candidate_id).map(|c| DecisionView {
                    candidate: c.clone(),
                    decision: d.clone(),
                    review: index.reviews.get(&d.candidate_id).cloned(),
                })
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.decisions.len()
    }

    fn append(&self, entries: &[AuditEntry]) -> OptimizerResult<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };

        let mut buf = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut buf, entry)
                .context("Failed to serialize audit entry")
                .map_err(OptimizerError::storage)?;
            buf.push(b'\n');
        }

        let write = || -> anyhow::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open audit log {:?}", path))?;
            file.write_all(&buf).context("Failed to append audit entry")?;
            file.sync_data().context("Failed to sync audit log")?;
            Ok(())
        };
        write().map_err(OptimizerError::storage)
    }
}
