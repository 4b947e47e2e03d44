//! Mutable table of action records keyed by id

use crate::error::{OptimizerError, OptimizerResult};
use crate::models::{ActionRecord, ActionState};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Action records, persisted as a full snapshot on every write
pub struct ActionTable {
    path: Option<PathBuf>,
    records: RwLock<HashMap<String, ActionRecord>>,
}

impl ActionTable {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Load the table from `path` if present
    pub fn open(path: PathBuf) -> Self {
        let mut records = HashMap::new();
        match super::read_json::<Vec<ActionRecord>>(&path) {
            Ok(Some(loaded)) => {
                info!(path = %path.display(), records = loaded.len(), "Loaded action records from disk");
                records = loaded.into_iter().map(|r| (r.id.clone(), r)).collect();
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Failed to load action records, starting empty");
            }
        }
        Self {
            path: Some(path),
            records: RwLock::new(records),
        }
    }

    /// Insert a record without the in-flight check
    #[cfg(test)]
    pub(crate) async fn insert(&self, record: ActionRecord) -> OptimizerResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(OptimizerError::PolicyViolation(format!(
                "action {} already exists",
                record.id
            )));
        }
        self.insert_persisted(&mut records, record)
    }

    /// Insert a record unless the resource already has one in flight
    pub async fn insert_exclusive(&self, record: ActionRecord) -> OptimizerResult<()> {
        let mut records = self.records.write().await;
        if let Some(existing) = records
            .values()
            .find(|r| r.resource_id == record.resource_id && r.is_in_flight())
        {
            return Err(OptimizerError::ConflictingInFlightAction {
                resource_id: record.resource_id.clone(),
                action_id: existing.id.clone(),
            });
        }
        if records.contains_key(&record.id) {
            return Err(OptimizerError::PolicyViolation(format!(
                "action {} already exists",
                record.id
            )));
        }
        self.insert_persisted(&mut records, record)
    }

    /// Replace an existing record; the old version stays if the write fails
    pub async fn update(&self, record: &ActionRecord) -> OptimizerResult<()> {
        let mut records = self.records.write().await;
        let Some(slot) = records.get_mut(&record.id) else {
            return Err(OptimizerError::NotFound(format!("action {}", record.id)));
        };
        let previous = std::mem::replace(slot, record.clone());
        if let Err(e) = self.persist(&records) {
            records.insert(previous.id.clone(), previous);
            return Err(e);
        }
        Ok(())
    }

    /// Drop a PENDING record that never started executing
    pub async fn withdraw(&self, id: &str) -> OptimizerResult<ActionRecord> {
        let mut records = self.records.write().await;
        match records.get(id) {
            None => return Err(OptimizerError::NotFound(format!("action {id}"))),
            Some(r) if r.state != ActionState::Pending => {
                return Err(OptimizerError::InvalidTransition {
                    from: r.state,
                    to: ActionState::Abandoned,
                })
            }
            Some(_) => {}
        }
        let Some(removed) = records.remove(id) else {
            return Err(OptimizerError::NotFound(format!("action {id}")));
        };
        if let Err(e) = self.persist(&records) {
            records.insert(removed.id.clone(), removed);
            return Err(e);
        }
        Ok(removed)
    }

    pub async fn get(&self, id: &str) -> OptimizerResult<ActionRecord> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| OptimizerError::NotFound(format!("action {id}")))
    }

    /// Records ordered by creation time, optionally filtered by state
    pub async fn list(&self, state: Option<ActionState>) -> Vec<ActionRecord> {
        let records = self.records.read().await;
        let mut out: Vec<ActionRecord> = records
            .values()
            .filter(|r| state.map_or(true, |s| r.state == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Id of the action currently in flight on a resource
    pub async fn in_flight_for(&self, resource_id: &str) -> Option<String> {
        self.records
            .read()
            .await
            .values()
            .find(|r| r.resource_id == resource_id && r.is_in_flight())
            .map(|r| r.id.clone())
    }

    /// Applied records on a resource whose effect has not been measured yet
    pub async fn awaiting_verification(&self, resource_id: &str) -> Vec<ActionRecord> {
        let mut out: Vec<ActionRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.resource_id == resource_id && r.awaits_verification())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// Records interrupted before reaching APPLIED or a terminal state
    pub async fn unfinished(&self) -> Vec<ActionRecord> {
        self.list(None)
            .await
            .into_iter()
            .filter(|r| {
                matches!(
                    r.state,
                    ActionState::Pending | ActionState::Executing | ActionState::Failed
                )
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Insert and persist; the insert is undone if the write fails
    fn insert_persisted(
        &self,
        records: &mut HashMap<String, ActionRecord>,
        record: ActionRecord,
    ) -> OptimizerResult<()> {
        let id = record.id.clone();
        records.insert(id.clone(), record);
        if let Err(e) = self.persist(records) {
            records.remove(&id);
            return Err(e);
        }
        Ok(())
    }

    fn persist(&self, records: &HashMap<String, ActionRecord>) -> OptimizerResult<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let mut snapshot: Vec<&ActionRecord> = records.values().collect();
        snapshot.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        super::write_json_atomic(path, &snapshot).map_err(OptimizerError::storage)
    }
}
