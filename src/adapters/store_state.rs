//! Commit rules shared by the store adapters

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::model::TokenId;
use crate::ports::{StoreTransaction, TokenRecord};

/// Change staged inside a transaction
#[derive(Debug, Clone)]
pub(crate) enum StagedChange {
    Merge(TokenRecord),
    Remove(TokenId),
}

/// Snapshot of every stored record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    pub records: BTreeMap<TokenId, TokenRecord>,
}

impl StoreState {
    /// Applies the changes in order, all or nothing
    ///
    /// Returns the merged records as stored, with their new revision and
    /// update time.
    pub fn apply(&mut self, changes: Vec<StagedChange>) -> StoreResult<Vec<TokenRecord>> {
        let mut next = self.clone();
        let mut merged = Vec::new();
        let now = Utc::now();

        for change in changes {
            match change {
                StagedChange::Merge(mut record) => {
                    match next.records.get(&record.id) {
                        Some(_) if record.is_new() => {
                            return Err(StoreError::IdInUse { id: record.id });
                        }
                        Some(current) if current.revision != record.revision => {
                            return Err(StoreError::ConcurrentModification { id: record.id });
                        }
                        None if !record.is_new() => {
                            return Err(StoreError::ConcurrentModification { id: record.id });
                        }
                        _ => {}
                    }
                    record.revision += 1;
                    record.last_update = now;
                    next.records.insert(record.id, record.clone());
                    merged.push(record);
                }
                StagedChange::Remove(id) => {
                    next.records.remove(&id);
                }
            }
        }

        next.check_unique_names()?;
        *self = next;
        Ok(merged)
    }

    fn check_unique_names(&self) -> StoreResult<()> {
        let mut seen: HashMap<&str, TokenId> = HashMap::new();
        for record in self.records.values() {
            if let Some(other) = seen.insert(record.name.as_str(), record.id) {
                if other != record.id {
                    return Err(StoreError::NameInUse {
                        name: record.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn name_to_id(&self) -> HashMap<String, TokenId> {
        self.records
            .values()
            .map(|record| (record.name.clone(), record.id))
            .collect()
    }
}

/// Where a transaction's staged changes end up
pub(crate) trait CommitTarget {
    fn contains(&self, id: TokenId) -> StoreResult<bool>;

    fn apply(&self, changes: Vec<StagedChange>) -> StoreResult<Vec<TokenRecord>>;
}

/// Transaction that stages changes in memory until commit
pub(crate) struct StagedTransaction<'a, T: CommitTarget> {
    target: &'a T,
    changes: Vec<StagedChange>,
}

impl<'a, T: CommitTarget> StagedTransaction<'a, T> {
    pub fn new(target: &'a T) -> Self {
        Self {
            target,
            changes: Vec::new(),
        }
    }
}

impl<T: CommitTarget> StoreTransaction for StagedTransaction<'_, T> {
    fn merge(&mut self, record: TokenRecord) {
        self.changes.push(StagedChange::Merge(record));
    }

    fn remove(&mut self, id: TokenId) -> StoreResult<bool> {
        let exists = self.target.contains(id)?;
        if exists {
            self.changes.push(StagedChange::Remove(id));
        }
        Ok(exists)
    }

    fn commit(mut self: Box<Self>) -> StoreResult<Vec<TokenRecord>> {
        let changes = std::mem::take(&mut self.changes);
        self.target.apply(changes)
    }
}

impl<T: CommitTarget> Drop for StagedTransaction<'_, T> {
    fn drop(&mut self) {
        if !self.changes.is_empty() {
            debug!("Rolled back {} staged store changes", self.changes.len());
        }
    }
}
