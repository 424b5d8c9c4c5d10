use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};

use super::store_state::{CommitTarget, StagedChange, StagedTransaction, StoreState};
use crate::error::StoreResult;
use crate::model::TokenId;
use crate::ports::{CryptoTokenStore, StoreTransaction, TokenRecord};

/// Store that keeps every record in process memory
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    state: RwLock<StoreState>,
    names: Mutex<HashMap<String, TokenId>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn cache_name(&self, record: &TokenRecord) {
        let mut names = self.names.lock();
        names.retain(|_, id| *id != record.id);
        names.insert(record.name.clone(), record.id);
    }
}

impl CommitTarget for InMemoryTokenStore {
    fn contains(&self, id: TokenId) -> StoreResult<bool> {
        Ok(self.state.read().records.contains_key(&id))
    }

    fn apply(&self, changes: Vec<StagedChange>) -> StoreResult<Vec<TokenRecord>> {
        let removed: Vec<TokenId> = changes
            .iter()
            .filter_map(|change| match change {
                StagedChange::Remove(id) => Some(*id),
                StagedChange::Merge(_) => None,
            })
            .collect();

        let merged = self.state.write().apply(changes)?;

        self.names.lock().retain(|_, id| !removed.contains(id));
        for record in &merged {
            self.cache_name(record);
        }
        Ok(merged)
    }
}

impl CryptoTokenStore for InMemoryTokenStore {
    fn list_ids(&self) -> StoreResult<Vec<TokenId>> {
        Ok(self.state.read().records.keys().copied().collect())
    }

    fn get(&self, id: TokenId) -> StoreResult<Option<TokenRecord>> {
        let record = self.state.read().records.get(&id).cloned();
        if let Some(record) = &record {
            self.cache_name(record);
        }
        Ok(record)
    }

    fn cached_name_to_id(&self) -> HashMap<String, TokenId> {
        self.names.lock().clone()
    }

    fn begin(&self) -> StoreResult<Box<dyn StoreTransaction + '_>> {
        Ok(Box::new(StagedTransaction::new(self)))
    }
}
