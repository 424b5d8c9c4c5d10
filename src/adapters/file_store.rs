use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::store_state::{CommitTarget, StagedChange, StagedTransaction, StoreState};
use crate::error::StoreResult;
use crate::model::TokenId;
use crate::ports::{CryptoTokenStore, StoreTransaction, TokenRecord};

/// Store persisted as one JSON document
///
/// Every commit writes a complete snapshot to a sibling temporary file and
/// renames it over the document, so readers never observe a partial commit.
#[derive(Debug)]
pub struct JsonFileTokenStore {
    path: PathBuf,
    state: RwLock<StoreState>,
    names: Mutex<HashMap<String, TokenId>>,
}

impl JsonFileTokenStore {
    /// Opens the document at `path`; a missing file is an empty store
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("No token store at {}, starting empty", path.display());
                StoreState::default()
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            state: RwLock::new(state),
            names: Mutex::new(HashMap::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_snapshot(&self, state: &StoreState) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        fs::write(&temp, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&temp, &self.path)?;
        info!(
            "Wrote {} crypto token records to {}",
            state.records.len(),
            self.path.display()
        );
        Ok(())
    }
}

impl CommitTarget for JsonFileTokenStore {
    fn contains(&self, id: TokenId) -> StoreResult<bool> {
        Ok(self.state.read().records.contains_key(&id))
    }

    fn apply(&self, changes: Vec<StagedChange>) -> StoreResult<Vec<TokenRecord>> {
        let mut state = self.state.write();
        let mut next = state.clone();
        let merged = next.apply(changes)?;
        self.write_snapshot(&next)?;
        *self.names.lock() = next.name_to_id();
        *state = next;
        Ok(merged)
    }
}

impl CryptoTokenStore for JsonFileTokenStore {
    fn list_ids(&self) -> StoreResult<Vec<TokenId>> {
        Ok(self.state.read().records.keys().copied().collect())
    }

    fn get(&self, id: TokenId) -> StoreResult<Option<TokenRecord>> {
        let record = self.state.read().records.get(&id).cloned();
        if let Some(record) = &record {
            let mut names = self.names.lock();
            names.retain(|_, cached| *cached != record.id);
            names.insert(record.name.clone(), record.id);
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
