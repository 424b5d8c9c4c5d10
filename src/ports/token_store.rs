use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::model::{TokenId, TokenProperties};

/// Persisted form of a crypto token
///
/// `revision` is assigned by the store: 0 marks a record that was never
/// committed, every commit bumps it by one. A merge whose revision no longer
/// matches the stored one is rejected as a concurrent modification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub id: TokenId,
    pub name: String,
    pub type_tag: String,
    pub properties: TokenProperties,
    #[serde(with = "hex::serde", default)]
    pub data: Vec<u8>,
    pub last_update: DateTime<Utc>,
    #[serde(default)]
    pub revision: u64,
}

impl TokenRecord {
    pub fn new(
        id: TokenId,
        name: impl Into<String>,
        type_tag: impl Into<String>,
        properties: TokenProperties,
        data: Vec<u8>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            type_tag: type_tag.into(),
            properties,
            data,
            last_update: Utc::now(),
            revision: 0,
        }
    }

    pub fn is_new(&self) -> bool {
        self.revision == 0
    }
}

/// Registry persistence
pub trait CryptoTokenStore: Send + Sync {
    fn list_ids(&self) -> StoreResult<Vec<TokenId>>;

    fn get(&self, id: TokenId) -> StoreResult<Option<TokenRecord>>;

    /// Names seen so far; may lag behind the stored records
    fn cached_name_to_id(&self) -> HashMap<String, TokenId>;

    /// Opens a unit of work; dropping it without commit discards every change
    fn begin(&self) -> StoreResult<Box<dyn StoreTransaction + '_>>;
}

/// Staged changes applied atomically on commit
pub trait StoreTransaction {
    /// Stages an insert (revision 0) or an update of the record
    fn merge(&mut self, record: TokenRecord);

    /// Stages a removal; returns whether the record currently exists
    fn remove(&mut self, id: TokenId) -> StoreResult<bool>;

    /// Applies every staged change or none; returns the merged records as stored
    fn commit(self: Box<Self>) -> StoreResult<Vec<TokenRecord>>;
}
