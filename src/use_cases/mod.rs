//! Use cases (orchestration)
//!
//! [`CryptoTokenManagementService`] is the one operation surface. Each call
//! checks authorization, loads the live token, mutates a copy, commits the
//! copy through the store and only then records the audit event. A failure
//! anywhere leaves both the store and the live token untouched.

mod activation;
mod keys;
mod lifecycle;
mod queries;

#[cfg(test)]
mod test_support;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::error::{TokenError, TokenResult};
use crate::logic::{AuditDetails, IdAllocator, UnchangedPolicy};
use crate::model::{Caller, KeyPolicy, TokenId};
use crate::ports::{
    AccessRule, AuditEvent, AuditEventType, AuditSink, AuditStatus, Authorizer, CryptoTokenStore,
    TokenRecord,
};
use crate::token::{CryptoToken, CryptoTokenFactory};

pub use lifecycle::NewCryptoToken;

/// Token instance built from a stored record of the given revision
struct LiveToken {
    revision: u64,
    token: CryptoToken,
}

type LiveSlot = Arc<Mutex<Option<LiveToken>>>;

/// Authorized, audited management of crypto tokens
pub struct CryptoTokenManagementService {
    authorizer: Arc<dyn Authorizer>,
    audit: Arc<dyn AuditSink>,
    store: Arc<dyn CryptoTokenStore>,
    factory: CryptoTokenFactory,
    ids: IdAllocator,
    key_policy: KeyPolicy,
    unchanged_policy: UnchangedPolicy,
    live: Mutex<HashMap<TokenId, LiveSlot>>,
}

impl CryptoTokenManagementService {
    pub fn new(
        authorizer: Arc<dyn Authorizer>,
        audit: Arc<dyn AuditSink>,
        store: Arc<dyn CryptoTokenStore>,
        factory: CryptoTokenFactory,
    ) -> Self {
        Self {
            authorizer,
            audit,
            store,
            factory,
            ids: IdAllocator::default(),
            key_policy: KeyPolicy::default(),
            unchanged_policy: UnchangedPolicy::default(),
            live: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_key_policy(mut self, key_policy: KeyPolicy) -> Self {
        self.key_policy = key_policy;
        self
    }

    pub fn with_unchanged_policy(mut self, policy: UnchangedPolicy) -> Self {
        self.unchanged_policy = policy;
        self
    }

    pub fn with_id_allocator(mut self, ids: IdAllocator) -> Self {
        self.ids = ids;
        self
    }

    pub fn factory(&self) -> &CryptoTokenFactory {
        &self.factory
    }

    fn authorize(&self, caller: &Caller, resource: &str) -> TokenResult<()> {
        if self.authorizer.is_authorized(caller, resource) {
            Ok(())
        } else {
            Err(TokenError::AuthorizationDenied {
                caller: caller.to_string(),
                resource: resource.to_string(),
            })
        }
    }

    fn authorize_on(&self, caller: &Caller, rule: AccessRule, id: TokenId) -> TokenResult<()> {
        self.authorize(caller, &rule.resource_for(id))
    }

    fn slot(&self, id: TokenId) -> LiveSlot {
        Arc::clone(self.live.lock().entry(id).or_default())
    }

    /// Runs `op` with the token's live slot locked; one token, one operation at a time
    fn with_live<T>(
        &self,
        id: TokenId,
        op: impl FnOnce(&mut Option<LiveToken>) -> TokenResult<T>,
    ) -> TokenResult<T> {
        let slot = self.slot(id);
        let mut live = slot.lock();
        op(&mut live)
    }

    /// Current record of `id`; rebuilds the live token when the record moved on
    fn refresh<'a>(
        &self,
        id: TokenId,
        live: &'a mut Option<LiveToken>,
    ) -> TokenResult<(TokenRecord, &'a mut CryptoToken)> {
        let record = self
            .store
            .get(id)?
            .ok_or(TokenError::TokenNotFound { id })?;
        let stale = live
            .as_ref()
            .map_or(true, |current| current.revision != record.revision);
        if stale {
            trace!("Building crypto token {} at revision {}", id, record.revision);
            let mut token = self.factory.create(
                &record.type_tag,
                record.id,
                &record.name,
                record.properties.clone(),
                record.data.clone(),
            )?;
            auto_activate(&mut token);
            *live = Some(LiveToken {
                revision: record.revision,
                token,
            });
        }
        match live {
            Some(current) => Ok((record, &mut current.token)),
            None => Err(TokenError::TokenNotFound { id }),
        }
    }

    /// Persists the token's configuration on top of `base` and caches it
    fn commit(
        &self,
        base: &TokenRecord,
        token: CryptoToken,
        live: &mut Option<LiveToken>,
    ) -> TokenResult<TokenRecord> {
        let (properties, data) = token.serialize();
        let mut next = base.clone();
        next.name = token.name().to_string();
        next.properties = properties;
        next.data = data;
        next.last_update = Utc::now();

        let mut tx = self.store.begin()?;
        tx.merge(next);
        let stored = tx
            .commit()?
            .pop()
            .ok_or(TokenError::TokenNotFound { id: base.id })?;
        *live = Some(LiveToken {
            revision: stored.revision,
            token,
        });
        Ok(stored)
    }

    fn record_audit(
        &self,
        caller: &Caller,
        event_type: AuditEventType,
        target_id: TokenId,
        details: AuditDetails,
    ) {
        self.audit.record(AuditEvent {
            event_type,
            status: AuditStatus::Success,
            actor: caller.to_string(),
            target_id,
            details,
        });
    }
}

impl std::fmt::Debug for CryptoTokenManagementService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoTokenManagementService")
            .field("factory", &self.factory)
            .field("key_policy", &self.key_policy)
            .field("unchanged_policy", &self.unchanged_policy)
            .finish_non_exhaustive()
    }
}

/// Activates with the stored auto-activation PIN, if any; failures only warn
fn auto_activate(token: &mut CryptoToken) {
    if token.is_active() {
        return;
    }
    let Some(pin) = token.properties().auto_activation_pin() else {
        return;
    };
    if let Err(err) = token.activate(&pin) {
        warn!("Auto-activation of crypto token {} failed: {}", token.id(), err);
    }
}
