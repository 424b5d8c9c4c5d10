use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) use crate::adapters::{InMemoryTokenStore, MemoryAuditSink, SimulatedHsm, SimulatedSlot, StaticAuthorizer};
pub(crate) use crate::error::TokenError;
pub(crate) use crate::ports::{AuditEventType, CryptoTokenStore};

use super::{CryptoTokenManagementService, NewCryptoToken};
use crate::error::{StoreError, StoreResult};
use crate::model::{AuthCode, Caller, TokenId, TokenProperties, AUTO_ACTIVATION_PIN_KEY, SLOT_LABEL_KEY};
use crate::ports::{AccessRule, StoreTransaction, TokenRecord};
use crate::token::{CryptoTokenFactory, SoftwareSettings, HARDWARE_SLOT_TYPE, SOFTWARE_TYPE};

pub(crate) const SLOT_LABEL: &str = "slot-1";
pub(crate) const SLOT_PIN: &str = "1234";
/// The one token id the viewer may see
pub(crate) const VIEWABLE_ID: TokenId = 1;

pub(crate) fn admin() -> Caller {
    Caller::new("admin")
}

pub(crate) fn viewer() -> Caller {
    Caller::new("viewer")
}

pub(crate) fn code(value: &str) -> AuthCode {
    AuthCode::new(value).unwrap()
}

pub(crate) fn slot_properties() -> TokenProperties {
    [(SLOT_LABEL_KEY, SLOT_LABEL)].into_iter().collect()
}

fn authorizer() -> StaticAuthorizer {
    StaticAuthorizer::default()
        .grant("admin", "/")
        .grant("viewer", AccessRule::View.resource_for(VIEWABLE_ID))
        .grant("activator", AccessRule::Activate.resource())
        .grant("activator", AccessRule::Deactivate.resource())
}

/// In-memory store whose next commit can be made to fail
#[derive(Debug, Default)]
pub(crate) struct FlakyStore {
    inner: InMemoryTokenStore,
    fail_next: AtomicBool,
}

impl FlakyStore {
    pub(crate) fn fail_next_commit(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

struct FlakyTransaction<'a> {
    inner: Box<dyn StoreTransaction + 'a>,
    fail: bool,
}

impl StoreTransaction for FlakyTransaction<'_> {
    fn merge(&mut self, record: TokenRecord) {
        self.inner.merge(record);
    }

    fn remove(&mut self, id: TokenId) -> StoreResult<bool> {
        self.inner.remove(id)
    }

    fn commit(self: Box<Self>) -> StoreResult<Vec<TokenRecord>> {
        if self.fail {
            return Err(StoreError::Io(io::Error::other("injected commit failure")));
        }
        self.inner.commit()
    }
}

impl CryptoTokenStore for FlakyStore {
    fn list_ids(&self) -> StoreResult<Vec<TokenId>> {
        self.inner.list_ids()
    }

    fn get(&self, id: TokenId) -> StoreResult<Option<TokenRecord>> {
        self.inner.get(id)
    }

    fn cached_name_to_id(&self) -> HashMap<String, TokenId> {
        self.inner.cached_name_to_id()
    }

    fn begin(&self) -> StoreResult<Box<dyn StoreTransaction + '_>> {
        Ok(Box::new(FlakyTransaction {
            inner: self.inner.begin()?,
            fail: self.fail_next.swap(false, Ordering::SeqCst),
        }))
    }
}

pub(crate) fn factory(hsm: Arc<SimulatedHsm>) -> CryptoTokenFactory {
    CryptoTokenFactory::new(SoftwareSettings { kdf_iterations: 10 }, Some(hsm))
}

/// Service over any store, with the fixture's grants and a fresh device
pub(crate) fn service_over(store: Arc<dyn CryptoTokenStore>) -> CryptoTokenManagementService {
    let hsm = Arc::new(SimulatedHsm::new());
    hsm.add_slot(SLOT_LABEL, SLOT_PIN);
    CryptoTokenManagementService::new(
        Arc::new(authorizer()),
        Arc::new(MemoryAuditSink::new()),
        store,
        factory(hsm),
    )
}

pub(crate) struct Fixture {
    pub service: CryptoTokenManagementService,
    pub store: Arc<FlakyStore>,
    pub audit: Arc<MemoryAuditSink>,
    pub hsm: Arc<SimulatedHsm>,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        let store = Arc::new(FlakyStore::default());
        let audit = Arc::new(MemoryAuditSink::new());
        let hsm = Arc::new(SimulatedHsm::new());
        hsm.add_slot(SLOT_LABEL, SLOT_PIN);
        let service = CryptoTokenManagementService::new(
            Arc::new(authorizer()),
            audit.clone(),
            store.clone(),
            factory(hsm.clone()),
        );
        Self {
            service,
            store,
            audit,
            hsm,
        }
    }

    /// Second service over the same store and device, with an empty live cache
    pub(crate) fn reopened_service(&self) -> CryptoTokenManagementService {
        CryptoTokenManagementService::new(
            Arc::new(authorizer()),
            self.audit.clone(),
            self.store.clone(),
            factory(self.hsm.clone()),
        )
    }

    pub(crate) fn slot(&self) -> SimulatedSlot {
        self.hsm.slot(SLOT_LABEL).unwrap()
    }

    /// Activated software token without auto-activation
    pub(crate) fn software_token(&self, name: &str, auth_code: &str) -> TokenId {
        self.service
            .create_crypto_token(
                &admin(),
                NewCryptoToken::new(name, SOFTWARE_TYPE).with_auth_code(code(auth_code)),
            )
            .unwrap()
    }

    /// Software token sealed under `pin`, which is also its auto-activation PIN
    pub(crate) fn software_token_with_pin(&self, name: &str, pin: &str) -> TokenId {
        let properties: TokenProperties = [(AUTO_ACTIVATION_PIN_KEY, pin)].into_iter().collect();
        self.service
            .create_crypto_token(
                &admin(),
                NewCryptoToken::new(name, SOFTWARE_TYPE)
                    .with_properties(properties)
                    .with_auth_code(code(pin)),
            )
            .unwrap()
    }

    /// Offline software token with an uninitialized keystore
    pub(crate) fn software_token_with_id(&self, id: TokenId, name: &str) -> TokenId {
        self.service
            .create_crypto_token(&admin(), NewCryptoToken::new(name, SOFTWARE_TYPE).with_id(id))
            .unwrap()
    }

    /// Hardware token on the fixture slot, activated and auto-activating when `pin` is given
    pub(crate) fn hardware_token(&self, name: &str, pin: Option<&str>) -> TokenId {
        let mut properties = slot_properties();
        let mut request = NewCryptoToken::new(name, HARDWARE_SLOT_TYPE);
        if let Some(pin) = pin {
            properties.insert(AUTO_ACTIVATION_PIN_KEY, pin);
            request = request.with_auth_code(code(pin));
        }
        self.service
            .create_crypto_token(&admin(), request.with_properties(properties))
            .unwrap()
    }
}
