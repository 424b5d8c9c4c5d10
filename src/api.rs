//! Default wiring of the management service

use std::sync::Arc;

use tracing::debug;

use crate::adapters::{JsonFileTokenStore, StaticAuthorizer, TracingAuditSink};
use crate::config::ManagerConfig;
use crate::error::TokenResult;
use crate::logic::IdAllocator;
use crate::ports::SlotFinder;
use crate::token::CryptoTokenFactory;
use crate::use_cases::CryptoTokenManagementService;

pub use crate::model::*;

/// Service over the configured JSON store with software tokens only
pub fn open_service(config: &ManagerConfig) -> TokenResult<CryptoTokenManagementService> {
    open_service_with_slots(config, None)
}

/// Like [`open_service`]; hardware slot tokens are available when a finder is given
pub fn open_service_with_slots(
    config: &ManagerConfig,
    slot_finder: Option<Arc<dyn SlotFinder>>,
) -> TokenResult<CryptoTokenManagementService> {
    debug!("Opening token store {}", config.store_path.display());
    let store = JsonFileTokenStore::open(&config.store_path)?;
    let factory = CryptoTokenFactory::new(config.software_settings(), slot_finder);

    Ok(CryptoTokenManagementService::new(
        Arc::new(StaticAuthorizer::new(config.access.clone())),
        Arc::new(TracingAuditSink),
        Arc::new(store),
        factory,
    )
    .with_key_policy(config.key_policy())
    .with_id_allocator(IdAllocator::new(config.id_allocation_attempts)))
}
