//! Adapters - concrete implementations of ports (traits)

mod audit;
mod authorizer;
mod file_store;
mod memory_store;
mod simulated_hsm;
mod store_state;

pub use audit::{MemoryAuditSink, TracingAuditSink};
pub use authorizer::{AllowAllAuthorizer, StaticAuthorizer};
pub use file_store::JsonFileTokenStore;
pub use memory_store::InMemoryTokenStore;
pub use simulated_hsm::{SimulatedHsm, SimulatedSlot};
