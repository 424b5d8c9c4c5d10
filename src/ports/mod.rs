//! Ports for every collaborator the management service depends on
//!
//! The core depends on these traits, not on the concrete stores, sinks,
//! authorizers and device bindings in `adapters`.

mod audit_sink;
mod authorizer;
mod slot_device;
mod token_store;


pub use audit_sink::{AuditEvent, AuditEventType, AuditSink, AuditStatus};
pub use authorizer::{AccessRule, Authorizer};
pub use slot_device::{SlotDevice, SlotFinder, SlotSession};
pub use token_store::{CryptoTokenStore, StoreTransaction, TokenRecord};
