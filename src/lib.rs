//! Lifecycle management for crypto tokens
//!
//! A crypto token is a named container of key material: either a software
//! keystore sealed under an authentication code or a binding to a hardware
//! slot. [`CryptoTokenManagementService`] creates, edits, deletes, activates
//! and deactivates tokens and manages their keys, checking authorization and
//! recording an audit event for every mutation.
//!
//! [`api::open_service`] wires the service from a [`ManagerConfig`] with the
//! JSON file store, static grants and the tracing audit sink.

pub mod adapters;
pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod ports;
pub mod token;
pub mod use_cases;

// Re-export commonly used types
pub use config::{ConfigError, ManagerConfig};
pub use error::{TokenError, TokenResult};
pub use token::{CryptoToken, CryptoTokenFactory, SoftwareSettings, HARDWARE_SLOT_TYPE, SOFTWARE_TYPE};
pub use use_cases::{CryptoTokenManagementService, NewCryptoToken};

// Re-export public API
pub use api::{open_service, open_service_with_slots};
