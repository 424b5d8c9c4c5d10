//! Error types for crypto token management
//!
//! `TokenError` carries the failure taxonomy every operation surfaces to its
//! caller. Persistence, device and value-type failures have their own enums
//! and are folded into `TokenError` through `From` conversions.

use thiserror::Error;

use crate::model::TokenId;

/// Result type alias for crypto token operations
pub type TokenResult<T> = Result<T, TokenError>;

/// Top-level error type for all crypto token operations
#[derive(Error, Debug)]
pub enum TokenError {
    /// Caller lacks rights to the resource
    #[error("{caller} is not authorized to resource {resource}")]
    AuthorizationDenied { caller: String, resource: String },

    /// No constructor registered for the type tag
    #[error("Unknown crypto token type: {type_tag}")]
    UnknownTokenType { type_tag: String },

    /// No token stored under the id
    #[error("No such crypto token: {id}")]
    TokenNotFound { id: TokenId },

    /// Wrong authentication code
    #[error("Authentication failed for crypto token {id}: {reason}")]
    AuthenticationFailed { id: TokenId, reason: String },

    /// Hardware slot unreachable
    #[error("Device unavailable for crypto token {id}: {reason}")]
    DeviceUnavailable { id: TokenId, reason: String },

    /// Token must be activated first
    #[error("Crypto token {id} is offline")]
    TokenOffline { id: TokenId },

    /// Another token already uses the name
    #[error("Crypto token name already in use: {name}")]
    NameInUse { name: String },

    /// Another token already uses the id
    #[error("Crypto token id already in use: {id}")]
    IdInUse { id: TokenId },

    /// Alias bound to a key pair or secret key already
    #[error("Alias {alias} is already in use in crypto token {id}")]
    AliasInUse { id: TokenId, alias: String },

    /// Alias not bound in the token
    #[error("No entry with alias {alias} in crypto token {id}")]
    EntryNotFound { id: TokenId, alias: String },

    /// Unsupported or out-of-policy key specification
    #[error("Invalid key specification {spec}: {reason}")]
    InvalidKeySpec { spec: String, reason: String },

    /// Key pair failed its sign/verify round trip
    #[error("Key pair {alias} in crypto token {id} is defective: {reason}")]
    KeyPairDefective {
        id: TokenId,
        alias: String,
        reason: String,
    },

    /// Random id generation kept colliding
    #[error("Failed to allocate a crypto token id after {attempts} attempts")]
    AllocationExhausted { attempts: usize },

    /// Configuration property missing or malformed
    #[error("Invalid crypto token property {key}: {reason}")]
    InvalidProperty { key: String, reason: String },

    /// Persisted keystore blob cannot be parsed
    #[error("Keystore of crypto token {id} is corrupt: {reason}")]
    KeystoreCorrupt { id: TokenId, reason: String },

    /// Value-type validation errors
    #[error("Domain validation error: {0}")]
    Domain(#[from] DomainError),

    /// Persistence errors other than uniqueness conflicts
    #[error("Store error: {0}")]
    Store(StoreError),
}

/// Value-type validation errors
#[derive(Error, Debug)]
pub enum DomainError {
    /// Authentication code error
    #[error("Authentication code error: {0}")]
    AuthCode(#[from] crate::model::AuthCodeError),

    /// Key specification error
    #[error("Key specification error: {0}")]
    KeySpec(#[from] crate::model::KeySpecError),
}

/// Persistence collaborator errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Name already in use: {name}")]
    NameInUse { name: String },

    #[error("Id already in use: {id}")]
    IdInUse { id: TokenId },

    /// Record changed or vanished since it was read
    #[error("Crypto token {id} was modified concurrently")]
    ConcurrentModification { id: TokenId },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Hardware binding errors, mapped to `TokenError` by the hardware token
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Slot unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("PIN rejected by device")]
    PinIncorrect,

    #[error("Mechanism not supported: {mechanism}")]
    UnsupportedMechanism { mechanism: String },

    #[error("Device operation failed: {reason}")]
    Failure { reason: String },
}

pub type DeviceResult<T> = Result<T, DeviceError>;

impl From<StoreError> for TokenError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NameInUse { name } => TokenError::NameInUse { name },
            StoreError::IdInUse { id } => TokenError::IdInUse { id },
            other => TokenError::Store(other),
        }
    }
}

impl From<crate::model::AuthCodeError> for TokenError {
    fn from(err: crate::model::AuthCodeError) -> Self {
        TokenError::Domain(DomainError::AuthCode(err))
    }
}

impl From<crate::model::KeySpecError> for TokenError {
    fn from(err: crate::model::KeySpecError) -> Self {
        TokenError::InvalidKeySpec {
            spec: err.spec().to_string(),
            reason: err.to_string(),
        }
    }
}

impl TokenError {
    /// Attach the token id to a device failure
    pub(crate) fn from_device(id: TokenId, err: DeviceError) -> Self {
        match err {
            DeviceError::Unavailable { reason } => TokenError::DeviceUnavailable { id, reason },
            DeviceError::PinIncorrect => TokenError::AuthenticationFailed {
                id,
                reason: "PIN rejected by device".to_string(),
            },
            DeviceError::UnsupportedMechanism { mechanism } => TokenError::InvalidKeySpec {
                spec: mechanism,
                reason: "not supported by the device slot".to_string(),
            },
            DeviceError::Failure { reason } => TokenError::DeviceUnavailable { id, reason },
        }
    }
}
