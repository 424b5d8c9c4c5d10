use serde::Serialize;

use super::{KeyAlgorithm, PublicKey, SecretKeySpec, TokenId, TokenProperties};

/// Read-only projection of a crypto token; never carries the auto-activation PIN
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoTokenInfo {
    pub id: TokenId,
    pub name: String,
    pub type_tag: String,
    pub active: bool,
    pub auto_activation: bool,
    pub properties: TokenProperties,
}

/// Description of a key pair discovered in a token's key store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPairInfo {
    pub alias: String,
    pub algorithm: KeyAlgorithm,
    pub key_specification: String,
    pub subject_key_id: String,
}

impl KeyPairInfo {
    pub fn new(alias: impl Into<String>, public_key: &PublicKey) -> Self {
        Self {
            alias: alias.into(),
            algorithm: public_key.algorithm(),
            key_specification: public_key.key_specification(),
            subject_key_id: public_key.subject_key_id(),
        }
    }
}

/// Reference to a private key; the key material itself stays in the token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateKeyHandle {
    pub token_id: TokenId,
    pub alias: String,
    pub algorithm: KeyAlgorithm,
}

/// Reference to a secret key; the key material itself stays in the token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymmetricKeyHandle {
    pub token_id: TokenId,
    pub alias: String,
    pub spec: SecretKeySpec,
}
