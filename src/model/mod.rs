mod auth_code;
mod caller;
mod info;
mod key_spec;
mod properties;
mod public_key;

pub use auth_code::{AuthCode, AuthCodeError};
pub use caller::Caller;
pub use info::{CryptoTokenInfo, KeyPairInfo, PrivateKeyHandle, SymmetricKeyHandle};
pub use key_spec::{KeyAlgorithm, KeyPolicy, KeySpec, KeySpecError, SecretKeySpec};
pub use properties::{
    TokenProperties, AUTO_ACTIVATION_PIN_KEY, KEEP_AUTO_ACTIVATION_PIN_KEY, SLOT_LABEL_KEY,
};
pub use public_key::PublicKey;

/// Identifier of a crypto token, unique and immutable once created
pub type TokenId = i32;

/// Whether a token's key material is currently unlocked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenStatus {
    Offline,
    Active,
}
