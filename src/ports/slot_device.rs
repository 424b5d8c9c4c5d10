//! Hardware slot binding
//!
//! A device driver (PKCS#11 or otherwise) plugs in behind these traits. The
//! hardware-backed crypto token never sees anything but a [`SlotSession`].

use std::sync::Arc;

use crate::error::DeviceResult;
use crate::model::{AuthCode, KeySpec, PublicKey, SecretKeySpec};

/// Locates device slots by label
pub trait SlotFinder: Send + Sync {
    fn find(&self, label: &str) -> DeviceResult<Arc<dyn SlotDevice>>;
}

/// One slot on a security module
pub trait SlotDevice: Send + Sync {
    fn label(&self) -> &str;

    /// Opens an authenticated session; fails with `PinIncorrect` on a wrong PIN
    fn login(&self, pin: &AuthCode) -> DeviceResult<Arc<dyn SlotSession>>;
}

/// Logged-in session on a slot; key material never leaves the device
pub trait SlotSession: Send + Sync {
    fn generate_key_pair(&self, alias: &str, spec: &KeySpec) -> DeviceResult<PublicKey>;

    fn generate_secret_key(&self, alias: &str, spec: SecretKeySpec) -> DeviceResult<()>;

    fn public_key(&self, alias: &str) -> DeviceResult<Option<PublicKey>>;

    fn has_private_key(&self, alias: &str) -> DeviceResult<bool>;

    fn secret_key_spec(&self, alias: &str) -> DeviceResult<Option<SecretKeySpec>>;

    fn sign(&self, alias: &str, data: &[u8]) -> DeviceResult<Vec<u8>>;

    /// Destroys every object under the alias; returns whether any existed
    fn destroy(&self, alias: &str) -> DeviceResult<bool>;

    /// Every alias holding at least one object, in device order
    fn aliases(&self) -> DeviceResult<Vec<String>>;

    fn logout(&self);
}
