use std::sync::Arc;

use tracing::{debug, warn};

use super::{Backend, TokenHeader};
use crate::error::{DeviceError, TokenError, TokenResult};
use crate::model::{AuthCode, KeySpec, PublicKey, SecretKeySpec, TokenId, SLOT_LABEL_KEY};
use crate::ports::{SlotFinder, SlotSession};

/// Crypto token bound to a slot on a security module
///
/// Key material never leaves the device, so the opaque data stays empty and
/// activation is a device login.
#[derive(Clone)]
pub struct HardwareSlotToken {
    header: TokenHeader,
    finder: Arc<dyn SlotFinder>,
    session: Option<Arc<dyn SlotSession>>,
}

impl HardwareSlotToken {
    pub(crate) fn new(header: TokenHeader, finder: Arc<dyn SlotFinder>) -> TokenResult<Self> {
        let has_label = header
            .properties
            .get(SLOT_LABEL_KEY)
            .is_some_and(|label| !label.trim().is_empty());
        if !has_label {
            return Err(TokenError::InvalidProperty {
                key: SLOT_LABEL_KEY.to_string(),
                reason: "a hardware slot token needs a slot label".to_string(),
            });
        }
        Ok(Self {
            header,
            finder,
            session: None,
        })
    }

    pub fn slot_label(&self) -> &str {
        self.header
            .properties
            .get(SLOT_LABEL_KEY)
            .unwrap_or_default()
    }

    fn id(&self) -> TokenId {
        self.header.id
    }

    fn session(&self) -> TokenResult<&Arc<dyn SlotSession>> {
        self.session
            .as_ref()
            .ok_or(TokenError::TokenOffline { id: self.id() })
    }

    fn device_error(&self, err: DeviceError) -> TokenError {
        TokenError::from_device(self.id(), err)
    }
}

impl Backend for HardwareSlotToken {
    fn header(&self) -> &TokenHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut TokenHeader {
        &mut self.header
    }

    fn is_active(&self) -> bool {
        self.session.is_some()
    }

    fn activate(&mut self, code: &AuthCode) -> TokenResult<()> {
        let device = self
            .finder
            .find(self.slot_label())
            .map_err(|err| self.device_error(err))?;
        let session = device.login(code).map_err(|err| self.device_error(err))?;
        if let Some(previous) = self.session.replace(session) {
            previous.logout();
        }
        debug!(
            "Logged in to slot {} for crypto token {}",
            self.slot_label(),
            self.id()
        );
        Ok(())
    }

    fn deactivate(&mut self) {
        if let Some(session) = self.session.take() {
            session.logout();
        }
    }

    fn generate_key_pair(&mut self, spec: &KeySpec, alias: &str) -> TokenResult<PublicKey> {
        self.session()?
            .generate_key_pair(alias, spec)
            .map_err(|err| self.device_error(err))
    }

    fn generate_secret_key(&mut self, spec: SecretKeySpec, alias: &str) -> TokenResult<()> {
        self.session()?
            .generate_secret_key(alias, spec)
            .map_err(|err| self.device_error(err))
    }

    fn delete_entry(&mut self, alias: &str) -> TokenResult<bool> {
        self.session()?
            .destroy(alias)
            .map_err(|err| self.device_error(err))
    }

    fn find_public_key(&self, alias: &str) -> TokenResult<Option<PublicKey>> {
        self.session()?
            .public_key(alias)
            .map_err(|err| self.device_error(err))
    }

    fn has_private_key(&self, alias: &str) -> TokenResult<bool> {
        self.session()?
            .has_private_key(alias)
            .map_err(|err| self.device_error(err))
    }

    fn find_secret_key(&self, alias: &str) -> TokenResult<Option<SecretKeySpec>> {
        self.session()?
            .secret_key_spec(alias)
            .map_err(|err| self.device_error(err))
    }

    fn sign(&self, alias: &str, data: &[u8]) -> TokenResult<Vec<u8>> {
        self.session()?.sign(alias, data).map_err(|err| {
            warn!(
                "Signing with {} on crypto token {} failed: {}",
                alias,
                self.id(),
                err
            );
            self.device_error(err)
        })
    }

    fn aliases(&self) -> TokenResult<Vec<String>> {
        self.session()?
            .aliases()
            .map_err(|err| self.device_error(err))
    }

    fn data(&self) -> &[u8] {
        &[]
    }
}
