//! Crypto token variants behind one contract
//!
//! A [`CryptoToken`] is always rebuilt from its persisted configuration by
//! the [`CryptoTokenFactory`]; it starts offline and holds decrypted key
//! material or a device session only while active.

mod factory;
mod hardware;
pub(crate) mod keystore;
mod software;

use tracing::debug;

use crate::error::{TokenError, TokenResult};
use crate::logic::key_material;
use crate::model::{
    AuthCode, KeySpec, PrivateKeyHandle, PublicKey, SecretKeySpec, SymmetricKeyHandle, TokenId,
    TokenProperties, TokenStatus,
};

pub use factory::{CryptoTokenFactory, SoftwareSettings, HARDWARE_SLOT_TYPE, SOFTWARE_TYPE};
pub use hardware::HardwareSlotToken;
pub use software::SoftwareToken;

/// Identity and configuration shared by every variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    pub id: TokenId,
    pub name: String,
    pub properties: TokenProperties,
}

/// Aliases bound in a token at the time of listing
///
/// Iterating borrows the snapshot, so the sequence can be walked any number
/// of times.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aliases(Vec<String>);

impl Aliases {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.iter().any(|a| a == alias)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl<'a> IntoIterator for &'a Aliases {
    type Item = &'a str;
    type IntoIter = std::iter::Map<std::slice::Iter<'a, String>, fn(&'a String) -> &'a str>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter().map(String::as_str as fn(&'a String) -> &'a str)
    }
}

/// Operations each variant implements; the shared contract is built on top
trait Backend {
    fn header(&self) -> &TokenHeader;

    fn header_mut(&mut self) -> &mut TokenHeader;

    fn is_active(&self) -> bool;

    fn activate(&mut self, code: &AuthCode) -> TokenResult<()>;

    fn deactivate(&mut self);

    fn generate_key_pair(&mut self, spec: &KeySpec, alias: &str) -> TokenResult<PublicKey>;

    fn generate_secret_key(&mut self, spec: SecretKeySpec, alias: &str) -> TokenResult<()>;

    /// Removes the alias; `Ok(false)` when nothing was bound to it
    fn delete_entry(&mut self, alias: &str) -> TokenResult<bool>;

    fn find_public_key(&self, alias: &str) -> TokenResult<Option<PublicKey>>;

    fn has_private_key(&self, alias: &str) -> TokenResult<bool>;

    fn find_secret_key(&self, alias: &str) -> TokenResult<Option<SecretKeySpec>>;

    fn sign(&self, alias: &str, data: &[u8]) -> TokenResult<Vec<u8>>;

    fn aliases(&self) -> TokenResult<Vec<String>>;

    fn data(&self) -> &[u8];
}

/// One crypto token instance
#[derive(Clone)]
pub enum CryptoToken {
    Software(SoftwareToken),
    HardwareSlot(HardwareSlotToken),
}

impl CryptoToken {
    fn backend(&self) -> &dyn Backend {
        match self {
            CryptoToken::Software(token) => token,
            CryptoToken::HardwareSlot(token) => token,
        }
    }

    fn backend_mut(&mut self) -> &mut dyn Backend {
        match self {
            CryptoToken::Software(token) => token,
            CryptoToken::HardwareSlot(token) => token,
        }
    }

    pub fn id(&self) -> TokenId {
        self.backend().header().id
    }

    pub fn name(&self) -> &str {
        &self.backend().header().name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.backend_mut().header_mut().name = name.into();
    }

    pub fn type_tag(&self) -> &'static str {
        match self {
            CryptoToken::Software(_) => SOFTWARE_TYPE,
            CryptoToken::HardwareSlot(_) => HARDWARE_SLOT_TYPE,
        }
    }

    pub fn properties(&self) -> &TokenProperties {
        &self.backend().header().properties
    }

    pub fn properties_mut(&mut self) -> &mut TokenProperties {
        &mut self.backend_mut().header_mut().properties
    }

    pub fn status(&self) -> TokenStatus {
        if self.backend().is_active() {
            TokenStatus::Active
        } else {
            TokenStatus::Offline
        }
    }

    pub fn is_active(&self) -> bool {
        self.status() == TokenStatus::Active
    }

    pub fn activate(&mut self, code: &AuthCode) -> TokenResult<()> {
        self.backend_mut().activate(code)?;
        debug!("Activated crypto token {}", self.id());
        Ok(())
    }

    /// Idempotent; an offline token stays offline
    pub fn deactivate(&mut self) {
        if self.is_active() {
            self.backend_mut().deactivate();
            debug!("Deactivated crypto token {}", self.id());
        }
    }

    pub fn generate_key_pair(&mut self, spec: &KeySpec, alias: &str) -> TokenResult<PublicKey> {
        self.require_active()?;
        self.backend_mut().generate_key_pair(spec, alias)
    }

    pub fn generate_secret_key(&mut self, spec: SecretKeySpec, alias: &str) -> TokenResult<()> {
        self.require_active()?;
        self.backend_mut().generate_secret_key(spec, alias)
    }

    /// Sign/verify round trip with the key pair under `alias`
    pub fn test_key_pair(&self, alias: &str) -> TokenResult<()> {
        let public_key = self.public_key(alias)?;
        if !self.backend().has_private_key(alias)? {
            return Err(self.entry_not_found(alias));
        }

        let data = key_material::challenge();
        let defective = |reason: String| TokenError::KeyPairDefective {
            id: self.id(),
            alias: alias.to_string(),
            reason,
        };
        let signature = match self.backend().sign(alias, &data) {
            Ok(signature) => signature,
            Err(TokenError::TokenOffline { id }) => return Err(TokenError::TokenOffline { id }),
            Err(err) => return Err(defective(err.to_string())),
        };
        if !public_key.verify(&data, &signature) {
            return Err(defective("signature does not verify".to_string()));
        }
        Ok(())
    }

    pub fn delete_entry(&mut self, alias: &str) -> TokenResult<()> {
        self.require_active()?;
        if self.backend_mut().delete_entry(alias)? {
            Ok(())
        } else {
            Err(self.entry_not_found(alias))
        }
    }

    pub fn public_key(&self, alias: &str) -> TokenResult<PublicKey> {
        self.require_active()?;
        self.backend()
            .find_public_key(alias)?
            .ok_or_else(|| self.entry_not_found(alias))
    }

    pub fn private_key_handle(&self, alias: &str) -> TokenResult<PrivateKeyHandle> {
        let public_key = self.public_key(alias)?;
        if !self.backend().has_private_key(alias)? {
            return Err(self.entry_not_found(alias));
        }
        Ok(PrivateKeyHandle {
            token_id: self.id(),
            alias: alias.to_string(),
            algorithm: public_key.algorithm(),
        })
    }

    pub fn symmetric_key_handle(&self, alias: &str) -> TokenResult<SymmetricKeyHandle> {
        self.require_active()?;
        let spec = self
            .backend()
            .find_secret_key(alias)?
            .ok_or_else(|| self.entry_not_found(alias))?;
        Ok(SymmetricKeyHandle {
            token_id: self.id(),
            alias: alias.to_string(),
            spec,
        })
    }

    pub fn aliases(&self) -> TokenResult<Aliases> {
        self.require_active()?;
        self.backend().aliases().map(Aliases)
    }

    /// Aliases that hold both a public and a private key
    pub fn key_pair_aliases(&self) -> TokenResult<Vec<String>> {
        let mut result = Vec::new();
        for alias in self.aliases()?.into_vec() {
            if self.backend().find_public_key(&alias)?.is_some()
                && self.backend().has_private_key(&alias)?
            {
                result.push(alias);
            }
        }
        Ok(result)
    }

    /// Whether any public, private or secret key is bound to `alias`
    pub fn is_alias_used(&self, alias: &str) -> TokenResult<bool> {
        self.require_active()?;
        let backend = self.backend();
        Ok(backend.find_public_key(alias)?.is_some()
            || backend.has_private_key(alias)?
            || backend.find_secret_key(alias)?.is_some())
    }

    /// Properties and opaque data to persist
    pub fn serialize(&self) -> (TokenProperties, Vec<u8>) {
        (self.properties().clone(), self.backend().data().to_vec())
    }

    pub fn data(&self) -> &[u8] {
        self.backend().data()
    }

    pub fn as_software(&self) -> Option<&SoftwareToken> {
        match self {
            CryptoToken::Software(token) => Some(token),
            CryptoToken::HardwareSlot(_) => None,
        }
    }

    fn require_active(&self) -> TokenResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(TokenError::TokenOffline { id: self.id() })
        }
    }

    fn entry_not_found(&self, alias: &str) -> TokenError {
        TokenError::EntryNotFound {
            id: self.id(),
            alias: alias.to_string(),
        }
    }
}

impl std::fmt::Debug for CryptoToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoToken")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("type", &self.type_tag())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::adapters::SimulatedHsm;
    use crate::model::SLOT_LABEL_KEY;
    use crate::ports::contract_tests::token_contract::{self, TokenUnderTest};

    fn software_token() -> TokenUnderTest {
        let factory = CryptoTokenFactory::software_only(SoftwareSettings { kdf_iterations: 10 });
        let mut token = factory
            .create(SOFTWARE_TYPE, 1, "soft", TokenProperties::new(), Vec::new())
            .unwrap();
        let code = AuthCode::new("foo123").unwrap();
        // Seal the keystore once so a wrong code has something to fail against
        token.activate(&code).unwrap();
        token.deactivate();
        TokenUnderTest { token, code }
    }

    fn hardware_token() -> TokenUnderTest {
        let hsm = SimulatedHsm::new();
        hsm.add_slot("slot-1", "1234");
        let factory = CryptoTokenFactory::new(SoftwareSettings::default(), Some(Arc::new(hsm)));
        let properties: TokenProperties = [(SLOT_LABEL_KEY, "slot-1")].into_iter().collect();
        let token = factory
            .create(HARDWARE_SLOT_TYPE, 2, "hard", properties, Vec::new())
            .unwrap();
        TokenUnderTest {
            token,
            code: AuthCode::new("1234").unwrap(),
        }
    }

    crate::contract_tests_for!(
        software_token_contract,
        make = software_token,
        tests = {
            activation_codes => token_contract::test_activation_codes,
            deactivate_is_idempotent => token_contract::test_deactivate_is_idempotent,
            key_pair_round_trip => token_contract::test_key_pair_round_trip,
            offline_key_access => token_contract::test_offline_key_access,
            delete_entry_twice => token_contract::test_delete_entry_twice,
            secret_key_blocks_alias => token_contract::test_secret_key_blocks_alias,
            rsa_generation_rejected => token_contract::test_rsa_generation_rejected,
            aliases_restartable => token_contract::test_aliases_restartable,
        }
    );

    crate::contract_tests_for!(
        hardware_token_contract,
        make = hardware_token,
        tests = {
            activation_codes => token_contract::test_activation_codes,
            deactivate_is_idempotent => token_contract::test_deactivate_is_idempotent,
            key_pair_round_trip => token_contract::test_key_pair_round_trip,
            offline_key_access => token_contract::test_offline_key_access,
            delete_entry_twice => token_contract::test_delete_entry_twice,
            secret_key_blocks_alias => token_contract::test_secret_key_blocks_alias,
            rsa_generation_rejected => token_contract::test_rsa_generation_rejected,
            aliases_restartable => token_contract::test_aliases_restartable,
        }
    );

    #[test]
    fn test_hardware_data_stays_empty() {
        let fixture = hardware_token();
        let mut token = fixture.token;
        token.activate(&fixture.code).unwrap();
        token.generate_key_pair(&KeySpec::Ed25519, "k").unwrap();

        let (properties, data) = token.serialize();
        assert!(data.is_empty());
        assert_eq!(properties.get(SLOT_LABEL_KEY), Some("slot-1"));
    }

    #[test]
    fn test_lone_public_key_is_not_a_key_pair() {
        let hsm = Arc::new(SimulatedHsm::new());
        let slot = hsm.add_slot("slot-1", "1234");
        let factory = CryptoTokenFactory::new(SoftwareSettings::default(), Some(hsm.clone()));
        let properties: TokenProperties = [(SLOT_LABEL_KEY, "slot-1")].into_iter().collect();
        let mut token = factory
            .create(HARDWARE_SLOT_TYPE, 3, "hard", properties, Vec::new())
            .unwrap();
        token.activate(&AuthCode::new("1234").unwrap()).unwrap();

        slot.import_public_key("orphan", PublicKey::Ed25519([9u8; 32]));

        assert!(token.key_pair_aliases().unwrap().is_empty());
        assert!(token.is_alias_used("orphan").unwrap());
    }
}
