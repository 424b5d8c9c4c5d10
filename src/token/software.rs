use tracing::{debug, trace};

use super::keystore::{self, KeyStoreContents, KeystoreError, StoredEntry};
use super::{Backend, TokenHeader};
use crate::error::{TokenError, TokenResult};
use crate::logic::key_material;
use crate::model::{AuthCode, KeySpec, PublicKey, SecretKeySpec, TokenId};

/// Unlocked keystore plus the code needed to re-seal it after a change
#[derive(Clone)]
struct OpenKeystore {
    code: AuthCode,
    contents: KeyStoreContents,
}

/// Crypto token backed by an encrypted keystore blob
#[derive(Clone)]
pub struct SoftwareToken {
    header: TokenHeader,
    sealed: Vec<u8>,
    kdf_iterations: u32,
    open: Option<OpenKeystore>,
}

impl SoftwareToken {
    pub(crate) fn new(header: TokenHeader, sealed: Vec<u8>, kdf_iterations: u32) -> Self {
        Self {
            header,
            sealed,
            kdf_iterations,
            open: None,
        }
    }

    /// Whether the blob has been sealed at least once
    pub fn is_initialized(&self) -> bool {
        !self.sealed.is_empty()
    }

    /// Checks `code` against the sealed blob without changing state
    pub fn verify_code(&self, code: &AuthCode) -> TokenResult<()> {
        if self.is_initialized() {
            self.unseal(code).map(|_| ())
        } else {
            Ok(())
        }
    }

    /// Blob holding the same entries sealed under `new_code`
    pub fn reseal(&self, current: &AuthCode, new_code: &AuthCode) -> TokenResult<Vec<u8>> {
        let contents = if self.is_initialized() {
            self.unseal(current)?
        } else {
            KeyStoreContents::default()
        };
        self.seal(&contents, new_code)
    }

    fn id(&self) -> TokenId {
        self.header.id
    }

    fn unseal(&self, code: &AuthCode) -> TokenResult<KeyStoreContents> {
        keystore::open(&self.sealed, code).map_err(|err| self.keystore_error(err))
    }

    fn seal(&self, contents: &KeyStoreContents, code: &AuthCode) -> TokenResult<Vec<u8>> {
        keystore::seal(contents, code, self.kdf_iterations).map_err(|err| self.keystore_error(err))
    }

    fn keystore_error(&self, err: KeystoreError) -> TokenError {
        match err {
            KeystoreError::WrongCode => TokenError::AuthenticationFailed {
                id: self.id(),
                reason: "keystore did not open with the given code".to_string(),
            },
            KeystoreError::Corrupt(reason) => TokenError::KeystoreCorrupt {
                id: self.id(),
                reason,
            },
        }
    }

    fn open_keystore(&self) -> TokenResult<&OpenKeystore> {
        self.open
            .as_ref()
            .ok_or(TokenError::TokenOffline { id: self.id() })
    }

    /// Applies `change` to a copy of the contents and commits it only once re-sealed
    fn mutate<T>(
        &mut self,
        change: impl FnOnce(&mut KeyStoreContents) -> TokenResult<T>,
    ) -> TokenResult<T> {
        let open = self.open_keystore()?;
        let mut contents = open.contents.clone();
        let value = change(&mut contents)?;
        let sealed = self.seal(&contents, &open.code)?;

        self.sealed = sealed;
        if let Some(open) = self.open.as_mut() {
            open.contents = contents;
        }
        Ok(value)
    }

    fn entry(&self, alias: &str) -> TokenResult<Option<&StoredEntry>> {
        Ok(self.open_keystore()?.contents.entries.get(alias))
    }
}

impl Backend for SoftwareToken {
    fn header(&self) -> &TokenHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut TokenHeader {
        &mut self.header
    }

    fn is_active(&self) -> bool {
        self.open.is_some()
    }

    fn activate(&mut self, code: &AuthCode) -> TokenResult<()> {
        let contents = if self.is_initialized() {
            self.unseal(code)?
        } else {
            debug!(
                "Initializing empty keystore for crypto token {}",
                self.id()
            );
            let contents = KeyStoreContents::default();
            self.sealed = self.seal(&contents, code)?;
            contents
        };
        trace!(
            "Opened keystore of crypto token {} with {} entries",
            self.id(),
            contents.entries.len()
        );
        self.open = Some(OpenKeystore {
            code: code.clone(),
            contents,
        });
        Ok(())
    }

    fn deactivate(&mut self) {
        self.open = None;
    }

    fn generate_key_pair(&mut self, spec: &KeySpec, alias: &str) -> TokenResult<PublicKey> {
        let id = self.id();
        let pair = key_material::generate_key_pair(spec).ok_or_else(|| {
            TokenError::InvalidKeySpec {
                spec: spec.canonical(),
                reason: "not supported by the software keystore".to_string(),
            }
        })?;
        self.mutate(|contents| {
            if contents.entries.contains_key(alias) {
                return Err(TokenError::AliasInUse {
                    id,
                    alias: alias.to_string(),
                });
            }
            contents.entries.insert(
                alias.to_string(),
                StoredEntry::KeyPair {
                    algorithm: pair.public.algorithm(),
                    private: pair.private.clone(),
                    public: pair.public.as_bytes().to_vec(),
                },
            );
            Ok(pair.public.clone())
        })
    }

    fn generate_secret_key(&mut self, spec: SecretKeySpec, alias: &str) -> TokenResult<()> {
        let id = self.id();
        let key = key_material::random_secret(spec.key_len());
        self.mutate(|contents| {
            if contents.entries.contains_key(alias) {
                return Err(TokenError::AliasInUse {
                    id,
                    alias: alias.to_string(),
                });
            }
            contents
                .entries
                .insert(alias.to_string(), StoredEntry::Secret { spec, key });
            Ok(())
        })
    }

    fn delete_entry(&mut self, alias: &str) -> TokenResult<bool> {
        self.mutate(|contents| Ok(contents.entries.remove(alias).is_some()))
    }

    fn find_public_key(&self, alias: &str) -> TokenResult<Option<PublicKey>> {
        match self.entry(alias)? {
            Some(StoredEntry::KeyPair {
                algorithm, public, ..
            }) => PublicKey::from_encoded(*algorithm, public)
                .map(Some)
                .ok_or_else(|| TokenError::KeystoreCorrupt {
                    id: self.id(),
                    reason: format!("public key of {alias} does not decode"),
                }),
            _ => Ok(None),
        }
    }

    fn has_private_key(&self, alias: &str) -> TokenResult<bool> {
        Ok(matches!(
            self.entry(alias)?,
            Some(StoredEntry::KeyPair { .. })
        ))
    }

    fn find_secret_key(&self, alias: &str) -> TokenResult<Option<SecretKeySpec>> {
        match self.entry(alias)? {
            Some(StoredEntry::Secret { spec, .. }) => Ok(Some(*spec)),
            _ => Ok(None),
        }
    }

    fn sign(&self, alias: &str, data: &[u8]) -> TokenResult<Vec<u8>> {
        match self.entry(alias)? {
            Some(StoredEntry::KeyPair {
                algorithm, private, ..
            }) => key_material::sign(*algorithm, private, data).ok_or_else(|| {
                TokenError::KeyPairDefective {
                    id: self.id(),
                    alias: alias.to_string(),
                    reason: "private key does not decode".to_string(),
                }
            }),
            _ => Err(TokenError::EntryNotFound {
                id: self.id(),
                alias: alias.to_string(),
            }),
        }
    }

    fn aliases(&self) -> TokenResult<Vec<String>> {
        Ok(self.open_keystore()?.contents.entries.keys().cloned().collect())
    }

    fn data(&self) -> &[u8] {
        &self.sealed
    }
}
