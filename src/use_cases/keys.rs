use tracing::{info, trace, warn};

use super::{CryptoTokenManagementService, LiveToken};
use crate::error::{TokenError, TokenResult};
use crate::logic::AuditDetails;
use crate::model::{Caller, KeySpec, PublicKey, SecretKeySpec, TokenId};
use crate::ports::{AccessRule, AuditEventType, TokenRecord};
use crate::token::CryptoToken;

impl CryptoTokenManagementService {
    /// Generates and self-tests a key pair under a free alias
    ///
    /// `key_spec` may use any accepted spelling; it is stored and audited in
    /// canonical form.
    pub fn create_key_pair(
        &self,
        caller: &Caller,
        id: TokenId,
        alias: &str,
        key_spec: &str,
    ) -> TokenResult<PublicKey> {
        trace!(">create_key_pair: {}, {}, {}", id, alias, key_spec);
        self.authorize_on(caller, AccessRule::GenerateKeys, id)?;

        self.with_live(id, |live| {
            let (record, current) = self.refresh(id, live)?;
            // A taken alias wins over a bad spec
            ensure_alias_free(current, alias)?;
            let spec = KeySpec::parse(key_spec)?;
            let token = current.clone();
            self.generate_pair(caller, &record, token, alias, spec, live)
        })
    }

    /// Generates a key pair under `new_alias` with the spec of `current_alias`
    pub fn create_key_pair_with_same_spec(
        &self,
        caller: &Caller,
        id: TokenId,
        current_alias: &str,
        new_alias: &str,
    ) -> TokenResult<PublicKey> {
        trace!(">create_key_pair_with_same_spec: {}, {}, {}", id, current_alias, new_alias);
        self.authorize_on(caller, AccessRule::GenerateKeys, id)?;

        self.with_live(id, |live| {
            let (record, current) = self.refresh(id, live)?;
            let spec = current.public_key(current_alias)?.key_spec();
            let token = current.clone();
            self.generate_pair(caller, &record, token, new_alias, spec, live)
        })
    }

    fn generate_pair(
        &self,
        caller: &Caller,
        record: &TokenRecord,
        mut token: CryptoToken,
        alias: &str,
        spec: KeySpec,
        live: &mut Option<LiveToken>,
    ) -> TokenResult<PublicKey> {
        let id = record.id;
        ensure_alias_free(&token, alias)?;
        spec.check_policy(&self.key_policy)?;

        let mut details = AuditDetails::with_msg(format!("Generated new keypair in CryptoToken {id}"));
        details.put("keyAlias", alias);
        details.put("keySpecification", spec.canonical());

        let public_key = token.generate_key_pair(&spec, alias)?;
        let stored = token
            .test_key_pair(alias)
            .and_then(|()| self.commit(record, token.clone(), live));
        if let Err(err) = stored {
            discard_generated(&mut token, alias);
            return Err(err);
        }

        info!("Generated {} key pair '{}' in crypto token {}", spec, alias, id);
        self.record_audit(caller, AuditEventType::GenerateKeyPair, id, details);
        Ok(public_key)
    }

    /// Generates a symmetric key under a free alias
    pub fn generate_secret_key(
        &self,
        caller: &Caller,
        id: TokenId,
        alias: &str,
        key_spec: &str,
    ) -> TokenResult<()> {
        self.authorize_on(caller, AccessRule::GenerateKeys, id)?;

        self.with_live(id, |live| {
            let (record, current) = self.refresh(id, live)?;
            ensure_alias_free(current, alias)?;
            let spec = SecretKeySpec::parse(key_spec)?;
            let mut token = current.clone();

            let mut details =
                AuditDetails::with_msg(format!("Generated new secret key in CryptoToken {id}"));
            details.put("keyAlias", alias);
            details.put("keySpecification", spec.canonical());

            token.generate_secret_key(spec, alias)?;
            if let Err(err) = self.commit(&record, token.clone(), live) {
                discard_generated(&mut token, alias);
                return Err(err);
            }

            info!("Generated {} secret key '{}' in crypto token {}", spec.canonical(), alias, id);
            self.record_audit(caller, AuditEventType::GenerateKeyPair, id, details);
            Ok(())
        })
    }

    /// Deletes the entry under `alias`, which must be in use
    pub fn remove_key_pair(&self, caller: &Caller, id: TokenId, alias: &str) -> TokenResult<()> {
        trace!(">remove_key_pair: {}, {}", id, alias);
        self.authorize_on(caller, AccessRule::RemoveKeys, id)?;

        self.with_live(id, |live| {
            let (record, current) = self.refresh(id, live)?;
            let mut token = current.clone();
            if !token.is_alias_used(alias)? {
                return Err(TokenError::EntryNotFound {
                    id,
                    alias: alias.to_string(),
                });
            }

            let mut details = AuditDetails::with_msg(format!("Deleted key pair from CryptoToken {id}"));
            details.put("keyAlias", alias);

            token.delete_entry(alias)?;
            ensure_alias_free(&token, alias)?;
            let on_device = matches!(token, CryptoToken::HardwareSlot(_));
            if let Err(err) = self.commit(&record, token, live) {
                // Destroyed device objects cannot be restored
                if on_device {
                    warn!(
                        "Key '{}' was deleted from the device of crypto token {} but the store commit failed: {}",
                        alias, id, err
                    );
                }
                return Err(err);
            }

            info!("Removed entry '{}' from crypto token {}", alias, id);
            self.record_audit(caller, AuditEventType::DeleteEntry, id, details);
            Ok(())
        })
    }

    /// Sign/verify round trip with the key pair under `alias`
    pub fn test_key_pair(&self, caller: &Caller, id: TokenId, alias: &str) -> TokenResult<()> {
        self.authorize_on(caller, AccessRule::TestKeys, id)?;

        self.with_live(id, |live| {
            let (_, token) = self.refresh(id, live)?;
            token.test_key_pair(alias)
        })
    }
}

fn ensure_alias_free(token: &CryptoToken, alias: &str) -> TokenResult<()> {
    if token.is_alias_used(alias)? {
        return Err(TokenError::AliasInUse {
            id: token.id(),
            alias: alias.to_string(),
        });
    }
    Ok(())
}

/// Removes a key the operation could not keep; a software copy is simply dropped
fn discard_generated(token: &mut CryptoToken, alias: &str) {
    if let CryptoToken::HardwareSlot(_) = token {
        if let Err(err) = token.delete_entry(alias) {
            warn!(
                "Could not remove key '{}' from crypto token {} after a failed operation: {}",
                alias,
                token.id(),
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::model::KeyAlgorithm;

    #[test]
    fn test_create_key_pair_and_reuse_alias() {
        let fixture = Fixture::new();
        let id = fixture.software_token("ca", "foo123");

        let public_key = fixture
            .service
            .create_key_pair(&admin(), id, "signKey", "prime256v1")
            .unwrap();
        assert_eq!(public_key.algorithm(), KeyAlgorithm::Ecdsa);

        for spec in ["secp256r1", "Ed25519", "RSA2048", "DSA1024"] {
            let result = fixture
                .service
                .create_key_pair(&admin(), id, "signKey", spec);
            assert!(
                matches!(result, Err(TokenError::AliasInUse { ref alias, .. }) if alias == "signKey"),
                "unexpected result for {spec}: {result:?}"
            );
        }

        let events = fixture.audit.events_of(AuditEventType::GenerateKeyPair);
        assert_eq!(events.len(), 1);
        let details = &events[0].details;
        assert_eq!(
            details.get("msg"),
            Some(format!("Generated new keypair in CryptoToken {id}").as_str())
        );
        assert_eq!(details.get("keyAlias"), Some("signKey"));
        assert_eq!(details.get("keySpecification"), Some("secp256r1"));
    }

    #[test]
    fn test_generated_key_survives_reload() {
        let fixture = Fixture::new();
        let id = fixture.software_token_with_pin("ca", "1234");
        fixture
            .service
            .create_key_pair(&admin(), id, "k", "ed25519")
            .unwrap();

        let reloaded = fixture.reopened_service();
        let aliases = reloaded.list_key_pair_aliases(&admin(), id).unwrap();
        assert_eq!(aliases, vec!["k".to_string()]);
        reloaded.test_key_pair(&admin(), id, "k").unwrap();
    }

    #[test]
    fn test_create_key_pair_rejects_short_rsa() {
        let fixture = Fixture::new();
        let id = fixture.software_token("ca", "foo123");

        let short = fixture.service.create_key_pair(&admin(), id, "rsa", "RSA512");
        assert!(matches!(short, Err(TokenError::InvalidKeySpec { .. })));

        let unsupported = fixture.service.create_key_pair(&admin(), id, "rsa", "2048");
        assert!(matches!(unsupported, Err(TokenError::InvalidKeySpec { .. })));
        assert!(!fixture.service.is_alias_used(&admin(), id, "rsa").unwrap());
        assert!(fixture.audit.events_of(AuditEventType::GenerateKeyPair).is_empty());
    }

    #[test]
    fn test_create_key_pair_offline() {
        let fixture = Fixture::new();
        let id = fixture.software_token("ca", "foo123");
        fixture.service.deactivate(&admin(), id).unwrap();

        let result = fixture.service.create_key_pair(&admin(), id, "k", "ed25519");

        assert!(matches!(result, Err(TokenError::TokenOffline { .. })));
    }

    #[test]
    fn test_same_spec_copies_algorithm() {
        let fixture = Fixture::new();
        let id = fixture.software_token("ca", "foo123");
        fixture
            .service
            .create_key_pair(&admin(), id, "old", "P-256")
            .unwrap();

        let renewed = fixture
            .service
            .create_key_pair_with_same_spec(&admin(), id, "old", "new")
            .unwrap();

        assert_eq!(renewed.key_spec(), KeySpec::Secp256r1);
        let missing = fixture
            .service
            .create_key_pair_with_same_spec(&admin(), id, "absent", "newer");
        assert!(matches!(missing, Err(TokenError::EntryNotFound { .. })));
    }

    #[test]
    fn test_remove_key_pair_twice() {
        let fixture = Fixture::new();
        let id = fixture.software_token("ca", "foo123");
        fixture
            .service
            .create_key_pair(&admin(), id, "k", "ed25519")
            .unwrap();

        fixture.service.remove_key_pair(&admin(), id, "k").unwrap();
        let again = fixture.service.remove_key_pair(&admin(), id, "k");
        let never = fixture.service.remove_key_pair(&admin(), id, "never");

        assert!(matches!(again, Err(TokenError::EntryNotFound { .. })));
        assert!(matches!(never, Err(TokenError::EntryNotFound { .. })));
        let events = fixture.audit.events_of(AuditEventType::DeleteEntry);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].details.get("keyAlias"), Some("k"));
    }

    #[test]
    fn test_secret_key_blocks_key_pair_alias() {
        let fixture = Fixture::new();
        let id = fixture.software_token("ca", "foo123");
        fixture
            .service
            .generate_secret_key(&admin(), id, "wrap", "AES-256")
            .unwrap();

        let result = fixture.service.create_key_pair(&admin(), id, "wrap", "ed25519");

        assert!(matches!(result, Err(TokenError::AliasInUse { .. })));
        assert!(fixture
            .service
            .list_key_pair_aliases(&admin(), id)
            .unwrap()
            .is_empty());
        fixture.service.remove_key_pair(&admin(), id, "wrap").unwrap();
    }

    #[test]
    fn test_hardware_key_removed_when_commit_fails() {
        let fixture = Fixture::new();
        let id = fixture.hardware_token("hsm", Some("1234"));
        fixture.store.fail_next_commit();

        let result = fixture.service.create_key_pair(&admin(), id, "k", "ed25519");

        assert!(result.is_err());
        assert!(!fixture.slot().has_object("k"));
        assert!(fixture.audit.events_of(AuditEventType::GenerateKeyPair).is_empty());
    }

    #[test]
    fn test_software_key_void_when_commit_fails() {
        let fixture = Fixture::new();
        let id = fixture.software_token("ca", "foo123");
        let before = fixture.store.get(id).unwrap().unwrap();

        fixture.store.fail_next_commit();
        let pair = fixture.service.create_key_pair(&admin(), id, "k", "ed25519");
        fixture.store.fail_next_commit();
        let secret = fixture.service.generate_secret_key(&admin(), id, "wrap", "AES128");

        assert!(matches!(pair, Err(TokenError::Store(_))));
        assert!(matches!(secret, Err(TokenError::Store(_))));
        let after = fixture.store.get(id).unwrap().unwrap();
        assert_eq!(after.revision, before.revision);
        assert_eq!(after.data, before.data);
        assert!(!fixture.service.is_alias_used(&admin(), id, "k").unwrap());
        assert!(!fixture.service.is_alias_used(&admin(), id, "wrap").unwrap());
        assert!(fixture.audit.events_of(AuditEventType::GenerateKeyPair).is_empty());

        // The live token is still usable and the aliases are free again
        fixture
            .service
            .create_key_pair(&admin(), id, "k", "ed25519")
            .unwrap();
        fixture
            .service
            .generate_secret_key(&admin(), id, "wrap", "AES128")
            .unwrap();
    }

    #[test]
    fn test_secret_key_alias_checked_before_spec() {
        let fixture = Fixture::new();
        let id = fixture.software_token("ca", "foo123");
        fixture
            .service
            .create_key_pair(&admin(), id, "k", "ed25519")
            .unwrap();

        let taken = fixture.service.generate_secret_key(&admin(), id, "k", "DES");
        let bad_spec = fixture.service.generate_secret_key(&admin(), id, "free", "DES");

        assert!(matches!(taken, Err(TokenError::AliasInUse { .. })));
        assert!(matches!(bad_spec, Err(TokenError::InvalidKeySpec { .. })));
    }

    #[test]
    fn test_hardware_removal_reports_failed_commit() {
        let fixture = Fixture::new();
        let id = fixture.hardware_token("hsm", Some("1234"));
        fixture
            .service
            .create_key_pair(&admin(), id, "k", "ed25519")
            .unwrap();
        fixture.store.fail_next_commit();

        let result = fixture.service.remove_key_pair(&admin(), id, "k");

        assert!(matches!(result, Err(TokenError::Store(_))));
        assert!(!fixture.slot().has_object("k"));
        assert!(fixture.audit.events_of(AuditEventType::DeleteEntry).is_empty());
    }

    #[test]
    fn test_concurrent_same_alias_generation() {
        let fixture = Fixture::new();
        let id = fixture.software_token("ca", "foo123");

        let results: Vec<_> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..2)
                .map(|_| {
                    scope.spawn(|| fixture.service.create_key_pair(&admin(), id, "shared", "ed25519"))
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(TokenError::AliasInUse { .. }))));
        assert_eq!(fixture.audit.events_of(AuditEventType::GenerateKeyPair).len(), 1);
        assert_eq!(
            fixture.service.list_key_pair_aliases(&admin(), id).unwrap(),
            vec!["shared".to_string()]
        );
    }

    #[test]
    fn test_key_operations_need_their_grants() {
        let fixture = Fixture::new();
        let id = fixture.software_token("ca", "foo123");
        fixture
            .service
            .create_key_pair(&admin(), id, "k", "ed25519")
            .unwrap();

        let generate = fixture.service.create_key_pair(&viewer(), id, "k2", "ed25519");
        let remove = fixture.service.remove_key_pair(&viewer(), id, "k");
        let test = fixture.service.test_key_pair(&viewer(), id, "k");

        for result in [generate.map(|_| ()), remove, test] {
            assert!(matches!(result, Err(TokenError::AuthorizationDenied { .. })));
        }
        fixture.service.test_key_pair(&admin(), id, "k").unwrap();
    }
}
