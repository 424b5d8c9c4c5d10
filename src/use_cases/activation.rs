use tracing::{debug, info, trace};

use super::CryptoTokenManagementService;
use crate::error::{TokenError, TokenResult};
use crate::logic::AuditDetails;
use crate::model::{AuthCode, Caller, TokenId};
use crate::ports::{AccessRule, AuditEventType, TokenRecord};
use crate::token::CryptoToken;

impl CryptoTokenManagementService {
    /// Activates the token with `code`, or with its auto-activation PIN
    pub fn activate(&self, caller: &Caller, id: TokenId, code: Option<&AuthCode>) -> TokenResult<()> {
        self.authorize_on(caller, AccessRule::Activate, id)?;

        self.with_live(id, |live| {
            let (record, current) = self.refresh(id, live)?;
            let code = match code {
                Some(code) => code.clone(),
                None => current.properties().auto_activation_pin().ok_or_else(|| {
                    TokenError::AuthenticationFailed {
                        id,
                        reason: "no authentication code given and no auto-activation PIN stored"
                            .to_string(),
                    }
                })?,
            };
            let mut token = current.clone();
            token.activate(&code)?;
            let name = token.name().to_string();

            // A first activation seals a fresh software keystore
            if token.data() != record.data.as_slice() {
                debug!("Persisting initialized keystore of crypto token {}", id);
                self.commit(&record, token, live)?;
            } else if let Some(current) = live.as_mut() {
                current.token = token;
            }

            info!("Activated crypto token '{}' with id {}", name, id);
            self.record_audit(
                caller,
                AuditEventType::Activate,
                id,
                AuditDetails::with_msg(format!("Activated CryptoToken '{name}' with id {id}")),
            );
            Ok(())
        })
    }

    pub fn deactivate(&self, caller: &Caller, id: TokenId) -> TokenResult<()> {
        self.authorize_on(caller, AccessRule::Deactivate, id)?;

        self.with_live(id, |live| {
            let (_, token) = self.refresh(id, live)?;
            token.deactivate();
            let name = token.name().to_string();

            info!("Deactivated crypto token '{}' with id {}", name, id);
            self.record_audit(
                caller,
                AuditEventType::Deactivate,
                id,
                AuditDetails::with_msg(format!("Deactivated CryptoToken '{name}' with id {id}")),
            );
            Ok(())
        })
    }

    /// Changes or drops the auto-activation PIN, re-keying a software keystore
    ///
    /// Returns whether the token has an auto-activation PIN afterwards. Without
    /// a stored PIN, a call that is `update_only` or has no `new_code` changes
    /// nothing and returns `false`.
    pub fn update_pin(
        &self,
        caller: &Caller,
        id: TokenId,
        current_code: &AuthCode,
        new_code: Option<&AuthCode>,
        update_only: bool,
    ) -> TokenResult<bool> {
        trace!(">update_pin: {}", id);
        for rule in [AccessRule::Modify, AccessRule::Activate, AccessRule::Deactivate] {
            self.authorize_on(caller, rule, id)?;
        }

        self.with_live(id, |live| {
            let (record, current) = self.refresh(id, live)?;
            let stored_pin = record.properties.auto_activation_pin();
            if stored_pin.is_none() && (update_only || new_code.is_none()) {
                debug!("PIN update of crypto token {} changes nothing", id);
                return Ok(false);
            }
            // Verifying by login logs out the session the cached instance shares
            let touches_session =
                matches!(current, CryptoToken::HardwareSlot(_)) && stored_pin.is_none();

            let outcome = match self.rekey(&record, current, current_code, new_code, update_only) {
                Ok(mut token) => {
                    super::auto_activate(&mut token);
                    let has_pin = token.properties().has_auto_activation_pin();
                    self.commit(&record, token, live).map(|_| has_pin)
                }
                Err(err) => Err(err),
            };
            if outcome.is_err() && touches_session && live.take().is_some() {
                debug!("Dropped live instance of crypto token {} after a failed PIN check", id);
            }
            let has_pin = outcome?;

            info!("Updated PIN of crypto token '{}' with id {}", record.name, id);
            self.record_audit(
                caller,
                AuditEventType::UpdatePin,
                id,
                AuditDetails::with_msg(format!(
                    "Updated PIN of CryptoToken '{}' with id {}",
                    record.name, id
                )),
            );
            Ok(has_pin)
        })
    }

    /// Token carrying the new PIN state, checked against `current_code`
    fn rekey(
        &self,
        record: &TokenRecord,
        current: &CryptoToken,
        current_code: &AuthCode,
        new_code: Option<&AuthCode>,
        update_only: bool,
    ) -> TokenResult<CryptoToken> {
        let id = record.id;
        let stored_pin = record.properties.auto_activation_pin();

        if let CryptoToken::Software(software) = current {
            software.verify_code(current_code)?;
            let Some(new_code) = new_code else {
                let mut token = current.clone();
                token.properties_mut().remove_auto_activation_pin();
                return Ok(token);
            };
            let data = software.reseal(current_code, new_code)?;
            let mut properties = record.properties.clone();
            if stored_pin.is_some() || !update_only {
                properties.set_auto_activation_pin(new_code);
            } else {
                debug!(
                    "Only changing the keystore code of crypto token {}; auto-activation stays off",
                    id
                );
            }
            let mut token =
                self.factory
                    .create(&record.type_tag, id, &record.name, properties, data)?;
            if current.is_active() {
                token.activate(new_code)?;
            }
            return Ok(token);
        }

        let mut token = current.clone();
        match &stored_pin {
            Some(pin) if !pin.matches(current_code) => {
                return Err(TokenError::AuthenticationFailed {
                    id,
                    reason: "supplied PIN did not match the auto-activation PIN".to_string(),
                });
            }
            Some(_) => {}
            None => {
                // Only a login proves the PIN; restore the offline state afterwards
                let was_active = token.is_active();
                token.deactivate();
                token.activate(current_code)?;
                if !was_active {
                    token.deactivate();
                }
            }
        }
        match new_code {
            Some(new_code) => token.properties_mut().set_auto_activation_pin(new_code),
            None => {
                token.properties_mut().remove_auto_activation_pin();
            }
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::model::AUTO_ACTIVATION_PIN_KEY;

    fn stored_pin(fixture: &Fixture, id: TokenId) -> Option<String> {
        fixture
            .store
            .get(id)
            .unwrap()
            .unwrap()
            .properties
            .get(AUTO_ACTIVATION_PIN_KEY)
            .map(str::to_string)
    }

    #[test]
    fn test_activate_right_and_wrong_code() {
        let fixture = Fixture::new();
        let id = fixture.software_token("ca", "foo123");
        fixture.service.deactivate(&admin(), id).unwrap();

        let result = fixture.service.activate(&admin(), id, Some(&code("wrong")));
        assert!(matches!(result, Err(TokenError::AuthenticationFailed { .. })));
        assert!(!fixture.service.is_active(&admin(), id).unwrap());

        fixture
            .service
            .activate(&admin(), id, Some(&code("foo123")))
            .unwrap();
        assert!(fixture.service.is_active(&admin(), id).unwrap());
        assert_eq!(fixture.audit.events_of(AuditEventType::Activate).len(), 1);
    }

    #[test]
    fn test_first_activation_persists_keystore() {
        let fixture = Fixture::new();
        let id = fixture.software_token_with_id(5, "fresh");
        assert!(fixture.store.get(id).unwrap().unwrap().data.is_empty());

        fixture
            .service
            .activate(&admin(), id, Some(&code("foo123")))
            .unwrap();

        let record = fixture.store.get(id).unwrap().unwrap();
        assert!(!record.data.is_empty());
        assert_eq!(record.revision, 2);
        assert!(fixture.service.is_active(&admin(), id).unwrap());
    }

    #[test]
    fn test_activate_without_code_needs_pin() {
        let fixture = Fixture::new();
        let id = fixture.software_token("ca", "foo123");

        let result = fixture.service.activate(&admin(), id, None);

        assert!(matches!(result, Err(TokenError::AuthenticationFailed { .. })));
    }

    #[test]
    fn test_deactivate_twice() {
        let fixture = Fixture::new();
        let id = fixture.software_token("ca", "foo123");

        fixture.service.deactivate(&admin(), id).unwrap();
        let once = fixture.service.is_active(&admin(), id).unwrap();
        fixture.service.deactivate(&admin(), id).unwrap();

        assert!(!once);
        assert_eq!(fixture.service.is_active(&admin(), id).unwrap(), once);
        assert_eq!(fixture.audit.events_of(AuditEventType::Deactivate).len(), 2);
    }

    #[test]
    fn test_activate_requires_grant() {
        let fixture = Fixture::new();
        let id = fixture.software_token("ca", "foo123");
        let result = fixture.service.activate(&viewer(), id, Some(&code("foo123")));
        assert!(matches!(result, Err(TokenError::AuthorizationDenied { .. })));
    }

    #[test]
    fn test_hardware_activation_tracks_device() {
        let fixture = Fixture::new();
        let id = fixture.hardware_token("hsm", None);

        fixture.service.activate(&admin(), id, Some(&code("1234"))).unwrap();
        assert!(fixture.service.is_active(&admin(), id).unwrap());

        fixture.slot().set_online(false);
        let result = fixture.service.activate(&admin(), id, Some(&code("1234")));
        assert!(matches!(result, Err(TokenError::DeviceUnavailable { .. })));
    }

    #[test]
    fn test_update_pin_software_changes_auto_activation() {
        let fixture = Fixture::new();
        let id = fixture.software_token_with_pin("ca", "1234");

        let has_pin = fixture
            .service
            .update_pin(&admin(), id, &code("1234"), Some(&code("5678")), false)
            .unwrap();

        assert!(has_pin);
        assert_eq!(stored_pin(&fixture, id).as_deref(), Some("5678"));
        fixture.service.deactivate(&admin(), id).unwrap();
        fixture.service.activate(&admin(), id, None).unwrap();
        assert!(fixture.service.is_active(&admin(), id).unwrap());

        fixture.service.deactivate(&admin(), id).unwrap();
        let result = fixture.service.activate(&admin(), id, Some(&code("1234")));
        assert!(matches!(result, Err(TokenError::AuthenticationFailed { .. })));
        fixture
            .service
            .activate(&admin(), id, Some(&code("5678")))
            .unwrap();

        let events = fixture.audit.events_of(AuditEventType::UpdatePin);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].details.get("msg"),
            Some(format!("Updated PIN of CryptoToken 'ca' with id {id}").as_str())
        );
    }

    #[test]
    fn test_update_pin_wrong_current_code() {
        let fixture = Fixture::new();
        let id = fixture.software_token_with_pin("ca", "1234");

        let result =
            fixture
                .service
                .update_pin(&admin(), id, &code("wrong"), Some(&code("5678")), false);

        assert!(matches!(result, Err(TokenError::AuthenticationFailed { .. })));
        assert_eq!(stored_pin(&fixture, id).as_deref(), Some("1234"));
        assert!(fixture.audit.events_of(AuditEventType::UpdatePin).is_empty());
        assert!(fixture.service.is_active(&admin(), id).unwrap());
    }

    #[test]
    fn test_update_pin_without_stored_pin_is_noop() {
        let fixture = Fixture::new();
        let id = fixture.software_token("ca", "foo123");
        let before = fixture.store.get(id).unwrap().unwrap();

        let update_only = fixture
            .service
            .update_pin(&admin(), id, &code("foo123"), Some(&code("bar456")), true)
            .unwrap();
        let no_new_code = fixture
            .service
            .update_pin(&admin(), id, &code("foo123"), None, false)
            .unwrap();

        assert!(!update_only);
        assert!(!no_new_code);
        assert_eq!(fixture.store.get(id).unwrap().unwrap(), before);
        assert!(fixture.audit.events_of(AuditEventType::UpdatePin).is_empty());
    }

    #[test]
    fn test_update_pin_drops_auto_activation() {
        let fixture = Fixture::new();
        let id = fixture.software_token_with_pin("ca", "1234");
        let sealed = fixture.store.get(id).unwrap().unwrap().data;

        let has_pin = fixture
            .service
            .update_pin(&admin(), id, &code("1234"), None, false)
            .unwrap();

        assert!(!has_pin);
        let record = fixture.store.get(id).unwrap().unwrap();
        assert!(!record.properties.has_auto_activation_pin());
        assert_eq!(record.data, sealed);
    }

    #[test]
    fn test_update_pin_adds_auto_activation_to_plain_token() {
        let fixture = Fixture::new();
        let id = fixture.software_token("ca", "foo123");

        let has_pin = fixture
            .service
            .update_pin(&admin(), id, &code("foo123"), Some(&code("bar456")), false)
            .unwrap();

        assert!(has_pin);
        assert_eq!(stored_pin(&fixture, id).as_deref(), Some("bar456"));
        fixture.service.deactivate(&admin(), id).unwrap();
        fixture.service.activate(&admin(), id, None).unwrap();
    }

    #[test]
    fn test_update_pin_hardware_compares_stored_pin() {
        let fixture = Fixture::new();
        let id = fixture.hardware_token("hsm", Some("1234"));
        let logins = fixture.slot().login_count();

        fixture
            .service
            .update_pin(&admin(), id, &code("1234"), Some(&code("5678")), false)
            .unwrap();
        assert_eq!(stored_pin(&fixture, id).as_deref(), Some("5678"));
        // Compared against the stored PIN, no device login
        assert_eq!(fixture.slot().login_count(), logins);

        let result = fixture
            .service
            .update_pin(&admin(), id, &code("1234"), None, false);
        assert!(matches!(result, Err(TokenError::AuthenticationFailed { .. })));
        assert_eq!(stored_pin(&fixture, id).as_deref(), Some("5678"));
    }

    #[test]
    fn test_update_pin_hardware_verifies_by_login() {
        let fixture = Fixture::new();
        let id = fixture.hardware_token("hsm", None);
        assert!(!fixture.service.is_active(&admin(), id).unwrap());
        let logins = fixture.slot().login_count();

        let has_pin = fixture
            .service
            .update_pin(&admin(), id, &code("1234"), Some(&code("1234")), false)
            .unwrap();

        assert!(has_pin);
        assert!(fixture.slot().login_count() > logins);
        let info = fixture.service.get_info(&admin(), id).unwrap().unwrap();
        assert!(info.auto_activation);
        assert!(info.active);
    }

    #[test]
    fn test_update_pin_hardware_verification_rejects_wrong_code() {
        let fixture = Fixture::new();
        let id = fixture.hardware_token("hsm", None);

        let result = fixture
            .service
            .update_pin(&admin(), id, &code("0000"), Some(&code("5678")), false);

        assert!(matches!(result, Err(TokenError::AuthenticationFailed { .. })));
        assert_eq!(stored_pin(&fixture, id), None);
        let info = fixture.service.get_info(&admin(), id).unwrap().unwrap();
        assert!(!info.active);
    }

    #[test]
    fn test_update_pin_requires_all_grants() {
        let fixture = Fixture::new();
        let id = fixture.software_token_with_pin("ca", "1234");
        let activator = crate::model::Caller::new("activator");

        let result =
            fixture
                .service
                .update_pin(&activator, id, &code("1234"), Some(&code("5678")), false);

        assert!(matches!(result, Err(TokenError::AuthorizationDenied { .. })));
        assert_eq!(stored_pin(&fixture, id).as_deref(), Some("1234"));
    }
}
