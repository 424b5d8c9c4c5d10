use std::collections::HashSet;

use tracing::{debug, info, trace};

use super::{CryptoTokenManagementService, LiveToken};
use crate::error::TokenResult;
use crate::logic::{put_delta, put_property_delta, AuditDetails};
use crate::model::{AuthCode, Caller, TokenId, TokenProperties};
use crate::ports::{AccessRule, AuditEventType, TokenRecord};

/// Everything needed to create a crypto token
#[derive(Debug, Clone)]
pub struct NewCryptoToken {
    pub name: String,
    /// Allocated at random when absent
    pub id: Option<TokenId>,
    pub type_tag: String,
    pub properties: TokenProperties,
    /// Empty for a fresh software keystore and for hardware tokens
    pub data: Vec<u8>,
    /// Activates the new token right away when present
    pub auth_code: Option<AuthCode>,
}

impl NewCryptoToken {
    pub fn new(name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            type_tag: type_tag.into(),
            properties: TokenProperties::new(),
            data: Vec::new(),
            auth_code: None,
        }
    }

    pub fn with_id(mut self, id: TokenId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_properties(mut self, properties: TokenProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn with_auth_code(mut self, code: AuthCode) -> Self {
        self.auth_code = Some(code);
        self
    }
}

impl CryptoTokenManagementService {
    /// Creates and stores a new crypto token, returning its id
    pub fn create_crypto_token(
        &self,
        caller: &Caller,
        request: NewCryptoToken,
    ) -> TokenResult<TokenId> {
        trace!(">create_crypto_token: {}", request.name);
        self.authorize(caller, AccessRule::Modify.resource())?;

        let NewCryptoToken {
            name,
            id,
            type_tag,
            properties,
            data,
            auth_code,
        } = request;
        let id = match id {
            Some(id) => id,
            None => {
                let in_use: HashSet<TokenId> = self.store.list_ids()?.into_iter().collect();
                self.ids.allocate(&in_use)?
            }
        };

        let mut token = self
            .factory
            .create(&type_tag, id, &name, properties, data)?;
        match &auth_code {
            Some(code) => token.activate(code)?,
            // Seals a fresh software keystore under the PIN
            None => super::auto_activate(&mut token),
        }

        let mut details = AuditDetails::with_msg(format!("Created CryptoToken with id {id}"));
        details.put("name", name.as_str());
        put_property_delta(
            &TokenProperties::new(),
            token.properties(),
            self.unchanged_policy,
            &mut details,
        );

        let (properties, data) = token.serialize();
        let slot = self.slot(id);
        let mut live = slot.lock();
        let mut tx = self.store.begin()?;
        tx.merge(TokenRecord::new(id, name.as_str(), type_tag.as_str(), properties, data));
        let stored = tx.commit()?;
        let revision = stored.first().map_or(1, |record| record.revision);
        *live = Some(LiveToken { revision, token });
        drop(live);

        info!("Created {} crypto token '{}' with id {}", type_tag, name, id);
        self.record_audit(caller, AuditEventType::Create, id, details);
        trace!("<create_crypto_token: {}", id);
        Ok(id)
    }

    /// Replaces the name and properties of a stored token
    ///
    /// The auto-activation PIN follows the first matching rule: a PIN in
    /// `properties` is adopted and used to validate the token; otherwise the
    /// keep flag carries the current PIN forward without validation;
    /// otherwise a missing `auth_code` falls back to the current PIN for
    /// validation only.
    pub fn save_crypto_token(
        &self,
        caller: &Caller,
        id: TokenId,
        name: &str,
        properties: TokenProperties,
        auth_code: Option<&AuthCode>,
    ) -> TokenResult<()> {
        trace!(">save_crypto_token: {}, {}", name, id);
        self.authorize_on(caller, AccessRule::Modify, id)?;

        self.with_live(id, |live| {
            let (record, _) = self.refresh(id, live)?;
            let mut properties = properties;
            let keep_current_pin = properties.take_keep_auto_activation_flag();
            let current_pin = record.properties.auto_activation_pin();

            let code = if let Some(new_pin) = properties.auto_activation_pin() {
                Some(new_pin)
            } else if keep_current_pin && current_pin.is_some() {
                if let Some(pin) = &current_pin {
                    properties.set_auto_activation_pin(pin);
                }
                None
            } else {
                auth_code.cloned().or(current_pin)
            };

            let mut token = self.factory.create(
                &record.type_tag,
                id,
                name,
                properties,
                record.data.clone(),
            )?;
            if let Some(code) = &code {
                token.deactivate();
                token.activate(code)?;
            } else {
                super::auto_activate(&mut token);
            }

            let mut details = AuditDetails::with_msg(format!("Modified CryptoToken with id {id}"));
            put_delta(
                "name",
                Some(record.name.as_str()),
                Some(name),
                self.unchanged_policy,
                &mut details,
            );
            put_property_delta(
                &record.properties,
                token.properties(),
                self.unchanged_policy,
                &mut details,
            );

            self.commit(&record, token, live)?;
            info!("Saved crypto token '{}' with id {}", name, id);
            self.record_audit(caller, AuditEventType::Edit, id, details);
            Ok(())
        })
    }

    /// Removes a token; a missing id is a silent no-op
    pub fn delete_crypto_token(&self, caller: &Caller, id: TokenId) -> TokenResult<()> {
        self.authorize_on(caller, AccessRule::Delete, id)?;

        let removed = self.with_live(id, |live| {
            let mut tx = self.store.begin()?;
            let removed = tx.remove(id)?;
            tx.commit()?;
            if let Some(mut previous) = live.take() {
                previous.token.deactivate();
            }
            Ok(removed)
        })?;
        self.live.lock().remove(&id);

        if removed {
            info!("Deleted crypto token {}", id);
            self.record_audit(
                caller,
                AuditEventType::Delete,
                id,
                AuditDetails::with_msg(format!("Deleted CryptoToken with id {id}")),
            );
        } else {
            debug!("Crypto token with id {} does not exist and can not be deleted", id);
        }
        Ok(())
    }
}
