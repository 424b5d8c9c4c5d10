use tracing::trace;

use super::CryptoTokenManagementService;
use crate::error::{TokenError, TokenResult};
use crate::model::{Caller, CryptoTokenInfo, KeyPairInfo, PublicKey, TokenId};
use crate::ports::AccessRule;
use crate::token::CryptoToken;

impl CryptoTokenManagementService {
    /// Ids of the tokens the caller may view
    pub fn list_token_ids(&self, caller: &Caller) -> TokenResult<Vec<TokenId>> {
        Ok(self
            .store
            .list_ids()?
            .into_iter()
            .filter(|id| {
                self.authorizer
                    .is_authorized(caller, &AccessRule::View.resource_for(*id))
            })
            .collect())
    }

    /// Info of every token the caller may view
    pub fn list_infos(&self, caller: &Caller) -> TokenResult<Vec<CryptoTokenInfo>> {
        let mut infos = Vec::new();
        for id in self.list_token_ids(caller)? {
            match self.load_info(id) {
                Ok(info) => infos.push(info),
                // Deleted between listing and loading
                Err(TokenError::TokenNotFound { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(infos)
    }

    /// Read-only projection of the token; `None` when no such token exists
    pub fn get_info(&self, caller: &Caller, id: TokenId) -> TokenResult<Option<CryptoTokenInfo>> {
        self.authorize_on(caller, AccessRule::View, id)?;
        match self.load_info(id) {
            Ok(info) => Ok(Some(info)),
            Err(TokenError::TokenNotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn is_active(&self, caller: &Caller, id: TokenId) -> TokenResult<bool> {
        self.authorize_on(caller, AccessRule::View, id)?;
        self.read(id, |token| Ok(token.is_active()))
    }

    /// Aliases holding both a public and a private key
    pub fn list_key_pair_aliases(&self, caller: &Caller, id: TokenId) -> TokenResult<Vec<String>> {
        self.authorize_on(caller, AccessRule::View, id)?;
        self.read(id, CryptoToken::key_pair_aliases)
    }

    pub fn list_key_pair_infos(&self, caller: &Caller, id: TokenId) -> TokenResult<Vec<KeyPairInfo>> {
        self.authorize_on(caller, AccessRule::View, id)?;
        self.read(id, |token| {
            token
                .key_pair_aliases()?
                .into_iter()
                .map(|alias| -> TokenResult<KeyPairInfo> {
                    let public_key = token.public_key(&alias)?;
                    Ok(KeyPairInfo::new(alias, &public_key))
                })
                .collect()
        })
    }

    /// `None` when `alias` is not bound to a key pair
    pub fn get_key_pair_info(
        &self,
        caller: &Caller,
        id: TokenId,
        alias: &str,
    ) -> TokenResult<Option<KeyPairInfo>> {
        self.authorize_on(caller, AccessRule::View, id)?;
        self.read(id, |token| {
            if !token.key_pair_aliases()?.iter().any(|a| a == alias) {
                return Ok(None);
            }
            let public_key = token.public_key(alias)?;
            Ok(Some(KeyPairInfo::new(alias, &public_key)))
        })
    }

    pub fn get_public_key(&self, caller: &Caller, id: TokenId, alias: &str) -> TokenResult<PublicKey> {
        self.authorize_on(caller, AccessRule::View, id)?;
        self.read(id, |token| token.public_key(alias))
    }

    /// Whether a public, private or secret key is bound to `alias`
    pub fn is_alias_used(&self, caller: &Caller, id: TokenId, alias: &str) -> TokenResult<bool> {
        self.authorize_on(caller, AccessRule::View, id)?;
        self.read(id, |token| token.is_alias_used(alias))
    }

    /// Looks the name up in the store's name cache, then scans uncached ids
    pub fn resolve_id_by_name(&self, caller: &Caller, name: &str) -> TokenResult<Option<TokenId>> {
        let cached = self.store.cached_name_to_id();
        let mut found = cached.get(name).copied();
        if found.is_none() {
            trace!("Crypto token name '{}' not cached, scanning", name);
            for id in self.store.list_ids()? {
                if cached.values().any(|cached_id| *cached_id == id) {
                    continue;
                }
                let matches = self
                    .store
                    .get(id)?
                    .is_some_and(|record| record.name == name);
                if matches {
                    found = Some(id);
                    break;
                }
            }
        }
        if let Some(id) = found {
            self.authorize_on(caller, AccessRule::View, id)?;
        }
        Ok(found)
    }

    fn read<T>(&self, id: TokenId, op: impl FnOnce(&CryptoToken) -> TokenResult<T>) -> TokenResult<T> {
        self.with_live(id, |live| {
            let (_, token) = self.refresh(id, live)?;
            op(token)
        })
    }

    fn load_info(&self, id: TokenId) -> TokenResult<CryptoTokenInfo> {
        self.read(id, |token| {
            Ok(CryptoTokenInfo {
                id,
                name: token.name().to_string(),
                type_tag: token.type_tag().to_string(),
                active: token.is_active(),
                auto_activation: token.properties().has_auto_activation_pin(),
                properties: token.properties().redacted(),
            })
        })
    }
}
