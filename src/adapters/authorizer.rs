use std::collections::HashMap;

use tracing::debug;

use crate::model::Caller;
use crate::ports::Authorizer;

/// Grants read from configuration: caller name to resource prefixes
///
/// A grant covers the resource itself and everything below it, so
/// `/cryptotoken/keys` allows generating, removing and testing keys on every
/// token while `/cryptotoken/view/5` only allows viewing token 5.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthorizer {
    grants: HashMap<String, Vec<String>>,
}

impl StaticAuthorizer {
    pub fn new(grants: HashMap<String, Vec<String>>) -> Self {
        Self { grants }
    }

    pub fn grant(mut self, caller: impl Into<String>, resource: impl Into<String>) -> Self {
        self.grants
            .entry(caller.into())
            .or_default()
            .push(resource.into());
        self
    }
}

fn covers(grant: &str, resource: &str) -> bool {
    let grant = grant.trim_end_matches('/');
    if grant.is_empty() {
        return true;
    }
    match resource.strip_prefix(grant) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

impl Authorizer for StaticAuthorizer {
    fn is_authorized(&self, caller: &Caller, resource: &str) -> bool {
        let allowed = self
            .grants
            .get(caller.name())
            .is_some_and(|grants| grants.iter().any(|grant| covers(grant, resource)));
        if !allowed {
            debug!("No grant for {} covers {}", caller, resource);
        }
        allowed
    }
}

/// Grants everything; for embedded use where the caller is already trusted
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllAuthorizer;

impl Authorizer for AllowAllAuthorizer {
    fn is_authorized(&self, _caller: &Caller, _resource: &str) -> bool {
        true
    }
}
