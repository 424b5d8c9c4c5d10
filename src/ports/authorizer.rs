use std::fmt;

use crate::model::{Caller, TokenId};

/// Access-control decision engine
pub trait Authorizer: Send + Sync {
    fn is_authorized(&self, caller: &Caller, resource: &str) -> bool;
}

/// Resource kinds guarding crypto token operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessRule {
    View,
    Modify,
    Delete,
    Activate,
    Deactivate,
    GenerateKeys,
    RemoveKeys,
    TestKeys,
}

impl AccessRule {
    /// Parent of every crypto token resource
    pub const BASE: &'static str = "/cryptotoken";

    pub fn resource(self) -> &'static str {
        match self {
            AccessRule::View => "/cryptotoken/view",
            AccessRule::Modify => "/cryptotoken/modify",
            AccessRule::Delete => "/cryptotoken/delete",
            AccessRule::Activate => "/cryptotoken/activate",
            AccessRule::Deactivate => "/cryptotoken/deactivate",
            AccessRule::GenerateKeys => "/cryptotoken/keys/generate",
            AccessRule::RemoveKeys => "/cryptotoken/keys/remove",
            AccessRule::TestKeys => "/cryptotoken/keys/test",
        }
    }

    /// `<kind>/<id>` form used by per-token operations
    pub fn resource_for(self, id: TokenId) -> String {
        format!("{}/{}", self.resource(), id)
    }
}

impl fmt::Display for AccessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource())
    }
}
