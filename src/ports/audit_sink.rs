use std::fmt;

use serde::Serialize;

use crate::logic::AuditDetails;
use crate::model::TokenId;

/// Kind of mutation an audit record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AuditEventType {
    #[serde(rename = "TOKEN_CREATE")]
    Create,
    #[serde(rename = "TOKEN_EDIT")]
    Edit,
    #[serde(rename = "TOKEN_DELETE")]
    Delete,
    #[serde(rename = "TOKEN_ACTIVATE")]
    Activate,
    #[serde(rename = "TOKEN_DEACTIVATE")]
    Deactivate,
    #[serde(rename = "TOKEN_UPDATEPIN")]
    UpdatePin,
    #[serde(rename = "TOKEN_GEN_KEYPAIR")]
    GenerateKeyPair,
    #[serde(rename = "TOKEN_DELETE_ENTRY")]
    DeleteEntry,
}

impl AuditEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEventType::Create => "TOKEN_CREATE",
            AuditEventType::Edit => "TOKEN_EDIT",
            AuditEventType::Delete => "TOKEN_DELETE",
            AuditEventType::Activate => "TOKEN_ACTIVATE",
            AuditEventType::Deactivate => "TOKEN_DEACTIVATE",
            AuditEventType::UpdatePin => "TOKEN_UPDATEPIN",
            AuditEventType::GenerateKeyPair => "TOKEN_GEN_KEYPAIR",
            AuditEventType::DeleteEntry => "TOKEN_DELETE_ENTRY",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Success,
    Failure,
}

/// One audit trail record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub status: AuditStatus,
    pub actor: String,
    pub target_id: TokenId,
    pub details: AuditDetails,
}

/// Audit log storage; only ever called after a successful commit
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}
