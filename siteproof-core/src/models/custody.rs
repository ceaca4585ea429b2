use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::EntityType;

/// One entry of the chain-of-custody ledger. Never updated or deleted once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustodyEvent {
    #[serde(rename = "uid")]
    pub id: String,
    /// Global insertion order.
    pub seq: i64,
    pub action: CustodyAction,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub user_name: String,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_at_time: Option<String>,
    #[serde(default, with = "crate::json_blob")]
    pub details: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_event_hash: Option<String>,
    pub event_hash: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustodyAction {
    Captured,
    Hashed,
    Stored,
    Viewed,
    Synced,
    Exported,
    IncludedInReport,
    Verified,
    Deleted,
}

impl CustodyAction {
    pub fn as_str(self) -> &'static str {
        match self {
            CustodyAction::Captured => "CAPTURED",
            CustodyAction::Hashed => "HASHED",
            CustodyAction::Stored => "STORED",
            CustodyAction::Viewed => "VIEWED",
            CustodyAction::Synced => "SYNCED",
            CustodyAction::Exported => "EXPORTED",
            CustodyAction::IncludedInReport => "INCLUDED_IN_REPORT",
            CustodyAction::Verified => "VERIFIED",
            CustodyAction::Deleted => "DELETED",
        }
    }
}

/// Who is acting on the evidence. Bound once per process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Actor {
    pub user_id: String,
    pub user_name: String,
    pub device_id: String,
}

/// An event before the store assigns its sequence number and chain hash.
#[derive(Debug, Clone, PartialEq)]
pub struct CustodyDraft {
    pub action: CustodyAction,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub actor: Actor,
    pub hash_at_time: Option<String>,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}
