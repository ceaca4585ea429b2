use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{EntityType, EvidenceItem, Report, ReportItem};

/// A local mutation waiting to reach the server.
/// At most one entry exists per (entity_type, entity_id); see `SyncOperation::collapse`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncQueueEntry {
    #[serde(rename = "uid")]
    pub id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: SyncOperation,
    #[serde(with = "crate::json_blob")]
    pub payload: SyncPayload,
    pub enqueued_at: DateTime<Utc>,
    pub attempt_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Bumped every time a newer mutation collapses into this entry.
    pub revision: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

/// What to do with the queue when a new mutation arrives for an entity
/// that already has an outstanding entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collapse {
    Insert,
    Replace(SyncOperation),
    Remove,
}

impl SyncOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncOperation::Create => "create",
            SyncOperation::Update => "update",
            SyncOperation::Delete => "delete",
        }
    }

    /// Latest-wins collapsing. `existing` is the operation already queued.
    pub fn collapse(existing: Option<SyncOperation>, incoming: SyncOperation) -> Collapse {
        match (existing, incoming) {
            (None, _) => Collapse::Insert,
            // The server never saw the entity; nothing to tell it.
            (Some(SyncOperation::Create), SyncOperation::Delete) => Collapse::Remove,
            (Some(SyncOperation::Create), _) => Collapse::Replace(SyncOperation::Create),
            (Some(SyncOperation::Update), op) => Collapse::Replace(op),
            (Some(SyncOperation::Delete), op) => Collapse::Replace(op),
        }
    }
}

/// Typed body of a queue entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "payload_type", rename_all = "snake_case")]
pub enum SyncPayload {
    Report(Report),
    Evidence(EvidenceItem),
    Item(ReportItem),
    Tombstone { report_id: Option<String> },
}

/// A report changed on both sides since the last sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConflict {
    #[serde(rename = "uid")]
    pub report_id: String,
    pub resolution: ConflictResolution,
    pub server_updated_at: DateTime<Utc>,
    pub client_updated_at: DateTime<Utc>,
    #[serde(default, with = "crate::json_blob")]
    pub server_snapshot: Option<Report>,
    pub detected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dismissed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    ClientWins,
    ServerWins,
    Pending,
}

/// The user's answer to a conflict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictChoice {
    KeepLocal,
    KeepServer,
    Dismiss,
}

/// Process-wide sync markers. Single row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_upload_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_download_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_outcome: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Partial update of `SyncState`. `None` leaves a field untouched;
/// `last_error: Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatePatch {
    pub last_upload_at: Option<DateTime<Utc>>,
    pub last_download_at: Option<DateTime<Utc>>,
    pub download_cursor: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_outcome: Option<String>,
    pub last_error: Option<Option<String>>,
}

impl SyncState {
    pub fn apply(&mut self, patch: SyncStatePatch) {
        if let Some(at) = patch.last_upload_at {
            self.last_upload_at = Some(at);
        }
        if let Some(at) = patch.last_download_at {
            self.last_download_at = Some(at);
        }
        if let Some(cursor) = patch.download_cursor {
            self.download_cursor = Some(cursor);
        }
        if let Some(at) = patch.last_run_at {
            self.last_run_at = Some(at);
        }
        if let Some(outcome) = patch.last_run_outcome {
            self.last_run_outcome = Some(outcome);
        }
        if let Some(error) = patch.last_error {
            self.last_error = error;
        }
    }
}

/// Progress of a resumable upload, persisted so it survives restarts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadCheckpoint {
    #[serde(rename = "uid")]
    pub evidence_id: String,
    pub upload_url: String,
    #[serde(rename = "byte_offset")]
    pub offset: i64,
    pub total_bytes: i64,
    pub original_hash: String,
    pub updated_at: DateTime<Utc>,
}

/// Where a sync run currently is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    CheckingConnectivity,
    CheckingServerHealth,
    Draining,
    Uploading,
    Downloading,
    Reconciling,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_is_latest_wins() {
        use SyncOperation::*;
        assert_eq!(SyncOperation::collapse(None, Update), Collapse::Insert);
        assert_eq!(SyncOperation::collapse(Some(Create), Update), Collapse::Replace(Create));
        assert_eq!(SyncOperation::collapse(Some(Create), Delete), Collapse::Remove);
        assert_eq!(SyncOperation::collapse(Some(Update), Update), Collapse::Replace(Update));
        assert_eq!(SyncOperation::collapse(Some(Update), Delete), Collapse::Replace(Delete));
        assert_eq!(SyncOperation::collapse(Some(Delete), Create), Collapse::Replace(Create));
    }

    #[test]
    fn patch_only_touches_given_fields() {
        let mut state = SyncState {
            download_cursor: Some("c1".into()),
            last_error: Some("boom".into()),
            ..Default::default()
        };
        state.apply(SyncStatePatch {
            last_run_outcome: Some("no_data".into()),
            last_error: Some(None),
            ..Default::default()
        });
        assert_eq!(state.download_cursor.as_deref(), Some("c1"));
        assert_eq!(state.last_run_outcome.as_deref(), Some("no_data"));
        assert_eq!(state.last_error, None);
    }
}
