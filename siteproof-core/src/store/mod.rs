//! Durable record of reports, evidence, custody and sync state.
//!
//! `LocalStore` is the capability seam: `SurrealStore` persists to an embedded
//! SurrealDB, `NoopStore` stands in where no persistence exists. Which one is
//! used is decided once at startup and passed around as `Arc<dyn LocalStore>`.

mod noop;
mod surreal;

pub use noop::NoopStore;
pub use surreal::SurrealStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::DbError;
use crate::models::{
    ConflictResolution, CustodyDraft, CustodyEvent, EntityType, EvidenceItem, EvidenceSyncStatus,
    RecordSyncStatus, Report, ReportItem, SyncConflict, SyncOperation, SyncPayload, SyncQueueEntry,
    SyncState, SyncStatePatch, UploadCheckpoint,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("persistence unavailable: {0}")]
    Unavailable(&'static str),
}

impl From<surrealdb::Error> for StoreError {
    fn from(e: surrealdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Sync-side fields of an evidence row. Written by the engine without
/// enqueueing anything.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceSyncUpdate {
    pub status: EvidenceSyncStatus,
    pub uploaded_url: Option<String>,
    pub integrity_verified: Option<bool>,
}

impl EvidenceSyncUpdate {
    pub fn status(status: EvidenceSyncStatus) -> Self {
        Self {
            status,
            uploaded_url: None,
            integrity_verified: None,
        }
    }
}

/// What `complete_sync_entry` did with an acknowledged entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Removed,
    /// A newer mutation collapsed into the entry while it was in flight; it stays queued.
    Superseded,
    /// The entry vanished while in flight (a create collapsed with a delete).
    Missing,
}

#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Stable id of this device; stamped on custody events.
    fn device_id(&self) -> &str;

    // Reports

    /// Insert or replace a report and queue the matching create/update.
    async fn save_report(&self, report: &Report) -> Result<(), StoreError>;
    async fn get_report(&self, id: &str) -> Result<Option<Report>, StoreError>;
    async fn list_reports(&self) -> Result<Vec<Report>, StoreError>;
    /// Remove a report row and queue a delete. Returns false if it did not exist.
    async fn delete_report(&self, id: &str) -> Result<bool, StoreError>;
    /// Write a server version of a report. Never enqueues.
    async fn apply_remote_report(&self, report: &Report) -> Result<(), StoreError>;
    /// Record the outcome of a push. Never enqueues.
    async fn set_report_sync(
        &self,
        id: &str,
        status: RecordSyncStatus,
        server_updated_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    // Evidence

    async fn insert_evidence(&self, item: &EvidenceItem) -> Result<(), StoreError>;
    async fn update_evidence(&self, item: &EvidenceItem) -> Result<(), StoreError>;
    async fn get_evidence(&self, id: &str) -> Result<Option<EvidenceItem>, StoreError>;
    async fn evidence_for_report(&self, report_id: &str) -> Result<Vec<EvidenceItem>, StoreError>;
    async fn list_evidence(&self) -> Result<Vec<EvidenceItem>, StoreError>;
    async fn set_evidence_sync(&self, id: &str, update: EvidenceSyncUpdate) -> Result<(), StoreError>;
    /// Remove the row and queue a delete. The files are the caller's business.
    async fn delete_evidence(&self, id: &str) -> Result<Option<EvidenceItem>, StoreError>;

    // Defects, roof elements, compliance assessments

    async fn save_report_item(&self, item: &ReportItem) -> Result<(), StoreError>;
    async fn report_items(&self, report_id: &str) -> Result<Vec<ReportItem>, StoreError>;
    async fn delete_report_item(&self, entity_type: EntityType, id: &str) -> Result<bool, StoreError>;

    // Custody

    /// Assign the next sequence number, link to the previous event and persist.
    async fn append_custody(&self, draft: CustodyDraft) -> Result<CustodyEvent, StoreError>;
    /// Events for one entity, newest first.
    async fn custody_chain(&self, entity_type: EntityType, entity_id: &str) -> Result<Vec<CustodyEvent>, StoreError>;
    /// Every event in insertion order.
    async fn custody_events(&self) -> Result<Vec<CustodyEvent>, StoreError>;
    async fn custody_count(&self) -> Result<i64, StoreError>;

    // Sync queue

    async fn enqueue_sync(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        operation: SyncOperation,
        payload: SyncPayload,
    ) -> Result<(), StoreError>;
    /// Outstanding entries, oldest first.
    async fn pending_sync_entries(&self) -> Result<Vec<SyncQueueEntry>, StoreError>;
    /// Ids of reports with a queued local change.
    async fn pending_sync_reports(&self) -> Result<Vec<String>, StoreError>;
    /// Remove an acknowledged entry if nothing collapsed into it meanwhile.
    async fn complete_sync_entry(&self, id: &str, revision: i64) -> Result<Completion, StoreError>;
    /// Bump the attempt count and keep the error. Returns the new count.
    async fn record_sync_failure(&self, id: &str, error: &str) -> Result<i64, StoreError>;
    async fn queue_len(&self) -> Result<i64, StoreError>;

    // Conflicts

    async fn upsert_conflict(&self, conflict: &SyncConflict) -> Result<(), StoreError>;
    async fn pending_conflicts(&self) -> Result<Vec<SyncConflict>, StoreError>;
    async fn get_conflict(&self, report_id: &str) -> Result<Option<SyncConflict>, StoreError>;
    async fn resolve_conflict_record(&self, report_id: &str, resolution: ConflictResolution) -> Result<(), StoreError>;
    async fn dismiss_conflict(&self, report_id: &str) -> Result<(), StoreError>;

    // Resumable uploads

    async fn upload_checkpoint(&self, evidence_id: &str) -> Result<Option<UploadCheckpoint>, StoreError>;
    async fn save_upload_checkpoint(&self, checkpoint: &UploadCheckpoint) -> Result<(), StoreError>;
    async fn clear_upload_checkpoint(&self, evidence_id: &str) -> Result<(), StoreError>;

    // Sync state

    async fn sync_state(&self) -> Result<SyncState, StoreError>;
    async fn update_sync_state(&self, patch: SyncStatePatch) -> Result<SyncState, StoreError>;
}

/// Table holding rows of the given entity type.
pub(crate) fn table_for(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Report => "report",
        EntityType::Photo | EntityType::Video | EntityType::VoiceNote => "evidence",
        EntityType::Defect => "defect",
        EntityType::RoofElement => "roof_element",
        EntityType::ComplianceAssessment => "compliance_assessment",
    }
}
