use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Completion, EvidenceSyncUpdate, LocalStore, StoreError};
use crate::models::{
    ConflictResolution, CustodyDraft, CustodyEvent, EntityType, EvidenceItem, RecordSyncStatus, Report, ReportItem,
    SyncConflict, SyncOperation, SyncPayload, SyncQueueEntry, SyncState, SyncStatePatch, UploadCheckpoint,
};

/// Store for hosts without persistence. Reads come back empty, writes are
/// dropped, and the custody log refuses to pretend it recorded anything.
pub struct NoopStore {
    device_id: String,
}

impl NoopStore {
    pub fn new() -> Self {
        Self {
            device_id: ulid::Ulid::new().to_string(),
        }
    }
}

impl Default for NoopStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStore for NoopStore {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn save_report(&self, _report: &Report) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_report(&self, _id: &str) -> Result<Option<Report>, StoreError> {
        Ok(None)
    }

    async fn list_reports(&self) -> Result<Vec<Report>, StoreError> {
        Ok(Vec::new())
    }

    async fn delete_report(&self, _id: &str) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn apply_remote_report(&self, _report: &Report) -> Result<(), StoreError> {
        Ok(())
    }

    async fn set_report_sync(
        &self,
        _id: &str,
        _status: RecordSyncStatus,
        _server_updated_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_evidence(&self, _item: &EvidenceItem) -> Result<(), StoreError> {
        Ok(())
    }

    async fn update_evidence(&self, _item: &EvidenceItem) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_evidence(&self, _id: &str) -> Result<Option<EvidenceItem>, StoreError> {
        Ok(None)
    }

    async fn evidence_for_report(&self, _report_id: &str) -> Result<Vec<EvidenceItem>, StoreError> {
        Ok(Vec::new())
    }

    async fn list_evidence(&self) -> Result<Vec<EvidenceItem>, StoreError> {
        Ok(Vec::new())
    }

    async fn set_evidence_sync(&self, _id: &str, _update: EvidenceSyncUpdate) -> Result<(), StoreError> {
        Ok(())
    }

    async fn delete_evidence(&self, _id: &str) -> Result<Option<EvidenceItem>, StoreError> {
        Ok(None)
    }

    async fn save_report_item(&self, _item: &ReportItem) -> Result<(), StoreError> {
        Ok(())
    }

    async fn report_items(&self, _report_id: &str) -> Result<Vec<ReportItem>, StoreError> {
        Ok(Vec::new())
    }

    async fn delete_report_item(&self, _entity_type: EntityType, _id: &str) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn append_custody(&self, _draft: CustodyDraft) -> Result<CustodyEvent, StoreError> {
        Err(StoreError::Unavailable("custody log"))
    }

    async fn custody_chain(&self, _entity_type: EntityType, _entity_id: &str) -> Result<Vec<CustodyEvent>, StoreError> {
        Ok(Vec::new())
    }

    async fn custody_events(&self) -> Result<Vec<CustodyEvent>, StoreError> {
        Ok(Vec::new())
    }

    async fn custody_count(&self) -> Result<i64, StoreError> {
        Ok(0)
    }

    async fn enqueue_sync(
        &self,
        _entity_type: EntityType,
        _entity_id: &str,
        _operation: SyncOperation,
        _payload: SyncPayload,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn pending_sync_entries(&self) -> Result<Vec<SyncQueueEntry>, StoreError> {
        Ok(Vec::new())
    }

    async fn pending_sync_reports(&self) -> Result<Vec<String>, StoreError> {
        Ok(Vec::new())
    }

    async fn complete_sync_entry(&self, _id: &str, _revision: i64) -> Result<Completion, StoreError> {
        Ok(Completion::Missing)
    }

    async fn record_sync_failure(&self, _id: &str, _error: &str) -> Result<i64, StoreError> {
        Ok(0)
    }

    async fn queue_len(&self) -> Result<i64, StoreError> {
        Ok(0)
    }

    async fn upsert_conflict(&self, _conflict: &SyncConflict) -> Result<(), StoreError> {
        Ok(())
    }

    async fn pending_conflicts(&self) -> Result<Vec<SyncConflict>, StoreError> {
        Ok(Vec::new())
    }

    async fn get_conflict(&self, _report_id: &str) -> Result<Option<SyncConflict>, StoreError> {
        Ok(None)
    }

    async fn resolve_conflict_record(&self, _report_id: &str, _resolution: ConflictResolution) -> Result<(), StoreError> {
        Ok(())
    }

    async fn dismiss_conflict(&self, _report_id: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn upload_checkpoint(&self, _evidence_id: &str) -> Result<Option<UploadCheckpoint>, StoreError> {
        Ok(None)
    }

    async fn save_upload_checkpoint(&self, _checkpoint: &UploadCheckpoint) -> Result<(), StoreError> {
        Ok(())
    }

    async fn clear_upload_checkpoint(&self, _evidence_id: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn sync_state(&self) -> Result<SyncState, StoreError> {
        Ok(SyncState::default())
    }

    async fn update_sync_state(&self, patch: SyncStatePatch) -> Result<SyncState, StoreError> {
        let mut state = SyncState::default();
        state.apply(patch);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Actor, CustodyAction};

    #[tokio::test]
    async fn reads_are_empty_and_custody_refuses() {
        let store = NoopStore::new();
        store.save_report(&Report::new("x")).await.unwrap();
        assert!(store.list_reports().await.unwrap().is_empty());
        assert_eq!(store.queue_len().await.unwrap(), 0);

        let err = store
            .append_custody(CustodyDraft {
                action: CustodyAction::Captured,
                entity_type: EntityType::Photo,
                entity_id: "p".into(),
                actor: Actor {
                    user_id: "u".into(),
                    user_name: "U".into(),
                    device_id: store.device_id().to_string(),
                },
                hash_at_time: None,
                details: serde_json::Value::Null,
                timestamp: Utc::now(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
