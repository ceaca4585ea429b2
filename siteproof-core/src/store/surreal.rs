use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use super::{table_for, Completion, EvidenceSyncUpdate, LocalStore, StoreError};
use crate::custody::compute_event_hash;
use crate::db::{self, DbHandle};
use crate::models::{
    Collapse, ComplianceAssessment, ConflictResolution, CustodyDraft, CustodyEvent, Defect, EntityType,
    EvidenceItem, RecordSyncStatus, Report, ReportItem, RoofElement, SyncConflict, SyncOperation, SyncPayload,
    SyncQueueEntry, SyncState, SyncStatePatch, UploadCheckpoint,
};

type Binds = Vec<(&'static str, Value)>;

/// Statements committed together in one transaction.
#[derive(Default)]
struct Batch {
    statements: Vec<String>,
    binds: Binds,
}

impl Batch {
    fn push(&mut self, statement: impl Into<String>) {
        self.statements.push(statement.into());
    }

    fn bind(&mut self, key: &'static str, value: Value) {
        self.binds.push((key, value));
    }
}

/// `LocalStore` backed by embedded SurrealDB.
///
/// Rows are addressed by their `uid` field. Writes are serialized by
/// `write_lock`, so read-then-write sequences (queue collapsing, custody
/// sequence numbers) never interleave.
pub struct SurrealStore {
    handle: DbHandle,
    write_lock: Mutex<()>,
}

impl SurrealStore {
    pub fn new(handle: DbHandle) -> Self {
        Self {
            handle,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(db::open(path).await?))
    }

    pub async fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(db::open_in_memory().await?))
    }

    pub fn handle(&self) -> &DbHandle {
        &self.handle
    }

    // ─── Query helpers ─────────────────────────────────────────

    async fn fetch(&self, sql: &str, binds: Binds) -> Result<Vec<Value>, StoreError> {
        let mut query = self.handle.db.query(sql);
        for bind in binds {
            query = query.bind(bind);
        }
        let mut response = query.await?.check()?;
        let rows: Vec<Value> = response.take(0)?;
        Ok(rows)
    }

    async fn fetch_as<T: DeserializeOwned>(&self, sql: &str, binds: Binds) -> Result<Vec<T>, StoreError> {
        let rows = self.fetch(sql, binds).await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(StoreError::from))
            .collect()
    }

    async fn fetch_one<T: DeserializeOwned>(&self, sql: &str, binds: Binds) -> Result<Option<T>, StoreError> {
        Ok(self.fetch_as(sql, binds).await?.into_iter().next())
    }

    async fn count(&self, table: &str) -> Result<i64, StoreError> {
        let rows = self
            .fetch(&format!("SELECT count() FROM {table} GROUP ALL"), vec![])
            .await?;
        Ok(rows.first().and_then(|r| r["count"].as_i64()).unwrap_or(0))
    }

    async fn commit(&self, batch: Batch) -> Result<(), StoreError> {
        if batch.statements.is_empty() {
            return Ok(());
        }
        let mut sql = String::from("BEGIN TRANSACTION;\n");
        for statement in &batch.statements {
            sql.push_str(statement);
            sql.push_str(";\n");
        }
        sql.push_str("COMMIT TRANSACTION;");

        let mut query = self.handle.db.query(sql);
        for bind in batch.binds {
            query = query.bind(bind);
        }
        query.await?.check()?;
        Ok(())
    }

    async fn row_by_uid(&self, table: &str, uid: &str) -> Result<Option<Value>, StoreError> {
        let rows = self
            .fetch(
                &format!("SELECT * OMIT id FROM {table} WHERE uid = $uid"),
                vec![("uid", Value::String(uid.to_string()))],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Queue a create-or-replace of one row. Caller holds the write lock.
    async fn stage_row<T: Serialize>(
        &self,
        batch: &mut Batch,
        table: &str,
        uid: &str,
        record: &T,
    ) -> Result<SyncOperation, StoreError> {
        let exists = self.row_by_uid(table, uid).await?.is_some();
        batch.bind("rec", encode(record)?);
        if exists {
            batch.bind("uid", Value::String(uid.to_string()));
            batch.push(format!("UPDATE {table} CONTENT $rec WHERE uid = $uid"));
            Ok(SyncOperation::Update)
        } else {
            batch.push(format!("CREATE {table} CONTENT $rec"));
            Ok(SyncOperation::Create)
        }
    }

    async fn queue_entry_for(&self, entity_type: EntityType, entity_id: &str) -> Result<Option<SyncQueueEntry>, StoreError> {
        self.fetch_one(
            "SELECT * OMIT id FROM sync_queue WHERE entity_type = $entity_type AND entity_id = $entity_id",
            vec![
                ("entity_type", Value::String(entity_type.as_str().to_string())),
                ("entity_id", Value::String(entity_id.to_string())),
            ],
        )
        .await
    }

    /// Stage a queue mutation following the latest-wins collapse rules.
    /// Caller holds the write lock.
    async fn stage_enqueue(
        &self,
        batch: &mut Batch,
        entity_type: EntityType,
        entity_id: &str,
        operation: SyncOperation,
        payload: SyncPayload,
    ) -> Result<(), StoreError> {
        let existing = self.queue_entry_for(entity_type, entity_id).await?;
        let collapse = SyncOperation::collapse(existing.as_ref().map(|e| e.operation), operation);

        match (collapse, existing) {
            (Collapse::Replace(op), Some(entry)) => {
                debug!(entity_type = %entity_type, entity_id, from = entry.operation.as_str(), to = op.as_str(), "queue collapse");
                batch.bind("q_uid", Value::String(entry.id));
                batch.bind("q_op", Value::String(op.as_str().to_string()));
                batch.bind("q_payload", Value::String(serde_json::to_string(&payload)?));
                batch.bind("q_revision", Value::from(entry.revision + 1));
                batch.push(
                    "UPDATE sync_queue SET
                        operation = $q_op,
                        payload = $q_payload,
                        attempt_count = 0,
                        last_error = NONE,
                        revision = $q_revision
                    WHERE uid = $q_uid",
                );
            }
            (Collapse::Remove, Some(entry)) => {
                debug!(entity_type = %entity_type, entity_id, "queued create cancelled by delete");
                batch.bind("q_uid", Value::String(entry.id));
                batch.push("DELETE sync_queue WHERE uid = $q_uid");
            }
            _ => {
                let entry = SyncQueueEntry {
                    id: ulid::Ulid::new().to_string(),
                    entity_type,
                    entity_id: entity_id.to_string(),
                    operation,
                    payload,
                    enqueued_at: Utc::now(),
                    attempt_count: 0,
                    last_error: None,
                    revision: 1,
                };
                batch.bind("q_entry", encode(&entry)?);
                batch.push("CREATE sync_queue CONTENT $q_entry");
            }
        }
        Ok(())
    }

    async fn read_report(&self, id: &str) -> Result<Option<Report>, StoreError> {
        self.fetch_one(
            "SELECT * OMIT id FROM report WHERE uid = $uid",
            vec![("uid", Value::String(id.to_string()))],
        )
        .await
    }

    async fn read_evidence(&self, id: &str) -> Result<Option<EvidenceItem>, StoreError> {
        self.fetch_one(
            "SELECT * OMIT id FROM evidence WHERE uid = $uid",
            vec![("uid", Value::String(id.to_string()))],
        )
        .await
    }

    async fn read_sync_state(&self) -> Result<SyncState, StoreError> {
        let state: Option<SyncState> = self.fetch_one("SELECT * OMIT id FROM sync_state:current", vec![]).await?;
        Ok(state.unwrap_or_default())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    Ok(serde_json::to_value(value)?)
}

fn text(value: impl Serialize) -> Result<Value, StoreError> {
    encode(&value)
}

#[async_trait]
impl LocalStore for SurrealStore {
    fn device_id(&self) -> &str {
        &self.handle.device_id
    }

    async fn save_report(&self, report: &Report) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut report = report.clone();
        let existing = self.read_report(&report.id).await?;
        report.sync_status = match existing.map(|r| r.sync_status) {
            Some(RecordSyncStatus::Conflict) => RecordSyncStatus::Conflict,
            _ => RecordSyncStatus::Pending,
        };

        let mut batch = Batch::default();
        let operation = self.stage_row(&mut batch, "report", &report.id, &report).await?;
        self.stage_enqueue(&mut batch, EntityType::Report, &report.id, operation, SyncPayload::Report(report.clone()))
            .await?;
        self.commit(batch).await
    }

    async fn get_report(&self, id: &str) -> Result<Option<Report>, StoreError> {
        self.read_report(id).await
    }

    async fn list_reports(&self) -> Result<Vec<Report>, StoreError> {
        let mut reports: Vec<Report> = self.fetch_as("SELECT * OMIT id FROM report", vec![]).await?;
        reports.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(reports)
    }

    async fn delete_report(&self, id: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        if self.read_report(id).await?.is_none() {
            return Ok(false);
        }
        let mut batch = Batch::default();
        batch.bind("uid", Value::String(id.to_string()));
        batch.push("DELETE report WHERE uid = $uid");
        self.stage_enqueue(
            &mut batch,
            EntityType::Report,
            id,
            SyncOperation::Delete,
            SyncPayload::Tombstone {
                report_id: Some(id.to_string()),
            },
        )
        .await?;
        self.commit(batch).await?;
        Ok(true)
    }

    async fn apply_remote_report(&self, report: &Report) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut report = report.clone();
        report.sync_status = RecordSyncStatus::Synced;
        let mut batch = Batch::default();
        self.stage_row(&mut batch, "report", &report.id, &report).await?;
        self.commit(batch).await
    }

    async fn set_report_sync(
        &self,
        id: &str,
        status: RecordSyncStatus,
        server_updated_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut batch = Batch::default();
        batch.bind("uid", Value::String(id.to_string()));
        batch.bind("status", text(status)?);
        match server_updated_at {
            Some(at) => {
                batch.bind("server_updated_at", text(at)?);
                batch.push(
                    "UPDATE report SET sync_status = $status, server_updated_at = $server_updated_at WHERE uid = $uid",
                );
            }
            None => batch.push("UPDATE report SET sync_status = $status WHERE uid = $uid"),
        }
        self.commit(batch).await
    }

    async fn insert_evidence(&self, item: &EvidenceItem) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut batch = Batch::default();
        batch.bind("rec", encode(item)?);
        batch.push("CREATE evidence CONTENT $rec");
        self.stage_enqueue(
            &mut batch,
            item.entity_type(),
            &item.id,
            SyncOperation::Create,
            SyncPayload::Evidence(item.clone()),
        )
        .await?;
        self.commit(batch).await
    }

    async fn update_evidence(&self, item: &EvidenceItem) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let Some(current) = self.read_evidence(&item.id).await? else {
            return Err(StoreError::NotFound {
                entity: "evidence",
                id: item.id.clone(),
            });
        };
        // The capture hash is fixed for the life of the row.
        let mut item = item.clone();
        item.original_hash = current.original_hash;

        let mut batch = Batch::default();
        batch.bind("rec", encode(&item)?);
        batch.bind("uid", Value::String(item.id.clone()));
        batch.push("UPDATE evidence CONTENT $rec WHERE uid = $uid");
        self.stage_enqueue(
            &mut batch,
            item.entity_type(),
            &item.id,
            SyncOperation::Update,
            SyncPayload::Evidence(item.clone()),
        )
        .await?;
        self.commit(batch).await
    }

    async fn get_evidence(&self, id: &str) -> Result<Option<EvidenceItem>, StoreError> {
        self.read_evidence(id).await
    }

    async fn evidence_for_report(&self, report_id: &str) -> Result<Vec<EvidenceItem>, StoreError> {
        let mut items: Vec<EvidenceItem> = self
            .fetch_as(
                "SELECT * OMIT id FROM evidence WHERE report_id = $report_id",
                vec![("report_id", Value::String(report_id.to_string()))],
            )
            .await?;
        items.sort_by(|a, b| a.captured_at.cmp(&b.captured_at));
        Ok(items)
    }

    async fn list_evidence(&self) -> Result<Vec<EvidenceItem>, StoreError> {
        let mut items: Vec<EvidenceItem> = self.fetch_as("SELECT * OMIT id FROM evidence", vec![]).await?;
        items.sort_by(|a, b| a.captured_at.cmp(&b.captured_at));
        Ok(items)
    }

    async fn set_evidence_sync(&self, id: &str, update: EvidenceSyncUpdate) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        if self.read_evidence(id).await?.is_none() {
            return Err(StoreError::NotFound {
                entity: "evidence",
                id: id.to_string(),
            });
        }

        let mut sets = vec!["sync_status = $status"];
        let mut batch = Batch::default();
        batch.bind("uid", Value::String(id.to_string()));
        batch.bind("status", text(update.status)?);
        if let Some(url) = update.uploaded_url {
            sets.push("uploaded_url = $url");
            batch.bind("url", Value::String(url));
        }
        if let Some(valid) = update.integrity_verified {
            sets.push("integrity_verified = $verified");
            batch.bind("verified", Value::Bool(valid));
        }
        batch.push(format!("UPDATE evidence SET {} WHERE uid = $uid", sets.join(", ")));
        self.commit(batch).await
    }

    async fn delete_evidence(&self, id: &str) -> Result<Option<EvidenceItem>, StoreError> {
        let _guard = self.write_lock.lock().await;
        let Some(item) = self.read_evidence(id).await? else {
            return Ok(None);
        };
        let mut batch = Batch::default();
        batch.bind("uid", Value::String(id.to_string()));
        batch.push("DELETE evidence WHERE uid = $uid");
        self.stage_enqueue(
            &mut batch,
            item.entity_type(),
            id,
            SyncOperation::Delete,
            SyncPayload::Tombstone {
                report_id: Some(item.report_id.clone()),
            },
        )
        .await?;
        self.commit(batch).await?;
        Ok(Some(item))
    }

    async fn save_report_item(&self, item: &ReportItem) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let table = table_for(item.entity_type());
        let mut batch = Batch::default();
        let operation = match item {
            ReportItem::Defect(d) => self.stage_row(&mut batch, table, &d.id, d).await?,
            ReportItem::RoofElement(r) => self.stage_row(&mut batch, table, &r.id, r).await?,
            ReportItem::ComplianceAssessment(c) => self.stage_row(&mut batch, table, &c.id, c).await?,
        };
        self.stage_enqueue(&mut batch, item.entity_type(), item.id(), operation, SyncPayload::Item(item.clone()))
            .await?;
        self.commit(batch).await
    }

    async fn report_items(&self, report_id: &str) -> Result<Vec<ReportItem>, StoreError> {
        let bind = || vec![("report_id", Value::String(report_id.to_string()))];
        let defects: Vec<Defect> = self
            .fetch_as("SELECT * OMIT id FROM defect WHERE report_id = $report_id", bind())
            .await?;
        let elements: Vec<RoofElement> = self
            .fetch_as("SELECT * OMIT id FROM roof_element WHERE report_id = $report_id", bind())
            .await?;
        let assessments: Vec<ComplianceAssessment> = self
            .fetch_as("SELECT * OMIT id FROM compliance_assessment WHERE report_id = $report_id", bind())
            .await?;

        let mut items: Vec<ReportItem> = Vec::with_capacity(defects.len() + elements.len() + assessments.len());
        items.extend(elements.into_iter().map(ReportItem::RoofElement));
        items.extend(defects.into_iter().map(ReportItem::Defect));
        items.extend(assessments.into_iter().map(ReportItem::ComplianceAssessment));
        Ok(items)
    }

    async fn delete_report_item(&self, entity_type: EntityType, id: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let table = table_for(entity_type);
        let Some(row) = self.row_by_uid(table, id).await? else {
            return Ok(false);
        };
        let report_id = row["report_id"].as_str().map(str::to_string);

        let mut batch = Batch::default();
        batch.bind("uid", Value::String(id.to_string()));
        batch.push(format!("DELETE {table} WHERE uid = $uid"));
        self.stage_enqueue(&mut batch, entity_type, id, SyncOperation::Delete, SyncPayload::Tombstone { report_id })
            .await?;
        self.commit(batch).await?;
        Ok(true)
    }

    async fn append_custody(&self, draft: CustodyDraft) -> Result<CustodyEvent, StoreError> {
        let _guard = self.write_lock.lock().await;
        let last = self
            .fetch("SELECT seq, event_hash FROM custody_event ORDER BY seq DESC LIMIT 1", vec![])
            .await?;
        let (seq, prev_event_hash) = match last.first() {
            Some(row) => (
                row["seq"].as_i64().unwrap_or(0) + 1,
                row["event_hash"].as_str().map(str::to_string),
            ),
            None => (1, None),
        };

        let mut event = CustodyEvent {
            id: ulid::Ulid::new().to_string(),
            seq,
            action: draft.action,
            entity_type: draft.entity_type,
            entity_id: draft.entity_id,
            timestamp: draft.timestamp,
            user_id: draft.actor.user_id,
            user_name: draft.actor.user_name,
            device_id: draft.actor.device_id,
            hash_at_time: draft.hash_at_time,
            details: draft.details,
            prev_event_hash,
            event_hash: String::new(),
        };
        event.event_hash = compute_event_hash(&event);

        let mut query = self.handle.db.query("CREATE custody_event CONTENT $rec");
        query = query.bind(("rec", encode(&event)?));
        query.await?.check()?;
        Ok(event)
    }

    async fn custody_chain(&self, entity_type: EntityType, entity_id: &str) -> Result<Vec<CustodyEvent>, StoreError> {
        self.fetch_as(
            "SELECT * OMIT id FROM custody_event
                WHERE entity_type = $entity_type AND entity_id = $entity_id
                ORDER BY seq DESC",
            vec![
                ("entity_type", Value::String(entity_type.as_str().to_string())),
                ("entity_id", Value::String(entity_id.to_string())),
            ],
        )
        .await
    }

    async fn custody_events(&self) -> Result<Vec<CustodyEvent>, StoreError> {
        self.fetch_as("SELECT * OMIT id FROM custody_event ORDER BY seq ASC", vec![])
            .await
    }

    async fn custody_count(&self) -> Result<i64, StoreError> {
        self.count("custody_event").await
    }

    async fn enqueue_sync(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        operation: SyncOperation,
        payload: SyncPayload,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut batch = Batch::default();
        self.stage_enqueue(&mut batch, entity_type, entity_id, operation, payload)
            .await?;
        self.commit(batch).await
    }

    async fn pending_sync_entries(&self) -> Result<Vec<SyncQueueEntry>, StoreError> {
        let mut entries: Vec<SyncQueueEntry> = self.fetch_as("SELECT * OMIT id FROM sync_queue", vec![]).await?;
        entries.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at));
        Ok(entries)
    }

    async fn pending_sync_reports(&self) -> Result<Vec<String>, StoreError> {
        let rows = self
            .fetch("SELECT entity_id FROM sync_queue WHERE entity_type = 'report'", vec![])
            .await?;
        Ok(rows
            .iter()
            .filter_map(|r| r["entity_id"].as_str().map(str::to_string))
            .collect())
    }

    async fn complete_sync_entry(&self, id: &str, revision: i64) -> Result<Completion, StoreError> {
        let _guard = self.write_lock.lock().await;
        let entry: Option<SyncQueueEntry> = self
            .fetch_one(
                "SELECT * OMIT id FROM sync_queue WHERE uid = $uid",
                vec![("uid", Value::String(id.to_string()))],
            )
            .await?;
        let Some(entry) = entry else {
            return Ok(Completion::Missing);
        };

        let mut batch = Batch::default();
        batch.bind("uid", Value::String(id.to_string()));
        if entry.revision == revision {
            batch.push("DELETE sync_queue WHERE uid = $uid");
            self.commit(batch).await?;
            return Ok(Completion::Removed);
        }

        // The server now knows the entity, so a pending create is really an update.
        if entry.operation == SyncOperation::Create {
            batch.push("UPDATE sync_queue SET operation = 'update' WHERE uid = $uid");
            self.commit(batch).await?;
        }
        Ok(Completion::Superseded)
    }

    async fn record_sync_failure(&self, id: &str, error: &str) -> Result<i64, StoreError> {
        let _guard = self.write_lock.lock().await;
        let entry: Option<SyncQueueEntry> = self
            .fetch_one(
                "SELECT * OMIT id FROM sync_queue WHERE uid = $uid",
                vec![("uid", Value::String(id.to_string()))],
            )
            .await?;
        let Some(entry) = entry else {
            return Err(StoreError::NotFound {
                entity: "sync_queue",
                id: id.to_string(),
            });
        };

        let attempts = entry.attempt_count + 1;
        let mut batch = Batch::default();
        batch.bind("uid", Value::String(id.to_string()));
        batch.bind("attempts", Value::from(attempts));
        batch.bind("error", Value::String(error.to_string()));
        batch.push("UPDATE sync_queue SET attempt_count = $attempts, last_error = $error WHERE uid = $uid");
        self.commit(batch).await?;
        Ok(attempts)
    }

    async fn queue_len(&self) -> Result<i64, StoreError> {
        self.count("sync_queue").await
    }

    async fn upsert_conflict(&self, conflict: &SyncConflict) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut batch = Batch::default();
        self.stage_row(&mut batch, "sync_conflict", &conflict.report_id, conflict)
            .await?;
        self.commit(batch).await
    }

    async fn pending_conflicts(&self) -> Result<Vec<SyncConflict>, StoreError> {
        let mut conflicts: Vec<SyncConflict> = self
            .fetch_as("SELECT * OMIT id FROM sync_conflict WHERE resolution = 'pending'", vec![])
            .await?;
        conflicts.sort_by(|a, b| a.detected_at.cmp(&b.detected_at));
        Ok(conflicts)
    }

    async fn get_conflict(&self, report_id: &str) -> Result<Option<SyncConflict>, StoreError> {
        self.fetch_one(
            "SELECT * OMIT id FROM sync_conflict WHERE uid = $uid",
            vec![("uid", Value::String(report_id.to_string()))],
        )
        .await
    }

    async fn resolve_conflict_record(&self, report_id: &str, resolution: ConflictResolution) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut batch = Batch::default();
        batch.bind("uid", Value::String(report_id.to_string()));
        batch.bind("resolution", text(resolution)?);
        batch.bind("now", text(Utc::now())?);
        batch.push("UPDATE sync_conflict SET resolution = $resolution, resolved_at = $now WHERE uid = $uid");
        self.commit(batch).await
    }

    async fn dismiss_conflict(&self, report_id: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut batch = Batch::default();
        batch.bind("uid", Value::String(report_id.to_string()));
        batch.bind("now", text(Utc::now())?);
        batch.push("UPDATE sync_conflict SET dismissed_at = $now WHERE uid = $uid AND resolution = 'pending'");
        self.commit(batch).await
    }

    async fn upload_checkpoint(&self, evidence_id: &str) -> Result<Option<UploadCheckpoint>, StoreError> {
        self.fetch_one(
            "SELECT * OMIT id FROM upload_checkpoint WHERE uid = $uid",
            vec![("uid", Value::String(evidence_id.to_string()))],
        )
        .await
    }

    async fn save_upload_checkpoint(&self, checkpoint: &UploadCheckpoint) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut batch = Batch::default();
        self.stage_row(&mut batch, "upload_checkpoint", &checkpoint.evidence_id, checkpoint)
            .await?;
        self.commit(batch).await
    }

    async fn clear_upload_checkpoint(&self, evidence_id: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut batch = Batch::default();
        batch.bind("uid", Value::String(evidence_id.to_string()));
        batch.push("DELETE upload_checkpoint WHERE uid = $uid");
        self.commit(batch).await
    }

    async fn sync_state(&self) -> Result<SyncState, StoreError> {
        self.read_sync_state().await
    }

    async fn update_sync_state(&self, patch: SyncStatePatch) -> Result<SyncState, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.read_sync_state().await?;
        state.apply(patch);
        let mut batch = Batch::default();
        batch.bind("state", encode(&state)?);
        batch.push("UPSERT sync_state:current CONTENT $state");
        self.commit(batch).await?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Actor, CustodyAction, EvidenceKind, EvidenceSyncStatus, TrackPoint};
    use serde_json::json;

    async fn store() -> SurrealStore {
        SurrealStore::in_memory().await.unwrap()
    }

    fn evidence(report_id: &str) -> EvidenceItem {
        let id = ulid::Ulid::new().to_string();
        EvidenceItem {
            original_filename: format!("orig_{id}.mp4"),
            working_filename: format!("{id}.mp4"),
            id,
            report_id: report_id.to_string(),
            kind: EvidenceKind::Video,
            defect_id: None,
            roof_element_id: None,
            original_hash: "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08".into(),
            thumbnail_filename: None,
            captured_at: Utc::now(),
            byte_length: 4,
            latitude: Some(-33.86),
            longitude: Some(151.2),
            altitude: None,
            accuracy: Some(4.5),
            gps_track: vec![TrackPoint {
                latitude: -33.86,
                longitude: 151.2,
                altitude: None,
                offset_ms: 0,
            }],
            device_make: Some("Acme".into()),
            device_model: None,
            evidence_type: None,
            tag: None,
            caption: None,
            duration_ms: Some(1_500),
            sync_status: EvidenceSyncStatus::Captured,
            uploaded_url: None,
            integrity_verified: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn report_edits_collapse_into_one_entry() {
        let store = store().await;
        let mut report = Report::new("Roof at 12 High St");
        store.save_report(&report).await.unwrap();
        report.notes = Some("north face".into());
        store.save_report(&report).await.unwrap();

        let entries = store.pending_sync_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, SyncOperation::Create);
        assert_eq!(entries[0].revision, 2);
        match &entries[0].payload {
            SyncPayload::Report(r) => assert_eq!(r.notes.as_deref(), Some("north face")),
            other => panic!("unexpected payload {other:?}"),
        }
        assert_eq!(store.pending_sync_reports().await.unwrap(), vec![report.id.clone()]);
    }

    #[tokio::test]
    async fn deleting_an_unsynced_report_drops_the_entry() {
        let store = store().await;
        let report = Report::new("Shed");
        store.save_report(&report).await.unwrap();
        assert!(store.delete_report(&report.id).await.unwrap());
        assert_eq!(store.queue_len().await.unwrap(), 0);
        assert!(store.get_report(&report.id).await.unwrap().is_none());
        assert!(!store.delete_report(&report.id).await.unwrap());
    }

    #[tokio::test]
    async fn completion_is_revision_checked() {
        let store = store().await;
        let mut report = Report::new("Garage");
        store.save_report(&report).await.unwrap();
        let in_flight = store.pending_sync_entries().await.unwrap().remove(0);

        report.title = "Garage (rear)".into();
        store.save_report(&report).await.unwrap();

        let outcome = store.complete_sync_entry(&in_flight.id, in_flight.revision).await.unwrap();
        assert_eq!(outcome, Completion::Superseded);
        let entries = store.pending_sync_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, SyncOperation::Update);

        let outcome = store.complete_sync_entry(&entries[0].id, entries[0].revision).await.unwrap();
        assert_eq!(outcome, Completion::Removed);
        assert_eq!(store.queue_len().await.unwrap(), 0);
        assert_eq!(store.complete_sync_entry(&entries[0].id, 1).await.unwrap(), Completion::Missing);
    }

    #[tokio::test]
    async fn remote_reports_do_not_enqueue() {
        let store = store().await;
        let mut report = Report::new("Remote");
        report.server_updated_at = Some(Utc::now());
        store.apply_remote_report(&report).await.unwrap();
        store.apply_remote_report(&report).await.unwrap();

        assert_eq!(store.queue_len().await.unwrap(), 0);
        let stored = store.get_report(&report.id).await.unwrap().unwrap();
        assert_eq!(stored.sync_status, RecordSyncStatus::Synced);
        assert_eq!(stored.server_updated_at, report.server_updated_at);
    }

    #[tokio::test]
    async fn evidence_round_trips_with_track() {
        let store = store().await;
        let item = evidence("r1");
        store.insert_evidence(&item).await.unwrap();

        let stored = store.get_evidence(&item.id).await.unwrap().unwrap();
        assert_eq!(stored, item);
        assert_eq!(store.evidence_for_report("r1").await.unwrap().len(), 1);
        assert_eq!(store.queue_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_never_changes_the_capture_hash() {
        let store = store().await;
        let item = evidence("r1");
        store.insert_evidence(&item).await.unwrap();

        let mut edited = item.clone();
        edited.caption = Some("flashing lifted".into());
        edited.original_hash = "0".repeat(64);
        store.update_evidence(&edited).await.unwrap();

        let stored = store.get_evidence(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.caption.as_deref(), Some("flashing lifted"));
        assert_eq!(stored.original_hash, item.original_hash);
    }

    #[tokio::test]
    async fn sync_fields_do_not_enqueue() {
        let store = store().await;
        let item = evidence("r1");
        store.insert_evidence(&item).await.unwrap();
        let entry = store.pending_sync_entries().await.unwrap().remove(0);
        store.complete_sync_entry(&entry.id, entry.revision).await.unwrap();

        store
            .set_evidence_sync(
                &item.id,
                EvidenceSyncUpdate {
                    status: EvidenceSyncStatus::Synced,
                    uploaded_url: Some("https://files/1".into()),
                    integrity_verified: Some(true),
                },
            )
            .await
            .unwrap();

        let stored = store.get_evidence(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.sync_status, EvidenceSyncStatus::Synced);
        assert_eq!(stored.uploaded_url.as_deref(), Some("https://files/1"));
        assert_eq!(stored.integrity_verified, Some(true));
        assert_eq!(store.queue_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn deleting_synced_evidence_queues_a_tombstone() {
        let store = store().await;
        let item = evidence("r9");
        store.insert_evidence(&item).await.unwrap();
        let entry = store.pending_sync_entries().await.unwrap().remove(0);
        store.complete_sync_entry(&entry.id, entry.revision).await.unwrap();

        let removed = store.delete_evidence(&item.id).await.unwrap();
        assert_eq!(removed.map(|i| i.id), Some(item.id.clone()));

        let entries = store.pending_sync_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, SyncOperation::Delete);
        assert_eq!(
            entries[0].payload,
            SyncPayload::Tombstone {
                report_id: Some("r9".into())
            }
        );
    }

    #[tokio::test]
    async fn failures_accumulate_attempts() {
        let store = store().await;
        store.save_report(&Report::new("Porch")).await.unwrap();
        let entry = store.pending_sync_entries().await.unwrap().remove(0);

        assert_eq!(store.record_sync_failure(&entry.id, "timeout").await.unwrap(), 1);
        assert_eq!(store.record_sync_failure(&entry.id, "timeout").await.unwrap(), 2);
        let entry = store.pending_sync_entries().await.unwrap().remove(0);
        assert_eq!(entry.attempt_count, 2);
        assert_eq!(entry.last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn report_items_are_stored_per_table() {
        let store = store().await;
        let defect = ReportItem::Defect(Defect {
            id: "d1".into(),
            report_id: "r1".into(),
            roof_element_id: Some("e1".into()),
            category: "flashing".into(),
            severity: "major".into(),
            description: None,
            updated_at: Utc::now(),
        });
        let element = ReportItem::RoofElement(RoofElement {
            id: "e1".into(),
            report_id: "r1".into(),
            element_type: "valley".into(),
            location: Some("north".into()),
            condition: None,
            updated_at: Utc::now(),
        });
        store.save_report_item(&defect).await.unwrap();
        store.save_report_item(&element).await.unwrap();

        let items = store.report_items("r1").await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.contains(&defect));
        assert!(store.delete_report_item(EntityType::Defect, "d1").await.unwrap());
        assert_eq!(store.report_items("r1").await.unwrap(), vec![element]);
    }

    #[tokio::test]
    async fn custody_sequence_is_gapless() {
        let store = store().await;
        let actor = Actor {
            user_id: "u".into(),
            user_name: "U".into(),
            device_id: store.device_id().to_string(),
        };
        for action in [CustodyAction::Captured, CustodyAction::Hashed, CustodyAction::Stored] {
            store
                .append_custody(CustodyDraft {
                    action,
                    entity_type: EntityType::Photo,
                    entity_id: "p".into(),
                    actor: actor.clone(),
                    hash_at_time: None,
                    details: json!({"n": 1}),
                    timestamp: Utc::now(),
                })
                .await
                .unwrap();
        }
        let seqs: Vec<i64> = store.custody_events().await.unwrap().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(store.custody_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn conflicts_persist_until_resolved() {
        let store = store().await;
        let snapshot = Report::new("Server copy");
        let conflict = SyncConflict {
            report_id: snapshot.id.clone(),
            resolution: ConflictResolution::Pending,
            server_updated_at: Utc::now(),
            client_updated_at: Utc::now(),
            server_snapshot: Some(snapshot.clone()),
            detected_at: Utc::now(),
            dismissed_at: None,
            resolved_at: None,
        };
        store.upsert_conflict(&conflict).await.unwrap();
        store.dismiss_conflict(&snapshot.id).await.unwrap();

        let pending = store.pending_conflicts().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].dismissed_at.is_some());
        assert_eq!(pending[0].server_snapshot.as_ref(), Some(&snapshot));

        store
            .resolve_conflict_record(&snapshot.id, ConflictResolution::ServerWins)
            .await
            .unwrap();
        assert!(store.pending_conflicts().await.unwrap().is_empty());
        let resolved = store.get_conflict(&snapshot.id).await.unwrap().unwrap();
        assert_eq!(resolved.resolution, ConflictResolution::ServerWins);
        assert!(resolved.resolved_at.is_some());
    }

    #[tokio::test]
    async fn checkpoints_and_state() {
        let store = store().await;
        let checkpoint = UploadCheckpoint {
            evidence_id: "v1".into(),
            upload_url: "http://server/uploads/abc".into(),
            offset: 5 * 1024 * 1024,
            total_bytes: 12 * 1024 * 1024,
            original_hash: "ab".repeat(32),
            updated_at: Utc::now(),
        };
        store.save_upload_checkpoint(&checkpoint).await.unwrap();
        let mut moved = checkpoint.clone();
        moved.offset = 10 * 1024 * 1024;
        store.save_upload_checkpoint(&moved).await.unwrap();
        assert_eq!(store.upload_checkpoint("v1").await.unwrap(), Some(moved));
        store.clear_upload_checkpoint("v1").await.unwrap();
        assert_eq!(store.upload_checkpoint("v1").await.unwrap(), None);

        assert_eq!(store.sync_state().await.unwrap(), SyncState::default());
        store
            .update_sync_state(SyncStatePatch {
                download_cursor: Some("c42".into()),
                last_error: Some(Some("offline".into())),
                ..Default::default()
            })
            .await
            .unwrap();
        let state = store
            .update_sync_state(SyncStatePatch {
                last_error: Some(None),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(state.download_cursor.as_deref(), Some("c42"));
        assert_eq!(store.sync_state().await.unwrap(), state);
    }
}
