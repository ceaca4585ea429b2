use std::path::Path;

use chrono::Utc;
use surrealdb::engine::local::{Db, Mem, SurrealKv};
use surrealdb::Surreal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("failed to create data directory {path}: {message}")]
    DataDir { path: String, message: String },

    #[error("database error: {0}")]
    Surreal(String),
}

impl From<surrealdb::Error> for DbError {
    fn from(e: surrealdb::Error) -> Self {
        DbError::Surreal(e.to_string())
    }
}

/// Wrapper around the SurrealDB handle.
/// Clone is cheap (Arc internally).
#[derive(Clone)]
pub struct DbHandle {
    pub db: Surreal<Db>,
    /// Stable identity of this device, created on first open.
    pub device_id: String,
}

/// Open the on-device database: connect, select ns/db, run migrations, bootstrap the device.
pub async fn open(path: &Path) -> Result<DbHandle, DbError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| DbError::DataDir {
            path: parent.display().to_string(),
            message: e.to_string(),
        })?;
    }
    let db = Surreal::new::<SurrealKv>(path.to_path_buf()).await?;
    prepare(db).await
}

/// In-memory database with the same schema. Used by tests and ephemeral sessions.
pub async fn open_in_memory() -> Result<DbHandle, DbError> {
    let db = Surreal::new::<Mem>(()).await?;
    prepare(db).await
}

async fn prepare(db: Surreal<Db>) -> Result<DbHandle, DbError> {
    db.use_ns("siteproof").use_db("siteproof").await?;

    run_migrations(&db).await?;
    let device_id = bootstrap_device(&db).await?;

    Ok(DbHandle { db, device_id })
}

/// Run schema migrations. DEFINE statements are idempotent.
async fn run_migrations(db: &Surreal<Db>) -> Result<(), DbError> {
    db.query(SCHEMA_V1).await?.check()?;
    Ok(())
}

/// Create the device record on first launch, refresh it on every later one.
async fn bootstrap_device(db: &Surreal<Db>) -> Result<String, DbError> {
    let mut response = db.query("SELECT device_id FROM device:local").await?;
    let existing: Option<String> = response.take("device_id")?;

    let device_id = existing.unwrap_or_else(|| ulid::Ulid::new().to_string());
    let now = Utc::now().to_rfc3339();

    db.query(
        "UPSERT device:local MERGE {
            device_id: $device_id,
            hostname: $hostname,
            last_seen: $now,
        }",
    )
    .bind(("device_id", device_id.clone()))
    .bind(("hostname", get_hostname()))
    .bind(("now", now))
    .await?
    .check()?;

    Ok(device_id)
}

fn get_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

const SCHEMA_V1: &str = "
    DEFINE TABLE OVERWRITE device SCHEMAFULL;
    DEFINE FIELD OVERWRITE device_id ON device TYPE string;
    DEFINE FIELD OVERWRITE hostname ON device TYPE string;
    DEFINE FIELD OVERWRITE last_seen ON device TYPE string;

    DEFINE TABLE OVERWRITE report SCHEMAFULL;
    DEFINE FIELD OVERWRITE uid ON report TYPE string;
    DEFINE FIELD OVERWRITE title ON report TYPE string;
    DEFINE FIELD OVERWRITE address ON report TYPE option<string>;
    DEFINE FIELD OVERWRITE inspector ON report TYPE option<string>;
    DEFINE FIELD OVERWRITE notes ON report TYPE option<string>;
    DEFINE FIELD OVERWRITE status ON report TYPE string;
    DEFINE FIELD OVERWRITE created_at ON report TYPE string;
    DEFINE FIELD OVERWRITE updated_at ON report TYPE string;
    DEFINE FIELD OVERWRITE server_updated_at ON report TYPE option<string>;
    DEFINE FIELD OVERWRITE sync_status ON report TYPE string;
    DEFINE INDEX OVERWRITE idx_report_uid ON report FIELDS uid UNIQUE;

    DEFINE TABLE OVERWRITE evidence SCHEMAFULL;
    DEFINE FIELD OVERWRITE uid ON evidence TYPE string;
    DEFINE FIELD OVERWRITE report_id ON evidence TYPE string;
    DEFINE FIELD OVERWRITE kind ON evidence TYPE string;
    DEFINE FIELD OVERWRITE defect_id ON evidence TYPE option<string>;
    DEFINE FIELD OVERWRITE roof_element_id ON evidence TYPE option<string>;
    DEFINE FIELD OVERWRITE original_hash ON evidence TYPE string;
    DEFINE FIELD OVERWRITE original_filename ON evidence TYPE string;
    DEFINE FIELD OVERWRITE working_filename ON evidence TYPE string;
    DEFINE FIELD OVERWRITE thumbnail_filename ON evidence TYPE option<string>;
    DEFINE FIELD OVERWRITE captured_at ON evidence TYPE string;
    DEFINE FIELD OVERWRITE byte_length ON evidence TYPE int;
    DEFINE FIELD OVERWRITE latitude ON evidence TYPE option<number>;
    DEFINE FIELD OVERWRITE longitude ON evidence TYPE option<number>;
    DEFINE FIELD OVERWRITE altitude ON evidence TYPE option<number>;
    DEFINE FIELD OVERWRITE accuracy ON evidence TYPE option<number>;
    DEFINE FIELD OVERWRITE gps_track ON evidence TYPE string;
    DEFINE FIELD OVERWRITE device_make ON evidence TYPE option<string>;
    DEFINE FIELD OVERWRITE device_model ON evidence TYPE option<string>;
    DEFINE FIELD OVERWRITE evidence_type ON evidence TYPE option<string>;
    DEFINE FIELD OVERWRITE tag ON evidence TYPE option<string>;
    DEFINE FIELD OVERWRITE caption ON evidence TYPE option<string>;
    DEFINE FIELD OVERWRITE duration_ms ON evidence TYPE option<int>;
    DEFINE FIELD OVERWRITE sync_status ON evidence TYPE string;
    DEFINE FIELD OVERWRITE uploaded_url ON evidence TYPE option<string>;
    DEFINE FIELD OVERWRITE integrity_verified ON evidence TYPE option<bool>;
    DEFINE FIELD OVERWRITE updated_at ON evidence TYPE string;
    DEFINE INDEX OVERWRITE idx_evidence_uid ON evidence FIELDS uid UNIQUE;
    DEFINE INDEX OVERWRITE idx_evidence_report ON evidence FIELDS report_id;

    DEFINE TABLE OVERWRITE defect SCHEMAFULL;
    DEFINE FIELD OVERWRITE uid ON defect TYPE string;
    DEFINE FIELD OVERWRITE report_id ON defect TYPE string;
    DEFINE FIELD OVERWRITE roof_element_id ON defect TYPE option<string>;
    DEFINE FIELD OVERWRITE category ON defect TYPE string;
    DEFINE FIELD OVERWRITE severity ON defect TYPE string;
    DEFINE FIELD OVERWRITE description ON defect TYPE option<string>;
    DEFINE FIELD OVERWRITE updated_at ON defect TYPE string;
    DEFINE INDEX OVERWRITE idx_defect_uid ON defect FIELDS uid UNIQUE;

    DEFINE TABLE OVERWRITE roof_element SCHEMAFULL;
    DEFINE FIELD OVERWRITE uid ON roof_element TYPE string;
    DEFINE FIELD OVERWRITE report_id ON roof_element TYPE string;
    DEFINE FIELD OVERWRITE element_type ON roof_element TYPE string;
    DEFINE FIELD OVERWRITE location ON roof_element TYPE option<string>;
    DEFINE FIELD OVERWRITE condition ON roof_element TYPE option<string>;
    DEFINE FIELD OVERWRITE updated_at ON roof_element TYPE string;
    DEFINE INDEX OVERWRITE idx_roof_element_uid ON roof_element FIELDS uid UNIQUE;

    DEFINE TABLE OVERWRITE compliance_assessment SCHEMAFULL;
    DEFINE FIELD OVERWRITE uid ON compliance_assessment TYPE string;
    DEFINE FIELD OVERWRITE report_id ON compliance_assessment TYPE string;
    DEFINE FIELD OVERWRITE standard ON compliance_assessment TYPE string;
    DEFINE FIELD OVERWRITE status ON compliance_assessment TYPE string;
    DEFINE FIELD OVERWRITE notes ON compliance_assessment TYPE option<string>;
    DEFINE FIELD OVERWRITE updated_at ON compliance_assessment TYPE string;
    DEFINE INDEX OVERWRITE idx_compliance_uid ON compliance_assessment FIELDS uid UNIQUE;

    DEFINE TABLE OVERWRITE custody_event SCHEMAFULL;
    DEFINE FIELD OVERWRITE uid ON custody_event TYPE string;
    DEFINE FIELD OVERWRITE seq ON custody_event TYPE int;
    DEFINE FIELD OVERWRITE action ON custody_event TYPE string;
    DEFINE FIELD OVERWRITE entity_type ON custody_event TYPE string;
    DEFINE FIELD OVERWRITE entity_id ON custody_event TYPE string;
    DEFINE FIELD OVERWRITE timestamp ON custody_event TYPE string;
    DEFINE FIELD OVERWRITE user_id ON custody_event TYPE string;
    DEFINE FIELD OVERWRITE user_name ON custody_event TYPE string;
    DEFINE FIELD OVERWRITE device_id ON custody_event TYPE string;
    DEFINE FIELD OVERWRITE hash_at_time ON custody_event TYPE option<string>;
    DEFINE FIELD OVERWRITE details ON custody_event TYPE string;
    DEFINE FIELD OVERWRITE prev_event_hash ON custody_event TYPE option<string>;
    DEFINE FIELD OVERWRITE event_hash ON custody_event TYPE string;
    DEFINE INDEX OVERWRITE idx_custody_seq ON custody_event FIELDS seq UNIQUE;
    DEFINE INDEX OVERWRITE idx_custody_entity ON custody_event FIELDS entity_type, entity_id;
    DEFINE EVENT OVERWRITE custody_append_only ON TABLE custody_event
        WHEN $event = 'UPDATE' OR $event = 'DELETE'
        THEN { THROW 'custody events are append-only'; };

    DEFINE TABLE OVERWRITE sync_queue SCHEMAFULL;
    DEFINE FIELD OVERWRITE uid ON sync_queue TYPE string;
    DEFINE FIELD OVERWRITE entity_type ON sync_queue TYPE string;
    DEFINE FIELD OVERWRITE entity_id ON sync_queue TYPE string;
    DEFINE FIELD OVERWRITE operation ON sync_queue TYPE string;
    DEFINE FIELD OVERWRITE payload ON sync_queue TYPE string;
    DEFINE FIELD OVERWRITE enqueued_at ON sync_queue TYPE string;
    DEFINE FIELD OVERWRITE attempt_count ON sync_queue TYPE int DEFAULT 0;
    DEFINE FIELD OVERWRITE last_error ON sync_queue TYPE option<string>;
    DEFINE FIELD OVERWRITE revision ON sync_queue TYPE int DEFAULT 1;
    DEFINE INDEX OVERWRITE idx_queue_uid ON sync_queue FIELDS uid UNIQUE;
    DEFINE INDEX OVERWRITE idx_queue_entity ON sync_queue FIELDS entity_type, entity_id UNIQUE;

    DEFINE TABLE OVERWRITE sync_conflict SCHEMAFULL;
    DEFINE FIELD OVERWRITE uid ON sync_conflict TYPE string;
    DEFINE FIELD OVERWRITE resolution ON sync_conflict TYPE string;
    DEFINE FIELD OVERWRITE server_updated_at ON sync_conflict TYPE string;
    DEFINE FIELD OVERWRITE client_updated_at ON sync_conflict TYPE string;
    DEFINE FIELD OVERWRITE server_snapshot ON sync_conflict TYPE string;
    DEFINE FIELD OVERWRITE detected_at ON sync_conflict TYPE string;
    DEFINE FIELD OVERWRITE dismissed_at ON sync_conflict TYPE option<string>;
    DEFINE FIELD OVERWRITE resolved_at ON sync_conflict TYPE option<string>;
    DEFINE INDEX OVERWRITE idx_conflict_uid ON sync_conflict FIELDS uid UNIQUE;

    DEFINE TABLE OVERWRITE sync_state SCHEMAFULL;
    DEFINE FIELD OVERWRITE last_upload_at ON sync_state TYPE option<string>;
    DEFINE FIELD OVERWRITE last_download_at ON sync_state TYPE option<string>;
    DEFINE FIELD OVERWRITE download_cursor ON sync_state TYPE option<string>;
    DEFINE FIELD OVERWRITE last_run_at ON sync_state TYPE option<string>;
    DEFINE FIELD OVERWRITE last_run_outcome ON sync_state TYPE option<string>;
    DEFINE FIELD OVERWRITE last_error ON sync_state TYPE option<string>;

    DEFINE TABLE OVERWRITE upload_checkpoint SCHEMAFULL;
    DEFINE FIELD OVERWRITE uid ON upload_checkpoint TYPE string;
    DEFINE FIELD OVERWRITE upload_url ON upload_checkpoint TYPE string;
    DEFINE FIELD OVERWRITE byte_offset ON upload_checkpoint TYPE int;
    DEFINE FIELD OVERWRITE total_bytes ON upload_checkpoint TYPE int;
    DEFINE FIELD OVERWRITE original_hash ON upload_checkpoint TYPE string;
    DEFINE FIELD OVERWRITE updated_at ON upload_checkpoint TYPE string;
    DEFINE INDEX OVERWRITE idx_checkpoint_uid ON upload_checkpoint FIELDS uid UNIQUE;
";

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_database_bootstraps_a_device() {
        let handle = open_in_memory().await.unwrap();
        assert_eq!(handle.device_id.len(), 26);
    }

}
