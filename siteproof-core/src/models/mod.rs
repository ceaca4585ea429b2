mod custody;
mod evidence;
mod report;
mod sync;

pub use custody::{Actor, CustodyAction, CustodyDraft, CustodyEvent};
pub use evidence::{
    Classification, DeviceInfo, EvidenceItem, EvidenceKind, EvidenceSyncStatus, GpsFix, TrackPoint,
};
pub use report::{
    ComplianceAssessment, Defect, RecordSyncStatus, Report, ReportItem, ReportStatus, RoofElement,
};
pub use sync::{
    Collapse, ConflictChoice, ConflictResolution, SyncConflict, SyncOperation, SyncPayload, SyncPhase,
    SyncQueueEntry, SyncState, SyncStatePatch, UploadCheckpoint,
};

use serde::{Deserialize, Serialize};

/// Every kind of record that can be queued for sync or referenced by a custody event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Report,
    Photo,
    Video,
    VoiceNote,
    Defect,
    RoofElement,
    ComplianceAssessment,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Report => "report",
            EntityType::Photo => "photo",
            EntityType::Video => "video",
            EntityType::VoiceNote => "voice_note",
            EntityType::Defect => "defect",
            EntityType::RoofElement => "roof_element",
            EntityType::ComplianceAssessment => "compliance_assessment",
        }
    }

    pub fn is_evidence(self) -> bool {
        matches!(self, EntityType::Photo | EntityType::Video | EntityType::VoiceNote)
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
