use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::EntityType;

/// A captured photo, video or voice note.
/// `original_hash` is written once at capture and never recomputed from the working copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceItem {
    #[serde(rename = "uid")]
    pub id: String,
    pub report_id: String,
    pub kind: EvidenceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defect_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roof_element_id: Option<String>,
    pub original_hash: String,
    pub original_filename: String,
    pub working_filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_filename: Option<String>,
    pub captured_at: DateTime<Utc>,
    pub byte_length: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, with = "crate::json_blob")]
    pub gps_track: Vec<TrackPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_make: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub sync_status: EvidenceSyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity_verified: Option<bool>,
    pub updated_at: DateTime<Utc>,
}

impl EvidenceItem {
    pub fn entity_type(&self) -> EntityType {
        self.kind.entity_type()
    }

    pub fn gps(&self) -> Option<GpsFix> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(GpsFix {
                latitude,
                longitude,
                altitude: self.altitude,
                accuracy: self.accuracy,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Photo,
    Video,
    VoiceNote,
}

impl EvidenceKind {
    pub fn entity_type(self) -> EntityType {
        match self {
            EvidenceKind::Photo => EntityType::Photo,
            EvidenceKind::Video => EntityType::Video,
            EvidenceKind::VoiceNote => EntityType::VoiceNote,
        }
    }

    pub fn default_extension(self) -> &'static str {
        match self {
            EvidenceKind::Photo => "jpg",
            EvidenceKind::Video => "mp4",
            EvidenceKind::VoiceNote => "m4a",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSyncStatus {
    Captured,
    Processing,
    Uploaded,
    Synced,
    Error,
}

impl Default for EvidenceSyncStatus {
    fn default() -> Self {
        EvidenceSyncStatus::Captured
    }
}

/// A single location fix recorded at capture time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub accuracy: Option<f64>,
}

/// One point of a GPS track recorded alongside a video.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub offset_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceInfo {
    pub make: Option<String>,
    pub model: Option<String>,
}

/// Edits a user may make after capture. The hash and files are never part of this.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub evidence_type: Option<String>,
    pub tag: Option<String>,
    pub caption: Option<String>,
    pub defect_id: Option<String>,
    pub roof_element_id: Option<String>,
}
