use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::EntityType;

/// An inspection report. Evidence, defects and roof elements hang off it.
/// Domain content is deliberately thin; the sync layer only needs identity and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    #[serde(rename = "uid")]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Server timestamp of the last version this device saw.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_updated_at: Option<DateTime<Utc>>,
    pub sync_status: RecordSyncStatus,
}

impl Report {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string(),
            title: title.into(),
            address: None,
            inspector: None,
            notes: None,
            status: ReportStatus::Draft,
            created_at: now,
            updated_at: now,
            server_updated_at: None,
            sync_status: RecordSyncStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Draft,
    InProgress,
    Complete,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordSyncStatus {
    Pending,
    Synced,
    Conflict,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Defect {
    #[serde(rename = "uid")]
    pub id: String,
    pub report_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roof_element_id: Option<String>,
    pub category: String,
    pub severity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoofElement {
    #[serde(rename = "uid")]
    pub id: String,
    pub report_id: String,
    pub element_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComplianceAssessment {
    #[serde(rename = "uid")]
    pub id: String,
    pub report_id: String,
    pub standard: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// The secondary records of a report, kept in one enum so the store
/// interface stays object-safe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "item_type", rename_all = "snake_case")]
pub enum ReportItem {
    Defect(Defect),
    RoofElement(RoofElement),
    ComplianceAssessment(ComplianceAssessment),
}

impl ReportItem {
    pub fn id(&self) -> &str {
        match self {
            ReportItem::Defect(d) => &d.id,
            ReportItem::RoofElement(r) => &r.id,
            ReportItem::ComplianceAssessment(c) => &c.id,
        }
    }

    pub fn report_id(&self) -> &str {
        match self {
            ReportItem::Defect(d) => &d.report_id,
            ReportItem::RoofElement(r) => &r.report_id,
            ReportItem::ComplianceAssessment(c) => &c.report_id,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            ReportItem::Defect(_) => EntityType::Defect,
            ReportItem::RoofElement(_) => EntityType::RoofElement,
            ReportItem::ComplianceAssessment(_) => EntityType::ComplianceAssessment,
        }
    }
}
