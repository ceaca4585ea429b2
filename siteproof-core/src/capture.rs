//! Capture pipeline and the evidence lifecycle operations around it.
//!
//! Order per capture: hash the in-memory buffer, write the original once,
//! log CAPTURED / HASHED / STORED, then derive the working copy and thumbnail
//! (both best-effort) and persist the record together with its sync entry.

use std::{
	path::{Path, PathBuf},
	sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::custody::{CustodyError, CustodyLog};
use crate::hashing::{self, HashError, VerificationResult};
use crate::models::{
	Actor, Classification, CustodyAction, CustodyEvent, DeviceInfo, EvidenceItem, EvidenceKind, EvidenceSyncStatus,
	GpsFix, TrackPoint,
};
use crate::progress::{CaptureStage, ProgressBus, ProgressEvent};
use crate::storage::{self, EvidenceStorage, StorageError};
use crate::store::{EvidenceSyncUpdate, LocalStore, StoreError};

#[derive(Debug, Error)]
pub enum CaptureError {
	#[error("nothing was captured")]
	EmptyCapture,

	#[error("report {0} does not exist")]
	UnknownReport(String),

	#[error("evidence {0} not found")]
	NotFound(String),

	#[error("hashing failed: {0}")]
	Hash(#[from] HashError),

	#[error("storage failed: {0}")]
	Storage(#[from] StorageError),

	#[error(transparent)]
	Custody(#[from] CustodyError),

	#[error("record store failed: {0}")]
	Store(#[from] StoreError),

	#[error("export failed: {0}")]
	Export(String),
}

/// Embeds a location into a working copy. Implementations live with the
/// platform image tooling; failure only costs the tag.
#[async_trait]
pub trait GeoTagger: Send + Sync {
	async fn embed(&self, bytes: &[u8], fix: &GpsFix) -> Result<Vec<u8>, String>;
}

/// Leaves the bytes untouched.
pub struct PassthroughTagger;

#[async_trait]
impl GeoTagger for PassthroughTagger {
	async fn embed(&self, bytes: &[u8], _fix: &GpsFix) -> Result<Vec<u8>, String> {
		Ok(bytes.to_vec())
	}
}

/// Everything the camera, recorder or file picker hands over.
#[derive(Debug, Clone, Default)]
pub struct CaptureRequest {
	pub report_id: String,
	pub kind: Option<EvidenceKind>,
	pub bytes: Vec<u8>,
	/// File extension without the dot. Defaults by kind.
	pub extension: Option<String>,
	pub gps: Option<GpsFix>,
	pub gps_track: Vec<TrackPoint>,
	pub device: DeviceInfo,
	pub duration_ms: Option<i64>,
	pub classification: Classification,
}

#[derive(Debug, Clone)]
pub struct EvidenceView {
	pub item: EvidenceItem,
	/// Working copy when present, otherwise the original.
	pub path: PathBuf,
}

/// Written next to an exported original.
#[derive(Debug, Clone, Serialize)]
pub struct ExportManifest {
	pub evidence: EvidenceItem,
	pub exported_at: DateTime<Utc>,
	pub exported_by: Actor,
	pub verification: VerificationResult,
	pub custody: Vec<CustodyEvent>,
}

#[derive(Debug, Clone)]
pub struct ExportResult {
	pub file: PathBuf,
	pub manifest: PathBuf,
	pub verification: VerificationResult,
}

pub struct EvidenceVault {
	store: Arc<dyn LocalStore>,
	storage: EvidenceStorage,
	custody: CustodyLog,
	progress: ProgressBus,
	tagger: Arc<dyn GeoTagger>,
}

impl EvidenceVault {
	pub fn new(store: Arc<dyn LocalStore>, storage: EvidenceStorage, custody: CustodyLog, progress: ProgressBus) -> Self {
		Self {
			store,
			storage,
			custody,
			progress,
			tagger: Arc::new(PassthroughTagger),
		}
	}

	pub fn with_tagger(mut self, tagger: Arc<dyn GeoTagger>) -> Self {
		self.tagger = tagger;
		self
	}

	pub fn storage(&self) -> &EvidenceStorage {
		&self.storage
	}

	pub fn custody(&self) -> &CustodyLog {
		&self.custody
	}

	fn stage(&self, evidence_id: &str, stage: CaptureStage) {
		self.progress.publish(ProgressEvent::Capture {
			evidence_id: evidence_id.to_string(),
			stage,
		});
	}

	async fn load(&self, id: &str) -> Result<EvidenceItem, CaptureError> {
		self.store
			.get_evidence(id)
			.await?
			.ok_or_else(|| CaptureError::NotFound(id.to_string()))
	}

	/// Digest of the original as it is on disk right now, for `hash_at_time`.
	/// `None` when the original is missing.
	async fn current_hash(&self, item: &EvidenceItem) -> Result<Option<String>, CaptureError> {
		let path = self.storage.original_path(&item.original_filename);
		match hashing::hash_file_async(&path).await {
			Ok(digest) => {
				if !hashing::hashes_match(&digest, &item.original_hash) {
					warn!(evidence_id = %item.id, expected = %item.original_hash, actual = %digest, "original differs from its capture hash");
				}
				Ok(Some(digest))
			}
			Err(HashError::NotFound(_)) => {
				warn!(evidence_id = %item.id, path = %path.display(), "original missing");
				Ok(None)
			}
			Err(e) => Err(e.into()),
		}
	}

	/// Capture one piece of evidence.
	pub async fn capture(&self, request: CaptureRequest) -> Result<EvidenceItem, CaptureError> {
		if request.bytes.is_empty() {
			return Err(CaptureError::EmptyCapture);
		}
		if self.store.get_report(&request.report_id).await?.is_none() {
			return Err(CaptureError::UnknownReport(request.report_id));
		}

		let kind = request.kind.unwrap_or(EvidenceKind::Photo);
		let id = ulid::Ulid::new().to_string();
		let entity_type = kind.entity_type();

		// 1. Hash the exact captured buffer before anything touches disk
		self.stage(&id, CaptureStage::Hashing);
		let hash = hashing::hash_bytes(&request.bytes);

		// 2. Write the original once
		self.stage(&id, CaptureStage::Storing);
		let ext = request
			.extension
			.as_deref()
			.unwrap_or_else(|| kind.default_extension())
			.trim_start_matches('.')
			.to_ascii_lowercase();
		let original_filename = storage::original_filename(&id, &ext);
		let original_path = self.storage.write_original(&request.bytes, &original_filename).await?;

		// 3. Custody: capture, hash, store
		let digest = Some(hash.digest.as_str());
		self.custody
			.record(
				CustodyAction::Captured,
				entity_type,
				&id,
				digest,
				json!({ "kind": entity_type.as_str(), "device_make": request.device.make, "device_model": request.device.model }),
			)
			.await?;
		self.custody
			.record(
				CustodyAction::Hashed,
				entity_type,
				&id,
				digest,
				json!({ "algorithm": hash.algorithm, "byte_length": hash.byte_length, "computed_at": hash.computed_at }),
			)
			.await?;
		self.custody
			.record(
				CustodyAction::Stored,
				entity_type,
				&id,
				digest,
				json!({ "filename": original_filename }),
			)
			.await?;

		// 4. Working copy, geotagged when possible
		self.stage(&id, CaptureStage::Processing);
		let working_filename = storage::working_filename(&id, &ext);
		let working_bytes = match (&request.gps, kind) {
			(Some(fix), EvidenceKind::Photo) => match self.tagger.embed(&request.bytes, fix).await {
				Ok(tagged) => tagged,
				Err(e) => {
					warn!(evidence_id = %id, error = %e, "GPS embedding failed, keeping untagged copy");
					request.bytes.clone()
				}
			},
			_ => request.bytes.clone(),
		};
		let working_path = match self.storage.write_working(&working_bytes, &working_filename).await {
			Ok(path) => path,
			Err(e) => {
				warn!(evidence_id = %id, error = %e, "working copy not written, falling back to original");
				original_path.clone()
			}
		};

		// 5. Thumbnail for photos
		let mut thumbnail_filename = None;
		if kind == EvidenceKind::Photo {
			self.stage(&id, CaptureStage::Thumbnail);
			let thumb = self.storage.derive_thumbnail(&working_path, &id).await;
			if thumb != working_path {
				thumbnail_filename = Some(storage::thumbnail_filename(&id));
			}
		}

		// 6. Persist and enqueue
		let now = Utc::now();
		let classification = request.classification;
		let gps = request.gps;
		let item = EvidenceItem {
			id: id.clone(),
			report_id: request.report_id,
			kind,
			defect_id: classification.defect_id,
			roof_element_id: classification.roof_element_id,
			original_hash: hash.digest.clone(),
			original_filename,
			working_filename,
			thumbnail_filename,
			captured_at: hash.computed_at,
			byte_length: hash.byte_length as i64,
			latitude: gps.map(|g| g.latitude),
			longitude: gps.map(|g| g.longitude),
			altitude: gps.and_then(|g| g.altitude),
			accuracy: gps.and_then(|g| g.accuracy),
			gps_track: request.gps_track,
			device_make: request.device.make,
			device_model: request.device.model,
			evidence_type: classification.evidence_type,
			tag: classification.tag,
			caption: classification.caption,
			duration_ms: request.duration_ms,
			sync_status: EvidenceSyncStatus::Captured,
			uploaded_url: None,
			integrity_verified: None,
			updated_at: now,
		};
		self.store.insert_evidence(&item).await?;

		self.stage(&id, CaptureStage::Complete);
		info!(evidence_id = %id, kind = entity_type.as_str(), bytes = item.byte_length, hash = %item.original_hash, "evidence captured");
		Ok(item)
	}

	/// Open an item for viewing. Logs VIEWED.
	pub async fn view(&self, id: &str) -> Result<EvidenceView, CaptureError> {
		let item = self.load(id).await?;
		let working = self.storage.working_path(&item.working_filename);
		let path = if self.storage.file_info(&working).await.exists {
			working
		} else {
			self.storage.original_path(&item.original_filename)
		};
		let hash = self.current_hash(&item).await?;
		self.custody
			.record(CustodyAction::Viewed, item.entity_type(), id, hash.as_deref(), json!({}))
			.await?;
		Ok(EvidenceView { item, path })
	}

	/// Copy the original and a manifest into `dest_dir`. Logs EXPORTED.
	pub async fn export(&self, id: &str, dest_dir: &Path) -> Result<ExportResult, CaptureError> {
		let item = self.load(id).await?;
		let bytes = self.storage.read_original(&item.original_filename).await?;

		tokio::fs::create_dir_all(dest_dir)
			.await
			.map_err(|e| CaptureError::Export(format!("{}: {e}", dest_dir.display())))?;
		let file = dest_dir.join(&item.original_filename);
		tokio::fs::write(&file, &bytes)
			.await
			.map_err(|e| CaptureError::Export(format!("{}: {e}", file.display())))?;
		let verification = hashing::verify_file(&file, &item.original_hash).await?;

		let event = self
			.custody
			.record(
				CustodyAction::Exported,
				item.entity_type(),
				id,
				Some(&verification.actual_hash),
				json!({ "destination": file.display().to_string(), "valid": verification.is_valid }),
			)
			.await?;

		let mut custody = self.custody.chain_for(item.entity_type(), id).await?;
		if custody.first().map(|e| e.id.as_str()) != Some(event.id.as_str()) {
			custody.insert(0, event);
		}
		let manifest = ExportManifest {
			evidence: item.clone(),
			exported_at: Utc::now(),
			exported_by: self.custody.actor().clone(),
			verification: verification.clone(),
			custody,
		};
		let manifest_path = dest_dir.join(format!("{}.manifest.json", item.id));
		let text = serde_json::to_string_pretty(&manifest).map_err(|e| CaptureError::Export(e.to_string()))?;
		tokio::fs::write(&manifest_path, text)
			.await
			.map_err(|e| CaptureError::Export(format!("{}: {e}", manifest_path.display())))?;

		info!(evidence_id = %id, dest = %file.display(), "evidence exported");
		Ok(ExportResult {
			file,
			manifest: manifest_path,
			verification,
		})
	}

	/// Attach an item to a report. Logs INCLUDED_IN_REPORT.
	pub async fn include_in_report(&self, id: &str, report_id: &str) -> Result<EvidenceItem, CaptureError> {
		let mut item = self.load(id).await?;
		if self.store.get_report(report_id).await?.is_none() {
			return Err(CaptureError::UnknownReport(report_id.to_string()));
		}
		if item.report_id != report_id {
			item.report_id = report_id.to_string();
			item.updated_at = Utc::now();
			self.store.update_evidence(&item).await?;
		}
		let hash = self.current_hash(&item).await?;
		self.custody
			.record(
				CustodyAction::IncludedInReport,
				item.entity_type(),
				id,
				hash.as_deref(),
				json!({ "report_id": report_id }),
			)
			.await?;
		Ok(item)
	}

	/// Apply user classification. Files and hash are untouched.
	pub async fn classify(&self, id: &str, classification: Classification) -> Result<EvidenceItem, CaptureError> {
		let mut item = self.load(id).await?;
		if classification.evidence_type.is_some() {
			item.evidence_type = classification.evidence_type;
		}
		if classification.tag.is_some() {
			item.tag = classification.tag;
		}
		if classification.caption.is_some() {
			item.caption = classification.caption;
		}
		if classification.defect_id.is_some() {
			item.defect_id = classification.defect_id;
		}
		if classification.roof_element_id.is_some() {
			item.roof_element_id = classification.roof_element_id;
		}
		item.updated_at = Utc::now();
		self.store.update_evidence(&item).await?;
		Ok(item)
	}

	/// Remove the record and its derivatives. The original stays on disk.
	pub async fn delete(&self, id: &str) -> Result<EvidenceItem, CaptureError> {
		let item = self.load(id).await?;

		let working = self.storage.working_path(&item.working_filename);
		if let Err(e) = self.storage.remove_derivative(&working).await {
			warn!(evidence_id = %id, error = %e, "working copy not removed");
		}
		if let Some(thumb) = &item.thumbnail_filename {
			let path = self.storage.thumbnail_path(thumb);
			if let Err(e) = self.storage.remove_derivative(&path).await {
				warn!(evidence_id = %id, error = %e, "thumbnail not removed");
			}
		}

		let hash = self.current_hash(&item).await?;
		self.store.delete_evidence(id).await?;
		self.custody
			.record(
				CustodyAction::Deleted,
				item.entity_type(),
				id,
				hash.as_deref(),
				json!({ "report_id": item.report_id }),
			)
			.await?;
		info!(evidence_id = %id, "evidence deleted, original retained");
		Ok(item)
	}

	/// Re-hash the original against the recorded hash. Logs VERIFIED.
	pub async fn verify_integrity(&self, id: &str) -> Result<VerificationResult, CaptureError> {
		let item = self.load(id).await?;
		let path = self.storage.original_path(&item.original_filename);
		let result = hashing::verify_file(&path, &item.original_hash).await?;

		self.store
			.set_evidence_sync(
				id,
				EvidenceSyncUpdate {
					status: item.sync_status,
					uploaded_url: None,
					integrity_verified: Some(result.is_valid),
				},
			)
			.await?;
		self.custody
			.record(
				CustodyAction::Verified,
				item.entity_type(),
				id,
				Some(&result.actual_hash),
				json!({ "valid": result.is_valid, "expected": result.expected_hash, "actual": result.actual_hash }),
			)
			.await?;
		if !result.is_valid {
			warn!(evidence_id = %id, expected = %result.expected_hash, actual = %result.actual_hash, "integrity check failed");
		}
		Ok(result)
	}
}
