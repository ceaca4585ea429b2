//! In-memory stand-in for the evidence server.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use siteproof_core::models::{EntityType, EvidenceItem, RecordSyncStatus, Report};

use crate::transport::{PushOutcome, RemoteChanges, ReportPush, SyncTransport, TransportError, UploadMetadata};

struct PendingUpload {
	evidence_id: String,
	total: u64,
	data: Vec<u8>,
}

#[derive(Default)]
struct ServerState {
	unreachable: bool,
	health_delay: Duration,
	fail_pushes: bool,
	fail_patch_offset: u64,
	patch_failures_left: usize,

	clock: Option<DateTime<Utc>>,
	reports: HashMap<String, Report>,
	records: HashMap<(EntityType, String), serde_json::Value>,
	evidence: HashMap<String, EvidenceItem>,
	files: HashMap<String, Vec<u8>>,
	uploads: HashMap<String, PendingUpload>,
	changes: Vec<(u64, String)>,
	seq: u64,

	pushes: usize,
	direct_uploads: usize,
	uploads_created: usize,
	patch_offsets: Vec<u64>,
	deleted: Vec<(EntityType, String)>,
}

impl ServerState {
	/// Strictly increasing server timestamps.
	fn tick(&mut self) -> DateTime<Utc> {
		let mut now = Utc::now();
		if let Some(prev) = self.clock {
			if now <= prev {
				now = prev + chrono::Duration::milliseconds(1);
			}
		}
		self.clock = Some(now);
		now
	}

	fn store_report(&mut self, mut report: Report) -> DateTime<Utc> {
		let at = self.tick();
		report.server_updated_at = Some(at);
		report.sync_status = RecordSyncStatus::Synced;
		self.seq += 1;
		self.changes.push((self.seq, report.id.clone()));
		self.reports.insert(report.id.clone(), report);
		at
	}
}

#[derive(Default)]
pub struct FakeServer {
	state: Mutex<ServerState>,
}

impl FakeServer {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_reachable(&self, reachable: bool) {
		self.state.lock().unwrap().unreachable = !reachable;
	}

	pub fn set_health_delay(&self, delay: Duration) {
		self.state.lock().unwrap().health_delay = delay;
	}

	pub fn fail_pushes(&self, fail: bool) {
		self.state.lock().unwrap().fail_pushes = fail;
	}

	/// Fail the next `times` PATCH requests that start at `offset`.
	pub fn fail_patches_at(&self, offset: u64, times: usize) {
		let mut state = self.state.lock().unwrap();
		state.fail_patch_offset = offset;
		state.patch_failures_left = times;
	}

	/// Forget every unfinished upload.
	pub fn expire_uploads(&self) {
		self.state.lock().unwrap().uploads.clear();
	}

	/// Change a report as another device would.
	pub fn edit_report(&self, report: Report) -> DateTime<Utc> {
		self.state.lock().unwrap().store_report(report)
	}

	pub fn report(&self, id: &str) -> Option<Report> {
		self.state.lock().unwrap().reports.get(id).cloned()
	}

	pub fn record(&self, entity_type: EntityType, id: &str) -> Option<serde_json::Value> {
		self.state.lock().unwrap().records.get(&(entity_type, id.to_string())).cloned()
	}

	pub fn evidence_metadata(&self, id: &str) -> Option<EvidenceItem> {
		self.state.lock().unwrap().evidence.get(id).cloned()
	}

	pub fn file_for(&self, evidence_id: &str) -> Option<Vec<u8>> {
		self.state.lock().unwrap().files.get(evidence_id).cloned()
	}

	pub fn deleted(&self) -> Vec<(EntityType, String)> {
		self.state.lock().unwrap().deleted.clone()
	}

	pub fn push_count(&self) -> usize {
		self.state.lock().unwrap().pushes
	}

	pub fn direct_uploads(&self) -> usize {
		self.state.lock().unwrap().direct_uploads
	}

	pub fn uploads_created(&self) -> usize {
		self.state.lock().unwrap().uploads_created
	}

	pub fn patch_offsets(&self) -> Vec<u64> {
		self.state.lock().unwrap().patch_offsets.clone()
	}
}

fn status(code: u16, message: &str) -> TransportError {
	TransportError::Status {
		status: code,
		message: message.to_string(),
	}
}

#[async_trait]
impl SyncTransport for FakeServer {
	async fn health(&self) -> Result<(), TransportError> {
		let (delay, unreachable) = {
			let state = self.state.lock().unwrap();
			(state.health_delay, state.unreachable)
		};
		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}
		if unreachable {
			return Err(TransportError::Connection("connection refused".into()));
		}
		Ok(())
	}

	async fn push_report(&self, push: &ReportPush) -> Result<PushOutcome, TransportError> {
		let mut state = self.state.lock().unwrap();
		state.pushes += 1;
		if state.fail_pushes {
			return Err(status(503, "unavailable"));
		}

		if let Some(current) = state.reports.get(&push.report.id) {
			if !push.force && push.base_server_updated_at != current.server_updated_at {
				return Ok(PushOutcome::Conflict {
					server_updated_at: current.server_updated_at.unwrap_or_else(Utc::now),
					server_report: current.clone(),
				});
			}
		}

		let server_updated_at = state.store_report(push.report.clone());
		Ok(PushOutcome::Accepted { server_updated_at })
	}

	async fn put_record(&self, entity_type: EntityType, id: &str, body: &serde_json::Value) -> Result<(), TransportError> {
		let mut state = self.state.lock().unwrap();
		state.records.insert((entity_type, id.to_string()), body.clone());
		Ok(())
	}

	async fn delete_record(&self, entity_type: EntityType, id: &str) -> Result<(), TransportError> {
		let mut state = self.state.lock().unwrap();
		match entity_type {
			EntityType::Report => {
				state.reports.remove(id);
			}
			t if t.is_evidence() => {
				state.evidence.remove(id);
				state.files.remove(id);
			}
			_ => {
				state.records.remove(&(entity_type, id.to_string()));
			}
		}
		state.deleted.push((entity_type, id.to_string()));
		Ok(())
	}

	async fn put_evidence_metadata(&self, item: &EvidenceItem) -> Result<(), TransportError> {
		let mut state = self.state.lock().unwrap();
		state.evidence.insert(item.id.clone(), item.clone());
		Ok(())
	}

	async fn upload_file(&self, item: &EvidenceItem, bytes: Vec<u8>) -> Result<String, TransportError> {
		let mut state = self.state.lock().unwrap();
		state.direct_uploads += 1;
		state.files.insert(item.id.clone(), bytes);
		Ok(format!("fake://files/{}", item.id))
	}

	async fn create_upload(&self, metadata: &UploadMetadata, total_bytes: u64) -> Result<String, TransportError> {
		let mut state = self.state.lock().unwrap();
		state.uploads_created += 1;
		let location = format!("fake://uploads/{}", state.uploads_created);
		state.uploads.insert(
			location.clone(),
			PendingUpload {
				evidence_id: metadata.evidence_id.clone(),
				total: total_bytes,
				data: Vec::new(),
			},
		);
		Ok(location)
	}

	async fn upload_offset(&self, location: &str) -> Result<u64, TransportError> {
		let state = self.state.lock().unwrap();
		state
			.uploads
			.get(location)
			.map(|u| u.data.len() as u64)
			.ok_or_else(|| status(404, "no such upload"))
	}

	async fn patch_upload(&self, location: &str, offset: u64, chunk: Vec<u8>) -> Result<u64, TransportError> {
		let mut state = self.state.lock().unwrap();
		state.patch_offsets.push(offset);
		if state.patch_failures_left > 0 && state.fail_patch_offset == offset {
			state.patch_failures_left -= 1;
			return Err(TransportError::Connection("connection reset".into()));
		}

		let upload = state.uploads.get_mut(location).ok_or_else(|| status(404, "no such upload"))?;
		if upload.data.len() as u64 != offset {
			return Err(status(409, "offset mismatch"));
		}
		upload.data.extend_from_slice(&chunk);
		let new_offset = upload.data.len() as u64;

		if new_offset >= upload.total {
			let evidence_id = upload.evidence_id.clone();
			let data = upload.data.clone();
			state.files.insert(evidence_id, data);
		}
		Ok(new_offset)
	}

	async fn fetch_changes(&self, since: Option<&str>) -> Result<RemoteChanges, TransportError> {
		let state = self.state.lock().unwrap();
		let since: u64 = since.and_then(|s| s.parse().ok()).unwrap_or(0);

		let mut ids: Vec<&String> = Vec::new();
		for (seq, id) in &state.changes {
			if *seq > since && !ids.contains(&id) {
				ids.push(id);
			}
		}
		let reports = ids.into_iter().filter_map(|id| state.reports.get(id).cloned()).collect();
		Ok(RemoteChanges {
			reports,
			cursor: Some(state.seq.to_string()),
		})
	}
}
