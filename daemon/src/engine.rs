//! Sync engine: drains the local queue to the server, pulls remote report
//! changes and surfaces conflicts.
//!
//! A run walks `CheckingConnectivity → CheckingServerHealth → Draining →
//! Downloading → Reconciling` and publishes each phase on a watch channel.
//! Entries are independent: one failing entry is recorded on the queue and
//! the run moves on. Conflicts are persisted and never merged automatically.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use siteproof_core::config::{Config, SyncConfig};
use siteproof_core::custody::CustodyError;
use siteproof_core::hashing::{self, HashError};
use siteproof_core::models::{
	ConflictChoice, ConflictResolution, CustodyAction, EntityType, EvidenceItem, EvidenceSyncStatus, RecordSyncStatus,
	Report, SyncConflict, SyncOperation, SyncPayload, SyncPhase, SyncQueueEntry, SyncStatePatch,
};
use siteproof_core::store::{Completion, EvidenceSyncUpdate};
use siteproof_core::{CustodyLog, EvidenceStorage, LocalStore, ProgressBus, ProgressEvent, StoreError};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::network::{NetworkKind, NetworkMonitor};
use crate::transport::{PushOutcome, ReportPush, SyncTransport, TransportError};
use crate::upload::{ResumableUploader, UploadError};

#[derive(Debug, Error)]
pub enum SyncError {
	#[error("record store: {0}")]
	Store(#[from] StoreError),

	#[error(transparent)]
	Transport(#[from] TransportError),

	#[error(transparent)]
	Upload(#[from] UploadError),

	#[error(transparent)]
	Custody(#[from] CustodyError),

	#[error("integrity check: {0}")]
	Hash(#[from] HashError),

	#[error("failed to read {path}: {message}")]
	Io { path: String, message: String },

	#[error("serialization: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("no pending conflict for report {0}")]
	ConflictNotFound(String),

	#[error("report {0} not found")]
	ReportNotFound(String),

	#[error("conflict for report {0} has no server snapshot")]
	MissingSnapshot(String),

	#[error("queue entry {0} cannot be synced: {1}")]
	InvalidEntry(String, String),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
	Offline,
	ServerUnreachable,
}

/// What a background trigger reports back to the platform.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FetchOutcome {
	NewData,
	NoData,
	Failed,
}

impl FetchOutcome {
	pub fn as_str(self) -> &'static str {
		match self {
			FetchOutcome::NewData => "new_data",
			FetchOutcome::NoData => "no_data",
			FetchOutcome::Failed => "failed",
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SyncRunReport {
	pub reports_synced: u32,
	pub reports_downloaded: u32,
	pub photos_synced: u32,
	pub videos_synced: u32,
	pub voice_notes_synced: u32,
	pub records_synced: u32,
	pub deleted: u32,
	/// Entries left queued on purpose (Wi-Fi policy, unresolved conflict).
	pub deferred: u32,
	pub errors: u32,
	/// Every pending conflict after the run, not only new ones.
	pub conflicts: Vec<SyncConflict>,
	/// Evidence ids whose original no longer matched its capture hash.
	pub integrity_failures: Vec<String>,
	pub skipped: Option<SkipReason>,
	pub last_error: Option<String>,
	/// This caller waited on a run that was already in progress.
	pub joined: bool,
}

impl SyncRunReport {
	fn skipped(reason: SkipReason) -> Self {
		Self {
			skipped: Some(reason),
			..Default::default()
		}
	}

	pub fn synced_total(&self) -> u32 {
		self.reports_synced
			+ self.photos_synced
			+ self.videos_synced
			+ self.voice_notes_synced
			+ self.records_synced
			+ self.deleted
	}

	pub fn outcome(&self) -> FetchOutcome {
		if self.skipped.is_some() {
			FetchOutcome::NoData
		} else if self.synced_total() + self.reports_downloaded > 0 {
			FetchOutcome::NewData
		} else if self.errors > 0 {
			FetchOutcome::Failed
		} else {
			FetchOutcome::NoData
		}
	}

	fn count_synced(&mut self, entry: &SyncQueueEntry) {
		if entry.operation == SyncOperation::Delete {
			self.deleted += 1;
			return;
		}
		match entry.entity_type {
			EntityType::Report => self.reports_synced += 1,
			EntityType::Photo => self.photos_synced += 1,
			EntityType::Video => self.videos_synced += 1,
			EntityType::VoiceNote => self.voice_notes_synced += 1,
			EntityType::Defect | EntityType::RoofElement | EntityType::ComplianceAssessment => self.records_synced += 1,
		}
	}
}

enum EntryOutcome {
	Synced,
	Deferred,
	Conflicted,
	/// The entity was deleted locally while its entry was in flight.
	Vanished,
}

pub struct SyncEngine {
	store: Arc<dyn LocalStore>,
	storage: EvidenceStorage,
	custody: CustodyLog,
	transport: Arc<dyn SyncTransport>,
	network: Arc<dyn NetworkMonitor>,
	uploader: ResumableUploader,
	progress: ProgressBus,
	config: SyncConfig,
	health_timeout: Duration,
	phase: watch::Sender<SyncPhase>,
	run_lock: Mutex<()>,
	last_report: Mutex<Option<SyncRunReport>>,
}

impl SyncEngine {
	pub fn new(
		store: Arc<dyn LocalStore>,
		storage: EvidenceStorage,
		custody: CustodyLog,
		transport: Arc<dyn SyncTransport>,
		network: Arc<dyn NetworkMonitor>,
		progress: ProgressBus,
		config: &Config,
	) -> Self {
		let uploader = ResumableUploader::new(transport.clone(), store.clone(), progress.clone(), &config.sync);
		let (phase, _) = watch::channel(SyncPhase::Idle);
		Self {
			store,
			storage,
			custody,
			transport,
			network,
			uploader,
			progress,
			config: config.sync.clone(),
			health_timeout: Duration::from_millis(config.server.health_timeout_ms),
			phase,
			run_lock: Mutex::new(()),
			last_report: Mutex::new(None),
		}
	}

	pub fn phase(&self) -> SyncPhase {
		*self.phase.borrow()
	}

	pub fn subscribe_phase(&self) -> watch::Receiver<SyncPhase> {
		self.phase.subscribe()
	}

	fn set_phase(&self, phase: SyncPhase) {
		self.phase.send_replace(phase);
	}

	/// Run one sync pass. A caller arriving while a pass is active waits for
	/// it and gets its report back with `joined` set.
	pub async fn run_pending_sync(&self) -> SyncRunReport {
		let guard = match self.run_lock.try_lock() {
			Ok(guard) => guard,
			Err(_) => {
				debug!("sync already running, joining it");
				let _guard = self.run_lock.lock().await;
				let mut report = self.last_report.lock().await.clone().unwrap_or_default();
				report.joined = true;
				return report;
			}
		};

		let report = self.run_once().await;
		*self.last_report.lock().await = Some(report.clone());
		drop(guard);
		report
	}

	async fn run_once(&self) -> SyncRunReport {
		let started = std::time::Instant::now();
		let mut report = self.execute().await;
		self.set_phase(SyncPhase::Idle);

		if let Err(e) = self.record_run(&report).await {
			warn!(error = %e, "failed to record sync state");
			report.last_error.get_or_insert_with(|| e.to_string());
		}

		info!(
			outcome = report.outcome().as_str(),
			synced = report.synced_total(),
			downloaded = report.reports_downloaded,
			deferred = report.deferred,
			errors = report.errors,
			conflicts = report.conflicts.len(),
			duration_ms = started.elapsed().as_millis() as u64,
			"sync run finished"
		);
		report
	}

	async fn execute(&self) -> SyncRunReport {
		// Crash recovery: a transfer interrupted by a crash leaves evidence in processing
		if let Err(e) = self.recover_interrupted().await {
			warn!(error = %e, "crash recovery failed");
		}

		self.set_phase(SyncPhase::CheckingConnectivity);
		let network = self.network.current();
		if !network.is_connected() {
			info!("offline, skipping sync");
			return SyncRunReport::skipped(SkipReason::Offline);
		}

		self.set_phase(SyncPhase::CheckingServerHealth);
		match tokio::time::timeout(self.health_timeout, self.transport.health()).await {
			Ok(Ok(())) => {}
			Ok(Err(e)) => {
				info!(error = %e, "server unreachable, skipping sync");
				return SyncRunReport::skipped(SkipReason::ServerUnreachable);
			}
			Err(_) => {
				info!(timeout_ms = self.health_timeout.as_millis() as u64, "health check timed out, skipping sync");
				return SyncRunReport::skipped(SkipReason::ServerUnreachable);
			}
		}

		let mut report = SyncRunReport::default();

		self.set_phase(SyncPhase::Draining);
		if let Err(e) = self.drain(network, &mut report).await {
			error!(error = %e, "sync queue drain failed");
			report.errors += 1;
			report.last_error = Some(e.to_string());
		}

		self.set_phase(SyncPhase::Downloading);
		if let Err(e) = self.pull(&mut report).await {
			warn!(error = %e, "pulling remote changes failed");
			report.errors += 1;
			report.last_error = Some(e.to_string());
		}

		self.set_phase(SyncPhase::Reconciling);
		match self.store.pending_conflicts().await {
			Ok(conflicts) => report.conflicts = conflicts,
			Err(e) => {
				report.errors += 1;
				report.last_error = Some(e.to_string());
			}
		}
		report
	}

	async fn recover_interrupted(&self) -> Result<(), SyncError> {
		for item in self.store.list_evidence().await? {
			if item.sync_status != EvidenceSyncStatus::Processing {
				continue;
			}
			let status = if item.uploaded_url.is_some() {
				EvidenceSyncStatus::Uploaded
			} else {
				EvidenceSyncStatus::Captured
			};
			warn!(evidence_id = %item.id, "resetting evidence left in processing");
			self.store.set_evidence_sync(&item.id, EvidenceSyncUpdate::status(status)).await?;
		}
		Ok(())
	}

	async fn record_run(&self, report: &SyncRunReport) -> Result<(), StoreError> {
		let now = Utc::now();
		let uploaded = report.synced_total() > 0;
		self.store
			.update_sync_state(SyncStatePatch {
				last_run_at: Some(now),
				last_run_outcome: Some(report.outcome().as_str().to_string()),
				last_upload_at: uploaded.then_some(now),
				last_error: Some(report.last_error.clone()),
				..Default::default()
			})
			.await?;
		Ok(())
	}

	async fn drain(&self, network: NetworkKind, report: &mut SyncRunReport) -> Result<(), SyncError> {
		let entries = self.store.pending_sync_entries().await?;
		let conflicted: HashSet<String> = self
			.store
			.pending_conflicts()
			.await?
			.into_iter()
			.map(|c| c.report_id)
			.collect();
		debug!(entries = entries.len(), "draining sync queue");

		for entry in entries {
			if entry.entity_type == EntityType::Report && conflicted.contains(&entry.entity_id) {
				debug!(report_id = %entry.entity_id, "unresolved conflict, leaving queued");
				report.deferred += 1;
				continue;
			}

			match self.process_entry(&entry, network, report).await {
				Ok(EntryOutcome::Synced) => {
					report.count_synced(&entry);
					self.entry_synced(&entry);
				}
				Ok(EntryOutcome::Deferred) => report.deferred += 1,
				Ok(EntryOutcome::Conflicted) | Ok(EntryOutcome::Vanished) => {}
				Err(e) => {
					let message = e.to_string();
					warn!(
						entry_id = %entry.id,
						entity_type = %entry.entity_type,
						entity_id = %entry.entity_id,
						retryable = is_retryable(&e),
						error = %message,
						"sync entry failed"
					);
					report.errors += 1;
					if let Err(e) = self.note_failure(&entry, &message).await {
						warn!(entry_id = %entry.id, error = %e, "could not record sync failure");
					}
					report.last_error = Some(message);
				}
			}
		}
		Ok(())
	}

	/// Count a failed attempt. An entry that vanished meanwhile was collapsed
	/// by a local delete and is completed like any other missing entry.
	async fn note_failure(&self, entry: &SyncQueueEntry, message: &str) -> Result<(), SyncError> {
		let attempts = match self.store.record_sync_failure(&entry.id, message).await {
			Ok(attempts) => attempts,
			Err(StoreError::NotFound { .. }) => {
				self.finish_entry(entry).await?;
				return Ok(());
			}
			Err(e) => return Err(e.into()),
		};
		if attempts >= self.config.max_attempts {
			self.mark_failed(entry).await?;
		}
		Ok(())
	}

	fn entry_synced(&self, entry: &SyncQueueEntry) {
		debug!(entity_type = %entry.entity_type, entity_id = %entry.entity_id, "entry synced");
		self.progress.publish(ProgressEvent::EntrySynced {
			entity_type: entry.entity_type,
			entity_id: entry.entity_id.clone(),
		});
	}

	/// The owning record shows `error` once its entry has used up its attempts.
	/// The entry stays queued and keeps retrying.
	async fn mark_failed(&self, entry: &SyncQueueEntry) -> Result<(), SyncError> {
		warn!(entity_type = %entry.entity_type, entity_id = %entry.entity_id, "giving up on automatic retries");
		match entry.entity_type {
			EntityType::Report => {
				self.store
					.set_report_sync(&entry.entity_id, RecordSyncStatus::Error, None)
					.await?
			}
			t if t.is_evidence() && entry.operation != SyncOperation::Delete => {
				self.store
					.set_evidence_sync(&entry.entity_id, EvidenceSyncUpdate::status(EvidenceSyncStatus::Error))
					.await?
			}
			_ => {}
		}
		Ok(())
	}

	async fn process_entry(
		&self,
		entry: &SyncQueueEntry,
		network: NetworkKind,
		report: &mut SyncRunReport,
	) -> Result<EntryOutcome, SyncError> {
		match (&entry.operation, &entry.payload) {
			(SyncOperation::Delete, _) => {
				self.transport.delete_record(entry.entity_type, &entry.entity_id).await?;
				self.finish_entry(entry).await?;
				Ok(EntryOutcome::Synced)
			}
			(_, SyncPayload::Report(local)) => self.push_report(entry, local).await,
			(_, SyncPayload::Evidence(_)) => self.sync_evidence(entry, network, report).await,
			(_, SyncPayload::Item(item)) => {
				let body = serde_json::to_value(item)?;
				self.transport.put_record(entry.entity_type, &entry.entity_id, &body).await?;
				self.finish_entry(entry).await?;
				Ok(EntryOutcome::Synced)
			}
			(op, SyncPayload::Tombstone { .. }) => Err(SyncError::InvalidEntry(
				entry.id.clone(),
				format!("{} without a record payload", op.as_str()),
			)),
		}
	}

	/// Drop an acknowledged entry. A create that vanished while in flight was
	/// deleted locally after the server accepted it, so the server is told.
	async fn finish_entry(&self, entry: &SyncQueueEntry) -> Result<Completion, SyncError> {
		let completion = self.store.complete_sync_entry(&entry.id, entry.revision).await?;
		match completion {
			Completion::Removed => {}
			Completion::Superseded => {
				debug!(entity_id = %entry.entity_id, "changed while in flight, stays queued");
			}
			Completion::Missing if entry.operation == SyncOperation::Create => {
				debug!(entity_id = %entry.entity_id, "deleted while in flight, queueing delete");
				self.store
					.enqueue_sync(
						entry.entity_type,
						&entry.entity_id,
						SyncOperation::Delete,
						SyncPayload::Tombstone {
							report_id: payload_report_id(&entry.payload),
						},
					)
					.await?;
			}
			Completion::Missing => {}
		}
		Ok(completion)
	}

	async fn push_report(&self, entry: &SyncQueueEntry, local: &Report) -> Result<EntryOutcome, SyncError> {
		// The row, not the queued payload, knows the latest server version we saw
		let base = match self.store.get_report(&local.id).await? {
			Some(current) => current.server_updated_at,
			None => local.server_updated_at,
		};
		let push = ReportPush {
			report: local.clone(),
			base_server_updated_at: base,
			force: false,
		};

		match self.transport.push_report(&push).await? {
			PushOutcome::Accepted { server_updated_at } => {
				let completion = self.finish_entry(entry).await?;
				let status = match completion {
					Completion::Superseded => RecordSyncStatus::Pending,
					_ => RecordSyncStatus::Synced,
				};
				self.store
					.set_report_sync(&local.id, status, Some(server_updated_at))
					.await?;
				debug!(report_id = %local.id, "report pushed");
				Ok(EntryOutcome::Synced)
			}
			PushOutcome::Conflict {
				server_updated_at,
				server_report,
			} => {
				warn!(report_id = %local.id, "report changed on both sides");
				self.store
					.upsert_conflict(&SyncConflict {
						report_id: local.id.clone(),
						resolution: ConflictResolution::Pending,
						server_updated_at,
						client_updated_at: local.updated_at,
						server_snapshot: Some(server_report),
						detected_at: Utc::now(),
						dismissed_at: None,
						resolved_at: None,
					})
					.await?;
				self.store
					.set_report_sync(&local.id, RecordSyncStatus::Conflict, None)
					.await?;
				Ok(EntryOutcome::Conflicted)
			}
		}
	}

	async fn sync_evidence(
		&self,
		entry: &SyncQueueEntry,
		network: NetworkKind,
		report: &mut SyncRunReport,
	) -> Result<EntryOutcome, SyncError> {
		match self.send_evidence(entry, network, report).await {
			Err(SyncError::Store(StoreError::NotFound { .. })) => self.vanished(entry).await,
			outcome => outcome,
		}
	}

	async fn send_evidence(
		&self,
		entry: &SyncQueueEntry,
		network: NetworkKind,
		report: &mut SyncRunReport,
	) -> Result<EntryOutcome, SyncError> {
		let Some(mut item) = self.store.get_evidence(&entry.entity_id).await? else {
			return self.vanished(entry).await;
		};

		if item.uploaded_url.is_none() {
			let size = item.byte_length.max(0) as u64;
			if self.config.wifi_only_large_files
				&& size > self.config.large_file_threshold_bytes
				&& !network.is_unmetered()
			{
				debug!(evidence_id = %item.id, bytes = size, network = network.as_str(), "large file waits for wifi");
				return Ok(EntryOutcome::Deferred);
			}

			let url = self.transfer(&item, size, report).await?;
			item.uploaded_url = Some(url);
			item.sync_status = EvidenceSyncStatus::Uploaded;
		}

		self.transport.put_evidence_metadata(&item).await?;
		let completion = self.finish_entry(entry).await?;
		let status = match completion {
			Completion::Superseded => EvidenceSyncStatus::Uploaded,
			_ => EvidenceSyncStatus::Synced,
		};
		self.store
			.set_evidence_sync(
				&item.id,
				EvidenceSyncUpdate {
					status,
					uploaded_url: item.uploaded_url.clone(),
					integrity_verified: None,
				},
			)
			.await?;
		Ok(EntryOutcome::Synced)
	}

	/// The evidence row went away mid-flight. Whatever reached the server is
	/// cleaned up by the delete `finish_entry` queues.
	async fn vanished(&self, entry: &SyncQueueEntry) -> Result<EntryOutcome, SyncError> {
		info!(evidence_id = %entry.entity_id, "evidence deleted while syncing");
		self.finish_entry(entry).await?;
		Ok(EntryOutcome::Vanished)
	}

	/// Send the original file, then re-hash it and log the outcome.
	async fn transfer(&self, item: &EvidenceItem, size: u64, report: &mut SyncRunReport) -> Result<String, SyncError> {
		let path = self.storage.original_path(&item.original_filename);
		self.store
			.set_evidence_sync(&item.id, EvidenceSyncUpdate::status(EvidenceSyncStatus::Processing))
			.await?;

		self.set_phase(SyncPhase::Uploading);
		let sent = if size >= self.config.chunk_threshold_bytes {
			self.uploader.upload(item, &path).await.map_err(SyncError::from)
		} else {
			self.upload_direct(item, &path).await
		};
		self.set_phase(SyncPhase::Draining);

		let url = match sent {
			Ok(url) => url,
			Err(e) => {
				let reset = self
					.store
					.set_evidence_sync(&item.id, EvidenceSyncUpdate::status(EvidenceSyncStatus::Captured))
					.await;
				if let Err(reset) = reset {
					debug!(evidence_id = %item.id, error = %reset, "status not reset after failed upload");
				}
				return Err(e);
			}
		};

		let verification = hashing::verify_file(&path, &item.original_hash).await?;
		self.custody
			.record(
				CustodyAction::Synced,
				item.entity_type(),
				&item.id,
				Some(&verification.actual_hash),
				json!({ "url": url, "bytes": size }),
			)
			.await?;
		self.custody
			.record(
				CustodyAction::Verified,
				item.entity_type(),
				&item.id,
				Some(&verification.actual_hash),
				json!({
					"valid": verification.is_valid,
					"expected": verification.expected_hash,
					"actual": verification.actual_hash,
				}),
			)
			.await?;
		if !verification.is_valid {
			warn!(
				evidence_id = %item.id,
				expected = %verification.expected_hash,
				actual = %verification.actual_hash,
				"original no longer matches its capture hash"
			);
			report.integrity_failures.push(item.id.clone());
		}

		self.store
			.set_evidence_sync(
				&item.id,
				EvidenceSyncUpdate {
					status: EvidenceSyncStatus::Uploaded,
					uploaded_url: Some(url.clone()),
					integrity_verified: Some(verification.is_valid),
				},
			)
			.await?;
		if verification.is_valid {
			info!(evidence_id = %item.id, bytes = size, "evidence uploaded and verified");
		}
		Ok(url)
	}

	async fn upload_direct(&self, item: &EvidenceItem, path: &std::path::Path) -> Result<String, SyncError> {
		let bytes = tokio::fs::read(path).await.map_err(|e| SyncError::Io {
			path: path.display().to_string(),
			message: e.to_string(),
		})?;
		Ok(self.transport.upload_file(item, bytes).await?)
	}

	/// Apply remote report changes that do not collide with local edits.
	async fn pull(&self, report: &mut SyncRunReport) -> Result<(), SyncError> {
		let state = self.store.sync_state().await?;
		let changes = self.transport.fetch_changes(state.download_cursor.as_deref()).await?;
		let pending: HashSet<String> = self.store.pending_sync_reports().await?.into_iter().collect();

		for remote in &changes.reports {
			let Some(remote_at) = remote.server_updated_at else {
				warn!(report_id = %remote.id, "remote report without server timestamp, ignoring");
				continue;
			};

			let Some(local) = self.store.get_report(&remote.id).await? else {
				if pending.contains(&remote.id) {
					debug!(report_id = %remote.id, "deleted locally, delete is queued");
				} else {
					self.store.apply_remote_report(remote).await?;
					report.reports_downloaded += 1;
				}
				continue;
			};

			if local.server_updated_at.is_some_and(|seen| seen >= remote_at) {
				continue;
			}

			if !pending.contains(&remote.id) {
				self.store.apply_remote_report(remote).await?;
				report.reports_downloaded += 1;
				continue;
			}

			let known = self
				.store
				.get_conflict(&remote.id)
				.await?
				.is_some_and(|c| c.resolution == ConflictResolution::Pending && c.server_updated_at == remote_at);
			if known {
				continue;
			}
			warn!(report_id = %remote.id, "remote change collides with local edits");
			self.store
				.upsert_conflict(&SyncConflict {
					report_id: remote.id.clone(),
					resolution: ConflictResolution::Pending,
					server_updated_at: remote_at,
					client_updated_at: local.updated_at,
					server_snapshot: Some(remote.clone()),
					detected_at: Utc::now(),
					dismissed_at: None,
					resolved_at: None,
				})
				.await?;
			self.store
				.set_report_sync(&remote.id, RecordSyncStatus::Conflict, None)
				.await?;
		}

		let downloaded = report.reports_downloaded > 0;
		self.store
			.update_sync_state(SyncStatePatch {
				download_cursor: changes.cursor,
				last_download_at: downloaded.then(Utc::now),
				..Default::default()
			})
			.await?;
		Ok(())
	}

	/// Apply the user's decision on a pending conflict.
	pub async fn resolve_conflict(&self, report_id: &str, choice: ConflictChoice) -> Result<(), SyncError> {
		let conflict = self
			.store
			.get_conflict(report_id)
			.await?
			.filter(|c| c.resolution == ConflictResolution::Pending)
			.ok_or_else(|| SyncError::ConflictNotFound(report_id.to_string()))?;

		match choice {
			ConflictChoice::KeepLocal => {
				let mut local = self
					.store
					.get_report(report_id)
					.await?
					.ok_or_else(|| SyncError::ReportNotFound(report_id.to_string()))?;
				self.store
					.set_report_sync(report_id, RecordSyncStatus::Pending, Some(conflict.server_updated_at))
					.await?;

				let queued = self.store.pending_sync_reports().await?.iter().any(|id| id == report_id);
				if !queued {
					local.server_updated_at = Some(conflict.server_updated_at);
					self.store
						.enqueue_sync(EntityType::Report, report_id, SyncOperation::Update, SyncPayload::Report(local))
						.await?;
				}
				self.store
					.resolve_conflict_record(report_id, ConflictResolution::ClientWins)
					.await?;
			}
			ConflictChoice::KeepServer => {
				let snapshot = conflict
					.server_snapshot
					.ok_or_else(|| SyncError::MissingSnapshot(report_id.to_string()))?;
				for entry in self.store.pending_sync_entries().await? {
					if entry.entity_type == EntityType::Report && entry.entity_id == report_id {
						self.store.complete_sync_entry(&entry.id, entry.revision).await?;
					}
				}
				self.store.apply_remote_report(&snapshot).await?;
				self.store
					.resolve_conflict_record(report_id, ConflictResolution::ServerWins)
					.await?;
			}
			ConflictChoice::Dismiss => self.store.dismiss_conflict(report_id).await?,
		}

		info!(report_id, choice = ?choice, "conflict resolved");
		Ok(())
	}
}

fn payload_report_id(payload: &SyncPayload) -> Option<String> {
	match payload {
		SyncPayload::Report(r) => Some(r.id.clone()),
		SyncPayload::Evidence(e) => Some(e.report_id.clone()),
		SyncPayload::Item(i) => Some(i.report_id().to_string()),
		SyncPayload::Tombstone { report_id } => report_id.clone(),
	}
}

fn is_retryable(e: &SyncError) -> bool {
	match e {
		SyncError::Transport(e) => e.is_retryable(),
		SyncError::Upload(e) => e.is_retryable(),
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::network::StaticNetwork;
	use crate::testing::FakeServer;
	use crate::transport::{RemoteChanges, UploadMetadata};
	use siteproof_core::models::{Actor, Defect, EvidenceKind, ReportItem};
	use siteproof_core::{CaptureRequest, EvidenceVault, SurrealStore};

	const MIB: u64 = 1024 * 1024;

	struct Harness {
		_tmp: tempfile::TempDir,
		store: Arc<SurrealStore>,
		vault: EvidenceVault,
		server: Arc<FakeServer>,
		network: Arc<StaticNetwork>,
		engine: Arc<SyncEngine>,
	}

	async fn harness() -> Harness {
		harness_with(Config::default()).await
	}

	async fn harness_with(config: Config) -> Harness {
		harness_wrapped(config, |server, _| server as Arc<dyn SyncTransport>).await
	}

	/// `wrap` sits between the engine and the fake server. It gets its own
	/// vault over the same store so it can act on evidence mid-sync.
	async fn harness_wrapped(
		config: Config,
		wrap: impl FnOnce(Arc<FakeServer>, EvidenceVault) -> Arc<dyn SyncTransport>,
	) -> Harness {
		let tmp = tempfile::tempdir().unwrap();
		let store = Arc::new(SurrealStore::in_memory().await.unwrap());
		let dyn_store: Arc<dyn LocalStore> = store.clone();
		let actor = Actor {
			user_id: "u1".into(),
			user_name: "Inspector".into(),
			device_id: store.device_id().to_string(),
		};
		let custody = CustodyLog::new(dyn_store.clone(), actor);
		let storage = EvidenceStorage::new(tmp.path());
		let progress = ProgressBus::new();
		let vault = EvidenceVault::new(dyn_store.clone(), storage.clone(), custody.clone(), progress.clone());

		let server = Arc::new(FakeServer::new());
		let side_vault = EvidenceVault::new(dyn_store.clone(), storage.clone(), custody.clone(), progress.clone());
		let transport = wrap(server.clone(), side_vault);
		let network = Arc::new(StaticNetwork::new(NetworkKind::Wifi));
		let engine = Arc::new(SyncEngine::new(
			dyn_store,
			storage,
			custody,
			transport,
			network.clone(),
			progress,
			&config,
		));
		Harness {
			_tmp: tmp,
			store,
			vault,
			server,
			network,
			engine,
		}
	}

	fn capture(report_id: &str, kind: EvidenceKind, bytes: Vec<u8>) -> CaptureRequest {
		CaptureRequest {
			report_id: report_id.to_string(),
			kind: Some(kind),
			bytes,
			..Default::default()
		}
	}

	async fn new_report(h: &Harness, title: &str) -> Report {
		let report = Report::new(title);
		h.store.save_report(&report).await.unwrap();
		report
	}

	#[tokio::test]
	async fn repeated_runs_are_idempotent() {
		let h = harness().await;
		let report = new_report(&h, "12 High St").await;
		let item = h
			.vault
			.capture(capture(&report.id, EvidenceKind::Photo, b"jpeg bytes".to_vec()))
			.await
			.unwrap();

		let first = h.engine.run_pending_sync().await;
		assert_eq!(first.reports_synced, 1);
		assert_eq!(first.photos_synced, 1);
		assert_eq!(first.errors, 0);
		assert_eq!(first.outcome(), FetchOutcome::NewData);
		assert_eq!(h.store.queue_len().await.unwrap(), 0);

		let stored = h.store.get_evidence(&item.id).await.unwrap().unwrap();
		assert_eq!(stored.sync_status, EvidenceSyncStatus::Synced);
		assert_eq!(stored.integrity_verified, Some(true));
		assert!(stored.uploaded_url.is_some());
		assert_eq!(h.server.file_for(&item.id).unwrap(), b"jpeg bytes");
		assert_eq!(h.server.direct_uploads(), 1);
		assert_eq!(
			h.store.get_report(&report.id).await.unwrap().unwrap().sync_status,
			RecordSyncStatus::Synced
		);

		let actions: Vec<CustodyAction> = h
			.vault
			.custody()
			.chain_for(EntityType::Photo, &item.id)
			.await
			.unwrap()
			.into_iter()
			.map(|e| e.action)
			.collect();
		assert_eq!(actions[0], CustodyAction::Verified);
		assert_eq!(actions[1], CustodyAction::Synced);

		let pushes = h.server.push_count();
		let second = h.engine.run_pending_sync().await;
		assert_eq!(second.synced_total(), 0);
		assert_eq!(second.reports_downloaded, 0);
		assert_eq!(second.outcome(), FetchOutcome::NoData);
		assert_eq!(h.store.queue_len().await.unwrap(), 0);
		assert_eq!(h.server.push_count(), pushes);
		assert_eq!(h.server.direct_uploads(), 1);
		assert_eq!(h.engine.phase(), SyncPhase::Idle);
	}

	#[tokio::test]
	async fn offline_run_leaves_the_queue_alone() {
		let h = harness().await;
		h.network.set(NetworkKind::Offline);
		new_report(&h, "Offline job").await;
		let before = h.store.pending_sync_entries().await.unwrap();

		let run = h.engine.run_pending_sync().await;
		assert_eq!(run.skipped, Some(SkipReason::Offline));
		assert_eq!(run.outcome(), FetchOutcome::NoData);
		assert_eq!(h.store.pending_sync_entries().await.unwrap(), before);
		assert_eq!(h.server.push_count(), 0);

		let state = h.store.sync_state().await.unwrap();
		assert_eq!(state.last_run_outcome.as_deref(), Some("no_data"));
	}

	#[tokio::test]
	async fn unreachable_server_is_skipped() {
		let mut config = Config::default();
		config.server.health_timeout_ms = 50;
		let h = harness_with(config).await;
		new_report(&h, "Job").await;
		let before = h.store.pending_sync_entries().await.unwrap();

		h.server.set_reachable(false);
		let run = h.engine.run_pending_sync().await;
		assert_eq!(run.skipped, Some(SkipReason::ServerUnreachable));

		h.server.set_reachable(true);
		h.server.set_health_delay(Duration::from_millis(500));
		let run = h.engine.run_pending_sync().await;
		assert_eq!(run.skipped, Some(SkipReason::ServerUnreachable));
		assert_eq!(run.outcome(), FetchOutcome::NoData);

		assert_eq!(h.store.pending_sync_entries().await.unwrap(), before);
		assert_eq!(h.server.push_count(), 0);
	}

	async fn diverge(h: &Harness) -> Report {
		let report = new_report(h, "Original").await;
		h.engine.run_pending_sync().await;

		let mut theirs = h.server.report(&report.id).unwrap();
		theirs.title = "Server title".into();
		h.server.edit_report(theirs);

		let mut ours = h.store.get_report(&report.id).await.unwrap().unwrap();
		ours.title = "Local title".into();
		ours.updated_at = Utc::now();
		h.store.save_report(&ours).await.unwrap();
		ours
	}

	#[tokio::test]
	async fn conflicting_edits_are_never_merged() {
		let h = harness().await;
		let ours = diverge(&h).await;

		let run = h.engine.run_pending_sync().await;
		assert_eq!(run.reports_synced, 0);
		assert_eq!(run.conflicts.len(), 1);
		assert_eq!(run.conflicts[0].report_id, ours.id);
		assert_eq!(
			run.conflicts[0].server_snapshot.as_ref().unwrap().title,
			"Server title"
		);

		let local = h.store.get_report(&ours.id).await.unwrap().unwrap();
		assert_eq!(local.title, "Local title");
		assert_eq!(local.sync_status, RecordSyncStatus::Conflict);
		assert_eq!(h.server.report(&ours.id).unwrap().title, "Server title");

		// Stays put until the user decides
		let pushes = h.server.push_count();
		let again = h.engine.run_pending_sync().await;
		assert_eq!(again.conflicts.len(), 1);
		assert_eq!(again.deferred, 1);
		assert_eq!(h.server.push_count(), pushes);
		assert_eq!(h.store.queue_len().await.unwrap(), 1);

		h.engine.resolve_conflict(&ours.id, ConflictChoice::KeepLocal).await.unwrap();
		let resolved = h.engine.run_pending_sync().await;
		assert_eq!(resolved.reports_synced, 1);
		assert!(resolved.conflicts.is_empty());
		assert_eq!(h.server.report(&ours.id).unwrap().title, "Local title");
		assert_eq!(
			h.store.get_report(&ours.id).await.unwrap().unwrap().sync_status,
			RecordSyncStatus::Synced
		);
	}

	#[tokio::test]
	async fn keep_server_takes_the_snapshot() {
		let h = harness().await;
		let ours = diverge(&h).await;
		h.engine.run_pending_sync().await;

		h.engine.resolve_conflict(&ours.id, ConflictChoice::KeepServer).await.unwrap();
		let local = h.store.get_report(&ours.id).await.unwrap().unwrap();
		assert_eq!(local.title, "Server title");
		assert_eq!(local.sync_status, RecordSyncStatus::Synced);
		assert_eq!(h.store.queue_len().await.unwrap(), 0);
		assert!(h.store.pending_conflicts().await.unwrap().is_empty());

		let pushes = h.server.push_count();
		let run = h.engine.run_pending_sync().await;
		assert_eq!(run.outcome(), FetchOutcome::NoData);
		assert_eq!(h.server.push_count(), pushes);
	}

	#[tokio::test]
	async fn dismissed_conflicts_stay_pending() {
		let h = harness().await;
		let ours = diverge(&h).await;
		h.engine.run_pending_sync().await;

		h.engine.resolve_conflict(&ours.id, ConflictChoice::Dismiss).await.unwrap();
		let conflicts = h.store.pending_conflicts().await.unwrap();
		assert_eq!(conflicts.len(), 1);
		assert!(conflicts[0].dismissed_at.is_some());

		let err = h.engine.resolve_conflict("nope", ConflictChoice::KeepLocal).await.unwrap_err();
		assert!(matches!(err, SyncError::ConflictNotFound(_)));
	}

	#[tokio::test]
	async fn remote_reports_are_downloaded_once() {
		let h = harness().await;
		let remote = Report::new("Created at the office");
		h.server.edit_report(remote.clone());

		let run = h.engine.run_pending_sync().await;
		assert_eq!(run.reports_downloaded, 1);
		assert_eq!(run.outcome(), FetchOutcome::NewData);
		let local = h.store.get_report(&remote.id).await.unwrap().unwrap();
		assert_eq!(local.title, "Created at the office");
		assert_eq!(local.sync_status, RecordSyncStatus::Synced);
		assert_eq!(h.store.queue_len().await.unwrap(), 0);

		let again = h.engine.run_pending_sync().await;
		assert_eq!(again.reports_downloaded, 0);
		assert!(h.store.sync_state().await.unwrap().last_download_at.is_some());
	}

	#[tokio::test]
	async fn large_upload_resumes_after_interruption() {
		let mut config = Config::default();
		config.sync.retry_delays_ms = vec![0, 0];
		let h = harness_with(config).await;
		let report = new_report(&h, "Warehouse roof").await;

		let bytes: Vec<u8> = (0..12 * MIB).map(|i| (i % 253) as u8).collect();
		let item = h
			.vault
			.capture(capture(&report.id, EvidenceKind::Video, bytes.clone()))
			.await
			.unwrap();

		// The connection drops at the 5 MiB mark for longer than the retries last
		h.server.fail_patches_at(5 * MIB, 10);
		let first = h.engine.run_pending_sync().await;
		assert_eq!(first.videos_synced, 0);
		assert_eq!(first.errors, 1);
		let checkpoint = h.store.upload_checkpoint(&item.id).await.unwrap().unwrap();
		assert_eq!(checkpoint.offset as u64, 5 * MIB);
		let stored = h.store.get_evidence(&item.id).await.unwrap().unwrap();
		assert_eq!(stored.sync_status, EvidenceSyncStatus::Captured);

		h.server.fail_patches_at(0, 0);
		let sent_before = h.server.patch_offsets().len();
		let second = h.engine.run_pending_sync().await;
		assert_eq!(second.videos_synced, 1);
		assert_eq!(h.server.patch_offsets()[sent_before], 5 * MIB);
		assert_eq!(h.server.uploads_created(), 1);
		assert_eq!(h.server.file_for(&item.id).unwrap(), bytes);
		assert!(h.store.upload_checkpoint(&item.id).await.unwrap().is_none());

		let stored = h.store.get_evidence(&item.id).await.unwrap().unwrap();
		assert_eq!(stored.integrity_verified, Some(true));
		assert_eq!(stored.sync_status, EvidenceSyncStatus::Synced);
	}

	#[tokio::test]
	async fn large_files_wait_for_wifi() {
		let mut config = Config::default();
		config.sync.large_file_threshold_bytes = 1024;
		let h = harness_with(config).await;
		let report = new_report(&h, "Job").await;
		let item = h
			.vault
			.capture(capture(&report.id, EvidenceKind::Photo, vec![7u8; 4096]))
			.await
			.unwrap();

		h.network.set(NetworkKind::Cellular);
		let run = h.engine.run_pending_sync().await;
		assert_eq!(run.reports_synced, 1);
		assert_eq!(run.photos_synced, 0);
		assert_eq!(run.deferred, 1);
		let entries = h.store.pending_sync_entries().await.unwrap();
		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].attempt_count, 0);
		assert!(h.server.file_for(&item.id).is_none());

		h.network.set(NetworkKind::Wifi);
		let run = h.engine.run_pending_sync().await;
		assert_eq!(run.photos_synced, 1);
		assert!(h.server.file_for(&item.id).is_some());
	}

	#[tokio::test]
	async fn tampered_original_is_reported_and_queue_continues() {
		let h = harness().await;
		let report = new_report(&h, "Job").await;
		let tampered = h
			.vault
			.capture(capture(&report.id, EvidenceKind::Photo, b"first".to_vec()))
			.await
			.unwrap();
		let clean = h
			.vault
			.capture(capture(&report.id, EvidenceKind::Photo, b"second".to_vec()))
			.await
			.unwrap();
		std::fs::write(h.vault.storage().original_path(&tampered.original_filename), b"edited").unwrap();

		let run = h.engine.run_pending_sync().await;
		assert_eq!(run.integrity_failures, vec![tampered.id.clone()]);
		assert_eq!(run.photos_synced, 2);

		let stored = h.store.get_evidence(&tampered.id).await.unwrap().unwrap();
		assert_eq!(stored.integrity_verified, Some(false));
		let stored = h.store.get_evidence(&clean.id).await.unwrap().unwrap();
		assert_eq!(stored.integrity_verified, Some(true));

		let chain = h.vault.custody().chain_for(EntityType::Photo, &tampered.id).await.unwrap();
		assert_eq!(chain[0].action, CustodyAction::Verified);
		assert_eq!(chain[0].details["valid"], false);
	}

	#[tokio::test]
	async fn failing_entries_end_up_in_error() {
		let mut config = Config::default();
		config.sync.max_attempts = 2;
		let h = harness_with(config).await;
		let report = new_report(&h, "Job").await;
		h.server.fail_pushes(true);

		let first = h.engine.run_pending_sync().await;
		assert_eq!(first.errors, 1);
		assert_eq!(first.outcome(), FetchOutcome::Failed);
		assert_eq!(
			h.store.get_report(&report.id).await.unwrap().unwrap().sync_status,
			RecordSyncStatus::Pending
		);

		h.engine.run_pending_sync().await;
		assert_eq!(
			h.store.get_report(&report.id).await.unwrap().unwrap().sync_status,
			RecordSyncStatus::Error
		);
		let entries = h.store.pending_sync_entries().await.unwrap();
		assert_eq!(entries[0].attempt_count, 2);
		assert!(entries[0].last_error.as_deref().unwrap().contains("503"));

		h.server.fail_pushes(false);
		let run = h.engine.run_pending_sync().await;
		assert_eq!(run.reports_synced, 1);
		assert_eq!(h.store.queue_len().await.unwrap(), 0);
	}

	#[tokio::test]
	async fn records_and_deletes_reach_the_server() {
		let h = harness().await;
		let report = new_report(&h, "Job").await;
		let defect = ReportItem::Defect(Defect {
			id: "d1".into(),
			report_id: report.id.clone(),
			roof_element_id: None,
			category: "flashing".into(),
			severity: "major".into(),
			description: None,
			updated_at: Utc::now(),
		});
		h.store.save_report_item(&defect).await.unwrap();

		let run = h.engine.run_pending_sync().await;
		assert_eq!(run.records_synced, 1);
		assert!(h.server.record(EntityType::Defect, "d1").is_some());

		h.store.delete_report_item(EntityType::Defect, "d1").await.unwrap();
		h.store.delete_report(&report.id).await.unwrap();
		let run = h.engine.run_pending_sync().await;
		assert_eq!(run.deleted, 2);
		assert!(h.server.report(&report.id).is_none());
		assert!(h.server.record(EntityType::Defect, "d1").is_none());
		assert_eq!(h.store.queue_len().await.unwrap(), 0);
	}

	#[tokio::test]
	async fn deleted_evidence_is_removed_from_the_server() {
		let h = harness().await;
		let report = new_report(&h, "Job").await;
		let item = h
			.vault
			.capture(capture(&report.id, EvidenceKind::Photo, b"jpeg".to_vec()))
			.await
			.unwrap();
		h.engine.run_pending_sync().await;
		assert!(h.server.evidence_metadata(&item.id).is_some());
		assert!(h.server.file_for(&item.id).is_some());

		h.vault.delete(&item.id).await.unwrap();
		let run = h.engine.run_pending_sync().await;
		assert_eq!(run.deleted, 1);
		assert_eq!(run.errors, 0);
		assert_eq!(h.server.deleted(), vec![(EntityType::Photo, item.id.clone())]);
		assert!(h.server.evidence_metadata(&item.id).is_none());
		assert!(h.server.file_for(&item.id).is_none());
		assert_eq!(h.store.queue_len().await.unwrap(), 0);
	}

	/// Deletes the evidence locally as soon as the server has its bytes.
	struct DeleteAfterUpload {
		server: Arc<FakeServer>,
		vault: EvidenceVault,
	}

	#[async_trait::async_trait]
	impl SyncTransport for DeleteAfterUpload {
		async fn health(&self) -> Result<(), TransportError> {
			self.server.health().await
		}

		async fn push_report(&self, push: &ReportPush) -> Result<PushOutcome, TransportError> {
			self.server.push_report(push).await
		}

		async fn put_record(&self, entity_type: EntityType, id: &str, body: &serde_json::Value) -> Result<(), TransportError> {
			self.server.put_record(entity_type, id, body).await
		}

		async fn delete_record(&self, entity_type: EntityType, id: &str) -> Result<(), TransportError> {
			self.server.delete_record(entity_type, id).await
		}

		async fn put_evidence_metadata(&self, item: &EvidenceItem) -> Result<(), TransportError> {
			self.server.put_evidence_metadata(item).await
		}

		async fn upload_file(&self, item: &EvidenceItem, bytes: Vec<u8>) -> Result<String, TransportError> {
			let url = self.server.upload_file(item, bytes).await?;
			self.vault.delete(&item.id).await.unwrap();
			Ok(url)
		}

		async fn create_upload(&self, metadata: &UploadMetadata, total_bytes: u64) -> Result<String, TransportError> {
			self.server.create_upload(metadata, total_bytes).await
		}

		async fn upload_offset(&self, location: &str) -> Result<u64, TransportError> {
			self.server.upload_offset(location).await
		}

		async fn patch_upload(&self, location: &str, offset: u64, chunk: Vec<u8>) -> Result<u64, TransportError> {
			self.server.patch_upload(location, offset, chunk).await
		}

		async fn fetch_changes(&self, since: Option<&str>) -> Result<RemoteChanges, TransportError> {
			self.server.fetch_changes(since).await
		}
	}

	#[tokio::test]
	async fn evidence_deleted_during_upload_is_cleaned_up() {
		let h = harness_wrapped(Config::default(), |server, vault| {
			Arc::new(DeleteAfterUpload { server, vault }) as Arc<dyn SyncTransport>
		})
		.await;
		let report = new_report(&h, "Job").await;
		let item = h
			.vault
			.capture(capture(&report.id, EvidenceKind::Photo, b"jpeg".to_vec()))
			.await
			.unwrap();
		h.store
			.save_report_item(&ReportItem::Defect(Defect {
				id: "d1".into(),
				report_id: report.id.clone(),
				roof_element_id: None,
				category: "gutter".into(),
				severity: "minor".into(),
				description: None,
				updated_at: Utc::now(),
			}))
			.await
			.unwrap();

		let run = h.engine.run_pending_sync().await;
		assert_eq!(run.errors, 0, "{:?}", run.last_error);
		assert_eq!(run.reports_synced, 1);
		assert_eq!(run.photos_synced, 0);
		assert_eq!(run.records_synced, 1);
		assert!(h.server.record(EntityType::Defect, "d1").is_some());
		assert!(h.server.file_for(&item.id).is_some());

		let queued = h.store.pending_sync_entries().await.unwrap();
		assert_eq!(queued.len(), 1);
		assert_eq!(queued[0].entity_id, item.id);
		assert_eq!(queued[0].operation, SyncOperation::Delete);

		let run = h.engine.run_pending_sync().await;
		assert_eq!(run.deleted, 1);
		assert!(h.server.file_for(&item.id).is_none());
		assert_eq!(h.server.deleted(), vec![(EntityType::Photo, item.id.clone())]);
		assert_eq!(h.store.queue_len().await.unwrap(), 0);

		let chain = h.vault.custody().chain_for(EntityType::Photo, &item.id).await.unwrap();
		assert!(chain.iter().any(|e| e.action == CustodyAction::Deleted));
		assert!(chain.iter().any(|e| e.action == CustodyAction::Synced));
	}

	#[tokio::test]
	async fn synced_event_logs_the_hash_read_back_from_disk() {
		let h = harness().await;
		let report = new_report(&h, "Job").await;
		let item = h
			.vault
			.capture(capture(&report.id, EvidenceKind::Photo, b"before".to_vec()))
			.await
			.unwrap();
		std::fs::write(h.vault.storage().original_path(&item.original_filename), b"after").unwrap();

		h.engine.run_pending_sync().await;
		let chain = h.vault.custody().chain_for(EntityType::Photo, &item.id).await.unwrap();
		let synced = chain.iter().find(|e| e.action == CustodyAction::Synced).unwrap();
		let actual = hashing::hash_bytes(b"after").digest;
		assert_eq!(synced.hash_at_time.as_deref(), Some(actual.as_str()));
		assert_ne!(synced.hash_at_time.as_deref(), Some(item.original_hash.as_str()));
	}

	#[tokio::test]
	async fn concurrent_triggers_share_one_run() {
		let h = harness().await;
		new_report(&h, "Job").await;
		h.server.set_health_delay(Duration::from_millis(100));

		let (a, b) = tokio::join!(h.engine.run_pending_sync(), h.engine.run_pending_sync());
		assert!(a.joined != b.joined);
		assert_eq!(a.reports_synced, 1);
		assert_eq!(b.reports_synced, 1);
		assert_eq!(h.server.push_count(), 1);
	}

	#[tokio::test]
	async fn interrupted_transfers_are_reset() {
		let h = harness().await;
		let report = new_report(&h, "Job").await;
		let item = h
			.vault
			.capture(capture(&report.id, EvidenceKind::Photo, b"x".to_vec()))
			.await
			.unwrap();
		h.store
			.set_evidence_sync(&item.id, EvidenceSyncUpdate::status(EvidenceSyncStatus::Processing))
			.await
			.unwrap();

		h.network.set(NetworkKind::Offline);
		h.engine.run_pending_sync().await;
		let stored = h.store.get_evidence(&item.id).await.unwrap().unwrap();
		assert_eq!(stored.sync_status, EvidenceSyncStatus::Captured);
	}
}
