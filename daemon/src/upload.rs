//! Chunked, resumable file transfer over TUS.
//!
//! The upload location and the last acknowledged offset are checkpointed in
//! the local store after every chunk, so an interrupted transfer picks up
//! where the server says it left off, even across restarts.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use siteproof_core::config::SyncConfig;
use siteproof_core::models::{EvidenceItem, UploadCheckpoint};
use siteproof_core::{LocalStore, ProgressBus, ProgressEvent, StoreError};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

use crate::transport::{SyncTransport, TransportError, UploadMetadata};

#[derive(Debug, Error)]
pub enum UploadError {
	#[error(transparent)]
	Transport(#[from] TransportError),

	#[error("upload checkpoint: {0}")]
	Store(#[from] StoreError),

	#[error("failed to read {path}: {message}")]
	Io { path: String, message: String },

	#[error("chunk at offset {offset} failed after {attempts} attempts: {last_error}")]
	Exhausted {
		offset: u64,
		attempts: usize,
		last_error: String,
	},

	#[error("server did not advance past offset {offset}")]
	Stalled { offset: u64 },
}

impl UploadError {
	pub fn is_retryable(&self) -> bool {
		match self {
			UploadError::Transport(e) => e.is_retryable(),
			UploadError::Exhausted { .. } | UploadError::Stalled { .. } => true,
			UploadError::Store(_) | UploadError::Io { .. } => false,
		}
	}
}

pub struct ResumableUploader {
	transport: Arc<dyn SyncTransport>,
	store: Arc<dyn LocalStore>,
	progress: ProgressBus,
	chunk_size: u64,
	retry_delays: Vec<Duration>,
}

impl ResumableUploader {
	pub fn new(
		transport: Arc<dyn SyncTransport>,
		store: Arc<dyn LocalStore>,
		progress: ProgressBus,
		config: &SyncConfig,
	) -> Self {
		let mut retry_delays = config.retry_delays();
		if retry_delays.is_empty() {
			retry_delays.push(Duration::ZERO);
		}
		Self {
			transport,
			store,
			progress,
			chunk_size: config.chunk_size_bytes.max(1),
			retry_delays,
		}
	}

	/// Transfer `path` for `item`. Returns the completed upload's URL.
	pub async fn upload(&self, item: &EvidenceItem, path: &Path) -> Result<String, UploadError> {
		let total = tokio::fs::metadata(path).await.map_err(|e| io_error(path, e))?.len();
		let (location, mut offset) = self.open_session(item, total).await?;

		let mut file = tokio::fs::File::open(path).await.map_err(|e| io_error(path, e))?;
		while offset < total {
			let next = self.send_chunk(&location, offset, total, &mut file, path).await?;
			if next <= offset {
				return Err(UploadError::Stalled { offset });
			}
			offset = next;

			self.save_checkpoint(item, &location, offset, total).await?;
			self.progress.publish(ProgressEvent::Upload {
				evidence_id: item.id.clone(),
				bytes_sent: offset,
				total_bytes: total,
			});
			debug!(evidence_id = %item.id, offset, total, "chunk acknowledged");
		}

		self.store.clear_upload_checkpoint(&item.id).await?;
		info!(evidence_id = %item.id, bytes = total, "resumable upload complete");
		Ok(location)
	}

	/// Reuse a checkpointed upload if the server still has it, else start fresh.
	async fn open_session(&self, item: &EvidenceItem, total: u64) -> Result<(String, u64), UploadError> {
		if let Some(checkpoint) = self.store.upload_checkpoint(&item.id).await? {
			let same_file = checkpoint.original_hash == item.original_hash && checkpoint.total_bytes as u64 == total;
			if same_file {
				match self.transport.upload_offset(&checkpoint.upload_url).await {
					Ok(offset) => {
						info!(evidence_id = %item.id, offset, total, "resuming upload");
						return Ok((checkpoint.upload_url, offset));
					}
					Err(e) if e.is_gone() => {
						warn!(evidence_id = %item.id, "server dropped the upload, starting over");
					}
					Err(e) => return Err(e.into()),
				}
			}
			self.store.clear_upload_checkpoint(&item.id).await?;
		}

		let location = self
			.transport
			.create_upload(&UploadMetadata::for_item(item), total)
			.await?;
		self.save_checkpoint(item, &location, 0, total).await?;
		debug!(evidence_id = %item.id, location = %location, "upload created");
		Ok((location, 0))
	}

	/// Send the chunk at `offset`, retrying with the configured delays.
	/// Retries re-read the server's offset first since a failed request may
	/// still have been partly applied.
	async fn send_chunk(
		&self,
		location: &str,
		mut offset: u64,
		total: u64,
		file: &mut tokio::fs::File,
		path: &Path,
	) -> Result<u64, UploadError> {
		let mut last_error = String::new();

		for (attempt, delay) in self.retry_delays.iter().enumerate() {
			if !delay.is_zero() {
				tokio::time::sleep(*delay).await;
			}

			if attempt > 0 {
				match self.transport.upload_offset(location).await {
					Ok(server_offset) => offset = server_offset,
					Err(e) if e.is_retryable() => {
						last_error = e.to_string();
						continue;
					}
					Err(e) => return Err(e.into()),
				}
				if offset >= total {
					return Ok(offset);
				}
			}

			let len = (total - offset).min(self.chunk_size);
			let chunk = read_chunk(file, path, offset, len).await?;
			match self.transport.patch_upload(location, offset, chunk).await {
				Ok(next) => return Ok(next),
				Err(e) if e.is_retryable() => {
					warn!(location, offset, attempt = attempt + 1, error = %e, "chunk failed");
					last_error = e.to_string();
				}
				Err(e) => return Err(e.into()),
			}
		}

		Err(UploadError::Exhausted {
			offset,
			attempts: self.retry_delays.len(),
			last_error,
		})
	}

	async fn save_checkpoint(&self, item: &EvidenceItem, location: &str, offset: u64, total: u64) -> Result<(), UploadError> {
		self.store
			.save_upload_checkpoint(&UploadCheckpoint {
				evidence_id: item.id.clone(),
				upload_url: location.to_string(),
				offset: offset as i64,
				total_bytes: total as i64,
				original_hash: item.original_hash.clone(),
				updated_at: Utc::now(),
			})
			.await?;
		Ok(())
	}
}

async fn read_chunk(file: &mut tokio::fs::File, path: &Path, offset: u64, len: u64) -> Result<Vec<u8>, UploadError> {
	file.seek(SeekFrom::Start(offset)).await.map_err(|e| io_error(path, e))?;
	let mut buf = vec![0u8; len as usize];
	file.read_exact(&mut buf).await.map_err(|e| io_error(path, e))?;
	Ok(buf)
}

fn io_error(path: &Path, e: std::io::Error) -> UploadError {
	UploadError::Io {
		path: path.display().to_string(),
		message: e.to_string(),
	}
}
