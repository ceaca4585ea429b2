//! In-progress video and voice recordings.
//!
//! A recording streams into `temp/` until it is finished. Only a finished
//! recording becomes evidence; a cancelled one leaves no file and no custody
//! event behind.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::capture::CaptureRequest;
use crate::models::{DeviceInfo, EvidenceKind, GpsFix, TrackPoint};
use crate::storage::{map_io_error, EvidenceStorage, StorageError};

pub struct RecordingSession {
	kind: EvidenceKind,
	path: PathBuf,
	file: tokio::fs::File,
	started: Instant,
	bytes_written: u64,
	track: Vec<TrackPoint>,
}

/// The recorded buffer, ready to be handed to the capture pipeline.
#[derive(Debug, Clone)]
pub struct FinishedRecording {
	pub kind: EvidenceKind,
	pub bytes: Vec<u8>,
	pub duration_ms: i64,
	pub track: Vec<TrackPoint>,
}

impl RecordingSession {
	pub async fn start(storage: &EvidenceStorage, kind: EvidenceKind) -> Result<Self, StorageError> {
		let temp = &storage.paths().temp;
		tokio::fs::create_dir_all(temp).await.map_err(|e| map_io_error(e, temp))?;

		let name = format!("rec_{}.{}", ulid::Ulid::new(), kind.default_extension());
		let path = storage.stage_temp(&name)?;
		let file = tokio::fs::File::create(&path).await.map_err(|e| map_io_error(e, &path))?;

		debug!(path = %path.display(), "recording started");
		Ok(Self {
			kind,
			path,
			file,
			started: Instant::now(),
			bytes_written: 0,
			track: Vec::new(),
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn bytes_written(&self) -> u64 {
		self.bytes_written
	}

	pub async fn append(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
		self.file.write_all(chunk).await.map_err(|e| map_io_error(e, &self.path))?;
		self.bytes_written += chunk.len() as u64;
		Ok(())
	}

	/// Record a location fix at the current offset (video only).
	pub fn mark_position(&mut self, fix: &GpsFix) {
		if self.kind != EvidenceKind::Video {
			return;
		}
		self.track.push(TrackPoint {
			latitude: fix.latitude,
			longitude: fix.longitude,
			altitude: fix.altitude,
			offset_ms: self.started.elapsed().as_millis() as i64,
		});
	}

	/// Close the recording and read it back. The temp file is removed.
	pub async fn finish(mut self) -> Result<FinishedRecording, StorageError> {
		self.file.flush().await.map_err(|e| map_io_error(e, &self.path))?;
		self.file.sync_all().await.map_err(|e| map_io_error(e, &self.path))?;
		let duration_ms = self.started.elapsed().as_millis() as i64;

		let bytes = tokio::fs::read(&self.path).await.map_err(|e| map_io_error(e, &self.path))?;
		tokio::fs::remove_file(&self.path)
			.await
			.map_err(|e| map_io_error(e, &self.path))?;

		Ok(FinishedRecording {
			kind: self.kind,
			bytes,
			duration_ms,
			track: self.track,
		})
	}

	/// Discard the recording.
	pub async fn cancel(self) -> Result<(), StorageError> {
		let Self { path, file, .. } = self;
		drop(file);
		match tokio::fs::remove_file(&path).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(map_io_error(e, &path)),
		}
	}
}

impl FinishedRecording {
	pub fn into_request(self, report_id: &str, gps: Option<GpsFix>, device: DeviceInfo) -> CaptureRequest {
		CaptureRequest {
			report_id: report_id.to_string(),
			kind: Some(self.kind),
			bytes: self.bytes,
			extension: None,
			gps,
			gps_track: self.track,
			device,
			duration_ms: Some(self.duration_ms),
			classification: Default::default(),
		}
	}
}
