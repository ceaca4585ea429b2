//! Three-tier evidence file storage.
//!
//! `originals/` is write-once: files are created with create-new semantics and
//! this module exposes no way to modify, move or remove them. Working copies and
//! thumbnails are derivatives and may be replaced or removed.

use std::{
	io::{self, Cursor},
	path::{Component, Path, PathBuf},
	time::{Duration, SystemTime},
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use walkdir::WalkDir;

const THUMBNAIL_EDGE: u32 = 320;

#[derive(Debug, Error)]
pub enum StorageError {
	#[error("original already exists: {0}")]
	OriginalExists(String),

	#[error("invalid filename: {0}")]
	InvalidFilename(String),

	#[error("refusing to touch protected path: {0}")]
	ProtectedPath(String),

	#[error("file not found: {0}")]
	NotFound(String),

	#[error("permission denied: {0}")]
	PermissionDenied(String),

	#[error("disk full: {0}")]
	DiskFull(String),

	#[error("I/O error: {0}")]
	IoError(String),
}

/// The fixed directories under the storage root.
#[derive(Debug, Clone, PartialEq)]
pub struct StoragePaths {
	pub root: PathBuf,
	pub originals: PathBuf,
	pub working: PathBuf,
	pub thumbnails: PathBuf,
	pub temp: PathBuf,
}

impl StoragePaths {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		let root = root.into();
		Self {
			originals: root.join("evidence").join("originals"),
			working: root.join("photos"),
			thumbnails: root.join("thumbnails"),
			temp: root.join("temp"),
			root,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
	pub exists: bool,
	pub size: u64,
	pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OriginalFile {
	pub filename: String,
	pub size: u64,
}

pub fn original_filename(id: &str, ext: &str) -> String {
	format!("orig_{id}.{ext}")
}

pub fn working_filename(id: &str, ext: &str) -> String {
	format!("{id}.{ext}")
}

pub fn thumbnail_filename(id: &str) -> String {
	format!("thumb_{id}.jpg")
}

#[derive(Debug, Clone)]
pub struct EvidenceStorage {
	paths: StoragePaths,
}

impl EvidenceStorage {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { paths: StoragePaths::new(root) }
	}

	pub fn paths(&self) -> &StoragePaths {
		&self.paths
	}

	pub async fn ensure_layout(&self) -> Result<(), StorageError> {
		for dir in [&self.paths.originals, &self.paths.working, &self.paths.thumbnails, &self.paths.temp] {
			tokio::fs::create_dir_all(dir).await.map_err(|e| map_io_error(e, dir))?;
		}
		Ok(())
	}

	pub fn original_path(&self, filename: &str) -> PathBuf {
		self.paths.originals.join(filename)
	}

	pub fn working_path(&self, filename: &str) -> PathBuf {
		self.paths.working.join(filename)
	}

	pub fn thumbnail_path(&self, filename: &str) -> PathBuf {
		self.paths.thumbnails.join(filename)
	}

	/// Write the captured bytes exactly once. Fails if the original already exists.
	pub async fn write_original(&self, bytes: &[u8], filename: &str) -> Result<PathBuf, StorageError> {
		validate_filename(filename)?;
		tokio::fs::create_dir_all(&self.paths.originals)
			.await
			.map_err(|e| map_io_error(e, &self.paths.originals))?;

		let path = self.original_path(filename);
		let mut file = tokio::fs::OpenOptions::new()
			.write(true)
			.create_new(true)
			.open(&path)
			.await
			.map_err(|e| match e.kind() {
				io::ErrorKind::AlreadyExists => StorageError::OriginalExists(path.display().to_string()),
				_ => map_io_error(e, &path),
			})?;

		file.write_all(bytes).await.map_err(|e| map_io_error(e, &path))?;
		file.flush().await.map_err(|e| map_io_error(e, &path))?;
		file.sync_all().await.map_err(|e| map_io_error(e, &path))?;

		debug!(path = %path.display(), bytes = bytes.len(), "original written");
		Ok(path)
	}

	/// Write (or replace) a mutable working copy.
	pub async fn write_working(&self, bytes: &[u8], filename: &str) -> Result<PathBuf, StorageError> {
		validate_filename(filename)?;
		tokio::fs::create_dir_all(&self.paths.working)
			.await
			.map_err(|e| map_io_error(e, &self.paths.working))?;

		let path = self.working_path(filename);
		tokio::fs::write(&path, bytes).await.map_err(|e| map_io_error(e, &path))?;
		Ok(path)
	}

	/// Best-effort thumbnail. Any failure yields the source path instead.
	pub async fn derive_thumbnail(&self, source: &Path, id: &str) -> PathBuf {
		let dest = self.thumbnail_path(&thumbnail_filename(id));
		let src = source.to_path_buf();
		let target = dest.clone();

		let result = tokio::task::spawn_blocking(move || render_thumbnail(&src, &target)).await;
		match result {
			Ok(Ok(())) => dest,
			Ok(Err(e)) => {
				warn!(source = %source.display(), error = %e, "thumbnail generation failed, using source");
				source.to_path_buf()
			}
			Err(e) => {
				warn!(source = %source.display(), error = %e, "thumbnail task failed, using source");
				source.to_path_buf()
			}
		}
	}

	pub async fn read_original(&self, filename: &str) -> Result<Vec<u8>, StorageError> {
		validate_filename(filename)?;
		let path = self.original_path(filename);
		tokio::fs::read(&path).await.map_err(|e| map_io_error(e, &path))
	}

	pub async fn file_info(&self, path: &Path) -> FileInfo {
		match tokio::fs::metadata(path).await {
			Ok(meta) => FileInfo {
				exists: true,
				size: meta.len(),
				modified: meta.modified().ok().map(DateTime::<Utc>::from),
			},
			Err(_) => FileInfo { exists: false, size: 0, modified: None },
		}
	}

	/// Remove a working copy or thumbnail. Anything outside those two
	/// directories, and in particular anything under `originals/`, is refused.
	pub async fn remove_derivative(&self, path: &Path) -> Result<bool, StorageError> {
		let inside_derivatives = path.starts_with(&self.paths.working) || path.starts_with(&self.paths.thumbnails);
		let escapes = path.components().any(|c| matches!(c, Component::ParentDir));
		if !inside_derivatives || escapes || path.starts_with(&self.paths.originals) {
			return Err(StorageError::ProtectedPath(path.display().to_string()));
		}

		match tokio::fs::remove_file(path).await {
			Ok(()) => Ok(true),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
			Err(e) => Err(map_io_error(e, path)),
		}
	}

	/// Path for an in-progress recording. Nothing is created yet.
	pub fn stage_temp(&self, name: &str) -> Result<PathBuf, StorageError> {
		validate_filename(name)?;
		Ok(self.paths.temp.join(name))
	}

	/// Remove temp files older than `max_age`. Returns how many were removed.
	pub async fn clean_temp(&self, max_age: Duration) -> Result<u64, StorageError> {
		let temp = self.paths.temp.clone();
		tokio::task::spawn_blocking(move || sweep_temp(&temp, max_age))
			.await
			.map_err(|e| StorageError::IoError(format!("task join error: {e}")))?
	}

	/// List the originals present on disk, for integrity audits.
	pub async fn scan_originals(&self) -> Result<Vec<OriginalFile>, StorageError> {
		let originals = self.paths.originals.clone();
		tokio::task::spawn_blocking(move || walk_originals(&originals))
			.await
			.map_err(|e| StorageError::IoError(format!("task join error: {e}")))?
	}
}

fn validate_filename(name: &str) -> Result<(), StorageError> {
	let mut components = Path::new(name).components();
	let single_normal = matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none();
	if name.is_empty() || !single_normal {
		return Err(StorageError::InvalidFilename(name.to_string()));
	}
	Ok(())
}

fn render_thumbnail(source: &Path, dest: &Path) -> Result<(), String> {
	let bytes = std::fs::read(source).map_err(|e| e.to_string())?;
	let image = image::load_from_memory(&bytes).map_err(|e| e.to_string())?;
	let thumb = image::DynamicImage::ImageRgb8(image.thumbnail(THUMBNAIL_EDGE, THUMBNAIL_EDGE).to_rgb8());

	let mut out = Vec::new();
	thumb
		.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Jpeg)
		.map_err(|e| e.to_string())?;

	if let Some(parent) = dest.parent() {
		std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
	}
	std::fs::write(dest, out).map_err(|e| e.to_string())
}

fn sweep_temp(temp: &Path, max_age: Duration) -> Result<u64, StorageError> {
	if !temp.exists() {
		return Ok(0);
	}

	let now = SystemTime::now();
	let mut removed = 0u64;

	for entry in WalkDir::new(temp).follow_links(false).into_iter().flatten() {
		if !entry.file_type().is_file() {
			continue;
		}
		let modified = match entry.metadata().ok().and_then(|m| m.modified().ok()) {
			Some(m) => m,
			None => continue,
		};
		let age = now.duration_since(modified).unwrap_or_default();
		if age >= max_age {
			match std::fs::remove_file(entry.path()) {
				Ok(()) => removed += 1,
				Err(e) => warn!(path = %entry.path().display(), error = %e, "failed to remove temp file"),
			}
		}
	}

	Ok(removed)
}

fn walk_originals(originals: &Path) -> Result<Vec<OriginalFile>, StorageError> {
	if !originals.exists() {
		return Ok(Vec::new());
	}

	let mut files = Vec::new();
	for entry in WalkDir::new(originals).min_depth(1).max_depth(1).follow_links(false) {
		let entry = entry.map_err(|e| StorageError::IoError(e.to_string()))?;
		if !entry.file_type().is_file() {
			continue;
		}
		let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
		files.push(OriginalFile {
			filename: entry.file_name().to_string_lossy().to_string(),
			size,
		});
	}
	files.sort_by(|a, b| a.filename.cmp(&b.filename));
	Ok(files)
}

pub(crate) fn map_io_error(err: io::Error, path: &Path) -> StorageError {
	let path = path.display().to_string();
	match err.kind() {
		io::ErrorKind::NotFound => StorageError::NotFound(path),
		io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(path),
		io::ErrorKind::StorageFull => StorageError::DiskFull(path),
		_ => StorageError::IoError(format!("{path}: {err}")),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn png_bytes(w: u32, h: u32) -> Vec<u8> {
		let img = image::RgbImage::from_fn(w, h, |x, y| image::Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
		let mut out = Vec::new();
		image::DynamicImage::ImageRgb8(img)
			.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
			.unwrap();
		out
	}

	#[tokio::test]
	async fn layout_uses_fixed_directories() {
		let tmp = tempfile::tempdir().unwrap();
		let storage = EvidenceStorage::new(tmp.path());
		storage.ensure_layout().await.unwrap();

		assert!(tmp.path().join("evidence/originals").is_dir());
		assert!(tmp.path().join("photos").is_dir());
		assert!(tmp.path().join("thumbnails").is_dir());
		assert!(tmp.path().join("temp").is_dir());
	}

	#[tokio::test]
	async fn original_is_write_once() {
		let tmp = tempfile::tempdir().unwrap();
		let storage = EvidenceStorage::new(tmp.path());

		let name = original_filename("01ABC", "jpg");
		let path = storage.write_original(b"first", &name).await.unwrap();
		assert_eq!(path, tmp.path().join("evidence/originals/orig_01ABC.jpg"));

		let err = storage.write_original(b"second", &name).await.unwrap_err();
		assert!(matches!(err, StorageError::OriginalExists(_)));
		assert_eq!(storage.read_original(&name).await.unwrap(), b"first");
	}

	#[tokio::test]
	async fn rejects_path_traversal() {
		let tmp = tempfile::tempdir().unwrap();
		let storage = EvidenceStorage::new(tmp.path());

		let err = storage.write_original(b"x", "../escape.jpg").await.unwrap_err();
		assert!(matches!(err, StorageError::InvalidFilename(_)));
		let err = storage.write_working(b"x", "a/b.jpg").await.unwrap_err();
		assert!(matches!(err, StorageError::InvalidFilename(_)));
	}

	#[tokio::test]
	async fn remove_derivative_refuses_originals() {
		let tmp = tempfile::tempdir().unwrap();
		let storage = EvidenceStorage::new(tmp.path());

		let original = storage.write_original(b"evidence", "orig_1.jpg").await.unwrap();
		let working = storage.write_working(b"evidence", "1.jpg").await.unwrap();

		let err = storage.remove_derivative(&original).await.unwrap_err();
		assert!(matches!(err, StorageError::ProtectedPath(_)));
		assert!(original.exists());

		let sneaky = storage.paths().working.join("..").join("evidence/originals/orig_1.jpg");
		assert!(storage.remove_derivative(&sneaky).await.is_err());
		assert!(original.exists());

		assert!(storage.remove_derivative(&working).await.unwrap());
		assert!(!storage.remove_derivative(&working).await.unwrap());
	}

	#[tokio::test]
	async fn thumbnail_from_real_image() {
		let tmp = tempfile::tempdir().unwrap();
		let storage = EvidenceStorage::new(tmp.path());

		let source = storage.write_working(&png_bytes(800, 600), "img.png").await.unwrap();
		let thumb = storage.derive_thumbnail(&source, "img").await;

		assert_eq!(thumb, tmp.path().join("thumbnails/thumb_img.jpg"));
		let decoded = image::open(&thumb).unwrap();
		assert!(decoded.width() <= THUMBNAIL_EDGE && decoded.height() <= THUMBNAIL_EDGE);
	}

	#[tokio::test]
	async fn thumbnail_falls_back_to_source() {
		let tmp = tempfile::tempdir().unwrap();
		let storage = EvidenceStorage::new(tmp.path());

		let source = storage.write_working(b"not an image", "broken.jpg").await.unwrap();
		let thumb = storage.derive_thumbnail(&source, "broken").await;
		assert_eq!(thumb, source);
	}

	#[tokio::test]
	async fn file_info_reports_missing_files() {
		let tmp = tempfile::tempdir().unwrap();
		let storage = EvidenceStorage::new(tmp.path());

		let info = storage.file_info(&tmp.path().join("nope")).await;
		assert!(!info.exists);

		let path = storage.write_working(b"12345", "five.bin").await.unwrap();
		let info = storage.file_info(&path).await;
		assert!(info.exists);
		assert_eq!(info.size, 5);
		assert!(info.modified.is_some());
	}

	#[tokio::test]
	async fn clean_temp_removes_stale_files() {
		let tmp = tempfile::tempdir().unwrap();
		let storage = EvidenceStorage::new(tmp.path());
		storage.ensure_layout().await.unwrap();

		std::fs::write(storage.stage_temp("rec_1.part").unwrap(), b"partial").unwrap();
		std::fs::write(storage.stage_temp("rec_2.part").unwrap(), b"partial").unwrap();

		assert_eq!(storage.clean_temp(Duration::from_secs(3600)).await.unwrap(), 0);
		assert_eq!(storage.clean_temp(Duration::ZERO).await.unwrap(), 2);
	}

	#[tokio::test]
	async fn scan_lists_originals() {
		let tmp = tempfile::tempdir().unwrap();
		let storage = EvidenceStorage::new(tmp.path());
		storage.write_original(b"bb", "orig_b.jpg").await.unwrap();
		storage.write_original(b"a", "orig_a.jpg").await.unwrap();

		let files = storage.scan_originals().await.unwrap();
		let names: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
		assert_eq!(names, vec!["orig_a.jpg", "orig_b.jpg"]);
		assert_eq!(files[1].size, 2);
	}
}
