use std::{
	fs,
	io::{self, Read},
	path::Path,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const ALGORITHM: &str = "SHA-256";
const CHUNK_SIZE: usize = 256 * 1024; // 256KB

#[derive(Debug, Error)]
pub enum HashError {
	#[error("file not found: {0}")]
	NotFound(String),

	#[error("permission denied: {0}")]
	PermissionDenied(String),

	#[error("I/O error: {0}")]
	IoError(String),
}

/// Digest of a captured buffer, taken before anything touches the filesystem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentHash {
	pub digest: String,
	pub algorithm: String,
	pub computed_at: DateTime<Utc>,
	pub byte_length: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationResult {
	pub is_valid: bool,
	pub expected_hash: String,
	pub actual_hash: String,
	pub verified_at: DateTime<Utc>,
}

/// Hash the exact bytes handed over by the camera or microphone.
pub fn hash_bytes(bytes: &[u8]) -> ContentHash {
	ContentHash {
		digest: hex::encode(Sha256::digest(bytes)),
		algorithm: ALGORITHM.to_string(),
		computed_at: Utc::now(),
		byte_length: bytes.len() as u64,
	}
}

/// Hash a file in 256KB chunks.
pub fn hash_file(path: &Path) -> Result<String, HashError> {
	let mut file = fs::File::open(path).map_err(|e| map_io_error(e, path))?;
	let mut hasher = Sha256::new();
	let mut buf = vec![0u8; CHUNK_SIZE];

	loop {
		let n = file.read(&mut buf).map_err(|e| map_io_error(e, path))?;
		if n == 0 {
			break;
		}
		hasher.update(&buf[..n]);
	}

	Ok(hex::encode(hasher.finalize()))
}

/// Same as `hash_file`, off the async executor.
pub async fn hash_file_async(path: &Path) -> Result<String, HashError> {
	let path = path.to_path_buf();
	tokio::task::spawn_blocking(move || hash_file(&path))
		.await
		.map_err(|e| HashError::IoError(format!("task join error: {e}")))?
}

/// Digests compare case-insensitively.
pub fn hashes_match(a: &str, b: &str) -> bool {
	a.eq_ignore_ascii_case(b)
}

pub fn is_valid_digest(s: &str) -> bool {
	s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Re-hash a file and compare against what was recorded.
pub async fn verify_file(path: &Path, expected: &str) -> Result<VerificationResult, HashError> {
	let actual = hash_file_async(path).await?;
	Ok(VerificationResult {
		is_valid: hashes_match(&actual, expected),
		expected_hash: expected.to_string(),
		actual_hash: actual,
		verified_at: Utc::now(),
	})
}

fn map_io_error(err: io::Error, path: &Path) -> HashError {
	let path = path.display().to_string();
	match err.kind() {
		io::ErrorKind::NotFound => HashError::NotFound(path),
		io::ErrorKind::PermissionDenied => HashError::PermissionDenied(path),
		_ => HashError::IoError(format!("{path}: {err}")),
	}
}
