//! Talking to the evidence server.
//!
//! `SyncTransport` is the seam the engine drives; `HttpTransport` speaks the
//! HTTP + TUS protocol over reqwest. Tests substitute an in-memory server.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use reqwest::{header, StatusCode, Url};
use serde::{Deserialize, Serialize};
use siteproof_core::config::ServerConfig;
use siteproof_core::models::{EntityType, EvidenceItem, Report};
use thiserror::Error;
use tracing::debug;

const TUS_VERSION: &str = "1.0.0";

#[derive(Debug, Error)]
pub enum TransportError {
	#[error("request timed out")]
	Timeout,

	#[error("connection failed: {0}")]
	Connection(String),

	#[error("server returned {status}: {message}")]
	Status { status: u16, message: String },

	#[error("invalid response: {0}")]
	InvalidResponse(String),

	#[error("invalid server url: {0}")]
	InvalidUrl(String),
}

impl TransportError {
	/// Transient failures worth another attempt.
	pub fn is_retryable(&self) -> bool {
		match self {
			TransportError::Timeout | TransportError::Connection(_) => true,
			TransportError::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
			TransportError::InvalidResponse(_) | TransportError::InvalidUrl(_) => false,
		}
	}

	/// The server no longer knows the resource (expired upload, deleted record).
	pub fn is_gone(&self) -> bool {
		matches!(self, TransportError::Status { status: 404 | 410, .. })
	}
}

impl From<reqwest::Error> for TransportError {
	fn from(e: reqwest::Error) -> Self {
		if e.is_timeout() {
			TransportError::Timeout
		} else if e.is_decode() {
			TransportError::InvalidResponse(e.to_string())
		} else if let Some(status) = e.status() {
			TransportError::Status {
				status: status.as_u16(),
				message: e.to_string(),
			}
		} else {
			TransportError::Connection(e.to_string())
		}
	}
}

/// Body of `PUT /reports/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportPush {
	pub report: Report,
	pub base_server_updated_at: Option<DateTime<Utc>>,
	pub force: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
	Accepted { server_updated_at: DateTime<Utc> },
	Conflict { server_updated_at: DateTime<Utc>, server_report: Report },
}

#[derive(Debug, Deserialize)]
struct AcceptedBody {
	server_updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ConflictBody {
	server_updated_at: DateTime<Utc>,
	report: Report,
}

#[derive(Debug, Deserialize)]
struct FileBody {
	url: String,
}

/// Reports changed on the server since a cursor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RemoteChanges {
	pub reports: Vec<Report>,
	pub cursor: Option<String>,
}

/// Metadata announced when a resumable upload is created.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadMetadata {
	pub filename: String,
	pub sha256: String,
	pub report_id: String,
	pub evidence_id: String,
}

impl UploadMetadata {
	pub fn for_item(item: &EvidenceItem) -> Self {
		Self {
			filename: item.original_filename.clone(),
			sha256: item.original_hash.clone(),
			report_id: item.report_id.clone(),
			evidence_id: item.id.clone(),
		}
	}

	/// `Upload-Metadata` header: comma-separated `key base64(value)` pairs.
	pub fn header_value(&self) -> String {
		let b64 = |v: &str| base64::engine::general_purpose::STANDARD.encode(v.as_bytes());
		format!(
			"filename {},sha256 {},reportId {},evidenceId {}",
			b64(&self.filename),
			b64(&self.sha256),
			b64(&self.report_id),
			b64(&self.evidence_id),
		)
	}
}

#[async_trait]
pub trait SyncTransport: Send + Sync {
	async fn health(&self) -> Result<(), TransportError>;
	async fn push_report(&self, push: &ReportPush) -> Result<PushOutcome, TransportError>;
	async fn put_record(&self, entity_type: EntityType, id: &str, body: &serde_json::Value) -> Result<(), TransportError>;
	/// Already-deleted records count as success.
	async fn delete_record(&self, entity_type: EntityType, id: &str) -> Result<(), TransportError>;
	async fn put_evidence_metadata(&self, item: &EvidenceItem) -> Result<(), TransportError>;
	/// Single-request upload of a whole file. Returns the stored file's URL.
	async fn upload_file(&self, item: &EvidenceItem, bytes: Vec<u8>) -> Result<String, TransportError>;
	/// Start a resumable upload. Returns its location.
	async fn create_upload(&self, metadata: &UploadMetadata, total_bytes: u64) -> Result<String, TransportError>;
	/// Bytes the server already holds for an upload.
	async fn upload_offset(&self, location: &str) -> Result<u64, TransportError>;
	/// Send one chunk at `offset`. Returns the server's new offset.
	async fn patch_upload(&self, location: &str, offset: u64, chunk: Vec<u8>) -> Result<u64, TransportError>;
	async fn fetch_changes(&self, since: Option<&str>) -> Result<RemoteChanges, TransportError>;
}

pub struct HttpTransport {
	client: reqwest::Client,
	base: Url,
	auth_token: Option<String>,
}

impl HttpTransport {
	pub fn new(config: &ServerConfig) -> Result<Self, TransportError> {
		// Trailing slash so relative joins keep the base path.
		let mut base = config.base_url.trim_end_matches('/').to_string();
		base.push('/');
		let base = Url::parse(&base).map_err(|e| TransportError::InvalidUrl(format!("{}: {e}", config.base_url)))?;

		let client = reqwest::Client::builder()
			.timeout(Duration::from_secs(config.request_timeout_secs))
			.build()
			.map_err(|e| TransportError::Connection(e.to_string()))?;

		Ok(Self {
			client,
			base,
			auth_token: config.auth_token.clone(),
		})
	}

	fn url(&self, path: &str) -> Result<Url, TransportError> {
		self.base
			.join(path.trim_start_matches('/'))
			.map_err(|e| TransportError::InvalidUrl(format!("{path}: {e}")))
	}

	/// Upload locations may be absolute or relative to the server.
	fn resolve_location(&self, location: &str) -> Result<Url, TransportError> {
		Url::parse(location)
			.or_else(|_| self.base.join(location))
			.map_err(|e| TransportError::InvalidUrl(format!("{location}: {e}")))
	}

	fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
		let builder = self.client.request(method, url);
		match &self.auth_token {
			Some(token) => builder.bearer_auth(token),
			None => builder,
		}
	}

	fn tus(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
		self.request(method, url).header("Tus-Resumable", TUS_VERSION)
	}
}

async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
	let status = response.status();
	if status.is_success() {
		return Ok(response);
	}
	let message = response.text().await.unwrap_or_default();
	Err(TransportError::Status {
		status: status.as_u16(),
		message,
	})
}

fn offset_header(response: &reqwest::Response) -> Result<u64, TransportError> {
	response
		.headers()
		.get("Upload-Offset")
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.parse::<u64>().ok())
		.ok_or_else(|| TransportError::InvalidResponse("missing Upload-Offset".into()))
}

#[async_trait]
impl SyncTransport for HttpTransport {
	async fn health(&self) -> Result<(), TransportError> {
		let response = self.request(reqwest::Method::GET, self.url("health")?).send().await?;
		expect_success(response).await?;
		Ok(())
	}

	async fn push_report(&self, push: &ReportPush) -> Result<PushOutcome, TransportError> {
		let url = self.url(&format!("reports/{}", push.report.id))?;
		let response = self.request(reqwest::Method::PUT, url).json(push).send().await?;

		if response.status() == StatusCode::CONFLICT {
			let body: ConflictBody = response.json().await?;
			return Ok(PushOutcome::Conflict {
				server_updated_at: body.server_updated_at,
				server_report: body.report,
			});
		}
		let body: AcceptedBody = expect_success(response).await?.json().await?;
		Ok(PushOutcome::Accepted {
			server_updated_at: body.server_updated_at,
		})
	}

	async fn put_record(&self, entity_type: EntityType, id: &str, body: &serde_json::Value) -> Result<(), TransportError> {
		let url = self.url(&format!("records/{}/{id}", entity_type.as_str()))?;
		let response = self.request(reqwest::Method::PUT, url).json(body).send().await?;
		expect_success(response).await?;
		Ok(())
	}

	async fn delete_record(&self, entity_type: EntityType, id: &str) -> Result<(), TransportError> {
		let url = self.url(&format!("records/{}/{id}", entity_type.as_str()))?;
		let response = self.request(reqwest::Method::DELETE, url).send().await?;
		if response.status() == StatusCode::NOT_FOUND {
			debug!(entity_type = %entity_type, id, "record already gone on server");
			return Ok(());
		}
		expect_success(response).await?;
		Ok(())
	}

	async fn put_evidence_metadata(&self, item: &EvidenceItem) -> Result<(), TransportError> {
		let url = self.url(&format!("evidence/{}/metadata", item.id))?;
		let response = self.request(reqwest::Method::PUT, url).json(item).send().await?;
		expect_success(response).await?;
		Ok(())
	}

	async fn upload_file(&self, item: &EvidenceItem, bytes: Vec<u8>) -> Result<String, TransportError> {
		let url = self.url(&format!("evidence/{}/file", item.id))?;
		let response = self
			.request(reqwest::Method::POST, url)
			.header(header::CONTENT_TYPE, "application/octet-stream")
			.header("X-Evidence-Hash", &item.original_hash)
			.header("X-Report-Id", &item.report_id)
			.header("X-Filename", &item.original_filename)
			.body(bytes)
			.send()
			.await?;
		let body: FileBody = expect_success(response).await?.json().await?;
		Ok(body.url)
	}

	async fn create_upload(&self, metadata: &UploadMetadata, total_bytes: u64) -> Result<String, TransportError> {
		let response = self
			.tus(reqwest::Method::POST, self.url("uploads")?)
			.header("Upload-Length", total_bytes.to_string())
			.header("Upload-Metadata", metadata.header_value())
			.header(header::CONTENT_LENGTH, "0")
			.send()
			.await?;
		let response = expect_success(response).await?;
		let location = response
			.headers()
			.get(header::LOCATION)
			.and_then(|v| v.to_str().ok())
			.ok_or_else(|| TransportError::InvalidResponse("upload created without Location".into()))?;
		Ok(self.resolve_location(location)?.to_string())
	}

	async fn upload_offset(&self, location: &str) -> Result<u64, TransportError> {
		let url = self.resolve_location(location)?;
		let response = self.tus(reqwest::Method::HEAD, url).send().await?;
		let response = expect_success(response).await?;
		offset_header(&response)
	}

	async fn patch_upload(&self, location: &str, offset: u64, chunk: Vec<u8>) -> Result<u64, TransportError> {
		let url = self.resolve_location(location)?;
		let response = self
			.tus(reqwest::Method::PATCH, url)
			.header(header::CONTENT_TYPE, "application/offset+octet-stream")
			.header("Upload-Offset", offset.to_string())
			.body(chunk)
			.send()
			.await?;
		let response = expect_success(response).await?;
		offset_header(&response)
	}

	async fn fetch_changes(&self, since: Option<&str>) -> Result<RemoteChanges, TransportError> {
		let mut url = self.url("reports/changes")?;
		if let Some(cursor) = since {
			url.query_pairs_mut().append_pair("since", cursor);
		}
		let response = self.request(reqwest::Method::GET, url).send().await?;
		Ok(expect_success(response).await?.json().await?)
	}
}
