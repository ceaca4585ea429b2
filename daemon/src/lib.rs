//! Sync side of SiteProof: server transport, resumable uploads, the sync
//! engine and the timers that drive it.

pub mod background;
pub mod engine;
pub mod network;
pub mod transport;
pub mod upload;

#[cfg(test)]
pub mod testing;

pub use background::BackgroundSync;
pub use engine::{FetchOutcome, SkipReason, SyncEngine, SyncError, SyncRunReport};
pub use network::{NetworkKind, NetworkMonitor, StaticNetwork};
pub use transport::{HttpTransport, SyncTransport, TransportError};
pub use upload::{ResumableUploader, UploadError};
