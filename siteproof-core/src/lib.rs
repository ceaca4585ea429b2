//! Evidence integrity core: hashing, immutable storage, chain of custody and
//! the local record store the sync engine drains.

pub mod capture;
pub mod config;
pub mod custody;
pub mod db;
pub mod hashing;
pub mod json_blob;
pub mod models;
pub mod progress;
pub mod recording;
pub mod storage;
pub mod store;

pub use capture::{CaptureError, CaptureRequest, EvidenceVault, GeoTagger};
pub use config::Config;
pub use custody::{ChainVerification, CustodyLog};
pub use progress::{ProgressBus, ProgressEvent};
pub use storage::EvidenceStorage;
pub use store::{LocalStore, NoopStore, StoreError, SurrealStore};
