use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NetworkKind {
	Wifi,
	Cellular,
	Offline,
}

impl NetworkKind {
	pub fn is_connected(self) -> bool {
		self != NetworkKind::Offline
	}

	pub fn is_unmetered(self) -> bool {
		self == NetworkKind::Wifi
	}

	pub fn as_str(self) -> &'static str {
		match self {
			NetworkKind::Wifi => "wifi",
			NetworkKind::Cellular => "cellular",
			NetworkKind::Offline => "offline",
		}
	}
}

/// Reports what kind of connection the device has right now.
pub trait NetworkMonitor: Send + Sync {
	fn current(&self) -> NetworkKind;
}

/// A monitor whose state is set by hand. Used by the CLI flag and by tests.
pub struct StaticNetwork {
	tx: watch::Sender<NetworkKind>,
}

impl StaticNetwork {
	pub fn new(kind: NetworkKind) -> Self {
		let (tx, _) = watch::channel(kind);
		Self { tx }
	}

	pub fn set(&self, kind: NetworkKind) {
		self.tx.send_replace(kind);
	}

	pub fn subscribe(&self) -> watch::Receiver<NetworkKind> {
		self.tx.subscribe()
	}
}

impl NetworkMonitor for StaticNetwork {
	fn current(&self) -> NetworkKind {
		*self.tx.borrow()
	}
}
