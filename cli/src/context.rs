use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use siteproof_core::models::Actor;
use siteproof_core::{
	Config, CustodyLog, EvidenceStorage, EvidenceVault, LocalStore, NoopStore, ProgressBus, SurrealStore,
};
use siteproof_daemon::{BackgroundSync, HttpTransport, NetworkKind, StaticNetwork, SyncEngine};
use tracing::{info, warn};

/// Services wired once per invocation and shared by every command.
pub struct Context {
	pub config: Config,
	pub store: Arc<dyn LocalStore>,
	pub vault: EvidenceVault,
	pub custody: CustodyLog,
	pub progress: ProgressBus,
	pub engine: Arc<SyncEngine>,
	pub background: BackgroundSync,
}

impl Context {
	pub async fn open(config: Config, network: NetworkKind) -> anyhow::Result<Self> {
		let storage = EvidenceStorage::new(&config.data_dir);
		storage.ensure_layout().await.context("creating evidence directories")?;
		let swept = storage
			.clean_temp(Duration::from_secs(config.storage.temp_max_age_secs))
			.await
			.context("cleaning temp files")?;
		if swept > 0 {
			info!(removed = swept, "stale temp files removed");
		}

		let store = open_store(&config).await?;

		let actor = Actor {
			user_id: config.identity.user_id.clone(),
			user_name: config.identity.user_name.clone(),
			device_id: store.device_id().to_string(),
		};
		let custody = CustodyLog::new(store.clone(), actor);
		let progress = ProgressBus::new();
		let vault = EvidenceVault::new(store.clone(), storage.clone(), custody.clone(), progress.clone());

		let transport = HttpTransport::new(&config.server).context("configuring server transport")?;
		let engine = Arc::new(SyncEngine::new(
			store.clone(),
			storage,
			custody.clone(),
			Arc::new(transport),
			Arc::new(StaticNetwork::new(network)),
			progress.clone(),
			&config,
		));
		let background = BackgroundSync::new(engine.clone(), config.sync.clone());

		Ok(Self {
			config,
			store,
			vault,
			custody,
			progress,
			engine,
			background,
		})
	}
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn LocalStore>> {
	if !config.storage.persistent {
		warn!("persistence disabled, records will not be kept");
		return Ok(Arc::new(NoopStore::new()));
	}
	let db_path = config.database_path();
	let store = SurrealStore::open(&db_path)
		.await
		.with_context(|| format!("opening database at {}", db_path.display()))?;
	Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn persistence_switch_picks_the_store() {
		let tmp = tempfile::tempdir().unwrap();
		let mut config = Config::default();
		config.data_dir = tmp.path().to_path_buf();
		config.storage.persistent = false;

		let ctx = Context::open(config.clone(), NetworkKind::Offline).await.unwrap();
		assert!(ctx.store.list_reports().await.unwrap().is_empty());
		assert!(!config.database_path().exists());
		drop(ctx);

		config.storage.persistent = true;
		let ctx = Context::open(config.clone(), NetworkKind::Offline).await.unwrap();
		ctx.store.save_report(&siteproof_core::models::Report::new("Kept")).await.unwrap();
		assert_eq!(ctx.store.list_reports().await.unwrap().len(), 1);
		assert!(config.database_path().exists());
	}
}
