use std::sync::Arc;
use std::time::Duration;

use siteproof_core::config::SyncConfig;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::engine::{FetchOutcome, SyncEngine};

/// Triggers sync runs from timers and platform background callbacks.
#[derive(Clone)]
pub struct BackgroundSync {
	engine: Arc<SyncEngine>,
	config: SyncConfig,
}

impl BackgroundSync {
	pub fn new(engine: Arc<SyncEngine>, config: SyncConfig) -> Self {
		Self { engine, config }
	}

	/// Entry point for a platform background-fetch callback.
	pub async fn on_background_fetch(&self) -> FetchOutcome {
		let report = self.engine.run_pending_sync().await;
		let outcome = report.outcome();
		if outcome == FetchOutcome::Failed {
			error!(error = report.last_error.as_deref().unwrap_or("unknown"), "background sync failed");
		}
		outcome
	}

	/// How often the platform should wake us. Never below its minimum.
	pub fn background_interval(&self) -> Duration {
		self.config.background_interval()
	}

	pub fn foreground_interval(&self) -> Duration {
		Duration::from_secs(self.config.foreground_interval_secs.max(1))
	}

	/// Run a sync on every tick until the task is aborted. The first tick
	/// fires immediately; ticks missed during a long run are skipped.
	pub fn spawn_periodic(&self, period: Duration) -> JoinHandle<()> {
		let this = self.clone();
		tokio::spawn(async move {
			let mut ticker = time::interval(period);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
			info!(period_secs = period.as_secs(), "periodic sync started");

			loop {
				ticker.tick().await;
				let outcome = this.on_background_fetch().await;
				debug!(outcome = outcome.as_str(), "periodic sync tick");
			}
		})
	}
}
