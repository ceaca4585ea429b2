use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _, Result};
use clap::ValueEnum;
use console::style;
use siteproof_core::models::{
	Classification, ConflictChoice, DeviceInfo, EntityType, EvidenceKind, GpsFix, Report, SyncPhase,
};
use siteproof_core::{CaptureRequest, Config};
use siteproof_daemon::{FetchOutcome, NetworkKind};

use crate::context::Context;
use crate::output;

#[derive(Clone, Copy, ValueEnum)]
pub enum Kind {
	Photo,
	Video,
	VoiceNote,
}

impl From<Kind> for EvidenceKind {
	fn from(k: Kind) -> Self {
		match k {
			Kind::Photo => EvidenceKind::Photo,
			Kind::Video => EvidenceKind::Video,
			Kind::VoiceNote => EvidenceKind::VoiceNote,
		}
	}
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Choice {
	KeepLocal,
	KeepServer,
	Dismiss,
}

impl From<Choice> for ConflictChoice {
	fn from(c: Choice) -> Self {
		match c {
			Choice::KeepLocal => ConflictChoice::KeepLocal,
			Choice::KeepServer => ConflictChoice::KeepServer,
			Choice::Dismiss => ConflictChoice::Dismiss,
		}
	}
}

fn kind_for_extension(ext: &str) -> Option<EvidenceKind> {
	match ext {
		"jpg" | "jpeg" | "png" | "heic" | "heif" | "webp" => Some(EvidenceKind::Photo),
		"mp4" | "mov" | "m4v" => Some(EvidenceKind::Video),
		"m4a" | "aac" | "wav" | "mp3" => Some(EvidenceKind::VoiceNote),
		_ => None,
	}
}

pub async fn init(config: Config, config_path: Option<PathBuf>) -> Result<()> {
	let path = config_path.unwrap_or_else(|| config.data_dir.join("siteproof.toml"));
	if path.exists() {
		output::kv("config", format!("{} (kept)", path.display()));
	} else {
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
		}
		let text = toml::to_string_pretty(&config).context("serializing default config")?;
		std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
		output::kv("config", path.display());
	}

	let ctx = Context::open(config, NetworkKind::Offline).await?;
	output::kv("data", ctx.config.data_dir.display());
	output::kv("database", ctx.config.database_path().display());
	output::kv("device", ctx.store.device_id());
	output::ok("ready");
	Ok(())
}

pub async fn report_new(ctx: &Context, title: String, address: Option<String>) -> Result<()> {
	let mut report = Report::new(title);
	report.address = address;
	report.inspector = Some(ctx.config.identity.user_name.clone());
	ctx.store.save_report(&report).await?;
	output::ok(format!("report {} created", style(&report.id).cyan()));
	Ok(())
}

pub async fn report_list(ctx: &Context) -> Result<()> {
	let reports = ctx.store.list_reports().await?;
	if reports.is_empty() {
		println!("no reports yet");
		return Ok(());
	}
	for report in reports {
		let evidence = ctx.store.evidence_for_report(&report.id).await?.len();
		println!(
			"{}  {:<32} {:>3} items  {}",
			style(&report.id).cyan(),
			report.title,
			evidence,
			output::record_status(report.sync_status),
		);
	}
	Ok(())
}

pub async fn capture(
	ctx: &Context,
	report_id: String,
	file: PathBuf,
	kind: Option<Kind>,
	gps: Option<(f64, f64)>,
	caption: Option<String>,
	tag: Option<String>,
) -> Result<()> {
	let bytes = tokio::fs::read(&file)
		.await
		.with_context(|| format!("reading {}", file.display()))?;
	let extension = file
		.extension()
		.and_then(|e| e.to_str())
		.map(str::to_ascii_lowercase);
	let kind = kind
		.map(EvidenceKind::from)
		.or_else(|| extension.as_deref().and_then(kind_for_extension));

	let request = CaptureRequest {
		report_id,
		kind,
		bytes,
		extension,
		gps: gps.map(|(latitude, longitude)| GpsFix {
			latitude,
			longitude,
			altitude: None,
			accuracy: None,
		}),
		device: DeviceInfo {
			make: None,
			model: hostname::get().ok().and_then(|h| h.into_string().ok()),
		},
		classification: Classification {
			caption,
			tag,
			..Default::default()
		},
		..Default::default()
	};

	let bar = output::spinner("capturing");
	let follower = output::follow(&ctx.progress, bar.clone());
	let result = ctx.vault.capture(request).await;
	follower.abort();
	bar.finish_and_clear();

	let item = result?;
	output::ok(format!("captured {}", style(&item.id).cyan()));
	output::kv("sha256", &item.original_hash);
	Ok(())
}

pub async fn evidence_list(ctx: &Context, report: Option<String>) -> Result<()> {
	let items = match report {
		Some(id) => ctx.store.evidence_for_report(&id).await?,
		None => ctx.store.list_evidence().await?,
	};
	if items.is_empty() {
		println!("no evidence");
	}
	for item in &items {
		output::evidence_line(item);
	}
	Ok(())
}

pub async fn evidence_view(ctx: &Context, id: &str) -> Result<()> {
	let view = ctx.vault.view(id).await?;
	output::evidence_detail(&view.item);
	output::kv("file", view.path.display());
	Ok(())
}

pub async fn evidence_classify(ctx: &Context, id: &str, classification: Classification) -> Result<()> {
	let item = ctx.vault.classify(id, classification).await?;
	output::ok(format!("{} updated", item.id));
	Ok(())
}

pub async fn evidence_delete(ctx: &Context, id: &str) -> Result<()> {
	let item = ctx.vault.delete(id).await?;
	output::ok(format!("{} deleted", item.id));
	output::kv(
		"original kept",
		ctx.vault.storage().original_path(&item.original_filename).display(),
	);
	Ok(())
}

pub async fn evidence_export(ctx: &Context, id: &str, dest: &Path) -> Result<()> {
	let result = ctx.vault.export(id, dest).await?;
	output::kv("file", result.file.display());
	output::kv("manifest", result.manifest.display());
	if result.verification.is_valid {
		output::ok("export matches the capture hash");
		Ok(())
	} else {
		output::bad("exported file does not match the capture hash");
		bail!("integrity check failed for {id}")
	}
}

pub async fn evidence_verify(ctx: &Context, id: &str) -> Result<()> {
	let result = ctx.vault.verify_integrity(id).await?;
	output::kv("expected", &result.expected_hash);
	output::kv("actual", &result.actual_hash);
	if result.is_valid {
		output::ok("original is intact");
		Ok(())
	} else {
		output::bad("original does not match its capture hash");
		bail!("integrity check failed for {id}")
	}
}

pub async fn chain_show(ctx: &Context, id: Option<String>, recent: usize) -> Result<()> {
	let events = match id {
		Some(id) => {
			let entity_type = match ctx.store.get_evidence(&id).await? {
				Some(item) => item.entity_type(),
				None if ctx.store.get_report(&id).await?.is_some() => EntityType::Report,
				None => bail!("no evidence or report with id {id}"),
			};
			ctx.custody.chain_for(entity_type, &id).await?
		}
		None => ctx.custody.recent(recent).await?,
	};
	if events.is_empty() {
		println!("no custody events");
	}
	for event in &events {
		output::custody_line(event);
	}
	Ok(())
}

pub async fn chain_verify(ctx: &Context) -> Result<()> {
	let result = ctx.custody.verify_chain().await?;
	match &result.first_broken {
		None => {
			output::ok(format!("{} events, chain intact", result.events_checked));
			Ok(())
		}
		Some(broken) => {
			output::bad(format!(
				"chain broken at seq {} ({}): {}",
				broken.seq, broken.event_id, broken.reason
			));
			bail!("custody chain verification failed")
		}
	}
}

pub async fn sync(ctx: &Context, watch: bool) -> Result<()> {
	if !watch {
		let bar = output::spinner("syncing");
		let follower = output::follow(&ctx.progress, bar.clone());
		let report = ctx.engine.run_pending_sync().await;
		follower.abort();
		bar.finish_and_clear();

		output::run_report(&report);
		if report.outcome() == FetchOutcome::Failed {
			bail!("sync failed");
		}
		return Ok(());
	}

	let mut phase = ctx.engine.subscribe_phase();
	let interval = ctx.background.foreground_interval();
	let task = ctx.background.spawn_periodic(interval);
	println!(
		"syncing every {}s, {} to stop",
		interval.as_secs(),
		style("Ctrl-C").bold()
	);

	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => break,
			changed = phase.changed() => {
				if changed.is_err() {
					break;
				}
				let current = *phase.borrow_and_update();
				if current == SyncPhase::Idle {
					let state = ctx.store.sync_state().await?;
					println!(
						"{} {}  {}",
						style(chrono::Local::now().format("%H:%M:%S")).dim(),
						state.last_run_outcome.as_deref().unwrap_or("-"),
						state.last_error.as_deref().unwrap_or(""),
					);
				} else {
					tracing::debug!(phase = output::phase_label(current), "sync phase");
				}
			}
		}
	}
	task.abort();
	Ok(())
}

pub async fn conflicts_list(ctx: &Context) -> Result<()> {
	let conflicts = ctx.store.pending_conflicts().await?;
	if conflicts.is_empty() {
		output::ok("no conflicts");
		return Ok(());
	}
	for conflict in conflicts {
		let local = ctx.store.get_report(&conflict.report_id).await?;
		output::heading(&conflict.report_id);
		output::kv(
			"local",
			format!(
				"{} (edited {})",
				local.as_ref().map(|r| r.title.as_str()).unwrap_or("<deleted>"),
				conflict.client_updated_at.to_rfc3339()
			),
		);
		output::kv(
			"server",
			format!(
				"{} (edited {})",
				conflict.server_snapshot.as_ref().map(|r| r.title.as_str()).unwrap_or("?"),
				conflict.server_updated_at.to_rfc3339()
			),
		);
		if let Some(at) = conflict.dismissed_at {
			output::kv("dismissed", at.to_rfc3339());
		}
	}
	Ok(())
}

pub async fn conflicts_resolve(ctx: &Context, report_id: &str, choice: Choice) -> Result<()> {
	ctx.engine.resolve_conflict(report_id, choice.into()).await?;
	output::ok(format!("conflict on {report_id} resolved"));
	Ok(())
}

pub async fn status(ctx: &Context) -> Result<()> {
	let entries = ctx.store.pending_sync_entries().await?;
	let conflicts = ctx.store.pending_conflicts().await?;
	let state = ctx.store.sync_state().await?;

	output::heading("siteproof");
	output::kv("device", ctx.store.device_id());
	output::kv("server", &ctx.config.server.base_url);
	output::kv("custody events", ctx.custody.count().await?);
	output::kv("queued", entries.len());
	output::kv("conflicts", conflicts.len());
	output::kv(
		"last run",
		match (state.last_run_at, state.last_run_outcome.as_deref()) {
			(Some(at), Some(outcome)) => format!("{} ({outcome})", at.to_rfc3339()),
			_ => "never".to_string(),
		},
	);
	if let Some(at) = state.last_upload_at {
		output::kv("last upload", at.to_rfc3339());
	}
	if let Some(at) = state.last_download_at {
		output::kv("last download", at.to_rfc3339());
	}
	if let Some(error) = &state.last_error {
		output::kv("last error", style(error).red());
	}

	let stuck: Vec<_> = entries.iter().filter(|e| e.attempt_count > 0).collect();
	if !stuck.is_empty() {
		println!();
		output::heading("retrying");
		for entry in stuck {
			println!(
				"  {:<12} {}  {} attempts  {}",
				entry.entity_type.as_str(),
				entry.entity_id,
				entry.attempt_count,
				style(entry.last_error.as_deref().unwrap_or("")).dim(),
			);
		}
	}
	Ok(())
}
