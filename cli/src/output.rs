use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use siteproof_core::models::{CustodyEvent, EvidenceItem, EvidenceSyncStatus, RecordSyncStatus, SyncPhase};
use siteproof_core::progress::CaptureStage;
use siteproof_core::{ProgressBus, ProgressEvent};
use siteproof_daemon::{SkipReason, SyncRunReport};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

pub fn kv(label: &str, value: impl std::fmt::Display) {
	println!("  {:<16} {}", style(label).dim(), value);
}

pub fn heading(text: &str) {
	println!("{}", style(text).bold());
}

pub fn ok(text: impl std::fmt::Display) {
	println!("{} {}", style("✓").green().bold(), text);
}

pub fn bad(text: impl std::fmt::Display) {
	println!("{} {}", style("✗").red().bold(), text);
}

pub fn evidence_status(status: EvidenceSyncStatus) -> String {
	let s = style(format!("{status:?}").to_lowercase());
	match status {
		EvidenceSyncStatus::Synced => s.green().to_string(),
		EvidenceSyncStatus::Error => s.red().to_string(),
		EvidenceSyncStatus::Uploaded | EvidenceSyncStatus::Processing => s.cyan().to_string(),
		EvidenceSyncStatus::Captured => s.yellow().to_string(),
	}
}

pub fn record_status(status: RecordSyncStatus) -> String {
	let s = style(format!("{status:?}").to_lowercase());
	match status {
		RecordSyncStatus::Synced => s.green().to_string(),
		RecordSyncStatus::Pending => s.yellow().to_string(),
		RecordSyncStatus::Conflict => s.magenta().to_string(),
		RecordSyncStatus::Error => s.red().to_string(),
	}
}

pub fn evidence_line(item: &EvidenceItem) {
	println!(
		"{}  {:<10} {:>10}  {}  {}",
		style(&item.id).cyan(),
		item.entity_type().as_str(),
		format_bytes(item.byte_length.max(0) as u64),
		evidence_status(item.sync_status),
		item.caption.as_deref().or(item.tag.as_deref()).unwrap_or(""),
	);
}

pub fn evidence_detail(item: &EvidenceItem) {
	heading(&format!("{} {}", item.entity_type().as_str(), item.id));
	kv("report", &item.report_id);
	kv("captured", item.captured_at.to_rfc3339());
	kv("sha256", &item.original_hash);
	kv("size", format_bytes(item.byte_length.max(0) as u64));
	kv("original", &item.original_filename);
	if let Some(fix) = item.gps() {
		kv("location", format!("{:.6}, {:.6}", fix.latitude, fix.longitude));
	}
	if !item.gps_track.is_empty() {
		kv("track points", item.gps_track.len());
	}
	if let Some(t) = &item.evidence_type {
		kv("type", t);
	}
	if let Some(t) = &item.tag {
		kv("tag", t);
	}
	if let Some(c) = &item.caption {
		kv("caption", c);
	}
	kv("sync", evidence_status(item.sync_status));
	match item.integrity_verified {
		Some(true) => kv("integrity", style("verified").green()),
		Some(false) => kv("integrity", style("MISMATCH").red().bold()),
		None => kv("integrity", style("not checked").dim()),
	}
}

pub fn custody_line(event: &CustodyEvent) {
	println!(
		"{:>5}  {}  {:<20} {:<12} {}  {}",
		event.seq,
		event.timestamp.format("%Y-%m-%d %H:%M:%S"),
		style(event.action.as_str()).bold(),
		event.entity_type.as_str(),
		event.entity_id,
		style(&event.user_name).dim(),
	);
}

pub fn run_report(report: &SyncRunReport) {
	if let Some(reason) = report.skipped {
		let why = match reason {
			SkipReason::Offline => "offline",
			SkipReason::ServerUnreachable => "server unreachable",
		};
		println!("{} sync skipped: {why}", style("•").yellow());
		return;
	}

	let counts = [
		("reports", report.reports_synced),
		("downloaded", report.reports_downloaded),
		("photos", report.photos_synced),
		("videos", report.videos_synced),
		("voice notes", report.voice_notes_synced),
		("records", report.records_synced),
		("deleted", report.deleted),
		("deferred", report.deferred),
	];
	let mut any = false;
	for (label, n) in counts {
		if n > 0 {
			kv(label, n);
			any = true;
		}
	}
	if !any && report.errors == 0 {
		ok("everything up to date");
	}
	if report.errors > 0 {
		bad(format!(
			"{} failed: {}",
			report.errors,
			report.last_error.as_deref().unwrap_or("see log")
		));
	}
	for id in &report.integrity_failures {
		bad(format!("integrity mismatch on {id}"));
	}
	if !report.conflicts.is_empty() {
		println!(
			"{} {} conflict(s) need a decision: siteproof conflicts list",
			style("!").magenta().bold(),
			report.conflicts.len()
		);
	}
}

pub fn phase_label(phase: SyncPhase) -> &'static str {
	match phase {
		SyncPhase::Idle => "idle",
		SyncPhase::CheckingConnectivity => "checking connectivity",
		SyncPhase::CheckingServerHealth => "contacting server",
		SyncPhase::Draining => "sending changes",
		SyncPhase::Uploading => "uploading",
		SyncPhase::Downloading => "fetching changes",
		SyncPhase::Reconciling => "reconciling",
	}
}

fn stage_label(stage: CaptureStage) -> &'static str {
	match stage {
		CaptureStage::Hashing => "hashing",
		CaptureStage::Storing => "storing original",
		CaptureStage::Processing => "preparing working copy",
		CaptureStage::Thumbnail => "thumbnail",
		CaptureStage::Complete => "done",
	}
}

pub fn spinner(message: &'static str) -> ProgressBar {
	let bar = ProgressBar::new_spinner();
	bar.set_message(message);
	bar.enable_steady_tick(Duration::from_millis(100));
	bar
}

/// Drive `bar` from the progress bus until the returned task is aborted.
pub fn follow(bus: &ProgressBus, bar: ProgressBar) -> JoinHandle<()> {
	let mut rx = bus.subscribe();
	tokio::spawn(async move {
		let bytes_style = ProgressStyle::with_template("{spinner} {msg} [{bar:30}] {bytes}/{total_bytes}")
			.map(|s| s.progress_chars("=> "))
			.unwrap_or_else(|_| ProgressStyle::default_bar());
		loop {
			match rx.recv().await {
				Ok(ProgressEvent::Capture { stage, .. }) => bar.set_message(stage_label(stage)),
				Ok(ProgressEvent::Upload {
					evidence_id,
					bytes_sent,
					total_bytes,
				}) => {
					bar.set_style(bytes_style.clone());
					bar.set_length(total_bytes);
					bar.set_position(bytes_sent);
					bar.set_message(format!("uploading {evidence_id}"));
				}
				Ok(ProgressEvent::EntrySynced { entity_type, entity_id }) => {
					bar.println(format!("  {} {} {}", style("↑").green(), entity_type, entity_id));
				}
				Err(RecvError::Lagged(_)) => continue,
				Err(RecvError::Closed) => break,
			}
		}
	})
}

pub fn format_bytes(bytes: u64) -> String {
	const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
	let mut value = bytes as f64;
	let mut unit = 0;
	while value >= 1024.0 && unit < UNITS.len() - 1 {
		value /= 1024.0;
		unit += 1;
	}
	if unit == 0 {
		format!("{bytes} B")
	} else {
		format!("{value:.1} {}", UNITS[unit])
	}
}
