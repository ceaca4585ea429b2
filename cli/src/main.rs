mod commands;
mod context;
mod output;

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use siteproof_core::Config;
use siteproof_daemon::NetworkKind;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "siteproof")]
#[command(about = "Tamper-evident evidence capture with offline-first sync")]
#[command(version)]
struct Cli {
	#[command(subcommand)]
	command: Commands,

	/// Config file (defaults to siteproof.toml in the data directory)
	#[arg(long, global = true)]
	config: Option<PathBuf>,

	/// Override the data directory
	#[arg(long, global = true)]
	data_dir: Option<PathBuf>,

	/// Connection to report to the sync engine
	#[arg(long, global = true, value_enum, default_value = "wifi")]
	network: Network,

	/// Verbose logging
	#[arg(short, long, global = true)]
	verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Network {
	Wifi,
	Cellular,
	Offline,
}

impl From<Network> for NetworkKind {
	fn from(n: Network) -> Self {
		match n {
			Network::Wifi => NetworkKind::Wifi,
			Network::Cellular => NetworkKind::Cellular,
			Network::Offline => NetworkKind::Offline,
		}
	}
}

#[derive(Subcommand)]
enum Commands {
	/// Create the data directory, config file and database
	Init,

	/// Manage inspection reports
	Report {
		#[command(subcommand)]
		command: ReportCommand,
	},

	/// Capture a file as evidence
	Capture {
		/// Report the evidence belongs to
		report_id: String,

		/// File handed over by the camera or recorder
		file: PathBuf,

		#[arg(long, value_enum)]
		kind: Option<commands::Kind>,

		#[arg(long, requires = "lon", allow_negative_numbers = true)]
		lat: Option<f64>,

		#[arg(long, requires = "lat", allow_negative_numbers = true)]
		lon: Option<f64>,

		#[arg(long)]
		caption: Option<String>,

		#[arg(long)]
		tag: Option<String>,
	},

	/// Work with captured evidence
	Evidence {
		#[command(subcommand)]
		command: EvidenceCommand,
	},

	/// Chain of custody
	Chain {
		#[command(subcommand)]
		command: ChainCommand,
	},

	/// Push local changes and pull remote ones
	Sync {
		/// Keep syncing on the foreground interval until interrupted
		#[arg(long)]
		watch: bool,
	},

	/// Reports changed both here and on the server
	Conflicts {
		#[command(subcommand)]
		command: ConflictCommand,
	},

	/// Queue, conflicts and last sync
	Status,
}

#[derive(Subcommand)]
enum ReportCommand {
	/// Start a new report
	New {
		title: String,

		#[arg(long)]
		address: Option<String>,
	},
	/// List reports
	List,
}

#[derive(Subcommand)]
enum EvidenceCommand {
	/// List evidence, optionally for one report
	List {
		#[arg(long)]
		report: Option<String>,
	},
	/// Show an item (logs VIEWED)
	View { id: String },
	/// Set type, tag, caption or links
	Classify {
		id: String,

		#[arg(long = "type")]
		evidence_type: Option<String>,

		#[arg(long)]
		tag: Option<String>,

		#[arg(long)]
		caption: Option<String>,

		#[arg(long)]
		defect: Option<String>,

		#[arg(long)]
		roof_element: Option<String>,
	},
	/// Delete the record and derivatives; the original is kept
	Delete { id: String },
	/// Copy the original and a custody manifest to a directory
	Export { id: String, dest: PathBuf },
	/// Re-hash the original against the capture hash
	Verify { id: String },
}

#[derive(Subcommand)]
enum ChainCommand {
	/// Custody events for one item, or the latest events overall
	Show {
		id: Option<String>,

		#[arg(long, default_value = "20")]
		recent: usize,
	},
	/// Check every link of the custody chain
	Verify,
}

#[derive(Subcommand)]
enum ConflictCommand {
	/// List pending conflicts
	List,
	/// Decide a conflict
	Resolve {
		report_id: String,

		#[arg(value_enum)]
		choice: commands::Choice,
	},
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
	let path = cli.config.clone().unwrap_or_else(|| match &cli.data_dir {
		Some(dir) => dir.join("siteproof.toml"),
		None => Config::default_config_path(),
	});
	let mut config = Config::load(&path).with_context(|| format!("loading {}", path.display()))?;
	if let Some(dir) = &cli.data_dir {
		config.data_dir = dir.clone();
	}
	Ok(config)
}

fn init_logging(config: &Config, verbose: bool) -> anyhow::Result<()> {
	let log_dir = config.log_dir();
	std::fs::create_dir_all(&log_dir).with_context(|| format!("creating {}", log_dir.display()))?;

	let default_level = if verbose { "debug" } else { "info" };
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
	let file_appender = tracing_appender::rolling::never(log_dir, "siteproof.log");
	tracing_subscriber::registry()
		.with(filter)
		.with(tracing_subscriber::fmt::layer().with_writer(file_appender).with_ansi(false))
		.init();
	Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	let config = load_config(&cli)?;
	init_logging(&config, cli.verbose)?;

	let network = NetworkKind::from(cli.network);
	let config_path = cli.config.clone();

	if let Commands::Init = cli.command {
		return commands::init(config, config_path).await;
	}

	let ctx = context::Context::open(config, network).await?;
	match cli.command {
		Commands::Init => Ok(()),
		Commands::Report { command } => match command {
			ReportCommand::New { title, address } => commands::report_new(&ctx, title, address).await,
			ReportCommand::List => commands::report_list(&ctx).await,
		},
		Commands::Capture {
			report_id,
			file,
			kind,
			lat,
			lon,
			caption,
			tag,
		} => {
			let gps = lat.zip(lon);
			commands::capture(&ctx, report_id, file, kind, gps, caption, tag).await
		}
		Commands::Evidence { command } => match command {
			EvidenceCommand::List { report } => commands::evidence_list(&ctx, report).await,
			EvidenceCommand::View { id } => commands::evidence_view(&ctx, &id).await,
			EvidenceCommand::Classify {
				id,
				evidence_type,
				tag,
				caption,
				defect,
				roof_element,
			} => {
				let classification = siteproof_core::models::Classification {
					evidence_type,
					tag,
					caption,
					defect_id: defect,
					roof_element_id: roof_element,
				};
				commands::evidence_classify(&ctx, &id, classification).await
			}
			EvidenceCommand::Delete { id } => commands::evidence_delete(&ctx, &id).await,
			EvidenceCommand::Export { id, dest } => commands::evidence_export(&ctx, &id, &dest).await,
			EvidenceCommand::Verify { id } => commands::evidence_verify(&ctx, &id).await,
		},
		Commands::Chain { command } => match command {
			ChainCommand::Show { id, recent } => commands::chain_show(&ctx, id, recent).await,
			ChainCommand::Verify => commands::chain_verify(&ctx).await,
		},
		Commands::Sync { watch } => commands::sync(&ctx, watch).await,
		Commands::Conflicts { command } => match command {
			ConflictCommand::List => commands::conflicts_list(&ctx).await,
			ConflictCommand::Resolve { report_id, choice } => commands::conflicts_resolve(&ctx, &report_id, choice).await,
		},
		Commands::Status => commands::status(&ctx).await,
	}
}
