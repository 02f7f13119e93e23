use std::{io, path::PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use sd_path_watcher::{
	FallbackWatcher, PathEvent, RecommendedBackend, Subscription, WatchMode, WatcherConfig,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
	Human,
	Json,
}

#[derive(Parser, Debug)]
#[command(name = "sd-pathwatch", about = "Print change events for the given paths")]
struct Cli {
	/// JSON watcher config, defaults apply to anything it leaves out
	#[arg(long)]
	config: Option<PathBuf>,

	/// How paths get watched: auto, watch or poll (overrides the config file)
	#[arg(long)]
	mode: Option<WatchMode>,

	/// Output format
	#[arg(long, value_enum, default_value = "human")]
	format: OutputFormat,

	/// Files or directories to watch
	#[arg(required = true)]
	paths: Vec<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.with_writer(io::stderr)
		.init();

	let cli = Cli::parse();

	let mut config = WatcherConfig::load_or_default(cli.config.as_deref())
		.context("failed to load watcher config")?;

	if let Some(mode) = cli.mode {
		config.mode = mode;
	}

	run(config, &cli).await
}

async fn run(config: WatcherConfig, cli: &Cli) -> Result<()> {
	let mut watcher = FallbackWatcher::<RecommendedBackend>::initialize(config)
		.context("failed to start path watcher")?;

	let mut subscriptions = Vec::with_capacity(cli.paths.len());

	for path in &cli.paths {
		match watcher.subscribe(path) {
			Ok(subscription) => subscriptions.push(subscription),
			Err(e) if e.is_recoverable() => {
				warn!(path = %path.display(), %e, "Skipping path, out of watch resources;");
			}
			Err(e) => {
				return Err(e).with_context(|| format!("failed to watch {}", path.display()))
			}
		}
	}

	info!(paths = subscriptions.len(), mode = %watcher.mode(), "Watching;");

	loop {
		// Watches only go away while dispatching, so this is checked between two dispatches
		if !watcher.is_pinned() {
			info!("Nothing left to watch;");
			break;
		}

		tokio::select! {
			alive = watcher.dispatch_next() => {
				if !alive {
					return Err(anyhow!("watch backend stopped"));
				}
			}

			res = tokio::signal::ctrl_c() => {
				res.context("failed to listen for ctrl-c")?;
				info!("Interrupted, shutting down;");
				break;
			}
		}

		print_pending(&mut subscriptions, cli.format)?;
	}

	watcher.close_all();

	Ok(())
}

fn print_pending(subscriptions: &mut [Subscription], format: OutputFormat) -> Result<()> {
	for subscription in subscriptions {
		while let Some(event) = subscription.try_recv() {
			print_event(&event, format)?;
		}
	}

	Ok(())
}

fn print_event(event: &PathEvent, format: OutputFormat) -> Result<()> {
	match format {
		OutputFormat::Human => println!("{:<7} {}", event.kind.to_string(), event.path.display()),
		OutputFormat::Json => println!("{}", serde_json::to_string(event)?),
	}

	Ok(())
}
