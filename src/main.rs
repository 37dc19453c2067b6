use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use tasksync::config::Config;
use tasksync::engine::SyncEngine;
use tasksync::store::EntityStore;

#[derive(Parser, Debug)]
#[command(name = "tasksync")]
#[command(about = "Offline-first sync engine for a task-management client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tasksync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show queue depth and cached collection sizes
  Status,
  /// Refresh every collection and settings blob from the server
  Pull,
  /// Replay buffered writes now
  Replay,
  /// Keep running: probe connectivity and replay on reconnect
  Watch {
    /// Seconds between connectivity probes
    #[arg(long, default_value_t = 30)]
    interval: u64,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  // Watch mode logs to a file under the data dir; one-shot commands
  // log to stderr.
  let _log_guard = init_tracing(&config, matches!(args.command, Command::Watch { .. }))?;

  let engine = SyncEngine::from_config(&config)?;

  match args.command {
    Command::Status => status(&engine)?,
    Command::Pull => {
      engine.connectivity().set_online(true);
      pull(&engine).await?;
    }
    Command::Replay => {
      engine.connectivity().set_online(true);
      engine.queue().process().await?;
      println!("{} write(s) still buffered", engine.queue().len()?);
    }
    Command::Watch { interval } => watch(engine, &config, interval).await?,
  }

  Ok(())
}

fn status(engine: &SyncEngine) -> Result<()> {
  println!("buffered writes: {}", engine.queue().len()?);
  for store in EntityStore::ALL {
    let count = engine.store().get_all(store)?.len();
    let validator = engine
      .store()
      .get_meta(&store.meta_key())?
      .and_then(|m| m.validator);
    match validator {
      Some(validator) => println!("{}: {} record(s), validator {}", store.as_str(), count, validator),
      None => println!("{}: {} record(s), no snapshot", store.as_str(), count),
    }
  }
  Ok(())
}

async fn pull(engine: &SyncEngine) -> Result<()> {
  let buckets = engine.tasks().list().await?;
  let task_count =
    buckets.unassigned.len() + buckets.by_group.values().map(Vec::len).sum::<usize>();
  println!("tasks: {}", task_count);
  println!("groups: {}", engine.groups().list().await?.len());
  println!("labels: {}", engine.labels().list().await?.len());
  println!("workspaces: {}", engine.workspaces().list().await?.len());
  println!("calendar accounts: {}", engine.calendar_accounts().list().await?.len());

  engine.settings().general().await?;
  engine.settings().notifications().await?;
  println!("settings refreshed");

  Ok(())
}

async fn watch(engine: SyncEngine, config: &Config, interval: u64) -> Result<()> {
  let _orchestrator = engine.start();

  let client = reqwest::Client::new();
  let url = config.server.url.clone();
  info!(url = %url, interval, "watching connectivity");

  loop {
    let reachable = client.head(&url).send().await.is_ok();
    engine.connectivity().set_online(reachable);
    tokio::time::sleep(Duration::from_secs(interval)).await;
  }
}

fn init_tracing(
  config: &Config,
  to_file: bool,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
  let filter = tracing_subscriber::EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

  if to_file {
    let dir = config
      .database_path()?
      .parent()
      .map(Path::to_path_buf)
      .unwrap_or_else(|| PathBuf::from("."));
    let appender = tracing_appender::rolling::never(dir, "tasksync.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(writer)
      .with_ansi(false)
      .init();

    Ok(Some(guard))
  } else {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();

    Ok(None)
  }
}
