use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use tradegate::config::Config;
use tradegate::fetch::HttpFetcher;
use tradegate::lifecycle::Coordinator;
use tradegate::queue::{MutationKind, SqliteQueue, SyncQueue};
use tradegate::store::{BucketSet, CacheStore, SqliteStore};

#[derive(Parser, Debug)]
#[command(name = "tradegate")]
#[command(about = "Offline-first caching gateway for field-service web clients")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tradegate/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-warm the shell cache from the manifest (install step)
  Warm,
  /// Delete cache buckets left over from older versions (activate step)
  Gc,
  /// Replay deferred mutations to their endpoints
  Sync {
    /// Only this sync tag (e.g. background-sync-jobs)
    #[arg(long)]
    tag: Option<String>,
  },
  /// Show buckets, entry counts, and queued mutations
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _guard = init_tracing()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  match args.command {
    Command::Warm => warm(&config).await,
    Command::Gc => gc(&config),
    Command::Sync { tag } => sync(&config, tag.as_deref()).await,
    Command::Status => status(&config),
  }
}

/// Log to a daily-rotated file under the data directory; the terminal stays
/// reserved for command output.
fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = Config::data_dir()?.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let file_appender = tracing_appender::rolling::daily(&log_dir, "tradegate.log");
  let (writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

async fn warm(config: &Config) -> Result<()> {
  let store = Arc::new(SqliteStore::open()?);
  let fetcher = HttpFetcher::new()?;
  let mut coordinator = Coordinator::new(store, config.version);

  let manifest = config
    .shell_manifest
    .iter()
    .map(|path| config.resolve(path))
    .collect::<Result<Vec<_>>>()?;

  coordinator
    .install(&manifest, |url| {
      let fetcher = fetcher.clone();
      async move { fetcher.get(&url).await }
    })
    .await?;

  println!(
    "Warmed {} shell URLs into {}",
    manifest.len(),
    coordinator.buckets().app
  );
  Ok(())
}

fn gc(config: &Config) -> Result<()> {
  let store = Arc::new(SqliteStore::open()?);
  let mut coordinator = Coordinator::new(store.clone(), config.version);

  coordinator.activate()?;

  println!("Buckets after activation:");
  for bucket in store.list_buckets()? {
    println!("  {} - {} entries", bucket, store.entry_count(&bucket)?);
  }
  Ok(())
}

async fn sync(config: &Config, tag: Option<&str>) -> Result<()> {
  let queue = SyncQueue::new(SqliteQueue::open()?);
  let fetcher = HttpFetcher::new()?;

  let kinds = match tag {
    Some(tag) => {
      vec![MutationKind::from_sync_tag(tag).ok_or_else(|| eyre!("Unknown sync tag: {}", tag))?]
    }
    None => vec![MutationKind::Job, MutationKind::Tracking],
  };

  for kind in kinds {
    let endpoint = match kind {
      MutationKind::Job => config.resolve(&config.sync.jobs_endpoint)?,
      MutationKind::Tracking => config.resolve(&config.sync.tracking_endpoint)?,
    };

    let outcome = queue
      .flush(kind, |mutation| {
        let fetcher = fetcher.clone();
        let endpoint = endpoint.clone();
        async move {
          let request = mutation.to_request(&endpoint)?;
          fetcher.send(&request).await
        }
      })
      .await;

    println!(
      "{}: {} delivered, {} still queued",
      kind.sync_tag(),
      outcome.delivered,
      outcome.remaining
    );
  }
  Ok(())
}

fn status(config: &Config) -> Result<()> {
  let store = SqliteStore::open()?;
  let queue = SyncQueue::new(SqliteQueue::open()?);
  let current = BucketSet::current(config.version);

  println!("Cache version: {}", config.version);

  let buckets = store.list_buckets()?;
  if buckets.is_empty() {
    println!("No cache buckets yet");
  } else {
    for bucket in buckets {
      let marker = if current.contains(&bucket) { "" } else { " (stale)" };
      println!("  {} - {} entries{}", bucket, store.entry_count(&bucket)?, marker);
    }
  }

  for kind in [MutationKind::Job, MutationKind::Tracking] {
    println!("  {}: {} queued", kind.sync_tag(), queue.pending(kind)?.len());
  }
  Ok(())
}
