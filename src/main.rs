//! colstore CLI - inspect and maintain an on-disk event log

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use colstore::event_store::{EventStoreStats, StatsCollector};
use colstore::{EventOp, EventStore, EventStoreConfig, StoreError, StoreResult};

#[derive(Parser)]
#[command(name = "colstore")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Data directory holding events.jsonl and snapshots/
    /// [default: $COLSTORE_DATA_DIR or ./data]
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the store and print its shape
    Replay {
        /// Ignore snapshots and replay the whole log
        #[arg(long)]
        full: bool,
    },

    /// Print rows as JSON lines
    Rows {
        /// Print at most this many rows
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Include the row id under `__row_id__`
        #[arg(long)]
        row_ids: bool,
    },

    /// Append one operation, given as JSON, to the log
    Record {
        /// e.g. '{"type":"rename_column","old_name":"a","new_name":"b"}'
        op: String,
    },

    /// Write the current store to a Parquet file
    #[cfg(feature = "arrow")]
    ExportParquet {
        #[arg(default_value = colstore::DEFAULT_PARQUET_PATH)]
        path: PathBuf,
    },

    /// Replace the store's rows with the contents of a Parquet file
    #[cfg(feature = "arrow")]
    ImportParquet {
        #[arg(default_value = colstore::DEFAULT_PARQUET_PATH)]
        path: PathBuf,
    },

    /// Write a snapshot of the current store
    Snapshot,

    /// Show log and snapshot statistics
    Stats {
        /// Also time this many full replays
        #[arg(long)]
        benchmark: Option<usize>,
    },
}

fn main() -> StoreResult<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = EventStoreConfig::from_env();
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    tracing::debug!(data_dir = %config.data_dir.display(), "Using data directory");

    match cli.command {
        Commands::Replay { full } => replay(config, full),
        Commands::Rows { limit, row_ids } => rows(config, limit, row_ids),
        Commands::Record { op } => record(config, &op),
        #[cfg(feature = "arrow")]
        Commands::ExportParquet { path } => export_parquet(config, path),
        #[cfg(feature = "arrow")]
        Commands::ImportParquet { path } => import_parquet(config, path),
        Commands::Snapshot => snapshot(config),
        Commands::Stats { benchmark } => stats(config, benchmark),
    }
}

fn replay(config: EventStoreConfig, full: bool) -> StoreResult<()> {
    let mut log = EventStore::with_config(config);
    let store = if full {
        log.replay_all()?
    } else {
        log.initialize()?
    };

    let (nrows, ncols) = store.shape();
    println!("version: {}", store.version());
    println!("shape:   {} rows x {} columns", nrows, ncols);
    println!("columns: {}", store.columns().join(", "));
    Ok(())
}

fn rows(config: EventStoreConfig, limit: Option<usize>, row_ids: bool) -> StoreResult<()> {
    let store = EventStore::with_config(config).initialize()?;
    let limit = limit.unwrap_or(usize::MAX);
    for row in store.to_rows(row_ids).iter().take(limit) {
        println!("{}", serde_json::to_string(row)?);
    }
    Ok(())
}

fn record(config: EventStoreConfig, op: &str) -> StoreResult<()> {
    let op: EventOp =
        serde_json::from_str(op).map_err(|e| StoreError::InvalidEvent(e.to_string()))?;
    let mut log = EventStore::with_config(config);
    let mut store = log.initialize()?;
    let event = log.record(&mut store, op)?;
    println!(
        "recorded {} as version {} ({} rows x {} columns)",
        event.event_type(),
        event.version,
        store.nrows(),
        store.ncols()
    );
    Ok(())
}

#[cfg(feature = "arrow")]
fn export_parquet(config: EventStoreConfig, path: PathBuf) -> StoreResult<()> {
    let store = EventStore::with_config(config).initialize()?;
    store.to_parquet(&path)?;
    tracing::info!(path = %path.display(), nrows = store.nrows(), "Exported Parquet");
    Ok(())
}

#[cfg(feature = "arrow")]
fn import_parquet(config: EventStoreConfig, path: PathBuf) -> StoreResult<()> {
    use colstore::events::{MetaUpdate, VibesSnapshot};
    use colstore::{ColumnStore, ValueMap};

    let imported = ColumnStore::from_parquet(&path)?;
    let mut log = EventStore::with_config(config);
    let mut store = log.initialize()?;

    let params = ValueMap::from([("path".to_string(), path.display().to_string().into())]);
    log.record(
        &mut store,
        VibesSnapshot {
            rows: imported.to_rows(false),
            operation: "import_parquet".to_string(),
            params,
        },
    )?;
    if !imported.meta().is_empty() {
        log.record(
            &mut store,
            MetaUpdate {
                updates: imported.meta().clone(),
            },
        )?;
    }

    tracing::info!(
        path = %path.display(),
        nrows = store.nrows(),
        version = store.version(),
        "Imported Parquet"
    );
    Ok(())
}

fn snapshot(config: EventStoreConfig) -> StoreResult<()> {
    let mut log = EventStore::with_config(config);
    let store = log.initialize()?;
    let meta = log.snapshot(&store)?;
    println!(
        "snapshot at version {} ({} rows x {} columns)",
        meta.version, meta.nrows, meta.ncols
    );
    Ok(())
}

fn stats(config: EventStoreConfig, benchmark: Option<usize>) -> StoreResult<()> {
    let collector = StatsCollector::new(config);
    let stats = collector.collect()?;

    println!("events:            {}", stats.event_count);
    if stats.corrupt_lines > 0 {
        println!("corrupt lines:     {}", stats.corrupt_lines);
    }
    println!("last version:      {}", stats.last_version);
    match stats.snapshot_version {
        Some(version) => println!("snapshot version:  {}", version),
        None => println!("snapshot version:  none"),
    }
    println!("since snapshot:    {}", stats.events_since_snapshot);
    println!(
        "log size:          {}",
        EventStoreStats::format_size(stats.log_size)
    );
    println!(
        "snapshot size:     {} (+{} backup)",
        EventStoreStats::format_size(stats.snapshot_size),
        EventStoreStats::format_size(stats.backup_size)
    );
    for (event_type, count) in &stats.events_by_type {
        println!("  {:<24} {}", event_type, count);
    }

    if let Some(iterations) = benchmark {
        let result = collector.benchmark_replay(iterations)?;
        println!(
            "replay: {} events in {} ms avg over {} runs ({:.0} events/s)",
            result.events_per_iteration,
            result.avg_duration_ms,
            result.iterations,
            result.events_per_second
        );
    }
    Ok(())
}
