use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quadlog_core::{
    connect_or_restore, read_records, verify_log, FileQuadStore, LocalCommitLog, QuadLogConfig,
};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quadlog")]
#[command(about = "quadlog CLI - inspect, verify and restore quad store commit logs")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to $QUADLOG_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show log size, codec and layout
    Info,
    /// Print the records stored at a log position as JSON
    Show {
        /// Log position (1-based)
        position: u64,
    },
    /// Decode every log entry and report totals
    Verify,
    /// Open live storage, rebuilding it from the log if needed
    Restore {
        /// Discard existing live storage and rebuild it from the log
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info => show_info(&config),
        Commands::Show { position } => show_entry(&config, position),
        Commands::Verify => verify(&config),
        Commands::Restore { force } => restore_live_storage(&config, force),
    }
}

fn load_config(path: Option<&Path>) -> Result<QuadLogConfig> {
    match path {
        Some(path) => QuadLogConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => QuadLogConfig::from_env().context("Failed to load config from environment"),
    }
}

fn open_log(config: &QuadLogConfig) -> Result<LocalCommitLog> {
    LocalCommitLog::open(&config.log_dir, config.shard_layout())
        .with_context(|| format!("Failed to open commit log: {}", config.log_dir.display()))
}

fn show_info(config: &QuadLogConfig) -> Result<()> {
    let log = open_log(config)?;
    let layout = log.layout();

    println!("Commit log:     {}", config.log_dir.display());
    println!("Live storage:   {}", config.data_dir.display());
    println!("Codec:          {}", config.codec.as_str());
    let size = quadlog_core::CommitLog::size(&log);
    println!("Entries:        {}", size);
    if size > 0 {
        let shard = layout.shard(size);
        println!("Last entry:     {}", log.entry_path(size).display());
        println!("Last shard:     volume {}, chapter {}", shard.volume, shard.chapter);
    }
    println!(
        "Layout:         {} entries per chapter, {} chapters per volume",
        layout.chapter_capacity,
        layout.chapters_per_volume
    );
    println!("Max batch size: {}", config.coordinator_options().effective_batch_size());
    Ok(())
}

fn show_entry(config: &QuadLogConfig, position: u64) -> Result<()> {
    let log = open_log(config)?;
    let records = read_records(&log, config.codec, position)
        .with_context(|| format!("Failed to read log position {}", position))?;

    let json = serde_json::to_string_pretty(&records).context("Failed to render records")?;
    println!("{}", json);
    Ok(())
}

fn verify(config: &QuadLogConfig) -> Result<()> {
    let log = open_log(config)?;
    let summary = verify_log(&log, config.codec).context("Commit log verification failed")?;

    println!("✓ {} entries verified", summary.entries);
    println!("  records:       {}", summary.records);
    println!("  quads added:   {}", summary.quads_added);
    println!("  quads deleted: {}", summary.quads_deleted);
    if let (Some(first), Some(last)) = (summary.first_timestamp, summary.last_timestamp) {
        println!("  first commit:  {}", format_timestamp(first));
        println!("  last commit:   {}", format_timestamp(last));
    }
    Ok(())
}

fn restore_live_storage(config: &QuadLogConfig, force: bool) -> Result<()> {
    if force {
        let discarded = FileQuadStore::discard(&config.data_dir).with_context(|| {
            format!("Failed to discard live storage: {}", config.data_dir.display())
        })?;
        info!(discarded, "forcing rebuild of live storage");
    }

    let coordinator = connect_or_restore(config).context("Failed to open or restore live storage")?;
    println!(
        "✓ Live storage holds {} quads at log position {}",
        coordinator.snapshot().len(),
        coordinator.position()
    );
    Ok(())
}

fn format_timestamp(millis: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| millis.to_string())
}
