//! Atlas command-line tool
//!
//! Imports game folders into the catalog, lists and inspects records and
//! extracts LZ4-compressed archives.

use anyhow::{Context, Result, bail};
use atlas_config::AtlasConfig;
use atlas_library::{
    Database, FailurePolicy, ImportEvent, ImportOptions, ImportProcessor, ImportScanner,
    ImportState, Record, RecordId, ScanConfig, load_jobs,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use tracing::{info, warn};

/// Atlas game catalog tools.
#[derive(Parser)]
#[command(name = "atlas")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./data/config.toml)
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable debug output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import game folders below a source directory
    Import {
        /// Root the job paths are relative to
        source: PathBuf,

        /// Copy into the games directory and remove the originals
        #[arg(long = "move", conflicts_with = "in_place")]
        relocate: bool,

        /// Leave files where they are
        #[arg(long)]
        in_place: bool,

        /// TOML job list to import instead of scanning the source
        #[arg(long)]
        jobs: Option<PathBuf>,

        /// Abort the batch at the first failed job
        #[arg(long)]
        stop_on_failure: bool,
    },

    /// Show the jobs an import of a source directory would run
    Scan {
        source: PathBuf,
    },

    /// List catalog records
    List {
        /// Only records whose title or creator contains this text
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Show one record
    Show {
        id: u64,

        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decompress an LZ4 frame archive
    Extract {
        archive: PathBuf,
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AtlasConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AtlasConfig::load_default().context("Failed to load config")?,
    };

    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    setup_logging(level);

    match cli.command {
        Commands::Import {
            source,
            relocate,
            in_place,
            jobs,
            stop_on_failure,
        } => {
            let mut options = ImportOptions::from_config(&source, &config);
            if relocate {
                options.move_after_import = true;
            } else if in_place {
                options.move_after_import = false;
            }
            options.on_failure = if stop_on_failure {
                FailurePolicy::Abort
            } else {
                FailurePolicy::Continue
            };
            import(&config, options, jobs.as_deref())
        }
        Commands::Scan { source } => scan(&config, &source),
        Commands::List { query } => list(&config, query.as_deref()),
        Commands::Show { id, json } => show(&config, RecordId::new(id), json),
        Commands::Extract { archive, output } => extract(&archive, &output),
    }
}

/// Setup logging
fn setup_logging(default_level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_ansi(false))
        .init();
}

fn open_database(config: &AtlasConfig) -> Result<Database> {
    config
        .paths
        .ensure_dirs()
        .context("Failed to create data directories")?;
    Database::open(&config.paths.database).with_context(|| {
        format!(
            "Failed to open catalog at {}",
            config.paths.database.display()
        )
    })
}

fn import(
    config: &AtlasConfig,
    options: ImportOptions,
    job_file: Option<&Path>,
) -> Result<()> {
    let jobs = match job_file {
        Some(path) => load_jobs(path)
            .with_context(|| format!("Failed to read jobs from {}", path.display()))?,
        None => {
            ImportScanner::with_config(ScanConfig::from_importer(&config.importer))
                .scan(&options.source_root)
                .context("Failed to scan source")?
                .jobs
        }
    };
    if jobs.is_empty() {
        println!("Nothing to import in {}", options.source_root.display());
        return Ok(());
    }

    let db = Arc::new(open_database(config)?);
    let processor = ImportProcessor::new();
    let (tx, rx) = mpsc::channel::<ImportEvent>();
    let handle = processor
        .start(db, jobs, options, tx)
        .context("Failed to start import")?;

    // Ends once the worker drops its sender
    for event in rx {
        match event {
            ImportEvent::Processing {
                index,
                total,
                title,
            } => println!("[{}/{}] {}", index + 1, total, title),
            ImportEvent::Imported { id, .. } => println!("        imported as record {}", id),
            ImportEvent::Failed(failure) => println!("        failed: {}", failure.message),
            ImportEvent::Aborted { imported } => {
                println!("Aborted after {} imported", imported);
            }
            ImportEvent::Completed { imported, failed } => {
                println!("Done: {} imported, {} failed", imported, failed);
            }
            _ => {}
        }
    }

    let summary = handle.join().context("Import worker failed")?;
    if summary.state == ImportState::Aborted {
        bail!("Import aborted with {} failed jobs", summary.failures.len());
    }
    info!("Import finished with {} records", summary.completed.len());
    Ok(())
}

fn scan(config: &AtlasConfig, source: &Path) -> Result<()> {
    let result = ImportScanner::with_config(ScanConfig::from_importer(&config.importer))
        .scan(source)
        .with_context(|| format!("Failed to scan {}", source.display()))?;

    for job in &result.jobs {
        let size = job
            .size
            .map(format_size)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {} by {} [{}] {} ({}, {})",
            job.path.display(),
            job.title,
            job.creator,
            job.engine,
            job.version,
            size,
            job.executable.display()
        );
    }
    for skipped in &result.skipped {
        println!("{}  skipped: no executable", skipped.display());
    }
    for error in &result.errors {
        warn!("{}", error);
    }
    println!(
        "{} importable, {} skipped ({} ms)",
        result.jobs.len(),
        result.skipped.len(),
        result.duration_ms
    );
    Ok(())
}

fn list(config: &AtlasConfig, query: Option<&str>) -> Result<()> {
    let db = open_database(config)?;
    let records: Vec<Record> = match query {
        Some(query) => db.search(query)?,
        None => db
            .record_ids()?
            .into_iter()
            .map(|id| db.record(id))
            .collect::<Result<_, _>>()?,
    };

    for record in &records {
        println!(
            "{:>6}  {} by {} [{}] {} versions, {}",
            record.id(),
            record.title(),
            record.creator(),
            record.engine(),
            record.versions().len(),
            format_size(record.total_size())
        );
    }
    println!("{} records", records.len());
    Ok(())
}

fn show(config: &AtlasConfig, id: RecordId, json: bool) -> Result<()> {
    let db = open_database(config)?;
    let record = db
        .record(id)
        .with_context(|| format!("Failed to load record {}", id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record.snapshot())?);
        return Ok(());
    }

    println!("{} by {} [{}]", record.title(), record.creator(), record.engine());
    if !record.description().is_empty() {
        println!("{}", record.description());
    }
    for version in record.versions() {
        println!(
            "  {}  {} ({}, {}{})",
            version.name,
            version.path.display(),
            version.executable.display(),
            format_size(version.size),
            if version.in_place { ", in place" } else { "" }
        );
    }
    for (kind, path) in record.banners() {
        println!("  {:?}: {}", kind, path.display());
    }
    let tags: Vec<String> = record.all_tags().into_iter().collect();
    println!("  tags: {}", tags.join(", "));
    Ok(())
}

fn extract(archive: &Path, output: &Path) -> Result<()> {
    let written = atlas_archive::extract_to(archive, output)
        .with_context(|| format!("Failed to extract {}", archive.display()))?;
    println!("{} -> {} ({})", archive.display(), output.display(), format_size(written));
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
