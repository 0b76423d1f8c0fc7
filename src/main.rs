use std::path::PathBuf;

use clap::Parser;
use tracing::{info, Level};

use mosaic_index::logging::{init_logging, LogConfig};
use mosaic_index::{build_color_index, log_index_summary, pipeline, scan_library, ProgressReporter, TileCache};

#[derive(Parser)]
#[command(name = "mosaic_index")]
#[command(version, about = "Build an average-color index over an image library for mosaic tile lookup", long_about = None)]
struct Cli {
    /// Image library root to index
    #[arg(long, value_name = "PATH")]
    lib: PathBuf,

    /// Worker thread budget (0 = one per CPU core)
    #[arg(long, default_value_t = 10)]
    worker: usize,

    /// Cache database path
    #[arg(long, default_value = "./database.bin", value_name = "PATH")]
    database: PathBuf,

    /// Log directory (defaults to the system temp dir)
    #[arg(long, value_name = "PATH")]
    log_dir: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::default();
    if let Some(dir) = &cli.log_dir {
        log_config = log_config.with_log_dir(dir);
    }
    if cli.verbose {
        log_config = log_config.with_level(Level::DEBUG);
    }
    init_logging("mosaic_index", log_config)?;

    let worker_budget = if cli.worker == 0 {
        num_cpus::get().clamp(1, 32)
    } else {
        cli.worker
    };

    info!(
        lib = %cli.lib.display(),
        database = %cli.database.display(),
        workers = worker_budget,
        "start"
    );

    // An unopenable store is fatal; every later step depends on it.
    let cache = TileCache::open(&cli.database)?;
    cache.reconcile()?;

    let scan = scan_library(&cli.lib, &cache)?;
    let total = scan.pending.len();

    let mut reporter = ProgressReporter::new(total);
    let outcome = pipeline::run(&cache, scan.pending, worker_budget, |counters| {
        reporter.tick(counters)
    })?;
    reporter.finish();

    let index = build_color_index(&cache)?;
    log_index_summary(&index);

    info!(
        processed = outcome.processed,
        succeeded = outcome.succeeded,
        failed = outcome.failed,
        cache_hits = scan.cache_hits,
        indexed = index.total_files(),
        "indexing complete"
    );
    Ok(())
}
