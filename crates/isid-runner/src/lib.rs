//! Command-line runner for the intersection imagery harvester.
//!
//! Two commands:
//!
//! - `isid harvest` walks every data source and fetches imagery for the
//!   intersections still missing it, rewriting the availability table as it
//!   goes. Ctrl-C lets in-flight points finish and persist, then exits
//!   successfully.
//! - `isid status` prints per-year status counts from an availability table.

use clap::{ArgAction, Args, Parser, Subcommand};
use isid_imagery::{
    load_sources, ArcGisClient, AvailabilityStore, CancelToken, HarvestConfig, HarvestError,
    Harvester, RunSummary, SourceOutcome,
};
use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Result type for runner commands.
pub type CliResult<T> = Result<T, Box<dyn Error>>;

/// Intersection imagery harvester.
#[derive(Debug, Parser)]
#[command(name = "isid", version, about = "Resumable aerial imagery harvester for intersections")]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch imagery for unfetched intersections covered by each data source
    Harvest(HarvestArgs),
    /// Print per-year status counts from an availability table
    Status(StatusArgs),
}

#[derive(Debug, Args)]
pub struct HarvestArgs {
    /// Intersection availability table, rewritten in place
    #[arg(long)]
    pub intersections: PathBuf,

    /// Data source list with `URL` and `Year` columns
    #[arg(long)]
    pub sources: PathBuf,

    /// YAML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory for saved tiles
    #[arg(long)]
    pub image_dir: Option<PathBuf>,

    /// Concurrent fetch workers per source
    #[arg(long)]
    pub workers: Option<usize>,

    /// Half-width of the request window in meters
    #[arg(long)]
    pub radius_m: Option<f64>,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Tile width and height in pixels
    #[arg(long)]
    pub tile_size: Option<u32>,
}

impl HarvestArgs {
    /// Configuration file values (or defaults) with command-line overrides applied.
    pub fn load_config(&self) -> isid_imagery::Result<HarvestConfig> {
        let mut config = match &self.config {
            Some(path) => HarvestConfig::from_file(path)?,
            None => HarvestConfig::default(),
        };
        self.apply_overrides(&mut config);
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut HarvestConfig) {
        if let Some(dir) = &self.image_dir {
            config.image_dir = dir.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(radius) = self.radius_m {
            config.radius_m = radius;
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout_secs = secs;
        }
        if let Some(size) = self.tile_size {
            config.tile_size = size;
        }
    }
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Intersection availability table
    #[arg(long)]
    pub intersections: PathBuf,

    /// Only report this year
    #[arg(long)]
    pub year: Option<i32>,
}

/// Install the global tracing subscriber.
pub fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Run a parsed command line.
pub fn run(cli: Cli) -> CliResult<()> {
    init_logging(cli.verbose);
    match cli.command {
        Command::Harvest(args) => harvest(&args).map(|_| ()),
        Command::Status(args) => status(&args, &mut std::io::stdout().lock()),
    }
}

/// Load inputs and harvest every source. Only input loading can fail; an
/// interrupted run still returns its summary.
pub fn harvest(args: &HarvestArgs) -> CliResult<RunSummary> {
    isid_metrics::describe_metrics();

    let config = args.load_config()?;
    let store = AvailabilityStore::open(&args.intersections).map_err(|e| {
        error!(path = %args.intersections.display(), error = %e, "cannot load intersections");
        e
    })?;
    let sources = load_sources(&args.sources).map_err(|e| {
        error!(path = %args.sources.display(), error = %e, "cannot load data sources");
        e
    })?;
    let client = ArcGisClient::new(config.timeout())?;

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("interrupt received, finishing in-flight points");
        handler_token.cancel();
    }) {
        warn!(error = %e, "could not install interrupt handler");
    }

    let mut harvester = Harvester::new(client, store, config).with_cancel_token(cancel);
    let summary = harvester.run(&sources);
    log_summary(&summary);

    let stats = harvester.service().stats();
    info!(
        requests = stats.requests,
        fallbacks = stats.fallbacks,
        bytes = stats.bytes_downloaded,
        "network totals"
    );
    Ok(summary)
}

fn log_summary(summary: &RunSummary) {
    for report in &summary.sources {
        let outcome = match &report.outcome {
            SourceOutcome::Completed => "completed".to_string(),
            SourceOutcome::NoCandidates => "nothing to fetch".to_string(),
            SourceOutcome::Unresolved(reason) => format!("unresolved ({reason})"),
            SourceOutcome::Aborted(reason) => format!("aborted ({reason})"),
            SourceOutcome::Cancelled => "cancelled".to_string(),
        };
        info!(
            url = %report.source.url,
            year = report.source.year,
            candidates = report.candidates,
            saved = report.saved,
            blank = report.blank,
            skipped = report.skipped,
            "{outcome}"
        );
    }
    if summary.cancelled {
        info!("run interrupted; rerun to resume");
    }
}

/// Write per-year status counts for an availability table.
pub fn status<W: Write>(args: &StatusArgs, out: &mut W) -> CliResult<()> {
    let store = AvailabilityStore::open(&args.intersections)?;
    let years: Vec<i32> = match args.year {
        Some(year) if store.has_year(year) => vec![year],
        Some(year) => return Err(HarvestError::UnknownYear(year).into()),
        None => store.years().collect(),
    };

    writeln!(
        out,
        "{}: {} intersections, {} rows",
        args.intersections.display(),
        store.len(),
        store.row_count()
    )?;
    writeln!(out, "{:>6} {:>10} {:>8} {:>8}", "year", "unfetched", "blank", "saved")?;
    for year in years {
        if let Some(counts) = store.counts(year) {
            writeln!(
                out,
                "{:>6} {:>10} {:>8} {:>8}",
                year, counts.unfetched, counts.blank, counts.saved
            )?;
        }
    }
    Ok(())
}
