//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use jobharvest_core::{
    DedupGateway, HarvestReport, Harvester, ProgressReporter, export_listings,
};
use jobharvest_crawler::HttpSession;
use jobharvest_shared::{AppConfig, CrawlConfig, Listing, init_config, load_config};
use jobharvest_storage::Storage;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// jobharvest: incremental job-listing harvester.
#[derive(Parser)]
#[command(
    name = "jobharvest",
    version,
    about = "Harvest job listings incrementally, with employer and related-listing enrichment.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run a harvest: crawl search pages and store new listings.
    Run(RunArgs),

    /// Show what the store holds.
    Stats {
        /// Database path (defaults to the configured path).
        #[arg(long)]
        db: Option<PathBuf>,

        /// How many employers to list by posting frequency.
        #[arg(long, default_value = "10")]
        top: u32,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Flags for `run`; each overrides the config file.
#[derive(clap::Args)]
pub(crate) struct RunArgs {
    /// Search query.
    #[arg(short, long)]
    pub query: Option<String>,

    /// Search location.
    #[arg(short, long)]
    pub location: Option<String>,

    /// Maximum number of search pages.
    #[arg(long)]
    pub max_pages: Option<u32>,

    /// Number of parallel browsing sessions.
    #[arg(long)]
    pub workers: Option<u32>,

    /// Database path.
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Where to write this run's new listings as JSON.
    #[arg(long)]
    pub export: Option<PathBuf>,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "jobharvest=info",
        1 => "jobharvest=debug",
        _ => "jobharvest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => cmd_run(args).await,
        Command::Stats { db, top } => cmd_stats(db, top).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Apply `run` flags on top of the loaded config.
fn apply_overrides(config: &mut AppConfig, args: &RunArgs) {
    if let Some(query) = &args.query {
        config.source.query = query.clone();
    }
    if let Some(location) = &args.location {
        config.source.location = location.clone();
    }
    if let Some(max_pages) = args.max_pages {
        config.crawl.max_pages = max_pages;
    }
    if let Some(workers) = args.workers {
        config.crawl.workers = workers;
    }
    if let Some(db) = &args.db {
        config.storage.database_path = db.to_string_lossy().into_owned();
    }
    if let Some(export) = &args.export {
        config.export.output_path = export.to_string_lossy().into_owned();
    }
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let mut config = load_config()?;
    apply_overrides(&mut config, &args);
    config.validate()?;

    let db_path = PathBuf::from(&config.storage.database_path);
    let storage = Storage::open(&db_path).await?;
    let crawl = CrawlConfig::from(&config);

    info!(
        query = %crawl.query,
        location = %crawl.location,
        max_pages = crawl.max_pages,
        workers = crawl.workers,
        db = %db_path.display(),
        "starting harvest"
    );

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let harvester = Harvester::new(crawl.clone(), DedupGateway::new(Arc::new(storage)));
    let reporter = Arc::new(CliProgress::new());

    let report = if crawl.workers > 1 {
        harvester
            .run_pool(|_| HttpSession::new(&crawl), &cancel, reporter.clone())
            .await?
    } else {
        let mut session = HttpSession::new(&crawl)?;
        harvester.run(&mut session, &cancel, &*reporter).await?
    };

    let exported = config
        .export
        .target()
        .filter(|path| export(path, &report.listings));

    print_summary(&report, exported);
    Ok(())
}

/// Export failures are reported but don't fail a run whose data is already stored.
fn export(path: &Path, listings: &[Listing]) -> bool {
    match export_listings(path, listings) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "export failed");
            false
        }
    }
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current listing");
            cancel.cancel();
        }
    });
}

fn print_summary(report: &HarvestReport, export_path: Option<&Path>) {
    println!();
    println!("  Harvest complete.");
    println!("  New listings: {}", report.listings.len());
    println!("  Pages:        {}", report.pages_visited);
    println!("  Seen:         {}", report.candidates_seen);
    println!("  Duplicates:   {}", report.duplicates_skipped);
    println!("  Failures:     {}", report.failures);
    println!("  Stopped:      {}", report.stop_reason.as_str());
    if let Some(path) = export_path {
        println!("  Export:       {}", path.display());
    }
    println!("  Time:         {:.1}s", report.elapsed.as_secs_f64());
    println!();
}

async fn cmd_stats(db: Option<PathBuf>, top: u32) -> Result<()> {
    let db_path = match db {
        Some(path) => path,
        None => PathBuf::from(load_config()?.storage.database_path),
    };
    let storage = Storage::open_readonly(&db_path).await?;

    let counts = storage.counts().await?;
    let frequency = storage.employer_post_frequency(top).await?;

    println!();
    println!("  Listings:         {}", counts.listings);
    println!("  Employer posts:   {}", counts.employer_posts);
    println!("  Related listings: {}", counts.related_listings);

    if !frequency.is_empty() {
        println!();
        println!("  Most active employers:");
        for (employer, posts) in frequency {
            println!("    {posts:>4}  {employer}");
        }
    }
    println!();
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn page_started(&self, page: u32) {
        self.spinner
            .set_message(format!("Search page {}", page + 1));
    }

    fn candidate_skipped(&self, url: &str) {
        self.spinner.set_message(format!("Already stored {url}"));
    }

    fn listing_harvested(&self, listing: &Listing, total: usize) {
        self.spinner.set_message(format!(
            "[{total}] {} @ {}",
            listing.title, listing.employer
        ));
    }

    fn done(&self, _report: &HarvestReport) {
        self.spinner.finish_and_clear();
    }
}
