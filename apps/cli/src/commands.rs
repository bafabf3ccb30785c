//! CLI command definitions, routing, and tracing setup.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{self, Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use url::Url;

use kbcrawl_core::assembler::derive_domain;
use kbcrawl_core::corpus::{AggregateSummary, BatchOutcome, rebuild_aggregates};
use kbcrawl_core::pipeline::{self, ProgressReporter, RunResult};
use kbcrawl_crawler::HttpCrawlService;
use kbcrawl_shared::{
    AppConfig, CrawlJob, KbError, PaginationMode, RunConfig, SystemClock, expand_home,
    init_config, load_config, resolve_api_key,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// kbcrawl: crawl documentation into a categorized knowledge base.
#[derive(Parser)]
#[command(
    name = "kbcrawl",
    version,
    about = "Crawl a documentation site through a crawl service and build a categorized markdown knowledge base.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
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

/// Pagination strategy for result batches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum PaginationArg {
    /// Follow the service's `next` reference.
    FollowNext,
    /// Advance `skip` by a fixed stride.
    FixedStride,
}

impl From<PaginationArg> for PaginationMode {
    fn from(arg: PaginationArg) -> Self {
        match arg {
            PaginationArg::FollowNext => PaginationMode::FollowNext,
            PaginationArg::FixedStride => PaginationMode::FixedStride,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl a documentation site and build its knowledge base.
    Crawl(CrawlArgs),

    /// Regenerate the index, combined, and summary files from existing documents.
    Rebuild {
        /// Knowledge base directory (defaults to output.base_dir).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Root URL the knowledge base was crawled from (used for the domain label).
        #[arg(long)]
        domain: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Flags for `kbcrawl crawl`. Each one overrides the config file.
#[derive(clap::Args, Debug)]
pub(crate) struct CrawlArgs {
    /// Documentation root URL.
    pub url: String,

    /// Maximum pages the crawl service should fetch.
    #[arg(short, long)]
    pub limit: Option<u32>,

    /// Output directory for the knowledge base.
    #[arg(short, long)]
    pub out: Option<String>,

    /// Seconds between job status checks.
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Documents written concurrently.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Abandon the run after this many seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Result pagination strategy.
    #[arg(long, value_enum)]
    pub pagination: Option<PaginationArg>,
}

impl CrawlArgs {
    /// Apply flag overrides on top of the file config.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(limit) = self.limit {
            config.crawl.limit = limit;
        }
        if let Some(out) = &self.out {
            config.output.base_dir = out.clone();
        }
        if let Some(secs) = self.poll_interval {
            config.crawl.poll_interval_secs = secs;
        }
        if let Some(concurrency) = self.concurrency {
            config.output.concurrency = concurrency;
        }
        if let Some(mode) = self.pagination {
            config.pagination.mode = mode.into();
        }
    }
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
        0 => "kbcrawl=info",
        1 => "kbcrawl=debug",
        _ => "kbcrawl=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
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
        Command::Crawl(args) => cmd_crawl(&args).await,
        Command::Rebuild { out, domain } => cmd_rebuild(out, &domain),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

/// Name the stage a fatal library error came from.
fn failing_stage(err: &KbError) -> &'static str {
    match err {
        KbError::Submission { .. } => "crawl job submission failed",
        KbError::CrawlFailed { .. } | KbError::StatusPoll { .. } => "crawl job polling failed",
        KbError::Fetch { .. } | KbError::Parse { .. } => "crawl service request failed",
        KbError::Write { .. } | KbError::SystemicWrite { .. } => "document write failed",
        KbError::Io { .. } => "knowledge base I/O failed",
        KbError::Config { .. } | KbError::Validation { .. } => "invalid configuration",
    }
}

fn stage_error(err: KbError) -> eyre::Report {
    let stage = failing_stage(&err);
    eyre::Report::new(err).wrap_err(stage)
}

/// Await `future`, giving up after `timeout` if one is set.
async fn with_deadline<T>(future: impl Future<Output = T>, timeout: Option<Duration>) -> Option<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, future).await.ok(),
        None => Some(future.await),
    }
}

async fn cmd_crawl(args: &CrawlArgs) -> Result<()> {
    let mut config = load_config().map_err(stage_error)?;
    args.apply(&mut config);

    let root_url = Url::parse(&args.url).map_err(|e| eyre!("invalid URL '{}': {e}", args.url))?;
    let api_key = resolve_api_key(&config).map_err(stage_error)?;
    let run_config = RunConfig::from_app(&config, root_url, api_key).map_err(stage_error)?;

    let service = HttpCrawlService::new(&run_config).map_err(stage_error)?;
    let clock = SystemClock;
    let reporter = CliProgress::new();

    info!(
        url = %run_config.root_url,
        base_dir = %run_config.base_dir.display(),
        limit = run_config.limit,
        "starting crawl"
    );

    let timeout = args.timeout.map(Duration::from_secs);
    let run = pipeline::run(&run_config, &service, &clock, &reporter);

    // Dropping the run future cancels polling and pagination; documents
    // already written stay on disk.
    let outcome = tokio::select! {
        outcome = with_deadline(run, timeout) => outcome,
        _ = tokio::signal::ctrl_c() => {
            reporter.abandon();
            warn!("interrupted, abandoning crawl");
            return Err(eyre!(
                "interrupted; partial output left in {}",
                run_config.base_dir.display()
            ));
        }
    };

    let result = match outcome {
        Some(result) => result.map_err(|e| {
            reporter.abandon();
            stage_error(e)
        })?,
        None => {
            reporter.abandon();
            return Err(eyre!(
                "crawl did not finish within {}s; partial output left in {}",
                args.timeout.unwrap_or_default(),
                run_config.base_dir.display()
            ));
        }
    };

    print_run_report(&result);
    Ok(())
}

fn print_run_report(result: &RunResult) {
    let report = &result.report;

    println!();
    println!("  Knowledge base built");
    println!("  Run:            {}", result.run_id);
    println!("  Job:            {}", result.job_id);
    println!("  Domain:         {}", result.domain);
    println!("  Written:        {}", report.written);
    println!("  Skipped items:  {}", result.walk.skipped_items);
    println!("  Failed batches: {}", result.walk.failed_batches);
    println!("  Failed writes:  {}", report.failed_writes);
    if report.superseded > 0 {
        println!("  Duplicates:     {}", report.superseded);
    }
    print_sections(&report.aggregates);
    println!("  Path:           {}", result.base_dir.display());
    println!("  Time:           {:.1}s", result.elapsed.as_secs_f64());
    println!();
}

fn print_sections(summary: &AggregateSummary) {
    println!("  Documents:      {}", summary.total_documents);
    for section in &summary.sections {
        println!("    {:<22} {}", section.name, section.members.len());
    }
}

fn cmd_rebuild(out: Option<PathBuf>, domain_url: &str) -> Result<()> {
    let base_dir = match out {
        Some(dir) => dir,
        None => {
            let config = load_config().map_err(stage_error)?;
            expand_home(&config.output.base_dir)
        }
    };
    if !base_dir.is_dir() {
        return Err(eyre!("knowledge base directory '{}' not found", base_dir.display()));
    }

    let domain = derive_domain(domain_url);
    info!(base_dir = %base_dir.display(), %domain, "rebuilding aggregates");

    let summary = rebuild_aggregates(&base_dir, &domain).wrap_err("aggregation failed")?;

    println!();
    println!("  Aggregates rebuilt");
    print_sections(&summary);
    println!("  Index:          {}", summary.index_path.display());
    println!();
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config().map_err(stage_error)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config().map_err(stage_error)?;
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
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn abandon(&self) {
        self.spinner.abandon();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn job_polled(&self, job: &CrawlJob) {
        self.spinner.set_message(format!(
            "Crawl {} [{}/{}]",
            job.status, job.completed_count, job.total_count
        ));
    }

    fn batch_processed(&self, outcome: &BatchOutcome, total_written: usize) {
        let mut message = format!("Writing documents [{total_written} written]");
        if outcome.failed > 0 {
            message.push_str(&format!(", {} failed in last batch", outcome.failed));
        }
        self.spinner.set_message(message);
    }

    fn done(&self, _result: &RunResult) {
        self.spinner.finish_and_clear();
    }
}
