//! End-to-end run: submit → await → walk results → write corpus → aggregate.

use std::path::PathBuf;
use std::time::Instant;

use tracing::{info, instrument};

use kbcrawl_crawler::{
    CrawlRequest, CrawlService, JobMonitor, PageWalker, PollObserver, WalkConfig, WalkStats,
};
use kbcrawl_markdown::RuleSet;
use kbcrawl_shared::{Clock, CrawlJob, JobId, Result, RunConfig, RunId};

use crate::assembler::derive_domain;
use crate::corpus::{BatchOutcome, CorpusBuilder, CorpusConfig, CorpusReport};

/// Result of one run.
#[derive(Debug)]
pub struct RunResult {
    pub run_id: RunId,
    pub job_id: JobId,
    /// Domain label derived from the root URL.
    pub domain: String,
    /// Output base directory.
    pub base_dir: PathBuf,
    /// Final job snapshot reported by the service.
    pub job: CrawlJob,
    pub report: CorpusReport,
    pub walk: WalkStats,
    /// Total elapsed time.
    pub elapsed: std::time::Duration,
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called on every job status poll.
    fn job_polled(&self, job: &CrawlJob);
    /// Called after each result batch is written.
    fn batch_processed(&self, outcome: &BatchOutcome, total_written: usize);
    /// Called when the run completes.
    fn done(&self, result: &RunResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn job_polled(&self, _job: &CrawlJob) {}
    fn batch_processed(&self, _outcome: &BatchOutcome, _total_written: usize) {}
    fn done(&self, _result: &RunResult) {}
}

/// Forwards monitor polls to the run's progress reporter.
struct ProgressObserver<'a> {
    inner: &'a dyn ProgressReporter,
}

impl PollObserver for ProgressObserver<'_> {
    fn job_polled(&self, job: &CrawlJob) {
        self.inner.job_polled(job);
    }
}

/// Run the full crawl-to-corpus pipeline.
///
/// 1. Submit a crawl job for `config.root_url`
/// 2. Poll it until it completes
/// 3. Walk the results batch by batch, writing each page's documents
/// 4. Rebuild the aggregate files
///
/// Submission, polling, and systemic write failures abort the run; documents
/// already written stay on disk without aggregates.
#[instrument(skip_all, fields(url = %config.root_url, base_dir = %config.base_dir.display()))]
pub async fn run<S: CrawlService, C: Clock>(
    config: &RunConfig,
    service: &S,
    clock: &C,
    progress: &dyn ProgressReporter,
) -> Result<RunResult> {
    let start = Instant::now();
    let run_id = RunId::new();
    let domain = derive_domain(config.root_url.as_str());

    info!(%run_id, %domain, "starting crawl run");

    // --- Phase 1: Submit ---
    progress.phase("Submitting crawl job");
    let monitor = JobMonitor::new(service, clock, config.retry);
    let job_id = monitor.submit(&CrawlRequest::from(config)).await?;

    // --- Phase 2: Poll ---
    progress.phase("Waiting for crawl job");
    let observer = ProgressObserver { inner: progress };
    let job = monitor
        .await_completion(&job_id, config.poll_interval, &observer)
        .await?;

    // --- Phase 3: Walk results and write documents ---
    progress.phase("Writing documents");
    let mut builder = CorpusBuilder::new(
        CorpusConfig::from_run(config, &domain),
        RuleSet::default(),
        clock,
    )?;
    let mut walker = PageWalker::new(service, clock, job_id.clone(), WalkConfig::from(config));

    while let Some(pages) = walker.next_batch().await {
        if pages.is_empty() {
            continue;
        }
        let outcome = builder.ingest_batch(pages).await?;
        progress.batch_processed(&outcome, builder.written());
    }
    let walk = walker.stats().clone();

    // --- Phase 4: Aggregate ---
    progress.phase("Building aggregates");
    let report = builder.finish()?;

    let result = RunResult {
        run_id,
        job_id,
        domain,
        base_dir: config.base_dir.clone(),
        job,
        report,
        walk,
        elapsed: start.elapsed(),
    };

    info!(
        run_id = %result.run_id,
        written = result.report.written,
        skipped = result.walk.skipped_items,
        failed_writes = result.report.failed_writes,
        elapsed_ms = result.elapsed.as_millis() as u64,
        "crawl run complete"
    );

    progress.done(&result);
    Ok(result)
}
