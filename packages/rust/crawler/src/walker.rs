//! Lazy, single-pass walk over a completed job's paginated results.
//!
//! The walker fetches one batch at a time and yields the pages it can
//! parse. Malformed items are skipped and counted. A failed batch fetch is
//! logged and stepped over rather than aborting the walk, up to
//! `max_consecutive_failures` failures in a row.

use std::collections::VecDeque;

use serde_json::Value;
use tracing::{debug, info, warn};

use kbcrawl_shared::{Clock, JobId, PaginationMode, RawPage, RetryPolicy, RunConfig};

use crate::retry::with_retry;
use crate::service::{CrawlService, PageCursor};

/// Pagination settings for one walk.
#[derive(Debug, Clone, Copy)]
pub struct WalkConfig {
    pub mode: PaginationMode,
    /// Fixed-stride step, and the step taken past a failed batch.
    pub stride: u64,
    pub max_consecutive_failures: u32,
    pub retry: RetryPolicy,
}

impl From<&RunConfig> for WalkConfig {
    fn from(config: &RunConfig) -> Self {
        Self {
            mode: config.pagination,
            stride: config.stride,
            max_consecutive_failures: config.max_consecutive_failures,
            retry: config.retry,
        }
    }
}

/// Counters for a walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkStats {
    /// Batches fetched successfully.
    pub batches: usize,
    /// Pages yielded.
    pub pages: usize,
    /// Items dropped because they were malformed.
    pub skipped_items: usize,
    /// Batch fetches that failed.
    pub failed_batches: usize,
}

/// Extract a page from one result item: `metadata.sourceURL` (or
/// `metadata.url`) plus `markdown`. Returns `None` for malformed items.
pub fn parse_item(item: &Value) -> Option<RawPage> {
    let metadata = item.get("metadata")?;
    let source_url = metadata
        .get("sourceURL")
        .or_else(|| metadata.get("url"))
        .and_then(Value::as_str)
        .filter(|u| !u.is_empty())?;
    let markdown = item.get("markdown").and_then(Value::as_str)?;

    Some(RawPage {
        source_url: source_url.to_string(),
        markdown_body: markdown.to_string(),
    })
}

/// Walks the paginated results of one job.
pub struct PageWalker<'a, S, C> {
    service: &'a S,
    clock: &'a C,
    job_id: JobId,
    config: WalkConfig,
    /// Next request to make; `None` once the walk is over.
    cursor: Option<PageCursor>,
    /// Item offset of `cursor`.
    position: u64,
    consecutive_failures: u32,
    buffered: VecDeque<RawPage>,
    stats: WalkStats,
}

impl<'a, S: CrawlService, C: Clock> PageWalker<'a, S, C> {
    pub fn new(service: &'a S, clock: &'a C, job_id: JobId, config: WalkConfig) -> Self {
        Self {
            service,
            clock,
            job_id,
            config,
            cursor: Some(PageCursor::Start),
            position: 0,
            consecutive_failures: 0,
            buffered: VecDeque::new(),
            stats: WalkStats::default(),
        }
    }

    pub fn stats(&self) -> &WalkStats {
        &self.stats
    }

    /// Whether the service has no more batches to give.
    pub fn is_exhausted(&self) -> bool {
        self.cursor.is_none() && self.buffered.is_empty()
    }

    /// Next page, fetching batches as needed. `None` once exhausted.
    pub async fn next_page(&mut self) -> Option<RawPage> {
        loop {
            if let Some(page) = self.buffered.pop_front() {
                return Some(page);
            }
            let batch = self.fetch_batch().await?;
            self.buffered.extend(batch);
        }
    }

    /// Pages of the next batch (possibly empty if every item was malformed
    /// or the fetch failed). `None` once exhausted.
    pub async fn next_batch(&mut self) -> Option<Vec<RawPage>> {
        if !self.buffered.is_empty() {
            return Some(self.buffered.drain(..).collect());
        }
        self.fetch_batch().await
    }

    async fn fetch_batch(&mut self) -> Option<Vec<RawPage>> {
        let cursor = self.cursor.take()?;
        let position = match &cursor {
            PageCursor::Start => 0,
            PageCursor::Skip(n) => *n,
            PageCursor::Next(_) => self.position,
        };

        let service = self.service;
        let job_id = &self.job_id;
        let fetched = with_retry(self.clock, self.config.retry, "result batch", || {
            service.fetch_results(job_id, &cursor)
        })
        .await;

        match fetched {
            Ok(batch) => {
                self.consecutive_failures = 0;
                self.stats.batches += 1;

                let item_count = batch.items.len() as u64;
                let mut pages = Vec::with_capacity(batch.items.len());
                for (index, item) in batch.items.iter().enumerate() {
                    match parse_item(item) {
                        Some(page) => pages.push(page),
                        None => {
                            warn!(position, index, "skipping malformed result item");
                            self.stats.skipped_items += 1;
                        }
                    }
                }
                self.stats.pages += pages.len();

                let step = match self.config.mode {
                    PaginationMode::FollowNext => item_count,
                    PaginationMode::FixedStride => {
                        if batch.next.is_some() && item_count != self.config.stride {
                            warn!(
                                stride = self.config.stride,
                                items = item_count,
                                "service page size differs from the fixed stride"
                            );
                        }
                        self.config.stride
                    }
                };
                self.position = position + step;
                self.cursor = batch.next.map(|next| match self.config.mode {
                    PaginationMode::FollowNext => PageCursor::Next(next),
                    PaginationMode::FixedStride => PageCursor::Skip(self.position),
                });

                debug!(
                    position,
                    items = item_count,
                    pages = pages.len(),
                    more = self.cursor.is_some(),
                    "result batch fetched"
                );
                if self.cursor.is_none() {
                    info!(
                        batches = self.stats.batches,
                        pages = self.stats.pages,
                        skipped = self.stats.skipped_items,
                        failed_batches = self.stats.failed_batches,
                        "result pagination exhausted"
                    );
                }

                Some(pages)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                self.stats.failed_batches += 1;

                if self.consecutive_failures >= self.config.max_consecutive_failures {
                    warn!(
                        position,
                        error = %e,
                        failures = self.consecutive_failures,
                        "giving up on result pagination"
                    );
                    return Some(Vec::new());
                }

                warn!(position, error = %e, "result batch fetch failed, skipping");
                self.position = position + self.config.stride;
                self.cursor = Some(PageCursor::Skip(self.position));
                Some(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    use kbcrawl_shared::{KbError, ManualClock};

    use crate::testing::{ScriptedService, page_item};

    fn config(mode: PaginationMode) -> WalkConfig {
        WalkConfig {
            mode,
            stride: 10,
            max_consecutive_failures: 3,
            retry: RetryPolicy::NONE,
        }
    }

    fn job() -> JobId {
        JobId("job-1".into())
    }

    async fn collect<S: CrawlService, C: Clock>(walker: &mut PageWalker<'_, S, C>) -> Vec<String> {
        let mut urls = Vec::new();
        while let Some(page) = walker.next_page().await {
            urls.push(page.source_url);
        }
        urls
    }

    #[test]
    fn parse_item_accepts_source_url_or_url() {
        let page = parse_item(&page_item("https://d.io/a", "# A")).unwrap();
        assert_eq!(page.source_url, "https://d.io/a");
        assert_eq!(page.markdown_body, "# A");

        let alt = json!({"metadata": {"url": "https://d.io/b"}, "markdown": ""});
        assert_eq!(parse_item(&alt).unwrap().source_url, "https://d.io/b");
    }

    #[test]
    fn parse_item_rejects_malformed() {
        assert!(parse_item(&json!({"markdown": "x"})).is_none());
        assert!(parse_item(&json!({"metadata": {}, "markdown": "x"})).is_none());
        assert!(parse_item(&json!({"metadata": {"sourceURL": "u"}})).is_none());
        assert!(parse_item(&json!("just a string")).is_none());
    }

    #[tokio::test]
    async fn follows_next_until_null() {
        let service = ScriptedService::new("job-1")
            .with_batch(vec![page_item("u1", "a"), page_item("u2", "b")], Some("cursor-2"))
            .with_batch(vec![page_item("u3", "c")], None);
        let clock = ManualClock::new(Utc::now());
        let mut walker = PageWalker::new(&service, &clock, job(), config(PaginationMode::FollowNext));

        assert_eq!(collect(&mut walker).await, vec!["u1", "u2", "u3"]);
        assert_eq!(
            service.cursors(),
            vec![PageCursor::Start, PageCursor::Next("cursor-2".into())]
        );
        assert!(walker.is_exhausted());
        assert_eq!(walker.stats().batches, 2);
        assert_eq!(walker.stats().pages, 3);
    }

    #[tokio::test]
    async fn terminates_with_zero_items() {
        let service = ScriptedService::new("job-1").with_batch(vec![], None);
        let clock = ManualClock::new(Utc::now());
        let mut walker = PageWalker::new(&service, &clock, job(), config(PaginationMode::FollowNext));

        assert!(collect(&mut walker).await.is_empty());
        assert_eq!(service.cursors().len(), 1);
        assert!(walker.next_batch().await.is_none());
    }

    #[tokio::test]
    async fn fixed_stride_advances_skip() {
        let items: Vec<Value> = (0..10).map(|i| page_item(&format!("u{i}"), "x")).collect();
        let service = ScriptedService::new("job-1")
            .with_batch(items, Some("ignored"))
            .with_batch(vec![page_item("u10", "x")], Some("ignored"))
            .with_batch(vec![], None);
        let clock = ManualClock::new(Utc::now());
        let mut walker =
            PageWalker::new(&service, &clock, job(), config(PaginationMode::FixedStride));

        assert_eq!(collect(&mut walker).await.len(), 11);
        assert_eq!(
            service.cursors(),
            vec![PageCursor::Start, PageCursor::Skip(10), PageCursor::Skip(20)]
        );
    }

    #[tokio::test]
    async fn malformed_items_are_skipped_not_fatal() {
        let service = ScriptedService::new("job-1").with_batch(
            vec![
                page_item("u1", "a"),
                json!({"metadata": {}}),
                json!(42),
                page_item("u2", "b"),
            ],
            None,
        );
        let clock = ManualClock::new(Utc::now());
        let mut walker = PageWalker::new(&service, &clock, job(), config(PaginationMode::FollowNext));

        assert_eq!(collect(&mut walker).await, vec!["u1", "u2"]);
        assert_eq!(walker.stats().skipped_items, 2);
    }

    #[tokio::test]
    async fn failed_batch_is_skipped_and_walk_continues() {
        let service = ScriptedService::new("job-1")
            .with_batch(vec![page_item("u1", "a")], Some("next-1"))
            .with_batch_error(KbError::fetch("timeout"))
            .with_batch(vec![page_item("u21", "b")], None);
        let clock = ManualClock::new(Utc::now());
        let mut walker = PageWalker::new(&service, &clock, job(), config(PaginationMode::FollowNext));

        assert_eq!(collect(&mut walker).await, vec!["u1", "u21"]);
        assert_eq!(
            service.cursors(),
            vec![
                PageCursor::Start,
                PageCursor::Next("next-1".into()),
                PageCursor::Skip(11),
            ]
        );
        assert_eq!(walker.stats().failed_batches, 1);
    }

    #[tokio::test]
    async fn gives_up_after_consecutive_failures() {
        let service = ScriptedService::new("job-1")
            .with_batch_error(KbError::fetch("down"))
            .with_batch_error(KbError::fetch("down"))
            .with_batch_error(KbError::fetch("down"))
            .with_batch(vec![page_item("never", "x")], None);
        let clock = ManualClock::new(Utc::now());
        let mut walker = PageWalker::new(&service, &clock, job(), config(PaginationMode::FollowNext));

        assert!(collect(&mut walker).await.is_empty());
        assert_eq!(service.cursors().len(), 3);
        assert_eq!(walker.stats().failed_batches, 3);
    }

    #[tokio::test]
    async fn next_batch_yields_per_service_page() {
        let service = ScriptedService::new("job-1")
            .with_batch(vec![page_item("u1", "a"), page_item("u2", "b")], Some("n"))
            .with_batch(vec![page_item("u3", "c")], None);
        let clock = ManualClock::new(Utc::now());
        let mut walker = PageWalker::new(&service, &clock, job(), config(PaginationMode::FollowNext));

        assert_eq!(walker.next_batch().await.map(|b| b.len()), Some(2));
        assert_eq!(walker.next_batch().await.map(|b| b.len()), Some(1));
        assert!(walker.next_batch().await.is_none());
    }
}
