//! In-memory [`CrawlService`] driven by a script of responses.
//!
//! Used by the monitor, walker, and pipeline tests in place of the HTTP
//! client. Status responses are replayed in order and the last successful
//! one repeats once the script runs out; result batches are replayed in
//! order and an exhausted script answers with a final empty batch.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::{Value, json};

use kbcrawl_shared::{CrawlJob, JobId, JobStatus, KbError, Result};

use crate::service::{CrawlRequest, CrawlService, PageCursor, ResultBatch};

/// Build a well-formed result item.
pub fn page_item(source_url: &str, markdown: &str) -> Value {
    json!({
        "metadata": { "sourceURL": source_url },
        "markdown": markdown,
    })
}

/// Scripted crawl service.
pub struct ScriptedService {
    job_id: JobId,
    submit_error: Mutex<Option<KbError>>,
    statuses: Mutex<VecDeque<Result<CrawlJob>>>,
    last_status: Mutex<Option<CrawlJob>>,
    batches: Mutex<VecDeque<Result<ResultBatch>>>,
    submissions: Mutex<Vec<CrawlRequest>>,
    cursors: Mutex<Vec<PageCursor>>,
    status_calls: Mutex<usize>,
}

impl ScriptedService {
    pub fn new(job_id: &str) -> Self {
        Self {
            job_id: JobId(job_id.to_string()),
            submit_error: Mutex::new(None),
            statuses: Mutex::new(VecDeque::new()),
            last_status: Mutex::new(None),
            batches: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(Vec::new()),
            cursors: Mutex::new(Vec::new()),
            status_calls: Mutex::new(0),
        }
    }

    /// Make the next submission fail with `error`.
    pub fn with_submit_error(self, error: KbError) -> Self {
        *lock(&self.submit_error) = Some(error);
        self
    }

    /// Queue a status poll response.
    pub fn with_status(self, status: JobStatus, completed: u64, total: u64) -> Self {
        let job = CrawlJob {
            id: self.job_id.clone(),
            status,
            completed_count: completed,
            total_count: total,
        };
        lock(&self.statuses).push_back(Ok(job));
        self
    }

    /// Queue a failed status poll.
    pub fn with_status_error(self, error: KbError) -> Self {
        lock(&self.statuses).push_back(Err(error));
        self
    }

    /// Queue a result batch.
    pub fn with_batch(self, items: Vec<Value>, next: Option<&str>) -> Self {
        lock(&self.batches).push_back(Ok(ResultBatch {
            items,
            next: next.map(String::from),
        }));
        self
    }

    /// Queue a failed result fetch.
    pub fn with_batch_error(self, error: KbError) -> Self {
        lock(&self.batches).push_back(Err(error));
        self
    }

    /// Submissions received so far.
    pub fn submissions(&self) -> Vec<CrawlRequest> {
        lock(&self.submissions).clone()
    }

    /// Cursors requested so far, in order.
    pub fn cursors(&self) -> Vec<PageCursor> {
        lock(&self.cursors).clone()
    }

    /// Number of status polls received.
    pub fn status_calls(&self) -> usize {
        *lock(&self.status_calls)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl CrawlService for ScriptedService {
    async fn submit(&self, request: &CrawlRequest) -> Result<JobId> {
        lock(&self.submissions).push(request.clone());
        match lock(&self.submit_error).take() {
            Some(error) => Err(error),
            None => Ok(self.job_id.clone()),
        }
    }

    async fn job_status(&self, _job_id: &JobId) -> Result<CrawlJob> {
        *lock(&self.status_calls) += 1;
        let next = lock(&self.statuses).pop_front();
        match next {
            Some(Ok(job)) => {
                *lock(&self.last_status) = Some(job.clone());
                Ok(job)
            }
            Some(Err(error)) => Err(error),
            None => lock(&self.last_status)
                .clone()
                .ok_or_else(|| KbError::parse("no scripted status")),
        }
    }

    async fn fetch_results(&self, _job_id: &JobId, cursor: &PageCursor) -> Result<ResultBatch> {
        lock(&self.cursors).push(cursor.clone());
        lock(&self.batches)
            .pop_front()
            .unwrap_or_else(|| Ok(ResultBatch::default()))
    }
}
