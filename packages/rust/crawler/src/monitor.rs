//! Crawl job submission and status polling.
//!
//! The monitor is a small state machine over [`JobStatus`]: it polls
//! `pending`/`running` jobs at a fixed interval and stops on `completed`
//! or `failed`. Polling has no upper bound; callers that want a deadline
//! or cancellation drop the [`JobMonitor::await_completion`] future
//! (e.g. via `tokio::time::timeout` or `tokio::select!`).

use std::time::Duration;

use tracing::{debug, info, instrument};

use kbcrawl_shared::{Clock, CrawlJob, JobId, JobStatus, KbError, Result, RetryPolicy};

use crate::retry::with_retry;
use crate::service::{CrawlRequest, CrawlService};

/// Receives a progress event on every status poll.
pub trait PollObserver: Send + Sync {
    fn job_polled(&self, job: &CrawlJob);
}

/// Observer that ignores every event.
pub struct NoopObserver;

impl PollObserver for NoopObserver {
    fn job_polled(&self, _job: &CrawlJob) {}
}

/// Submits crawl jobs and waits for them to finish.
pub struct JobMonitor<'a, S, C> {
    service: &'a S,
    clock: &'a C,
    retry: RetryPolicy,
}

impl<'a, S: CrawlService, C: Clock> JobMonitor<'a, S, C> {
    pub fn new(service: &'a S, clock: &'a C, retry: RetryPolicy) -> Self {
        Self {
            service,
            clock,
            retry,
        }
    }

    /// Submit a crawl job. Never retried: a retry after a lost response
    /// would start a second job.
    #[instrument(skip_all, fields(url = %request.url, limit = request.limit))]
    pub async fn submit(&self, request: &CrawlRequest) -> Result<JobId> {
        let job_id = self.service.submit(request).await.map_err(|e| match e {
            KbError::Submission { .. } => e,
            other => KbError::submission(other.to_string()),
        })?;

        info!(%job_id, "crawl job submitted");
        Ok(job_id)
    }

    /// Poll `job_id` every `poll_interval` until it reaches a terminal state.
    ///
    /// Returns the final snapshot for `completed`; fails with
    /// [`KbError::CrawlFailed`] for `failed` and [`KbError::StatusPoll`] when
    /// a status request gets no usable response.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn await_completion(
        &self,
        job_id: &JobId,
        poll_interval: Duration,
        observer: &dyn PollObserver,
    ) -> Result<CrawlJob> {
        let mut last_status: Option<JobStatus> = None;
        let mut polls: u64 = 0;

        loop {
            let job = with_retry(self.clock, self.retry, "job status", || {
                self.service.job_status(job_id)
            })
            .await
            .map_err(|e| KbError::StatusPoll {
                job_id: job_id.to_string(),
                message: e.to_string(),
            })?;
            polls += 1;

            observer.job_polled(&job);

            if last_status != Some(job.status) {
                info!(
                    status = %job.status,
                    completed = job.completed_count,
                    total = job.total_count,
                    "job status changed"
                );
                last_status = Some(job.status);
            } else {
                debug!(
                    status = %job.status,
                    completed = job.completed_count,
                    total = job.total_count,
                    "job still in progress"
                );
            }

            if !job.status.is_terminal() {
                self.clock.sleep(poll_interval).await;
                continue;
            }

            if job.status == JobStatus::Failed {
                return Err(KbError::CrawlFailed {
                    job_id: job_id.to_string(),
                });
            }

            info!(polls, pages = job.completed_count, "crawl job completed");
            return Ok(job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::Utc;
    use kbcrawl_shared::ManualClock;

    use crate::testing::ScriptedService;

    #[derive(Default)]
    struct RecordingObserver {
        seen: Mutex<Vec<(JobStatus, u64, u64)>>,
    }

    impl PollObserver for RecordingObserver {
        fn job_polled(&self, job: &CrawlJob) {
            self.seen
                .lock()
                .unwrap()
                .push((job.status, job.completed_count, job.total_count));
        }
    }

    fn request() -> CrawlRequest {
        CrawlRequest {
            url: "https://docs.example.com/".into(),
            limit: 10,
            only_main_content: true,
            wait_for_ms: 1000,
        }
    }

    #[tokio::test]
    async fn submit_returns_service_job_id() {
        let service = ScriptedService::new("job-7");
        let clock = ManualClock::new(Utc::now());
        let monitor = JobMonitor::new(&service, &clock, RetryPolicy::NONE);

        let id = monitor.submit(&request()).await.unwrap();
        assert_eq!(id.as_str(), "job-7");
        assert_eq!(service.submissions(), vec![request()]);
    }

    #[tokio::test]
    async fn submit_failure_is_submission_error() {
        let service = ScriptedService::new("job-7").with_submit_error(KbError::fetch("refused"));
        let clock = ManualClock::new(Utc::now());
        let monitor = JobMonitor::new(&service, &clock, RetryPolicy::NONE);

        let err = monitor.submit(&request()).await.unwrap_err();
        assert!(matches!(err, KbError::Submission { .. }));
        assert!(err.to_string().contains("refused"));
    }

    #[tokio::test]
    async fn polls_until_completed_with_fixed_interval() {
        let service = ScriptedService::new("job-1")
            .with_status(JobStatus::Pending, 0, 0)
            .with_status(JobStatus::Running, 3, 10)
            .with_status(JobStatus::Running, 7, 10)
            .with_status(JobStatus::Completed, 10, 10);
        let clock = ManualClock::new(Utc::now());
        let observer = RecordingObserver::default();
        let monitor = JobMonitor::new(&service, &clock, RetryPolicy::NONE);

        let job = monitor
            .await_completion(&JobId("job-1".into()), Duration::from_secs(5), &observer)
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.completed_count, 10);
        // One sleep between each pair of polls, none after the terminal one.
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(5); 3]);
        assert_eq!(
            *observer.seen.lock().unwrap(),
            vec![
                (JobStatus::Pending, 0, 0),
                (JobStatus::Running, 3, 10),
                (JobStatus::Running, 7, 10),
                (JobStatus::Completed, 10, 10),
            ]
        );
    }

    #[tokio::test]
    async fn failed_job_is_crawl_failed_error() {
        let service = ScriptedService::new("job-1")
            .with_status(JobStatus::Running, 1, 5)
            .with_status(JobStatus::Failed, 1, 5);
        let clock = ManualClock::new(Utc::now());
        let monitor = JobMonitor::new(&service, &clock, RetryPolicy::NONE);

        let err = monitor
            .await_completion(&JobId("job-1".into()), Duration::from_secs(1), &NoopObserver)
            .await
            .unwrap_err();
        assert!(matches!(err, KbError::CrawlFailed { ref job_id } if job_id == "job-1"));
        // Polling stops at the terminal status: two polls, one sleep.
        assert_eq!(service.status_calls(), 2);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);
    }

    #[tokio::test]
    async fn status_fetch_failure_is_fatal() {
        let service = ScriptedService::new("job-1")
            .with_status(JobStatus::Running, 0, 5)
            .with_status_error(KbError::fetch("connection reset"));
        let clock = ManualClock::new(Utc::now());
        let monitor = JobMonitor::new(&service, &clock, RetryPolicy::NONE);

        let err = monitor
            .await_completion(&JobId("job-1".into()), Duration::from_secs(1), &NoopObserver)
            .await
            .unwrap_err();
        assert!(matches!(err, KbError::StatusPoll { .. }));
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn transient_status_failure_is_retried_when_enabled() {
        let service = ScriptedService::new("job-1")
            .with_status_error(KbError::http(503, "busy"))
            .with_status(JobStatus::Completed, 2, 2);
        let clock = ManualClock::new(Utc::now());
        let retry = RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(250),
        };
        let monitor = JobMonitor::new(&service, &clock, retry);

        let job = monitor
            .await_completion(&JobId("job-1".into()), Duration::from_secs(5), &NoopObserver)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(250)]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_future_cancels_monitoring() {
        let service = ScriptedService::new("job-1").with_status(JobStatus::Running, 0, 100);
        let clock = kbcrawl_shared::SystemClock;
        let monitor = JobMonitor::new(&service, &clock, RetryPolicy::NONE);
        let job_id = JobId("job-1".into());

        let outcome = tokio::time::timeout(
            Duration::from_secs(60),
            monitor.await_completion(&job_id, Duration::from_secs(5), &NoopObserver),
        )
        .await;

        assert!(outcome.is_err(), "monitor should still be polling");
        assert!(service.status_calls() >= 12);
    }
}
