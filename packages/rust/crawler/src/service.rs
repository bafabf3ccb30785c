//! Crawl service API: job submission, status, and paginated results.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use kbcrawl_shared::{CrawlJob, JobId, JobStatus, KbError, Result, RunConfig};

/// User-Agent string for crawl service requests.
const USER_AGENT: &str = concat!("kbcrawl/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Parameters for a crawl job submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlRequest {
    /// Documentation root to crawl.
    pub url: String,
    /// Maximum number of pages.
    pub limit: u32,
    pub only_main_content: bool,
    pub wait_for_ms: u64,
}

impl From<&RunConfig> for CrawlRequest {
    fn from(config: &RunConfig) -> Self {
        Self {
            url: config.root_url.to_string(),
            limit: config.limit,
            only_main_content: config.only_main_content,
            wait_for_ms: config.wait_for_ms,
        }
    }
}

/// JSON body of `POST /v2/crawl`.
#[derive(Debug, Serialize)]
struct SubmitBody<'a> {
    url: &'a str,
    limit: u32,
    #[serde(rename = "scrapeOptions")]
    scrape_options: ScrapeOptions,
}

#[derive(Debug, Serialize)]
struct ScrapeOptions {
    formats: [&'static str; 1],
    #[serde(rename = "onlyMainContent")]
    only_main_content: bool,
    #[serde(rename = "waitFor")]
    wait_for: u64,
}

/// Position in the paginated result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// First batch.
    Start,
    /// Batch starting at item offset `n`.
    Skip(u64),
    /// Continuation reference exactly as the service returned it.
    Next(String),
}

/// One page of crawl results. Items are left as raw JSON so a single
/// malformed item can be skipped without losing the batch.
#[derive(Debug, Clone, Default)]
pub struct ResultBatch {
    pub items: Vec<Value>,
    /// Continuation reference; `None` means the results are exhausted.
    pub next: Option<String>,
}

impl ResultBatch {
    /// Read a `{data: [...], next}` response. A missing or non-array `data`
    /// yields an empty batch.
    pub fn from_json(value: &Value) -> Self {
        let items = value
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let next = value
            .get("next")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from);
        Self { items, next }
    }
}

/// Parse a status response into a job snapshot.
fn parse_status(job_id: &JobId, value: &Value) -> Result<CrawlJob> {
    let raw = value
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| KbError::parse("status response has no `status` field"))?;
    let status = JobStatus::parse(raw)
        .ok_or_else(|| KbError::parse(format!("unknown job status '{raw}'")))?;

    Ok(CrawlJob {
        id: job_id.clone(),
        status,
        completed_count: value.get("completed").and_then(Value::as_u64).unwrap_or(0),
        total_count: value.get("total").and_then(Value::as_u64).unwrap_or(0),
    })
}

// ---------------------------------------------------------------------------
// CrawlService
// ---------------------------------------------------------------------------

/// The remote crawl service.
pub trait CrawlService: Send + Sync {
    /// Start a crawl job. Fails with [`KbError::Submission`] when the
    /// response carries no job id.
    fn submit(&self, request: &CrawlRequest) -> impl Future<Output = Result<JobId>> + Send;

    /// Fetch the current job status.
    fn job_status(&self, job_id: &JobId) -> impl Future<Output = Result<CrawlJob>> + Send;

    /// Fetch one batch of results at `cursor`.
    fn fetch_results(
        &self,
        job_id: &JobId,
        cursor: &PageCursor,
    ) -> impl Future<Output = Result<ResultBatch>> + Send;
}

/// HTTP client for the `/v2/crawl` API with bearer authentication.
pub struct HttpCrawlService {
    client: Client,
    api_url: Url,
    api_key: String,
}

impl HttpCrawlService {
    /// Create a client for the service configured in `config`.
    pub fn new(config: &RunConfig) -> Result<Self> {
        Self::with_endpoint(
            config.api_url.clone(),
            config.api_key.clone(),
            config.request_timeout,
        )
    }

    /// Create a client for an explicit base URL.
    pub fn with_endpoint(mut api_url: Url, api_key: String, timeout: Duration) -> Result<Self> {
        // `Url::join` replaces the last segment unless the base ends in '/'.
        if !api_url.path().ends_with('/') {
            let path = format!("{}/", api_url.path());
            api_url.set_path(&path);
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| KbError::fetch(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url,
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.api_url
            .join(path)
            .map_err(|e| KbError::validation(format!("invalid endpoint '{path}': {e}")))
    }

    /// Resolve a continuation reference: absolute URLs are used verbatim,
    /// anything else is joined onto the API base.
    fn resolve_next(&self, next: &str) -> Result<Url> {
        match Url::parse(next) {
            Ok(url) => Ok(url),
            Err(_) => self.endpoint(next.trim_start_matches('/')),
        }
    }

    async fn read_json(&self, url: &Url, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KbError::http(
                status.as_u16(),
                format!("{url}: HTTP {status}: {body}"),
            ));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| KbError::parse(format!("{url}: invalid JSON: {e}")))
    }

    async fn get_json(&self, url: Url) -> Result<Value> {
        let response = self
            .client
            .get(url.clone())
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| KbError::fetch(format!("{url}: {e}")))?;

        self.read_json(&url, response).await
    }
}

impl CrawlService for HttpCrawlService {
    #[instrument(skip_all, fields(url = %request.url, limit = request.limit))]
    async fn submit(&self, request: &CrawlRequest) -> Result<JobId> {
        let url = self.endpoint("v2/crawl")?;
        let body = SubmitBody {
            url: &request.url,
            limit: request.limit,
            scrape_options: ScrapeOptions {
                formats: ["markdown"],
                only_main_content: request.only_main_content,
                wait_for: request.wait_for_ms,
            },
        };

        let response = self
            .client
            .post(url.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| KbError::submission(format!("{url}: {e}")))?;

        let value = self
            .read_json(&url, response)
            .await
            .map_err(|e| KbError::submission(e.to_string()))?;

        let id = value
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| KbError::submission(format!("no job id in response: {value}")))?;

        debug!(job_id = id, "crawl job submitted");
        Ok(JobId(id.to_string()))
    }

    async fn job_status(&self, job_id: &JobId) -> Result<CrawlJob> {
        let url = self.endpoint(&format!("v2/crawl/{job_id}"))?;
        let value = self.get_json(url).await?;
        parse_status(job_id, &value)
    }

    async fn fetch_results(&self, job_id: &JobId, cursor: &PageCursor) -> Result<ResultBatch> {
        let url = match cursor {
            PageCursor::Start => self.skip_url(job_id, 0)?,
            PageCursor::Skip(n) => self.skip_url(job_id, *n)?,
            PageCursor::Next(next) => self.resolve_next(next)?,
        };

        debug!(%url, "fetching result batch");
        let value = self.get_json(url).await?;
        Ok(ResultBatch::from_json(&value))
    }
}

impl HttpCrawlService {
    fn skip_url(&self, job_id: &JobId, skip: u64) -> Result<Url> {
        let mut url = self.endpoint(&format!("v2/crawl/{job_id}"))?;
        url.query_pairs_mut().append_pair("skip", &skip.to_string());
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service_for(server: &MockServer) -> HttpCrawlService {
        HttpCrawlService::with_endpoint(
            Url::parse(&server.uri()).unwrap(),
            "test-key".into(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn request() -> CrawlRequest {
        CrawlRequest {
            url: "https://docs.example.com/".into(),
            limit: 50,
            only_main_content: true,
            wait_for_ms: 1000,
        }
    }

    #[tokio::test]
    async fn submit_posts_scrape_options_and_returns_id() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/crawl"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({
                "url": "https://docs.example.com/",
                "limit": 50,
                "scrapeOptions": {
                    "formats": ["markdown"],
                    "onlyMainContent": true,
                    "waitFor": 1000
                }
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"success": true, "id": "job-123"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let id = service_for(&server).submit(&request()).await.unwrap();
        assert_eq!(id, JobId("job-123".into()));
    }

    #[tokio::test]
    async fn submit_without_id_is_submission_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/crawl"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": false})))
            .mount(&server)
            .await;

        let err = service_for(&server).submit(&request()).await.unwrap_err();
        assert!(matches!(err, KbError::Submission { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn submit_http_error_is_submission_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/crawl"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;

        let err = service_for(&server).submit(&request()).await.unwrap_err();
        assert!(matches!(err, KbError::Submission { .. }));
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn job_status_parses_counts() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/crawl/job-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "scraping",
                "completed": 4,
                "total": 20
            })))
            .mount(&server)
            .await;

        let job = service_for(&server)
            .job_status(&JobId("job-123".into()))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.completed_count, 4);
        assert_eq!(job.total_count, 20);
    }

    #[tokio::test]
    async fn job_status_garbled_is_parse_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/crawl/job-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "?"})))
            .mount(&server)
            .await;

        let err = service_for(&server)
            .job_status(&JobId("job-123".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, KbError::Parse { .. }));
    }

    #[tokio::test]
    async fn fetch_results_uses_skip_then_follows_next_verbatim() {
        let server = MockServer::start().await;
        let next = format!("{}/v2/crawl/job-123?cursor=opaque-token", server.uri());

        Mock::given(method("GET"))
            .and(path("/v2/crawl/job-123"))
            .and(query_param("skip", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"metadata": {"sourceURL": "https://docs.example.com/a"}, "markdown": "# A"}],
                "next": next
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v2/crawl/job-123"))
            .and(query_param("cursor", "opaque-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [],
                "next": null
            })))
            .mount(&server)
            .await;

        let service = service_for(&server);
        let job = JobId("job-123".into());

        let first = service.fetch_results(&job, &PageCursor::Start).await.unwrap();
        assert_eq!(first.items.len(), 1);
        let next = first.next.expect("continuation");

        let second = service
            .fetch_results(&job, &PageCursor::Next(next))
            .await
            .unwrap();
        assert!(second.items.is_empty());
        assert!(second.next.is_none());
    }

    #[tokio::test]
    async fn fetch_results_server_error_is_transient() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/crawl/job-123"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = service_for(&server)
            .fetch_results(&JobId("job-123".into()), &PageCursor::Skip(10))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn result_batch_tolerates_malformed_data() {
        let batch = ResultBatch::from_json(&json!({"data": "oops", "next": "x"}));
        assert!(batch.items.is_empty());
        assert_eq!(batch.next.as_deref(), Some("x"));

        let batch = ResultBatch::from_json(&json!({"next": ""}));
        assert!(batch.next.is_none());
    }

    #[test]
    fn base_url_without_trailing_slash_keeps_prefix() {
        let service = HttpCrawlService::with_endpoint(
            Url::parse("https://proxy.example.com/firecrawl").unwrap(),
            "k".into(),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            service.endpoint("v2/crawl").unwrap().as_str(),
            "https://proxy.example.com/firecrawl/v2/crawl"
        );
    }
}
