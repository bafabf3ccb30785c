//! Application configuration for kbcrawl.
//!
//! User config lives at `~/.kbcrawl/kbcrawl.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{KbError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "kbcrawl.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".kbcrawl";

// ---------------------------------------------------------------------------
// Config structs (matching kbcrawl.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Crawl service endpoint and credentials.
    #[serde(default)]
    pub service: ServiceSection,

    /// Crawl job parameters.
    #[serde(default)]
    pub crawl: CrawlSection,

    /// Result pagination.
    #[serde(default)]
    pub pagination: PaginationSection,

    /// Output directory and write fan-out.
    #[serde(default)]
    pub output: OutputSection,

    /// Retry of transient network failures.
    #[serde(default)]
    pub retry: RetrySection,
}

/// `[service]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSection {
    /// Base URL of the crawl service API.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.firecrawl.dev".into()
}
fn default_api_key_env() -> String {
    "FIRECRAWL_API_KEY".into()
}
fn default_request_timeout() -> u64 {
    30
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSection {
    /// Maximum number of pages the service should crawl.
    #[serde(default = "default_limit")]
    pub limit: u32,

    /// Seconds between job status polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Ask the service to drop navigation/footer chrome.
    #[serde(default = "default_true")]
    pub only_main_content: bool,

    /// Milliseconds the service waits for each page to render.
    #[serde(default = "default_wait_for")]
    pub wait_for_ms: u64,
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            poll_interval_secs: default_poll_interval(),
            only_main_content: true,
            wait_for_ms: default_wait_for(),
        }
    }
}

fn default_limit() -> u32 {
    100
}
fn default_poll_interval() -> u64 {
    5
}
fn default_true() -> bool {
    true
}
fn default_wait_for() -> u64 {
    1000
}

/// How the result walker advances through batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaginationMode {
    /// Follow the service's `next` reference verbatim.
    FollowNext,
    /// Advance `skip` by a fixed stride per request.
    FixedStride,
}

/// `[pagination]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationSection {
    #[serde(default = "default_pagination_mode")]
    pub mode: PaginationMode,

    /// Items per batch assumed by `fixed-stride`, and the fallback step
    /// after a failed batch in `follow-next`.
    #[serde(default = "default_stride")]
    pub stride: u64,

    /// Consecutive failed batch fetches after which the walk gives up.
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
}

impl Default for PaginationSection {
    fn default() -> Self {
        Self {
            mode: default_pagination_mode(),
            stride: default_stride(),
            max_consecutive_failures: default_max_failures(),
        }
    }
}

fn default_pagination_mode() -> PaginationMode {
    PaginationMode::FollowNext
}
fn default_stride() -> u64 {
    10
}
fn default_max_failures() -> u32 {
    3
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSection {
    /// Knowledge base output directory.
    #[serde(default = "default_base_dir")]
    pub base_dir: String,

    /// Documents written concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Consecutive failed document writes that abort the run.
    #[serde(default = "default_write_failure_limit")]
    pub write_failure_limit: usize,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            concurrency: default_concurrency(),
            write_failure_limit: default_write_failure_limit(),
        }
    }
}

fn default_base_dir() -> String {
    "knowledge_base".into()
}
fn default_concurrency() -> usize {
    4
}
fn default_write_failure_limit() -> usize {
    10
}

/// `[retry]` section. `max_retries = 0` disables retries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default)]
    pub max_retries: u32,

    #[serde(default = "default_backoff")]
    pub initial_backoff_ms: u64,
}

fn default_backoff() -> u64 {
    500
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// No retries at all.
    pub const NONE: RetryPolicy = RetryPolicy {
        max_retries: 0,
        initial_backoff: Duration::ZERO,
    };

    /// Delay before retry number `attempt` (0-based): doubles each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }
}

impl From<&RetrySection> for RetryPolicy {
    fn from(section: &RetrySection) -> Self {
        Self {
            max_retries: section.max_retries,
            initial_backoff: Duration::from_millis(section.initial_backoff_ms),
        }
    }
}

/// Runtime configuration for one crawl run, merged from config file + CLI flags.
///
/// Threaded explicitly through every component; nothing reads ambient state.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Documentation root to crawl.
    pub root_url: Url,
    /// Crawl service base URL.
    pub api_url: Url,
    /// Bearer token for the crawl service.
    pub api_key: String,
    pub request_timeout: Duration,
    /// Page limit passed on submission.
    pub limit: u32,
    pub poll_interval: Duration,
    pub only_main_content: bool,
    pub wait_for_ms: u64,
    pub pagination: PaginationMode,
    pub stride: u64,
    pub max_consecutive_failures: u32,
    /// Knowledge base output directory.
    pub base_dir: PathBuf,
    pub concurrency: usize,
    pub write_failure_limit: usize,
    pub retry: RetryPolicy,
}

impl RunConfig {
    /// Build a run config from the file config, the root URL, and a resolved API key.
    pub fn from_app(config: &AppConfig, root_url: Url, api_key: String) -> Result<Self> {
        let api_url = Url::parse(&config.service.api_url).map_err(|e| {
            KbError::config(format!("invalid service.api_url '{}': {e}", config.service.api_url))
        })?;

        if config.output.concurrency == 0 {
            return Err(KbError::config("output.concurrency must be at least 1"));
        }

        Ok(Self {
            root_url,
            api_url,
            api_key,
            request_timeout: Duration::from_secs(config.service.request_timeout_secs),
            limit: config.crawl.limit,
            poll_interval: Duration::from_secs(config.crawl.poll_interval_secs),
            only_main_content: config.crawl.only_main_content,
            wait_for_ms: config.crawl.wait_for_ms,
            pagination: config.pagination.mode,
            stride: config.pagination.stride.max(1),
            max_consecutive_failures: config.pagination.max_consecutive_failures.max(1),
            base_dir: expand_home(&config.output.base_dir),
            concurrency: config.output.concurrency,
            write_failure_limit: config.output.write_failure_limit.max(1),
            retry: RetryPolicy::from(&config.retry),
        })
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.kbcrawl/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| KbError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.kbcrawl/kbcrawl.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| KbError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| KbError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| KbError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content = toml::to_string_pretty(&config).map_err(|e| KbError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| KbError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the crawl service API key from the configured env var.
pub fn resolve_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.service.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(KbError::config(format!(
            "crawl service API key not found. Set the {var_name} environment variable."
        ))),
    }
}
