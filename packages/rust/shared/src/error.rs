//! Error types for kbcrawl.
//!
//! Library crates use [`KbError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all kbcrawl operations.
#[derive(Debug, thiserror::Error)]
pub enum KbError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The crawl service did not return a parseable job identifier.
    #[error("crawl submission failed: {message}")]
    Submission { message: String },

    /// The crawl service reported the job as failed.
    #[error("crawl job {job_id} failed")]
    CrawlFailed { job_id: String },

    /// No response (or a garbled one) while polling job status.
    #[error("status poll for job {job_id} failed: {message}")]
    StatusPoll { job_id: String, message: String },

    /// Network/HTTP error talking to the crawl service.
    #[error("fetch error: {message}")]
    Fetch {
        message: String,
        /// HTTP status, if the service answered at all.
        status: Option<u16>,
    },

    /// Response parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// A single document could not be written to the output directory.
    #[error("write error at {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Document writes keep failing; the output directory is unusable.
    #[error("aborting after {failures} consecutive write failures")]
    SystemicWrite { failures: usize },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KbError>;

impl KbError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a submission error from any displayable message.
    pub fn submission(msg: impl Into<String>) -> Self {
        Self::Submission {
            message: msg.into(),
        }
    }

    /// Create a transport-level fetch error (no HTTP status).
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch {
            message: msg.into(),
            status: None,
        }
    }

    /// Create a fetch error for a non-success HTTP response.
    pub fn http(status: u16, msg: impl Into<String>) -> Self {
        Self::Fetch {
            message: msg.into(),
            status: Some(status),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a failed document write.
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    /// Whether a retry could plausibly succeed: transport failures,
    /// rate limiting, and server-side errors.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Fetch { status: None, .. } => true,
            Self::Fetch {
                status: Some(code), ..
            } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}
