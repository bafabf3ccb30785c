//! Shared types, error model, and configuration for kbcrawl.
//!
//! This crate is the foundation depended on by all other kbcrawl crates.
//! It provides:
//! - [`KbError`]: the unified error type
//! - Domain types ([`CrawlJob`], [`JobStatus`], [`RawPage`], [`Category`], [`Classification`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)
//! - The [`Clock`] abstraction used for polling sleeps and document timestamps

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AppConfig, CrawlSection, OutputSection, PaginationMode, PaginationSection, RetryPolicy,
    RetrySection, RunConfig, ServiceSection, config_dir, config_file_path, expand_home,
    init_config, load_config, load_config_from, resolve_api_key,
};
pub use error::{KbError, Result};
pub use types::{Category, Classification, CrawlJob, JobId, JobStatus, RawPage, RunId};
