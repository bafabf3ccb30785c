//! Crawl service client, job monitoring, and result pagination.
//!
//! This crate provides:
//! - [`CrawlService`]: the seam to the remote crawl service, with
//!   [`HttpCrawlService`] as the production implementation
//! - [`JobMonitor`]: submits a crawl job and polls it to a terminal state
//! - [`PageWalker`]: lazily walks paginated crawl results
//! - [`testing::ScriptedService`]: an in-memory service for tests

pub mod monitor;
pub mod retry;
pub mod service;
pub mod testing;
pub mod walker;

pub use monitor::{JobMonitor, NoopObserver, PollObserver};
pub use retry::with_retry;
pub use service::{CrawlRequest, CrawlService, HttpCrawlService, PageCursor, ResultBatch};
pub use walker::{PageWalker, WalkConfig, WalkStats, parse_item};
