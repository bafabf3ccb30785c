//! Core domain types for kbcrawl runs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one pipeline run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Crawl jobs
// ---------------------------------------------------------------------------

/// Opaque identifier issued by the crawl service on submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a crawl job as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Parse the service's status string (case-insensitive).
    ///
    /// The service also reports `scraping` for in-flight jobs; it is
    /// treated as `running`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" | "scraping" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Completed and failed are terminal; polling stops there.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a crawl job, as returned by one status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlJob {
    pub id: JobId,
    pub status: JobStatus,
    /// Pages the service has finished so far.
    pub completed_count: u64,
    /// Pages the service expects to crawl in total.
    pub total_count: u64,
}

// ---------------------------------------------------------------------------
// Pages and classification
// ---------------------------------------------------------------------------

/// One page returned by the crawl service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    pub source_url: String,
    pub markdown_body: String,
}

/// The fixed set of knowledge-base categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    GettingStarted,
    ApiReference,
    Tutorials,
    Examples,
    Nodes,
    Advanced,
    Troubleshooting,
    General,
}

impl Category {
    /// Every category, in rule-precedence order with `General` last.
    pub const ALL: [Category; 8] = [
        Self::GettingStarted,
        Self::ApiReference,
        Self::Tutorials,
        Self::Examples,
        Self::Nodes,
        Self::Advanced,
        Self::Troubleshooting,
        Self::General,
    ];

    /// Directory and front-matter label, e.g. `getting_started`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GettingStarted => "getting_started",
            Self::ApiReference => "api_reference",
            Self::Tutorials => "tutorials",
            Self::Examples => "examples",
            Self::Nodes => "nodes",
            Self::Advanced => "advanced",
            Self::Troubleshooting => "troubleshooting",
            Self::General => "general",
        }
    }

    /// Human-readable heading, e.g. `Getting Started`.
    pub fn title(self) -> &'static str {
        match self {
            Self::GettingStarted => "Getting Started",
            Self::ApiReference => "API Reference",
            Self::Tutorials => "Tutorials",
            Self::Examples => "Examples",
            Self::Nodes => "Nodes",
            Self::Advanced => "Advanced",
            Self::Troubleshooting => "Troubleshooting",
            Self::General => "General",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown category: {s}"))
    }
}

/// Result of classifying one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: Category,
    pub title: String,
    /// Keywords in first-occurrence order. Not deduplicated.
    pub keywords: Vec<String>,
}

impl Classification {
    /// Keywords joined for the `tags` front-matter field.
    pub fn tags(&self) -> String {
        self.keywords.join(", ")
    }
}
