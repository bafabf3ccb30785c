//! Document assembly: front matter, derived filenames, and storage paths.
//!
//! A document's identity is its source URL. The same URL always maps to
//! the same filename stem and the same three paths, so re-runs overwrite
//! earlier output instead of duplicating it.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use kbcrawl_markdown::FrontMatter;
use kbcrawl_shared::{Category, Classification};

/// Unmodified page bodies.
pub const RAW_DIR: &str = "raw";
/// Documents with front matter.
pub const PROCESSED_DIR: &str = "processed";
/// Documents with front matter, grouped by category.
pub const CATEGORIZED_DIR: &str = "categorized";
/// Prefix of per-category combined files (`_COMBINED_<category>.md`).
pub const COMBINED_PREFIX: &str = "_COMBINED_";
/// Per-category summary file.
pub const SUMMARY_FILE: &str = "_SUMMARY.md";
/// Global index at the base directory.
pub const INDEX_FILE: &str = "INDEX.md";
/// Every processed document concatenated, at the base directory.
pub const ALL_COMBINED_FILE: &str = "ALL_DOCS_COMBINED.md";

/// Storage paths of one document, relative to the output base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPaths {
    pub raw: PathBuf,
    pub processed: PathBuf,
    pub categorized: PathBuf,
}

impl DocumentPaths {
    pub fn new(file_stem: &str, category: Category) -> Self {
        let file_name = format!("{file_stem}.md");
        Self {
            raw: PathBuf::from(RAW_DIR).join(&file_name),
            processed: PathBuf::from(PROCESSED_DIR).join(&file_name),
            categorized: PathBuf::from(CATEGORIZED_DIR)
                .join(category.as_str())
                .join(&file_name),
        }
    }
}

/// A finished knowledge-base document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub front_matter: FrontMatter,
    /// The page's markdown, exactly as fetched.
    pub body: String,
    /// Filename without extension, derived from the source URL.
    pub file_stem: String,
    pub paths: DocumentPaths,
}

impl Document {
    pub fn category(&self) -> Category {
        self.front_matter.category
    }

    /// Front matter followed by the untouched body.
    pub fn render(&self) -> String {
        self.front_matter.render_document(&self.body)
    }
}

/// Build a document for one classified page.
///
/// `timestamp` is taken per document (not per run), so long runs that
/// cross midnight stamp each page with the day it was assembled.
pub fn assemble(
    source_url: &str,
    markdown_body: &str,
    classification: &Classification,
    domain: &str,
    timestamp: DateTime<Utc>,
) -> Document {
    let file_stem = sanitize(source_url);
    let paths = DocumentPaths::new(&file_stem, classification.category);

    Document {
        front_matter: FrontMatter {
            title: classification.title.clone(),
            source_url: source_url.to_string(),
            domain: domain.to_string(),
            category: classification.category,
            tags: classification.tags(),
            scraped_date: timestamp.format("%Y-%m-%d").to_string(),
        },
        body: markdown_body.to_string(),
        file_stem,
        paths,
    }
}

/// Derive a filename stem from a URL: strip the protocol, turn `/` and
/// `:` into `_`, collapse runs of `_`, and drop trailing `_`.
///
/// `https://docs.n8n.io/nodes/trigger/` → `docs.n8n.io_nodes_trigger`.
/// A URL with nothing left after stripping maps to `index`.
pub fn sanitize(source_url: &str) -> String {
    let stripped = strip_protocol(source_url);

    let mut out = String::with_capacity(stripped.len());
    for c in stripped.chars() {
        let c = if c == '/' || c == ':' { '_' } else { c };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }

    let trimmed = out.trim_end_matches('_');
    if trimmed.is_empty() {
        "index".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Derive the run's domain label from the root URL: strip the protocol and
/// a leading `docs.` or `www.`, then keep the host up to the first `/`.
///
/// `https://docs.n8n.io/` → `n8n.io`.
pub fn derive_domain(root_url: &str) -> String {
    let stripped = strip_protocol(root_url);
    let stripped = stripped
        .strip_prefix("docs.")
        .or_else(|| stripped.strip_prefix("www."))
        .unwrap_or(stripped);

    stripped
        .split('/')
        .next()
        .unwrap_or(stripped)
        .to_string()
}

fn strip_protocol(url: &str) -> &str {
    url.split_once("://").map_or(url, |(_, rest)| rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kbcrawl_markdown::{classify, strip_front_matter};

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn sanitize_strips_protocol_and_separators() {
        assert_eq!(
            sanitize("https://docs.n8n.io/nodes/trigger/"),
            "docs.n8n.io_nodes_trigger"
        );
        assert_eq!(sanitize("http://localhost:8080/a//b"), "localhost_8080_a_b");
        assert_eq!(sanitize("docs.example.com/guide"), "docs.example.com_guide");
        assert_eq!(sanitize("https://"), "index");
    }

    #[test]
    fn sanitize_is_deterministic_and_distinguishes_paths() {
        let a = sanitize("https://docs.n8n.io/api/users");
        let b = sanitize("https://docs.n8n.io/api/users");
        let c = sanitize("https://docs.n8n.io/api/user");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(!a.contains("__"));
    }

    #[test]
    fn domain_drops_docs_or_www_prefix() {
        assert_eq!(derive_domain("https://docs.n8n.io/"), "n8n.io");
        assert_eq!(derive_domain("https://www.example.com/docs/start"), "example.com");
        assert_eq!(derive_domain("http://api.example.com"), "api.example.com");
        assert_eq!(derive_domain("example.org/path"), "example.org");
    }

    #[test]
    fn paths_derive_from_stem_and_category() {
        let paths = DocumentPaths::new("docs.n8n.io_api_users", Category::ApiReference);
        assert_eq!(paths.raw, PathBuf::from("raw/docs.n8n.io_api_users.md"));
        assert_eq!(
            paths.processed,
            PathBuf::from("processed/docs.n8n.io_api_users.md")
        );
        assert_eq!(
            paths.categorized,
            PathBuf::from("categorized/api_reference/docs.n8n.io_api_users.md")
        );
    }

    #[test]
    fn assemble_fills_front_matter() {
        let url = "https://docs.n8n.io/api/users";
        let body = "# Users API\nUse webhook triggers";
        let doc = assemble(url, body, &classify(url, body), "n8n.io", at(2024, 5, 17));

        assert_eq!(doc.file_stem, "docs.n8n.io_api_users");
        assert_eq!(doc.category(), Category::ApiReference);
        assert_eq!(doc.front_matter.title, "Users API");
        assert_eq!(doc.front_matter.tags, "users, api, trigger, webhook, api");
        assert_eq!(doc.front_matter.scraped_date, "2024-05-17");
        assert!(doc.render().starts_with("---\ntitle: Users API\n"));
    }

    #[test]
    fn assembly_is_idempotent_apart_from_date() {
        let url = "https://docs.n8n.io/getting-started/intro";
        let body = "# Intro\nWelcome";
        let classification = classify(url, body);

        let first = assemble(url, body, &classification, "n8n.io", at(2024, 1, 1));
        let second = assemble(url, body, &classification, "n8n.io", at(2024, 1, 2));

        assert_eq!(first.paths, second.paths);
        assert_eq!(first.body, second.body);
        let strip_date = |d: &Document| {
            d.render()
                .lines()
                .filter(|l| !l.starts_with("scraped_date:"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        assert_eq!(strip_date(&first), strip_date(&second));
        assert_ne!(first.render(), second.render());
    }

    #[test]
    fn rendered_body_round_trips() {
        let url = "https://docs.n8n.io/examples/slack";
        let body = "# Slack\n\n```json\n{\"a\": 1}\n```\n\n---\n\nFooter  \n";
        let doc = assemble(url, body, &classify(url, body), "n8n.io", at(2024, 1, 1));
        assert_eq!(strip_front_matter(&doc.render()), body);
    }
}
