//! Corpus builder: writes documents, then derives the aggregate files.
//!
//! A run moves through `collecting → aggregating → done`. While
//! collecting, each page is classified, assembled, and written to its
//! raw/processed/categorized paths (overwriting earlier output for the same
//! URL). Once the page stream is exhausted, the per-category combined and
//! summary files, the global combined file, and the index are rebuilt from
//! whatever documents are on disk.
//!
//! Output layout:
//! ```text
//! <base>/
//! ├── INDEX.md
//! ├── ALL_DOCS_COMBINED.md
//! ├── raw/<file>.md
//! ├── processed/<file>.md
//! └── categorized/<category>/
//!     ├── <file>.md
//!     ├── _COMBINED_<category>.md
//!     └── _SUMMARY.md
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use kbcrawl_markdown::{FALLBACK_TITLE, RuleSet, parse_document};
use kbcrawl_shared::{Category, Clock, KbError, RawPage, Result, RunConfig};

use crate::assembler::{
    ALL_COMBINED_FILE, CATEGORIZED_DIR, COMBINED_PREFIX, Document, INDEX_FILE, PROCESSED_DIR,
    RAW_DIR, SUMMARY_FILE, assemble,
};

/// Separator written after each document in combined files.
const DOCUMENT_SEPARATOR: &str = "\n\n---\n\n";

// ---------------------------------------------------------------------------
// Config & results
// ---------------------------------------------------------------------------

/// Settings for one corpus build.
#[derive(Debug, Clone)]
pub struct CorpusConfig {
    /// Output base directory.
    pub base_dir: PathBuf,
    /// Domain label written into every document.
    pub domain: String,
    /// Documents written concurrently.
    pub concurrency: usize,
    /// Consecutive failed writes that abort the run.
    pub write_failure_limit: usize,
}

impl CorpusConfig {
    pub fn from_run(config: &RunConfig, domain: &str) -> Self {
        Self {
            base_dir: config.base_dir.clone(),
            domain: domain.to_string(),
            concurrency: config.concurrency,
            write_failure_limit: config.write_failure_limit,
        }
    }
}

/// Where the builder is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Collecting,
    Aggregating,
    Done,
}

/// What happened to one batch of pages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub written: usize,
    pub failed: usize,
    /// Earlier duplicates in the batch replaced by a later page with the same filename.
    pub superseded: usize,
}

/// One category in the aggregated corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySection {
    /// Directory name under `categorized/`.
    pub name: String,
    /// `(file stem, title)` per member, sorted by stem.
    pub members: Vec<(String, String)>,
}

/// Files produced by aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateSummary {
    pub sections: Vec<CategorySection>,
    pub index_path: PathBuf,
    pub combined_path: PathBuf,
    /// Documents in `processed/`.
    pub total_documents: usize,
}

/// Final report of a corpus build.
#[derive(Debug, Clone)]
pub struct CorpusReport {
    /// Documents written during this run.
    pub written: usize,
    pub failed_writes: usize,
    pub superseded: usize,
    /// Pages written this run, per category.
    pub written_by_category: BTreeMap<Category, usize>,
    pub aggregates: AggregateSummary,
}

// ---------------------------------------------------------------------------
// CorpusBuilder
// ---------------------------------------------------------------------------

/// Classifies, assembles, and writes pages, then builds the aggregates.
pub struct CorpusBuilder<'a, C> {
    config: CorpusConfig,
    rules: RuleSet,
    clock: &'a C,
    phase: BuildPhase,
    semaphore: Arc<Semaphore>,
    written: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
    superseded: usize,
    consecutive_failures: usize,
    written_by_category: BTreeMap<Category, usize>,
}

impl<'a, C: Clock> CorpusBuilder<'a, C> {
    /// Create the builder and the output directory skeleton.
    pub fn new(config: CorpusConfig, rules: RuleSet, clock: &'a C) -> Result<Self> {
        for dir in [RAW_DIR, PROCESSED_DIR, CATEGORIZED_DIR] {
            let path = config.base_dir.join(dir);
            std::fs::create_dir_all(&path).map_err(|e| KbError::io(&path, e))?;
        }

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
            config,
            rules,
            clock,
            phase: BuildPhase::Collecting,
            written: Arc::new(AtomicUsize::new(0)),
            failed: Arc::new(AtomicUsize::new(0)),
            superseded: 0,
            consecutive_failures: 0,
            written_by_category: BTreeMap::new(),
        })
    }

    pub fn phase(&self) -> BuildPhase {
        self.phase
    }

    /// Documents written so far.
    pub fn written(&self) -> usize {
        self.written.load(Ordering::Relaxed)
    }

    /// Classify, assemble, and write one batch of pages.
    ///
    /// Pages with the same derived filename are reduced to the last one
    /// before writing, and batches are written in order, so the last
    /// occurrence of a URL in the stream always wins. A failed write is
    /// logged and counted; `write_failure_limit` failures in a row abort
    /// with [`KbError::SystemicWrite`].
    #[instrument(skip_all, fields(pages = pages.len()))]
    pub async fn ingest_batch(&mut self, pages: Vec<RawPage>) -> Result<BatchOutcome> {
        if self.phase != BuildPhase::Collecting {
            return Err(KbError::validation(format!(
                "cannot ingest pages while {:?}",
                self.phase
            )));
        }

        let documents: Vec<Document> = pages
            .iter()
            .map(|page| {
                let classification = self.rules.classify(&page.source_url, &page.markdown_body);
                assemble(
                    &page.source_url,
                    &page.markdown_body,
                    &classification,
                    &self.config.domain,
                    self.clock.now(),
                )
            })
            .collect();

        let (documents, superseded) = keep_last_per_stem(documents);
        self.superseded += superseded;

        let mut handles = Vec::with_capacity(documents.len());
        for doc in documents {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| KbError::validation(format!("write pool closed: {e}")))?;
            let base_dir = self.config.base_dir.clone();
            let written = Arc::clone(&self.written);
            let failed = Arc::clone(&self.failed);
            let category = doc.category();
            let url = doc.front_matter.source_url.clone();

            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let result = write_document(&base_dir, &doc);
                match &result {
                    Ok(()) => written.fetch_add(1, Ordering::Relaxed),
                    Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                };
                result
            });
            handles.push((url, category, handle));
        }

        let mut outcome = BatchOutcome {
            superseded,
            ..BatchOutcome::default()
        };

        for (url, category, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    Err(KbError::validation(format!("write task failed: {e}")))
                }
            };

            match result {
                Ok(()) => {
                    outcome.written += 1;
                    self.consecutive_failures = 0;
                    *self.written_by_category.entry(category).or_default() += 1;
                    debug!(url = %url, %category, "document written");
                }
                Err(e) => {
                    outcome.failed += 1;
                    self.consecutive_failures += 1;
                    warn!(url = %url, error = %e, "failed to write document");

                    if self.consecutive_failures >= self.config.write_failure_limit {
                        return Err(KbError::SystemicWrite {
                            failures: self.consecutive_failures,
                        });
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// Stop collecting and write the aggregate files.
    #[instrument(skip_all, fields(base_dir = %self.config.base_dir.display()))]
    pub fn finish(mut self) -> Result<CorpusReport> {
        self.phase = BuildPhase::Aggregating;
        info!(written = self.written(), "aggregating corpus");

        let aggregates = rebuild_aggregates(&self.config.base_dir, &self.config.domain)?;
        self.phase = BuildPhase::Done;

        Ok(CorpusReport {
            written: self.written.load(Ordering::Relaxed),
            failed_writes: self.failed.load(Ordering::Relaxed),
            superseded: self.superseded,
            written_by_category: self.written_by_category,
            aggregates,
        })
    }
}

/// Keep only the last document per file stem, preserving order.
fn keep_last_per_stem(documents: Vec<Document>) -> (Vec<Document>, usize) {
    let mut last: HashMap<String, usize> = HashMap::new();
    for (i, doc) in documents.iter().enumerate() {
        last.insert(doc.file_stem.clone(), i);
    }

    let total = documents.len();
    let kept: Vec<Document> = documents
        .into_iter()
        .enumerate()
        .filter(|(i, doc)| last.get(&doc.file_stem) == Some(i))
        .map(|(_, doc)| doc)
        .collect();

    let superseded = total - kept.len();
    if superseded > 0 {
        debug!(superseded, "duplicate pages in batch, keeping the last occurrence");
    }
    (kept, superseded)
}

/// Write a document's raw, processed, and categorized copies.
fn write_document(base_dir: &Path, doc: &Document) -> Result<()> {
    let rendered = doc.render();
    write_atomic(&base_dir.join(&doc.paths.raw), &doc.body)?;
    write_atomic(&base_dir.join(&doc.paths.processed), &rendered)?;
    write_atomic(&base_dir.join(&doc.paths.categorized), &rendered)?;
    Ok(())
}

/// Write to a temp file next to `path`, then rename over it.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| KbError::validation(format!("no parent directory for {}", path.display())))?;
    std::fs::create_dir_all(parent).map_err(|e| KbError::write(parent, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::now_v7()));

    std::fs::write(&temp, content).map_err(|e| KbError::write(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        KbError::write(path, e)
    })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Rebuild every aggregate file from the documents under `base_dir`.
///
/// All listings and concatenations are in lexicographic filename order.
/// Category directories without documents get no aggregates.
#[instrument(skip_all, fields(base_dir = %base_dir.display()))]
pub fn rebuild_aggregates(base_dir: &Path, domain: &str) -> Result<AggregateSummary> {
    let categorized = base_dir.join(CATEGORIZED_DIR);
    let mut sections = Vec::new();

    for dir in sorted_subdirs(&categorized)? {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let members = member_documents(&dir)?;
        if members.is_empty() {
            continue;
        }

        let heading = category_heading(&name);
        let mut combined = format!("# {heading} Documentation\n\n");
        let mut summary_members = Vec::with_capacity(members.len());

        for path in &members {
            let content = read(path)?;
            let stem = file_stem(path);
            let title = parse_document(&content)
                .and_then(|doc| doc.get("title"))
                .filter(|t| !t.is_empty())
                .unwrap_or(FALLBACK_TITLE)
                .to_string();

            combined.push_str(&content);
            combined.push_str(DOCUMENT_SEPARATOR);
            summary_members.push((stem, title));
        }

        write_atomic(&dir.join(format!("{COMBINED_PREFIX}{name}.md")), &combined)?;

        let mut summary = format!(
            "# {heading} Summary\n\nDocuments: {}\n\n",
            summary_members.len()
        );
        for (stem, title) in &summary_members {
            summary.push_str(&format!("- {stem}: {title}\n"));
        }
        write_atomic(&dir.join(SUMMARY_FILE), &summary)?;

        debug!(category = %name, documents = summary_members.len(), "category aggregated");
        sections.push(CategorySection {
            name,
            members: summary_members,
        });
    }

    let processed = member_documents(&base_dir.join(PROCESSED_DIR))?;
    let mut all_combined = format!("# {domain} Documentation (Combined)\n\n");
    for path in &processed {
        all_combined.push_str(&read(path)?);
        all_combined.push_str(DOCUMENT_SEPARATOR);
    }
    let combined_path = base_dir.join(ALL_COMBINED_FILE);
    write_atomic(&combined_path, &all_combined)?;

    let index_path = base_dir.join(INDEX_FILE);
    write_atomic(&index_path, &render_index(domain, &sections))?;

    info!(
        categories = sections.len(),
        documents = processed.len(),
        "aggregates written"
    );

    Ok(AggregateSummary {
        sections,
        index_path,
        combined_path,
        total_documents: processed.len(),
    })
}

/// Render `INDEX.md`: one section per category, one bullet per document.
fn render_index(domain: &str, sections: &[CategorySection]) -> String {
    let mut index = format!("# {domain} Documentation Index\n\n");
    for section in sections {
        index.push_str(&format!(
            "## {} ({} documents)\n\n",
            section.name,
            section.members.len()
        ));
        for (stem, _) in &section.members {
            index.push_str(&format!(
                "- [{stem}]({CATEGORIZED_DIR}/{}/{stem}.md)\n",
                section.name
            ));
        }
        index.push('\n');
    }
    index
}

fn category_heading(dir_name: &str) -> String {
    dir_name
        .parse::<Category>()
        .map(|c| c.title().to_string())
        .unwrap_or_else(|_| dir_name.to_string())
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| KbError::io(dir, e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

/// Markdown documents in `dir`, excluding aggregates and in-flight temp
/// files (`*.tmp`), sorted by filename.
fn member_documents(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| KbError::io(dir, e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            path.is_file() && name.ends_with(".md") && !is_aggregate_file(&name)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Aggregate outputs living next to member documents. Document stems may
/// themselves start with `_` (e.g. `file:///a` → `_a`), so only these
/// exact names are excluded.
fn is_aggregate_file(name: &str) -> bool {
    name.starts_with(COMBINED_PREFIX) || name == SUMMARY_FILE
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| KbError::io(path, e))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
