//! URL-pattern classification with title and keyword extraction.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use kbcrawl_shared::{Category, Classification};

/// Title used when the body has no level-1 heading.
pub const FALLBACK_TITLE: &str = "Untitled";

/// Literals appended to the keywords when the body mentions them.
const BODY_KEYWORDS: [&str; 3] = ["trigger", "webhook", "api"];

/// Built-in rules in precedence order. Each pattern is a case-insensitive
/// regex tested against the source URL; the first matching rule wins.
pub const DEFAULT_RULES: &[(Category, &[&str])] = &[
    (
        Category::GettingStarted,
        &["getting[-_ ]?started", "quick[-_ ]?start", "intro", "installation"],
    ),
    (Category::ApiReference, &["api", "reference", "endpoint"]),
    (Category::Tutorials, &["tutorial", "guide", "how[-_ ]?to"]),
    (Category::Examples, &["example", "workflow", "template"]),
    (Category::Nodes, &["node", "integration", "connector"]),
    (Category::Advanced, &["advanced", "expert"]),
    (Category::Troubleshooting, &["troubleshoot", "faq", "error"]),
];

static DEFAULT_RULE_SET: LazyLock<RuleSet> = LazyLock::new(|| {
    let rules = DEFAULT_RULES
        .iter()
        .map(|(category, patterns)| {
            ClassificationRule::new(*category, patterns).expect("valid built-in pattern")
        })
        .collect();
    RuleSet::new(rules)
});

/// One `patterns → category` pair.
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    category: Category,
    pattern: Regex,
}

impl ClassificationRule {
    /// Build a rule matching any of `patterns` (case-insensitive).
    pub fn new(category: Category, patterns: &[&str]) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!("(?i){}", patterns.join("|")))?;
        Ok(Self { category, pattern })
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn matches(&self, source_url: &str) -> bool {
        self.pattern.is_match(source_url)
    }
}

/// Ordered, first-match-wins rule list. Unmatched URLs are `general`.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<ClassificationRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    /// Category of a source URL.
    pub fn category_for(&self, source_url: &str) -> Category {
        self.rules
            .iter()
            .find(|rule| rule.matches(source_url))
            .map_or(Category::General, ClassificationRule::category)
    }

    /// Classify a page: category from the URL, title and keywords from the body.
    pub fn classify(&self, source_url: &str, markdown_body: &str) -> Classification {
        let category = self.category_for(source_url);
        let title = extract_title(markdown_body);
        let keywords = extract_keywords(&title, markdown_body);

        debug!(url = source_url, %category, title = %title, "classified page");

        Classification {
            category,
            title,
            keywords,
        }
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        DEFAULT_RULE_SET.clone()
    }
}

/// Classify with the built-in rules.
pub fn classify(source_url: &str, markdown_body: &str) -> Classification {
    DEFAULT_RULE_SET.classify(source_url, markdown_body)
}

/// Text of the first `# ` heading line, or [`FALLBACK_TITLE`].
pub fn extract_title(markdown_body: &str) -> String {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^# (.+)$").expect("valid regex"));

    H1_RE
        .captures(markdown_body)
        .map(|c| c[1].trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| FALLBACK_TITLE.to_string())
}

/// Title tokens (lower-cased, non-alphanumerics removed), then each of
/// `trigger`, `webhook`, `api` once if the body mentions it.
///
/// Title tokens are not deduplicated against the appended literals, so a
/// title containing "API" on a page mentioning "api" yields `api` twice.
pub fn extract_keywords(title: &str, markdown_body: &str) -> Vec<String> {
    let cleaned: String = title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    let mut keywords: Vec<String> = cleaned.split_whitespace().map(String::from).collect();

    let body = markdown_body.to_lowercase();
    for literal in BODY_KEYWORDS {
        if body.contains(literal) {
            keywords.push(literal.to_string());
        }
    }

    keywords
}
