//! Page classification and front matter for knowledge-base documents.
//!
//! - [`classify`] / [`RuleSet`]: URL-pattern categorization, title and
//!   keyword extraction. Pure and total: every page gets a category.
//! - [`FrontMatter`]: the fixed six-key metadata block prepended to every
//!   document, plus parsing it back out.

mod classify;
mod frontmatter;

pub use classify::{
    ClassificationRule, DEFAULT_RULES, FALLBACK_TITLE, RuleSet, classify, extract_keywords,
    extract_title,
};
pub use frontmatter::{FrontMatter, ParsedDocument, parse_document, strip_front_matter};
