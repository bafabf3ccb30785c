//! The fixed front-matter block.
//!
//! ```text
//! ---
//! title: <title>
//! source_url: <url>
//! domain: <domain>
//! category: <category>
//! tags: <comma-joined keywords>
//! scraped_date: <YYYY-MM-DD>
//! ---
//!
//! <body, unchanged>
//! ```

use kbcrawl_shared::Category;

const DELIMITER: &str = "---";

/// Metadata rendered before a document body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontMatter {
    pub title: String,
    pub source_url: String,
    pub domain: String,
    pub category: Category,
    pub tags: String,
    /// UTC date as `YYYY-MM-DD`.
    pub scraped_date: String,
}

impl FrontMatter {
    /// The `---`-delimited block, followed by a blank line.
    pub fn render(&self) -> String {
        let fields = [
            ("title", self.title.as_str()),
            ("source_url", self.source_url.as_str()),
            ("domain", self.domain.as_str()),
            ("category", self.category.as_str()),
            ("tags", self.tags.as_str()),
            ("scraped_date", self.scraped_date.as_str()),
        ];

        let mut block = String::from("---\n");
        for (key, value) in fields {
            block.push_str(key);
            block.push_str(": ");
            block.push_str(&single_line(value));
            block.push('\n');
        }
        block.push_str("---\n\n");
        block
    }

    /// Front matter followed by `body`, untouched.
    pub fn render_document(&self, body: &str) -> String {
        let mut doc = self.render();
        doc.push_str(body);
        doc
    }
}

/// Values are one line each; collapse any stray line breaks.
fn single_line(value: &str) -> String {
    if value.contains(['\n', '\r']) {
        value.split(['\n', '\r']).filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" ")
    } else {
        value.to_string()
    }
}

/// A document split into its front-matter fields and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDocument<'a> {
    pub fields: Vec<(&'a str, &'a str)>,
    pub body: &'a str,
}

impl<'a> ParsedDocument<'a> {
    /// Value of a front-matter key.
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.fields.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }
}

/// Split a document into front matter and body. Returns `None` when the
/// document does not start with a front-matter block.
pub fn parse_document(doc: &str) -> Option<ParsedDocument<'_>> {
    let rest = doc.strip_prefix("---\n")?;

    let mut fields = Vec::new();
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        offset += line.len();
        let content = line.trim_end_matches('\n');
        if content == DELIMITER {
            let after = &rest[offset..];
            let body = after.strip_prefix('\n').unwrap_or(after);
            return Some(ParsedDocument { fields, body });
        }
        if let Some((key, value)) = content.split_once(": ") {
            fields.push((key, value));
        } else if let Some(key) = content.strip_suffix(':') {
            fields.push((key, ""));
        }
    }

    None
}

/// The body with any front-matter block removed.
pub fn strip_front_matter(doc: &str) -> &str {
    parse_document(doc).map_or(doc, |parsed| parsed.body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FrontMatter {
        FrontMatter {
            title: "Users API".into(),
            source_url: "https://docs.n8n.io/api/users".into(),
            domain: "n8n.io".into(),
            category: Category::ApiReference,
            tags: "users, api, webhook".into(),
            scraped_date: "2026-10-18".into(),
        }
    }

    #[test]
    fn renders_six_keys_in_order() {
        let block = sample().render();
        assert_eq!(
            block,
            "---\n\
             title: Users API\n\
             source_url: https://docs.n8n.io/api/users\n\
             domain: n8n.io\n\
             category: api_reference\n\
             tags: users, api, webhook\n\
             scraped_date: 2026-10-18\n\
             ---\n\n"
        );
    }

    #[test]
    fn body_survives_render_and_strip() {
        let bodies = [
            "# Users API\nUse webhook triggers",
            "",
            "\n\nleading blank lines\n",
            "---\nbody that starts with a rule\n---\n",
            "trailing spaces   \r\nand CRLF\r\n",
        ];
        for body in bodies {
            let doc = sample().render_document(body);
            assert_eq!(strip_front_matter(&doc), body);
        }
    }

    #[test]
    fn parse_reads_fields() {
        let doc = sample().render_document("# Body");
        let parsed = parse_document(&doc).unwrap();
        assert_eq!(parsed.get("title"), Some("Users API"));
        assert_eq!(parsed.get("category"), Some("api_reference"));
        assert_eq!(parsed.get("scraped_date"), Some("2026-10-18"));
        assert_eq!(parsed.get("missing"), None);
        assert_eq!(parsed.fields.len(), 6);
    }

    #[test]
    fn documents_without_front_matter_pass_through() {
        assert!(parse_document("# Just markdown").is_none());
        assert_eq!(strip_front_matter("# Just markdown"), "# Just markdown");
        assert!(parse_document("---\ntitle: unterminated\n").is_none());
    }

    #[test]
    fn multiline_values_are_flattened() {
        let mut fm = sample();
        fm.title = "Line one\nLine two".into();
        let doc = fm.render_document("body");
        let parsed = parse_document(&doc).unwrap();
        assert_eq!(parsed.get("title"), Some("Line one Line two"));
        assert_eq!(parsed.body, "body");
    }
}
