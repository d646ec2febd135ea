//! Category records: schema-typed rows plus optional links.
//!
//! ```text
//! @DECISIONS
//! @SCHEMA
//! ID|TIMESTAMP|DECISION|RATIONALE|IMPACT|CONFIDENCE|IMPACT_SCORE
//!
//! @DATA
//! 1|2025-03-01T10:00:00Z|use JWT for auth|stateless sessions|HIGH|HIGH|0.8
//!
//! @LINKS
//! C:4->D:1
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::document::Document;
use crate::error::{FormatError, FormatResult};
use crate::index::render_section;
use crate::link::{Link, LinkLine};
use crate::FIELD_SEPARATOR;

const SEPARATOR: &str = "|";

/// Kinds of category record kept per project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Conversations,
    Decisions,
    Tasks,
    Issues,
    Architecture,
    Knowledge,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Conversations,
        Category::Decisions,
        Category::Tasks,
        Category::Issues,
        Category::Architecture,
        Category::Knowledge,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Conversations => "conversations",
            Self::Decisions => "decisions",
            Self::Tasks => "tasks",
            Self::Issues => "issues",
            Self::Architecture => "architecture",
            Self::Knowledge => "knowledge",
        }
    }

    /// Header section name opening the record (`@DECISIONS`).
    pub fn header(&self) -> &'static str {
        match self {
            Self::Conversations => "CONVERSATIONS",
            Self::Decisions => "DECISIONS",
            Self::Tasks => "TASKS",
            Self::Issues => "ISSUES",
            Self::Architecture => "ARCHITECTURE",
            Self::Knowledge => "KNOWLEDGE",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.aicf", self.name())
    }

    /// Prefix used for this category's ids in links.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Conversations => "C",
            Self::Decisions => "D",
            Self::Tasks => "T",
            Self::Issues => "I",
            Self::Architecture => "A",
            Self::Knowledge => "K",
        }
    }

    pub fn default_schema(&self) -> &'static [&'static str] {
        match self {
            Self::Conversations => &[
                "ID",
                "TIMESTAMP",
                "SESSION",
                "CHECKPOINT",
                "MESSAGES",
                "TOKENS",
                "SUMMARY",
                "CONFIDENCE",
                "IMPACT_SCORE",
            ],
            Self::Decisions => &[
                "ID",
                "TIMESTAMP",
                "DECISION",
                "RATIONALE",
                "IMPACT",
                "CONFIDENCE",
                "IMPACT_SCORE",
            ],
            Self::Tasks => &["ID", "TIMESTAMP", "TASK", "STATUS", "PRIORITY"],
            Self::Issues => &["ID", "TIMESTAMP", "ISSUE", "SEVERITY", "STATUS"],
            Self::Architecture => &["ID", "TIMESTAMP", "COMPONENT", "DESCRIPTION"],
            Self::Knowledge => &["ID", "TIMESTAMP", "INSIGHT", "CATEGORY", "CONFIDENCE"],
        }
    }

    pub fn from_header(header: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.header() == header)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = FormatError;

    fn from_str(s: &str) -> FormatResult<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.name() == s || c.header() == s)
            .ok_or_else(|| FormatError::UnknownCategory(s.to_string()))
    }
}

/// One schema-aligned data row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Row {
    values: Vec<String>,
}

impl Row {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Split `line` and align it to `width` fields.
    ///
    /// Missing trailing values become empty strings. Surplus values are
    /// rejoined into the last field, so an unescaped separator in the final
    /// free-text column survives a round trip.
    pub fn parse_aligned(line: &str, width: usize) -> Self {
        let mut values: Vec<String> = line.split(FIELD_SEPARATOR).map(String::from).collect();
        if width > 0 && values.len() > width {
            let tail = values.split_off(width - 1).join(SEPARATOR);
            values.push(tail);
        }
        values.resize(width, String::new());
        Self { values }
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Vec<String> {
        &mut self.values
    }

    /// Value of `field`, resolved positionally against `schema`.
    pub fn get<'a>(&'a self, schema: &[String], field: &str) -> Option<&'a str> {
        let idx = schema.iter().position(|f| f == field)?;
        self.values.get(idx).map(String::as_str)
    }

    pub fn to_line(&self) -> String {
        self.values.join(SEPARATOR)
    }
}

/// Parsed category record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CategoryRecord {
    /// Raw name of the leading category header, when the file has one.
    pub header: Option<String>,
    pub schema: Vec<String>,
    pub rows: Vec<Row>,
    /// `None` when the file has no LINKS section.
    pub links: Option<Vec<LinkLine>>,
}

impl CategoryRecord {
    /// A blank record with the category's default schema and an empty LINKS section.
    pub fn new(category: Category) -> Self {
        Self {
            header: Some(category.header().to_string()),
            schema: category
                .default_schema()
                .iter()
                .map(|f| f.to_string())
                .collect(),
            rows: Vec::new(),
            links: Some(Vec::new()),
        }
    }

    pub fn category(&self) -> Option<Category> {
        self.header.as_deref().and_then(Category::from_header)
    }

    pub fn field_index(&self, field: &str) -> Option<usize> {
        self.schema.iter().position(|f| f == field)
    }

    /// Rows whose `field` equals `value`. This is the only query facility.
    pub fn filter(&self, field: &str, value: &str) -> Vec<&Row> {
        match self.field_index(field) {
            Some(idx) => self
                .rows
                .iter()
                .filter(|r| r.values.get(idx).map(String::as_str) == Some(value))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Next free numeric `ID` (max existing + 1, starting at 1).
    pub fn next_id(&self) -> u64 {
        let Some(idx) = self.field_index("ID") else {
            return self.rows.len() as u64 + 1;
        };
        self.rows
            .iter()
            .filter_map(|r| r.values.get(idx)?.parse::<u64>().ok())
            .max()
            .map_or(1, |max| max + 1)
    }

    pub fn all_links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter().flatten().flat_map(|line| line.links.iter())
    }
}

/// Parse a category record.
///
/// A file without a SCHEMA section yields an empty schema and every DATA row
/// is dropped. Malformed LINKS lines are skipped. Both cases are logged.
pub fn parse_category(text: &str) -> CategoryRecord {
    let doc = Document::parse(text);
    let mut record = CategoryRecord::default();

    if let Some(first) = doc.sections().first() {
        if !matches!(first.name(), "SCHEMA" | "DATA" | "LINKS") {
            record.header = Some(first.name().to_string());
        }
    }

    if let Some(schema) = doc.section("SCHEMA") {
        if let Some(line) = schema.rows().next() {
            record.schema = line.split(FIELD_SEPARATOR).map(String::from).collect();
        }
    }

    if let Some(data) = doc.section("DATA") {
        if record.schema.is_empty() {
            let dropped = data.rows().count();
            if dropped > 0 {
                warn!(dropped, "category record has no schema; data rows dropped");
            }
        } else {
            let width = record.schema.len();
            record.rows = data
                .rows()
                .map(|line| Row::parse_aligned(line, width))
                .collect();
        }
    }

    if let Some(links) = doc.section("LINKS") {
        let mut lines = Vec::new();
        for raw in links.rows() {
            match LinkLine::parse(raw) {
                Ok(line) if !line.is_empty() => lines.push(line),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "skipping malformed link line"),
            }
        }
        record.links = Some(lines);
    }

    record
}

/// Serialise a category record.
pub fn compile_category(record: &CategoryRecord) -> String {
    let mut out = String::new();
    if let Some(header) = &record.header {
        out.push_str(&render_section(header, &[]));
    }

    let schema = if record.schema.is_empty() {
        Vec::new()
    } else {
        vec![record.schema.join(SEPARATOR)]
    };
    let data: Vec<String> = record.rows.iter().map(Row::to_line).collect();

    let mut sections = vec![render_section("SCHEMA", &schema), render_section("DATA", &data)];
    if let Some(links) = &record.links {
        let lines: Vec<String> = links.iter().map(ToString::to_string).collect();
        sections.push(render_section("LINKS", &lines));
    }
    out.push_str(&sections.join("\n"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::TypedId;

    const DECISIONS: &str = "@DECISIONS\n@SCHEMA\nID|TIMESTAMP|DECISION|RATIONALE|IMPACT|CONFIDENCE|IMPACT_SCORE\n\n@DATA\n1|2025-03-01T10:00:00Z|use JWT for auth|stateless|HIGH|HIGH|0.8\n2|2025-03-02T10:00:00Z|keep sqlite|simple|LOW|MEDIUM|0.3\n\n@LINKS\nC:1->D:1|C:1->T:1\nC:2->D:2\n";

    #[test]
    fn test_parse_category_rows_and_links() {
        let record = parse_category(DECISIONS);
        assert_eq!(record.category(), Some(Category::Decisions));
        assert_eq!(record.schema.len(), 7);
        assert_eq!(record.rows.len(), 2);
        assert_eq!(
            record.rows[0].get(&record.schema, "DECISION"),
            Some("use JWT for auth")
        );
        assert_eq!(record.all_links().count(), 3);
        assert_eq!(record.links.as_ref().unwrap()[0].links.len(), 2);
    }

    #[test]
    fn test_category_round_trip() {
        assert_eq!(compile_category(&parse_category(DECISIONS)), DECISIONS);
    }

    #[test]
    fn test_blank_record_round_trip() {
        let text = compile_category(&CategoryRecord::new(Category::Tasks));
        assert_eq!(
            text,
            "@TASKS\n@SCHEMA\nID|TIMESTAMP|TASK|STATUS|PRIORITY\n\n@DATA\n\n@LINKS\n"
        );
        assert_eq!(compile_category(&parse_category(&text)), text);
    }

    #[test]
    fn test_short_row_is_padded() {
        let record = parse_category("@SCHEMA\nA|B|C\n\n@DATA\nx|y\n");
        assert_eq!(record.rows[0].values(), &["x", "y", ""]);
    }

    #[test]
    fn test_long_row_rejoins_into_last_field() {
        let record = parse_category("@SCHEMA\nID|NOTE\n\n@DATA\n1|a|b\n");
        assert_eq!(record.rows[0].get(&record.schema, "NOTE"), Some("a|b"));
        assert_eq!(record.rows[0].to_line(), "1|a|b");
    }

    #[test]
    fn test_missing_schema_drops_rows() {
        let record = parse_category("@ISSUES\n@DATA\n1|x\n2|y\n");
        assert!(record.schema.is_empty());
        assert!(record.rows.is_empty());
    }

    #[test]
    fn test_missing_links_section_stays_absent() {
        let text = "@SCHEMA\nID\n\n@DATA\n1\n";
        let record = parse_category(text);
        assert!(record.links.is_none());
        assert_eq!(compile_category(&record), text);
    }

    #[test]
    fn test_filter_and_next_id() {
        let record = parse_category(DECISIONS);
        let high = record.filter("IMPACT", "HIGH");
        assert_eq!(high.len(), 1);
        assert!(record.filter("NO_SUCH_FIELD", "x").is_empty());
        assert_eq!(record.next_id(), 3);
        assert_eq!(CategoryRecord::new(Category::Issues).next_id(), 1);
    }

    #[test]
    fn test_malformed_link_line_skipped() {
        let record = parse_category("@SCHEMA\nID\n\n@DATA\n\n@LINKS\nC:1->D:1\nbroken\n");
        assert_eq!(record.all_links().count(), 1);
        assert_eq!(
            record.all_links().next().unwrap().to,
            TypedId::new("D", 1)
        );
    }

    #[test]
    fn test_category_from_str() {
        assert_eq!("tasks".parse::<Category>().unwrap(), Category::Tasks);
        assert_eq!("KNOWLEDGE".parse::<Category>().unwrap(), Category::Knowledge);
        assert!("nope".parse::<Category>().is_err());
    }
}
