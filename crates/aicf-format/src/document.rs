//! Lossless section model for record files.
//!
//! A record file is an optional preamble followed by sections. Each section
//! starts at a header line (`@NAME`) and runs until the next header or the end
//! of the file. [`Document`] keeps every line exactly as read, so updating one
//! section and serialising again leaves all other bytes untouched.

use crate::SECTION_MARKER;

/// One named, delimited region of a record file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    name: String,
    header: String,
    body: Vec<String>,
}

impl Section {
    /// Create an empty section with a canonical `@NAME` header.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            header: format!("{SECTION_MARKER}{name}"),
            body: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw body lines, blank lines included.
    pub fn body(&self) -> &[String] {
        &self.body
    }

    /// Body lines that carry content (blank lines skipped).
    pub fn rows(&self) -> impl Iterator<Item = &str> {
        self.body
            .iter()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.trim().is_empty())
    }

    /// Body with trailing blank lines removed.
    pub fn content_lines(&self) -> &[String] {
        &self.body[..self.content_end()]
    }

    /// Insert `line` after the last non-blank body line.
    ///
    /// Trailing blank lines (the separator before the next header) stay after
    /// the inserted row.
    pub fn append_row(&mut self, line: &str) {
        let at = self.content_end();
        self.body.insert(at, line.to_string());
    }

    /// Prepend `line` before the first body line.
    pub fn prepend_row(&mut self, line: &str) {
        self.body.insert(0, line.to_string());
    }

    /// Replace the whole body, keeping the existing trailing separator lines.
    pub fn replace_body<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let trailing: Vec<String> = self.body.split_off(self.content_end());
        self.body = lines.into_iter().map(Into::into).collect();
        self.body.extend(trailing);
    }

    fn content_end(&self) -> usize {
        self.body
            .iter()
            .rposition(|l| !l.trim().is_empty())
            .map(|i| i + 1)
            .unwrap_or(0)
    }
}

/// An entire record file as preamble plus ordered sections.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document {
    preamble: Vec<String>,
    sections: Vec<Section>,
}

impl Document {
    /// Parse text into sections. Never fails; text without any header ends up
    /// entirely in the preamble.
    pub fn parse(text: &str) -> Self {
        let mut doc = Document::default();
        for line in text.split('\n') {
            match header_name(line) {
                Some(name) => doc.sections.push(Section {
                    name: name.to_string(),
                    header: line.to_string(),
                    body: Vec::new(),
                }),
                None => match doc.sections.last_mut() {
                    Some(section) => section.body.push(line.to_string()),
                    None => doc.preamble.push(line.to_string()),
                },
            }
        }
        doc
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// First section with the given name.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn section_mut(&mut self, name: &str) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.section(name).is_some()
    }

    /// Section names in file order.
    pub fn section_names(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name.as_str()).collect()
    }

    /// Add a new section at the end of the document.
    pub fn push_section(&mut self, section: Section) {
        self.sections.push(section);
    }
}

impl std::fmt::Display for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        let lines = self.preamble.iter().chain(
            self.sections
                .iter()
                .flat_map(|s| std::iter::once(&s.header).chain(s.body.iter())),
        );
        for line in lines {
            if !first {
                f.write_str("\n")?;
            }
            f.write_str(line)?;
            first = false;
        }
        Ok(())
    }
}

/// Return the section name if `line` is a header line.
///
/// A header is the marker followed immediately by an uppercase name
/// (`[A-Z][A-Z0-9_]*`) and nothing else on the line.
pub fn header_name(line: &str) -> Option<&str> {
    let rest = line
        .trim_end_matches('\r')
        .strip_prefix(SECTION_MARKER)?;
    let mut chars = rest.chars();
    let first = chars.next()?;
    if !first.is_ascii_uppercase() {
        return None;
    }
    if chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_') {
        Some(rest)
    } else {
        None
    }
}
