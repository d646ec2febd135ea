//! Targeted, in-place updates of record files.
//!
//! Every update reads the file into a [`Document`], mutates one or more
//! sections, and writes the whole document back atomically (temp file in the
//! same directory, then rename). Sections that were not touched keep their
//! exact bytes.
//!
//! Edits of any file other than the index also advance `PROJECT.last_update`
//! in the index the writer is bound to.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use aicf_format::{validate_value, ActivityEntry, Document};
use chrono::{SecondsFormat, Utc};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{WriteError, WriteResult};

const SEPARATOR: &str = "|";

/// Result of an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// The target section does not exist; nothing was written.
    SectionMissing,
}

/// Section-level writer bound to one project index.
#[derive(Debug, Clone)]
pub struct SectionWriter {
    index_path: PathBuf,
}

impl SectionWriter {
    pub fn new(index_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Apply `f` to the parsed document at `path` and persist the result.
    ///
    /// Nothing is written when `f` fails.
    pub fn edit<T, F>(&self, path: &Path, f: F) -> WriteResult<T>
    where
        F: FnOnce(&mut Document) -> WriteResult<T>,
    {
        let mut doc = read_document(path)?;
        let out = f(&mut doc)?;
        self.commit(path, doc)?;
        Ok(out)
    }

    fn commit(&self, path: &Path, mut doc: Document) -> WriteResult<()> {
        let now = now_rfc3339();
        if path == self.index_path {
            set_key_in(&mut doc, path, "PROJECT", "last_update", &now)?;
            write_atomic(path, &doc.to_string())
        } else {
            write_atomic(path, &doc.to_string())?;
            self.touch_last_update(&now)
        }
    }

    /// Append one row of field values to `section`.
    ///
    /// A missing section is a logged no-op.
    pub fn append_row<S: AsRef<str>>(
        &self,
        path: &Path,
        section: &str,
        values: &[S],
    ) -> WriteResult<AppendOutcome> {
        let mut doc = read_document(path)?;
        let outcome = append_row_in(&mut doc, path, section, values)?;
        if outcome == AppendOutcome::Appended {
            self.commit(path, doc)?;
        }
        Ok(outcome)
    }

    /// Replace the body of `section`. Fails when the section does not exist.
    pub fn replace_section<S: AsRef<str>>(
        &self,
        path: &Path,
        section: &str,
        lines: &[S],
    ) -> WriteResult<()> {
        self.edit(path, |doc| replace_in(doc, path, section, lines))
    }

    /// Update or append one `key=value` line in `section`.
    pub fn set_key(&self, path: &Path, section: &str, key: &str, value: &str) -> WriteResult<()> {
        self.edit(path, |doc| set_key_in(doc, path, section, key, value))
    }

    /// Advance `PROJECT.last_update` in the bound index.
    ///
    /// Skipped when the index does not exist yet.
    pub fn touch_last_update(&self, now: &str) -> WriteResult<()> {
        if !self.index_path.exists() {
            debug!(path = %self.index_path.display(), "no index to touch");
            return Ok(());
        }
        let mut doc = read_document(&self.index_path)?;
        set_key_in(&mut doc, &self.index_path, "PROJECT", "last_update", now)?;
        write_atomic(&self.index_path, &doc.to_string())
    }
}

/// Validate `values` and append them as one row.
pub fn append_row_in<S: AsRef<str>>(
    doc: &mut Document,
    path: &Path,
    section: &str,
    values: &[S],
) -> WriteResult<AppendOutcome> {
    for value in values {
        validate_value(value.as_ref()).map_err(|source| WriteError::InvalidRow {
            path: path.to_path_buf(),
            source,
        })?;
    }
    let line = values
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<&str>>()
        .join(SEPARATOR);
    Ok(append_line_in(doc, section, &line))
}

/// Append a preformatted line (e.g. a LINKS line) to `section`.
pub fn append_line_in(doc: &mut Document, section: &str, line: &str) -> AppendOutcome {
    match doc.section_mut(section) {
        Some(s) => {
            s.append_row(line);
            AppendOutcome::Appended
        }
        None => {
            warn!(section, "append target section missing; row skipped");
            AppendOutcome::SectionMissing
        }
    }
}

pub fn replace_in<S: AsRef<str>>(
    doc: &mut Document,
    path: &Path,
    section: &str,
    lines: &[S],
) -> WriteResult<()> {
    let target = doc
        .section_mut(section)
        .ok_or_else(|| WriteError::SectionNotFound {
            path: path.to_path_buf(),
            section: section.to_string(),
        })?;
    target.replace_body(lines.iter().map(|l| l.as_ref().to_string()));
    Ok(())
}

/// Update the first `key=` line of `section`, or append one.
pub fn set_key_in(
    doc: &mut Document,
    path: &Path,
    section: &str,
    key: &str,
    value: &str,
) -> WriteResult<()> {
    if value.contains(['\n', '\r']) {
        return Err(WriteError::InvalidRow {
            path: path.to_path_buf(),
            source: aicf_format::FormatError::NewlineInValue {
                value: value.to_string(),
            },
        });
    }
    let target = doc
        .section_mut(section)
        .ok_or_else(|| WriteError::SectionNotFound {
            path: path.to_path_buf(),
            section: section.to_string(),
        })?;

    let prefix = format!("{key}=");
    let line = format!("{key}={value}");
    let mut body: Vec<String> = target.content_lines().to_vec();
    match body.iter_mut().find(|l| l.starts_with(&prefix)) {
        Some(existing) => *existing = line,
        None => body.push(line),
    }
    target.replace_body(body);
    Ok(())
}

/// Insert `entry` as the newest activity row and keep at most `cap` rows.
pub fn push_activity_in(
    doc: &mut Document,
    path: &Path,
    entry: &ActivityEntry,
    cap: usize,
) -> WriteResult<()> {
    let target = doc
        .section_mut("RECENT_ACTIVITY")
        .ok_or_else(|| WriteError::SectionNotFound {
            path: path.to_path_buf(),
            section: "RECENT_ACTIVITY".to_string(),
        })?;
    let rows: Vec<String> = std::iter::once(entry.to_line())
        .chain(target.rows().map(String::from))
        .take(cap)
        .collect();
    target.replace_body(rows);
    Ok(())
}

pub fn read_document(path: &Path) -> WriteResult<Document> {
    let text = fs::read_to_string(path).map_err(|e| WriteError::io(path, e))?;
    Ok(Document::parse(&text))
}

/// Write `contents` to `path` through a temp file in the same directory.
pub fn write_atomic(path: &Path, contents: &str) -> WriteResult<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| WriteError::io(path, e))?;
    tmp.write_all(contents.as_bytes())
        .map_err(|e| WriteError::io(path, e))?;
    tmp.persist(path).map_err(|e| WriteError::io(path, e.error))?;
    Ok(())
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
