//! Human-readable conversation log.
//!
//! A markdown file with one `## Chat #<n> - <YYYY-MM-DD> - <title>` block per
//! checkpoint, newest first. Downstream readers re-parse the log with regular
//! expressions, so the heading and `### ...` subsection markers are fixed.
//!
//! The log is kept bounded by [`compact`], which keeps the newest entries
//! verbatim and either archives or summarises the rest, and cleaned up by
//! [`dedupe`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{WriteError, WriteResult};
use crate::writer::write_atomic;

pub const WHAT_WE_DID: &str = "### What We Did";
pub const KEY_DECISIONS: &str = "### Key Decisions";
pub const ISSUES: &str = "### Issues";
pub const NEXT_STEPS: &str = "### Next Steps";
pub const FILES_CHANGED: &str = "### Files Changed";
pub const OLDER_SESSIONS: &str = "## Older Sessions";

const LOG_TITLE: &str = "# Conversation Log";
const ARCHIVE_TITLE: &str = "# Conversation Log Archive";

fn heading_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^## Chat #?([A-Za-z0-9]+) - (\d{4}-\d{2}-\d{2}) - (.*)$")
            .expect("chat heading regex is valid")
    })
}

fn summary_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^- Chat #?([0-9]+) \(").expect("summary line regex is valid")
    })
}

fn fingerprint_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<!-- checkpoint:([0-9a-f]+)").expect("fingerprint regex is valid")
    })
}

/// Content of a new log entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDraft {
    pub date: String,
    pub title: String,
    pub fingerprint: String,
    pub session_id: String,
    pub checkpoint_number: u64,
    /// Labels of agent sections that failed for this checkpoint.
    pub missing_signals: Vec<String>,
    pub what_we_did: Vec<String>,
    pub key_decisions: Vec<String>,
    pub issues: Vec<String>,
    pub next_steps: Vec<String>,
    pub files_changed: Vec<String>,
}

/// One parsed `## Chat` block, kept as raw lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: String,
    pub date: String,
    pub title: String,
    lines: Vec<String>,
}

impl LogEntry {
    pub fn number(&self) -> Option<u64> {
        self.id.parse().ok()
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.lines
            .iter()
            .find_map(|l| fingerprint_regex().captures(l))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    fn summary_line(&self) -> String {
        format!("- Chat #{} ({}): {}", self.id, self.date, self.title)
    }
}

/// A whole log file: preamble, entries, and a trailer (e.g. `## Older Sessions`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NarrativeLog {
    preamble: Vec<String>,
    pub entries: Vec<LogEntry>,
    trailer: Vec<String>,
}

impl NarrativeLog {
    fn with_title(title: &str) -> Self {
        Self {
            preamble: vec![title.to_string(), String::new()],
            ..Self::default()
        }
    }

    /// Split `text` into preamble, entries and trailer. Only the
    /// `## Older Sessions` heading starts the trailer; any other `## ` line
    /// belongs to the entry (or preamble) it follows.
    pub fn parse(text: &str) -> Self {
        let mut log = Self::default();
        let mut in_trailer = false;
        for line in text.split('\n') {
            let bare = line.trim_end_matches('\r');
            if in_trailer {
                log.trailer.push(line.to_string());
                continue;
            }
            if bare.trim_end() == OLDER_SESSIONS {
                in_trailer = true;
                log.trailer.push(line.to_string());
                continue;
            }
            if let Some(caps) = heading_regex().captures(bare) {
                log.entries.push(LogEntry {
                    id: caps[1].to_string(),
                    date: caps[2].to_string(),
                    title: caps[3].to_string(),
                    lines: vec![line.to_string()],
                });
                continue;
            }
            match log.entries.last_mut() {
                Some(entry) => entry.lines.push(line.to_string()),
                None => log.preamble.push(line.to_string()),
            }
        }
        log
    }

    pub fn render(&self) -> String {
        self.preamble
            .iter()
            .chain(self.entries.iter().flat_map(|e| e.lines.iter()))
            .chain(self.trailer.iter())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Next free chat number: one past the highest number among entries and
    /// summarised older sessions.
    pub fn next_number(&self) -> u64 {
        let summarised = self
            .trailer
            .iter()
            .filter_map(|l| summary_regex().captures(l))
            .filter_map(|c| c[1].parse::<u64>().ok());
        self.entries
            .iter()
            .filter_map(LogEntry::number)
            .chain(summarised)
            .max()
            .map_or(1, |n| n + 1)
    }

    pub fn contains_fingerprint(&self, fingerprint: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.fingerprint() == Some(fingerprint))
    }

    /// Insert `entries` before all existing entries, keeping their order.
    fn prepend(&mut self, entries: Vec<LogEntry>) {
        self.entries.splice(0..0, entries);
    }
}

/// Render an entry block, terminated by a blank line.
pub fn render_entry(number: u64, draft: &EntryDraft) -> Vec<String> {
    let mut lines = vec![
        format!("## Chat #{number} - {} - {}", draft.date, draft.title),
        format!(
            "<!-- checkpoint:{} session:{} number:{} -->",
            draft.fingerprint, draft.session_id, draft.checkpoint_number
        ),
    ];
    if !draft.missing_signals.is_empty() {
        lines.push(format!(
            "> Missing signals: {}",
            draft.missing_signals.join(", ")
        ));
    }
    for (heading, items) in [
        (WHAT_WE_DID, &draft.what_we_did),
        (KEY_DECISIONS, &draft.key_decisions),
        (ISSUES, &draft.issues),
        (NEXT_STEPS, &draft.next_steps),
        (FILES_CHANGED, &draft.files_changed),
    ] {
        lines.push(String::new());
        lines.push(heading.to_string());
        if items.is_empty() {
            lines.push("- None".to_string());
        } else {
            lines.extend(items.iter().map(|i| format!("- {i}")));
        }
    }
    lines.push(String::new());
    lines
}

fn read_log(path: &Path, title: &str) -> WriteResult<NarrativeLog> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(NarrativeLog::parse(&text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(NarrativeLog::with_title(title)),
        Err(e) => Err(WriteError::io(path, e)),
    }
}

/// Create an empty log when none exists. Returns `true` when created.
pub fn ensure_log(path: &Path) -> WriteResult<bool> {
    if path.exists() {
        return Ok(false);
    }
    write_atomic(path, &NarrativeLog::with_title(LOG_TITLE).render())?;
    Ok(true)
}

/// Prepend a new entry and return its chat number.
///
/// An entry whose checkpoint fingerprint is already present is not written
/// again; `None` is returned instead.
pub fn prepend_entry(path: &Path, draft: &EntryDraft) -> WriteResult<Option<u64>> {
    let mut log = read_log(path, LOG_TITLE)?;
    if !draft.fingerprint.is_empty() && log.contains_fingerprint(&draft.fingerprint) {
        debug!(fingerprint = %draft.fingerprint, "narrative entry already present");
        return Ok(None);
    }
    let number = log.next_number();
    let lines = render_entry(number, draft);
    log.prepend(vec![LogEntry {
        id: number.to_string(),
        date: draft.date.clone(),
        title: draft.title.clone(),
        lines,
    }]);
    write_atomic(path, &log.render())?;
    Ok(Some(number))
}

/// What to do with entries beyond the keep count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactMode {
    /// Move older entries to the archive file.
    #[default]
    Archive,
    /// Collapse older entries into one summary line each.
    Summarize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactReport {
    pub mode: CompactMode,
    pub kept: usize,
    pub compacted: usize,
    /// Set in archive mode.
    pub archive_path: Option<PathBuf>,
}

/// Keep the `keep` newest entries verbatim and compact the rest.
pub fn compact(
    path: &Path,
    archive_path: &Path,
    keep: usize,
    mode: CompactMode,
) -> WriteResult<CompactReport> {
    let mut log = read_log(path, LOG_TITLE)?;
    if log.entries.len() <= keep {
        return Ok(CompactReport {
            mode,
            kept: log.entries.len(),
            compacted: 0,
            archive_path: None,
        });
    }

    let older = log.entries.split_off(keep);
    let compacted = older.len();
    let mut report = CompactReport {
        mode,
        kept: log.entries.len(),
        compacted,
        archive_path: None,
    };

    match mode {
        CompactMode::Archive => {
            let mut archive = read_log(archive_path, ARCHIVE_TITLE)?;
            archive.prepend(older);
            write_atomic(archive_path, &archive.render())?;
            report.archive_path = Some(archive_path.to_path_buf());
        }
        CompactMode::Summarize => {
            let summaries: Vec<String> = older.iter().map(LogEntry::summary_line).collect();
            match log.trailer.iter().position(|l| l.trim_end() == OLDER_SESSIONS) {
                Some(at) => {
                    log.trailer.splice(at + 1..at + 1, summaries);
                }
                None => {
                    let mut trailer = vec![OLDER_SESSIONS.to_string()];
                    trailer.extend(summaries);
                    trailer.push(String::new());
                    trailer.append(&mut log.trailer);
                    log.trailer = trailer;
                }
            }
        }
    }

    write_atomic(path, &log.render())?;
    info!(kept = report.kept, compacted, mode = ?mode, "narrative log compacted");
    Ok(report)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupeReport {
    pub kept: usize,
    pub removed: usize,
    pub lines_before: usize,
    pub lines_after: usize,
    /// Set when the log was rewritten.
    pub backup_path: Option<PathBuf>,
}

/// Remove later duplicates of entries with the same chat id and date.
///
/// The first (newest) occurrence wins. Before the log is rewritten a copy is
/// saved next to it as `<name>.md.backup`.
pub fn dedupe(path: &Path) -> WriteResult<DedupeReport> {
    let text = fs::read_to_string(path).map_err(|e| WriteError::io(path, e))?;
    let mut log = NarrativeLog::parse(&text);
    let lines_before = text.split('\n').count();

    let mut seen: Vec<(String, String)> = Vec::new();
    let before = log.entries.len();
    log.entries.retain(|e| {
        let key = (e.id.clone(), e.date.clone());
        if seen.contains(&key) {
            debug!(id = %e.id, date = %e.date, "removing duplicate entry");
            false
        } else {
            seen.push(key);
            true
        }
    });
    let removed = before - log.entries.len();

    if removed == 0 {
        return Ok(DedupeReport {
            kept: before,
            removed: 0,
            lines_before,
            lines_after: lines_before,
            backup_path: None,
        });
    }

    let backup = path.with_extension("md.backup");
    fs::copy(path, &backup).map_err(|e| WriteError::io(&backup, e))?;
    let rendered = log.render();
    write_atomic(path, &rendered)?;
    info!(removed, kept = log.entries.len(), "narrative log deduplicated");

    Ok(DedupeReport {
        kept: log.entries.len(),
        removed,
        lines_before,
        lines_after: rendered.split('\n').count(),
        backup_path: Some(backup),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(title: &str, fp: &str) -> EntryDraft {
        EntryDraft {
            date: "2025-03-01".to_string(),
            title: title.to_string(),
            fingerprint: fp.to_string(),
            session_id: "s".to_string(),
            checkpoint_number: 1,
            key_decisions: vec!["Let's use JWT for auth (HIGH)".to_string()],
            ..EntryDraft::default()
        }
    }

    #[test]
    fn test_render_entry_has_fixed_markers() {
        let lines = render_entry(4, &draft("auth", "abc123"));
        assert_eq!(lines[0], "## Chat #4 - 2025-03-01 - auth");
        for marker in [WHAT_WE_DID, KEY_DECISIONS, ISSUES, NEXT_STEPS, FILES_CHANGED] {
            assert!(lines.iter().any(|l| l == marker), "{marker}");
        }
        assert!(lines.contains(&"- Let's use JWT for auth (HIGH)".to_string()));
    }

    #[test]
    fn test_parse_render_is_lossless() {
        let text = "# Conversation Log\n\nintro\n## Chat #2 - 2025-03-02 - b\nbody b\n\n## Chat 1a - 2025-03-01 - a\nbody a\n\n## Older Sessions\n- Chat #0 (2025-02-01): z\n";
        let log = NarrativeLog::parse(text);
        assert_eq!(log.entries.len(), 2);
        assert_eq!(log.entries[1].id, "1a");
        assert_eq!(log.render(), text);
    }

    #[test]
    fn test_other_headings_stay_inside_their_entry() {
        let text = "# Conversation Log\n\n## Chat #3 - 2025-03-03 - c\nbody\n## Notes\nfree text\n\n## Chat #2 - 2025-03-02 - b\nbody\n\n## Chat #3 - 2025-03-03 - c\ncopy\n";
        let log = NarrativeLog::parse(text);
        let ids: Vec<&str> = log.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "2", "3"]);
        assert!(log.entries[0].lines().iter().any(|l| l == "## Notes"));
        assert_eq!(log.next_number(), 4);
        assert_eq!(log.render(), text);
    }

    #[test]
    fn test_prepend_numbers_and_skips_known_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversation-log.md");
        assert!(ensure_log(&path).unwrap());
        assert_eq!(prepend_entry(&path, &draft("one", "aa")).unwrap(), Some(1));
        assert_eq!(prepend_entry(&path, &draft("two", "bb")).unwrap(), Some(2));
        assert_eq!(prepend_entry(&path, &draft("again", "aa")).unwrap(), None);

        let log = NarrativeLog::parse(&fs::read_to_string(&path).unwrap());
        let titles: Vec<&str> = log.entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["two", "one"]);
        assert_eq!(log.entries[0].fingerprint(), Some("bb"));
    }
}
