//! The index record: project-wide summary with fixed sections.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::Document;
use crate::{FIELD_SEPARATOR, FORMAT_VERSION, SECTION_MARKER};

/// Fixed section order of an index record.
pub const INDEX_SECTIONS: [&str; 7] = [
    "VERSION",
    "PROJECT",
    "COUNTS",
    "STATE",
    "CONTEXT",
    "CURRENT_WORK",
    "RECENT_ACTIVITY",
];

/// Maximum number of rows kept in `RECENT_ACTIVITY`.
pub const RECENT_ACTIVITY_CAP: usize = 20;

/// Ordered `key=value` lines.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyValues(Vec<(String, String)>);

impl KeyValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Update `key` in place, or append it when absent.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key.to_string(), value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse `key=value` lines; a line without `=` becomes a key with an empty value.
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let pairs = lines
            .into_iter()
            .filter(|l| !l.trim().is_empty())
            .map(|l| match l.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (l.to_string(), String::new()),
            })
            .collect();
        Self(pairs)
    }

    pub fn to_lines(&self) -> Vec<String> {
        self.0.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for KeyValues {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// One `timestamp|type|description` row of `RECENT_ACTIVITY`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: String,
    pub kind: String,
    pub description: String,
}

impl ActivityEntry {
    pub fn new(
        timestamp: impl Into<String>,
        kind: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: timestamp.into(),
            kind: kind.into(),
            description: description.into(),
        }
    }

    /// Parse a row. The description is everything after the second separator.
    pub fn parse(line: &str) -> Self {
        let mut parts = line.splitn(3, FIELD_SEPARATOR);
        Self {
            timestamp: parts.next().unwrap_or_default().to_string(),
            kind: parts.next().unwrap_or_default().to_string(),
            description: parts.next().unwrap_or_default().to_string(),
        }
    }

    pub fn to_line(&self) -> String {
        format!(
            "{}{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}{}",
            self.timestamp, self.kind, self.description
        )
    }
}

/// Parsed index record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexRecord {
    pub version: String,
    pub project: KeyValues,
    pub counts: KeyValues,
    pub state: KeyValues,
    pub context: String,
    pub current_work: KeyValues,
    /// Newest first.
    pub recent_activity: Vec<ActivityEntry>,
}

impl IndexRecord {
    /// A blank index for a freshly initialised project.
    pub fn new(project_name: &str, now: &str) -> Self {
        let project = [
            ("name", project_name),
            ("version", "0.1.0"),
            ("last_update", now),
        ]
        .into_iter()
        .collect();
        let counts = crate::category::Category::ALL
            .iter()
            .map(|c| (c.name(), "0"))
            .collect();
        let state = [("status", "active"), ("phase", "initial")]
            .into_iter()
            .collect();
        let current_work = [("task", ""), ("priority", ""), ("blockers", "")]
            .into_iter()
            .collect();
        Self {
            version: FORMAT_VERSION.to_string(),
            project,
            counts,
            state,
            context: String::new(),
            current_work,
            recent_activity: Vec::new(),
        }
    }

    /// Insert `entry` as the newest activity and drop anything beyond `cap`.
    pub fn push_activity(&mut self, entry: ActivityEntry, cap: usize) {
        self.recent_activity.insert(0, entry);
        self.recent_activity.truncate(cap);
    }
}

/// Parse index text. Unknown sections are ignored.
pub fn parse_index(text: &str) -> IndexRecord {
    let doc = Document::parse(text);
    let mut record = IndexRecord::default();

    for section in doc.sections() {
        let lines = section.content_lines();
        match section.name() {
            "VERSION" => record.version = lines.join("\n").trim().to_string(),
            "PROJECT" => record.project = KeyValues::from_lines(lines.iter().map(String::as_str)),
            "COUNTS" => record.counts = KeyValues::from_lines(lines.iter().map(String::as_str)),
            "STATE" => record.state = KeyValues::from_lines(lines.iter().map(String::as_str)),
            "CONTEXT" => record.context = lines.join("\n"),
            "CURRENT_WORK" => {
                record.current_work = KeyValues::from_lines(lines.iter().map(String::as_str))
            }
            "RECENT_ACTIVITY" => {
                record.recent_activity = section.rows().map(ActivityEntry::parse).collect()
            }
            other => debug!(section = other, "ignoring unknown index section"),
        }
    }

    record
}

/// Serialise an index record in fixed section order.
pub fn compile_index(record: &IndexRecord) -> String {
    let context: Vec<String> = if record.context.is_empty() {
        Vec::new()
    } else {
        record.context.split('\n').map(String::from).collect()
    };
    let version: Vec<String> = if record.version.is_empty() {
        Vec::new()
    } else {
        vec![record.version.clone()]
    };

    let bodies: [Vec<String>; 7] = [
        version,
        record.project.to_lines(),
        record.counts.to_lines(),
        record.state.to_lines(),
        context,
        record.current_work.to_lines(),
        record
            .recent_activity
            .iter()
            .map(ActivityEntry::to_line)
            .collect(),
    ];

    INDEX_SECTIONS
        .iter()
        .zip(bodies.iter())
        .map(|(name, body)| render_section(name, body))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `@NAME\n` followed by every body line terminated with `\n`.
pub(crate) fn render_section(name: &str, body: &[String]) -> String {
    let mut out = format!("{SECTION_MARKER}{name}\n");
    for line in body {
        out.push_str(line);
        out.push('\n');
    }
    out
}
