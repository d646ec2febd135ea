//! On-disk project store.
//!
//! Layout under the project root:
//!
//! ```text
//! .aicf/index.aicf          index record
//! .aicf/<category>.aicf     one category record per kind
//! .aicf/.lock               advisory write lock
//! .ai/conversation-log.md   narrative log
//! ```
//!
//! Writes go through [`MemoryStore::persist`], which holds the [`ProjectLock`]
//! for the whole write phase and runs the file I/O on the blocking pool.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use aicf_format::{
    compile_category, compile_index, parse_category, parse_index, sanitize_value, ActivityEntry,
    Category, CategoryRecord, IndexRecord, Link, LinkLine, TypedId,
};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn, Span};

use crate::agents::{Level, WorkStatus};
use crate::config::MemoryConfig;
use crate::error::{WriteError, WriteResult};
use crate::narrative::{self, EntryDraft};
use crate::orchestrator::MergedPayload;
use crate::writer::{
    append_line_in, append_row_in, now_rfc3339, push_activity_in, replace_in, set_key_in,
    AppendOutcome, SectionWriter,
};

pub const INDEX_FILE: &str = "index.aicf";
const LOCK_FILE: &str = ".lock";

/// Exclusive hold on a project's records.
///
/// Combines an in-process mutex (checkpoints in one process queue up) with an
/// OS advisory lock on `.aicf/.lock` (separate processes queue up). Released
/// on drop.
pub struct ProjectLock<'a> {
    _guard: MutexGuard<'a, ()>,
    file: File,
}

impl Drop for ProjectLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(error = %e, "failed to release project lock");
        }
    }
}

/// Field values for one new row, keyed by schema field name.
type RowFields = Vec<(&'static str, String)>;

pub struct MemoryStore {
    root: PathBuf,
    records_dir: PathBuf,
    narrative_dir: PathBuf,
    config: MemoryConfig,
    writer: SectionWriter,
    write_gate: Mutex<()>,
}

impl MemoryStore {
    /// Resolve the store layout for `project_root`. Touches nothing on disk.
    pub fn open(project_root: impl Into<PathBuf>, config: MemoryConfig) -> Self {
        let root = project_root.into();
        let records_dir = root.join(&config.records_dir);
        let narrative_dir = root.join(&config.narrative_dir);
        let writer = SectionWriter::new(records_dir.join(INDEX_FILE));
        Self {
            root,
            records_dir,
            narrative_dir,
            config,
            writer,
            write_gate: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn writer(&self) -> &SectionWriter {
        &self.writer
    }

    pub fn records_dir(&self) -> &Path {
        &self.records_dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.records_dir.join(INDEX_FILE)
    }

    pub fn category_path(&self, category: Category) -> PathBuf {
        self.records_dir.join(category.file_name())
    }

    pub fn narrative_path(&self) -> PathBuf {
        self.narrative_dir.join(&self.config.narrative.log_file)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.narrative_dir.join(&self.config.narrative.archive_file)
    }

    fn lock_path(&self) -> PathBuf {
        self.records_dir.join(LOCK_FILE)
    }

    /// Record files checked by the decay monitor after each checkpoint.
    pub fn tracked_paths(&self) -> Vec<PathBuf> {
        self.config
            .decay
            .tracked
            .iter()
            .filter_map(|name| match Category::from_str(name) {
                Ok(c) => Some(self.category_path(c)),
                Err(e) => {
                    warn!(error = %e, "ignoring unknown tracked category");
                    None
                }
            })
            .collect()
    }

    /// Create missing directories and blank records. Returns the files created.
    pub fn ensure_layout(&self) -> WriteResult<Vec<PathBuf>> {
        for dir in [&self.records_dir, &self.narrative_dir] {
            fs::create_dir_all(dir).map_err(|e| WriteError::io(dir, e))?;
        }

        let mut created = Vec::new();
        let index = self.index_path();
        if !index.exists() {
            let name = self.config.resolved_project_name(&self.root);
            let record = IndexRecord::new(&name, &now_rfc3339());
            crate::writer::write_atomic(&index, &compile_index(&record))?;
            created.push(index);
        }
        for category in Category::ALL {
            let path = self.category_path(category);
            if !path.exists() {
                let blank = compile_category(&CategoryRecord::new(category));
                crate::writer::write_atomic(&path, &blank)?;
                created.push(path);
            }
        }
        let log = self.narrative_path();
        if narrative::ensure_log(&log)? {
            created.push(log);
        }

        if !created.is_empty() {
            info!(files = created.len(), root = %self.root.display(), "initialised record layout");
        }
        Ok(created)
    }

    /// Acquire the project write lock.
    pub async fn lock(&self) -> WriteResult<ProjectLock<'_>> {
        let guard = self.write_gate.lock().await;
        fs::create_dir_all(&self.records_dir).map_err(|e| WriteError::io(&self.records_dir, e))?;
        let path = self.lock_path();
        let lock_path = path.clone();
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&lock_path)?;
            FileExt::lock_exclusive(&file)?;
            Ok(file)
        })
        .await
        .map_err(|e| WriteError::Lock(e.to_string()))?
        .map_err(|e| WriteError::io(&path, e))?;
        debug!(path = %path.display(), "project lock acquired");
        Ok(ProjectLock {
            _guard: guard,
            file,
        })
    }

    pub fn read_index(&self) -> WriteResult<IndexRecord> {
        let path = self.index_path();
        let text = fs::read_to_string(&path).map_err(|e| WriteError::io(&path, e))?;
        Ok(parse_index(&text))
    }

    pub fn read_category(&self, category: Category) -> WriteResult<CategoryRecord> {
        let path = self.category_path(category);
        let text = fs::read_to_string(&path).map_err(|e| WriteError::io(&path, e))?;
        Ok(parse_category(&text))
    }

    /// Whether a conversation row for this session and checkpoint exists.
    pub fn contains_checkpoint(&self, session_id: &str, checkpoint: u64) -> WriteResult<bool> {
        let record = self.read_category(Category::Conversations)?;
        let session = sanitize_value(session_id);
        let number = checkpoint.to_string();
        Ok(record
            .filter("SESSION", &session)
            .iter()
            .any(|row| row.get(&record.schema, "CHECKPOINT") == Some(number.as_str())))
    }

    /// Write everything derived from one checkpoint.
    ///
    /// Returns the files that were updated; empty when the checkpoint was
    /// already recorded. There is no cross-file rollback: a failure part way
    /// leaves earlier files written.
    #[instrument(skip_all, fields(session_id = %payload.metadata.session_id, checkpoint = payload.metadata.checkpoint_number))]
    pub async fn persist(&self, payload: &MergedPayload) -> WriteResult<Vec<PathBuf>> {
        let _lock = self.lock().await?;
        let detached = MemoryStore::open(self.root.clone(), self.config.clone());
        let payload = payload.clone();
        let span = Span::current();
        tokio::task::spawn_blocking(move || span.in_scope(|| detached.write_checkpoint(&payload)))
            .await
            .map_err(|e| WriteError::Task(e.to_string()))?
    }

    /// Blocking body of [`MemoryStore::persist`]. The caller holds the lock.
    fn write_checkpoint(&self, payload: &MergedPayload) -> WriteResult<Vec<PathBuf>> {
        self.ensure_layout()?;

        let meta = &payload.metadata;
        if self.contains_checkpoint(&meta.session_id, meta.checkpoint_number)? {
            info!("checkpoint already recorded; skipping write");
            return Ok(Vec::new());
        }
        // The conversation row is the idempotency marker, so its file must be
        // writable before any other category is touched.
        self.check_appendable(Category::Conversations)?;

        let timestamp = sanitize_value(&meta.timestamp);
        let mut updated = Vec::new();
        let mut linked: Vec<TypedId> = Vec::new();

        for category in [
            Category::Decisions,
            Category::Tasks,
            Category::Issues,
            Category::Architecture,
            Category::Knowledge,
        ] {
            let rows = category_rows(category, payload);
            if rows.is_empty() {
                continue;
            }
            let path = self.category_path(category);
            let ids = self.writer.edit(&path, |doc| {
                let record = parse_category(&doc.to_string());
                append_rows(doc, &path, &record, &timestamp, rows)
            })?;
            linked.extend(ids.into_iter().map(|id| TypedId::new(category.id_prefix(), id)));
            updated.push(path);
        }

        let path = self.category_path(Category::Conversations);
        let conversation = category_rows(Category::Conversations, payload);
        let conversation_id = self.writer.edit(&path, |doc| {
            let record = parse_category(&doc.to_string());
            let ids = append_rows(doc, &path, &record, &timestamp, conversation)?;
            if let Some(&id) = ids.first() {
                let from = TypedId::new(Category::Conversations.id_prefix(), id);
                let links: Vec<Link> = linked
                    .iter()
                    .map(|to| Link::new(from.clone(), to.clone()))
                    .collect();
                if !links.is_empty() {
                    let line = LinkLine::new(links).to_string();
                    append_line_in(doc, "LINKS", &line);
                }
            }
            Ok(ids.first().copied())
        })?;
        updated.push(path);

        let index = self.index_path();
        self.update_index(&index, payload, &timestamp)?;
        updated.push(index);

        let log = self.narrative_path();
        narrative::prepend_entry(&log, &narrative_draft(payload))?;
        updated.push(log);

        info!(
            conversation_id = conversation_id.unwrap_or_default(),
            rows_linked = linked.len(),
            files = updated.len(),
            "checkpoint persisted"
        );
        Ok(updated)
    }

    /// Fail unless `category` has a SCHEMA and a DATA section to append to.
    fn check_appendable(&self, category: Category) -> WriteResult<()> {
        let path = self.category_path(category);
        let doc = crate::writer::read_document(&path)?;
        let missing = if parse_category(&doc.to_string()).schema.is_empty() {
            Some("SCHEMA")
        } else if doc.section("DATA").is_none() {
            Some("DATA")
        } else {
            None
        };
        match missing {
            Some(section) => Err(WriteError::SectionNotFound {
                path,
                section: section.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn update_index(&self, path: &Path, payload: &MergedPayload, timestamp: &str) -> WriteResult<()> {
        let mut counts = Vec::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            let rows = self.read_category(category)?.rows.len();
            counts.push(format!("{}={rows}", category.name()));
        }

        let meta = &payload.metadata;
        let sections = &payload.sections;
        let activity = ActivityEntry::new(
            timestamp,
            "checkpoint",
            sanitize_value(&format!(
                "{} #{}: {}",
                meta.session_id,
                meta.checkpoint_number,
                conversation_summary(payload)
            )),
        );
        let cap = self.config.activity_cap;

        self.writer.edit(path, |doc| {
            replace_in(doc, path, "COUNTS", &counts)?;

            let status = sections
                .state
                .content()
                .map(|s| s.status.to_string())
                .unwrap_or_else(|| "active".to_string());
            set_key_in(doc, path, "STATE", "status", &status)?;
            set_key_in(doc, path, "STATE", "last_session", &sanitize_value(&meta.session_id))?;
            set_key_in(doc, path, "STATE", "last_checkpoint", &meta.checkpoint_number.to_string())?;

            if let Some(state) = sections.state.content() {
                let lines = [
                    format!("task={}", sanitize_value(&state.current_task)),
                    format!("priority={}", state.priority),
                    format!("blockers={}", sanitize_value(&state.blockers.join("; "))),
                    format!("next_steps={}", sanitize_value(&state.next_steps.join("; "))),
                    format!("files={}", sanitize_value(&state.files_changed.join(", "))),
                ];
                replace_in(doc, path, "CURRENT_WORK", &lines)?;
            }

            push_activity_in(doc, path, &activity, cap)
        })
    }
}

/// Append `rows` to DATA, filling `ID` and `TIMESTAMP` and ordering values by
/// the file's own schema. Returns the ids written.
fn append_rows(
    doc: &mut aicf_format::Document,
    path: &Path,
    record: &CategoryRecord,
    timestamp: &str,
    rows: Vec<RowFields>,
) -> WriteResult<Vec<u64>> {
    if record.schema.is_empty() {
        return Err(WriteError::SectionNotFound {
            path: path.to_path_buf(),
            section: "SCHEMA".to_string(),
        });
    }
    let mut next = record.next_id();
    let mut ids = Vec::with_capacity(rows.len());
    for fields in rows {
        let values: Vec<String> = record
            .schema
            .iter()
            .map(|field| match field.as_str() {
                "ID" => next.to_string(),
                "TIMESTAMP" => timestamp.to_string(),
                other => fields
                    .iter()
                    .find(|(k, _)| *k == other)
                    .map(|(_, v)| sanitize_value(v))
                    .unwrap_or_default(),
            })
            .collect();
        if append_row_in(doc, path, "DATA", &values)? == AppendOutcome::SectionMissing {
            return Err(WriteError::SectionNotFound {
                path: path.to_path_buf(),
                section: "DATA".to_string(),
            });
        }
        ids.push(next);
        next += 1;
    }
    Ok(ids)
}

fn conversation_summary(payload: &MergedPayload) -> String {
    match payload.sections.flow.content() {
        Some(flow) => flow.summary.clone(),
        None => payload.sections.flow.label().to_string(),
    }
}

/// Rows a checkpoint contributes to `category`. Error sections contribute none.
fn category_rows(category: Category, payload: &MergedPayload) -> Vec<RowFields> {
    let meta = &payload.metadata;
    let sections = &payload.sections;
    match category {
        Category::Conversations => {
            let confidence = match meta.agents_failed {
                0 => Level::High,
                1 => Level::Medium,
                _ => Level::Low,
            };
            let impact = sections
                .decisions
                .content()
                .and_then(|d| d.iter().map(|d| d.impact_score).reduce(f32::max))
                .unwrap_or(Level::Low.score());
            vec![vec![
                ("SESSION", meta.session_id.clone()),
                ("CHECKPOINT", meta.checkpoint_number.to_string()),
                ("MESSAGES", meta.message_count.to_string()),
                ("TOKENS", meta.token_count.to_string()),
                ("SUMMARY", conversation_summary(payload)),
                ("CONFIDENCE", confidence.to_string()),
                ("IMPACT_SCORE", format!("{impact:.2}")),
            ]]
        }
        Category::Decisions => sections
            .decisions
            .content()
            .map(|decisions| {
                decisions
                    .iter()
                    .map(|d| {
                        vec![
                            ("DECISION", d.decision.clone()),
                            ("RATIONALE", d.rationale.clone()),
                            ("IMPACT", d.impact.to_string()),
                            ("CONFIDENCE", d.confidence.to_string()),
                            ("IMPACT_SCORE", format!("{:.2}", d.impact_score)),
                        ]
                    })
                    .collect()
            })
            .unwrap_or_default(),
        Category::Tasks => sections
            .state
            .content()
            .map(|state| {
                let mut rows = Vec::new();
                if !state.current_task.is_empty() {
                    rows.push(vec![
                        ("TASK", state.current_task.clone()),
                        ("STATUS", state.status.to_string()),
                        ("PRIORITY", state.priority.to_string()),
                    ]);
                }
                rows.extend(state.next_steps.iter().map(|step| {
                    vec![
                        ("TASK", step.clone()),
                        ("STATUS", "pending".to_string()),
                        ("PRIORITY", Level::Low.to_string()),
                    ]
                }));
                rows
            })
            .unwrap_or_default(),
        Category::Issues => {
            let mut rows: Vec<RowFields> = sections
                .insights
                .content()
                .map(|report| {
                    report
                        .issues
                        .iter()
                        .map(|issue| {
                            vec![
                                ("ISSUE", issue.description.clone()),
                                ("SEVERITY", issue.severity.to_string()),
                                ("STATUS", "open".to_string()),
                            ]
                        })
                        .collect()
                })
                .unwrap_or_default();
            if let Some(state) = sections.state.content() {
                rows.extend(state.blockers.iter().map(|blocker| {
                    vec![
                        ("ISSUE", blocker.clone()),
                        ("SEVERITY", Level::High.to_string()),
                        ("STATUS", WorkStatus::Blocked.to_string()),
                    ]
                }));
            }
            rows
        }
        Category::Architecture => sections
            .insights
            .content()
            .map(|report| {
                report
                    .architecture
                    .iter()
                    .map(|note| {
                        vec![
                            ("COMPONENT", note.component.clone()),
                            ("DESCRIPTION", note.description.clone()),
                        ]
                    })
                    .collect()
            })
            .unwrap_or_default(),
        Category::Knowledge => sections
            .insights
            .content()
            .map(|report| {
                report
                    .insights
                    .iter()
                    .map(|insight| {
                        vec![
                            ("INSIGHT", insight.text.clone()),
                            ("CATEGORY", insight.category.clone()),
                            ("CONFIDENCE", insight.confidence.to_string()),
                        ]
                    })
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn entry_date(timestamp: &str) -> String {
    DateTime::parse_from_rfc3339(timestamp.trim())
        .map(|ts| ts.with_timezone(&Utc).format("%Y-%m-%d").to_string())
        .unwrap_or_else(|_| Utc::now().format("%Y-%m-%d").to_string())
}

fn narrative_draft(payload: &MergedPayload) -> EntryDraft {
    let meta = &payload.metadata;
    let sections = &payload.sections;
    let flow = sections.flow.content();
    let state = sections.state.content();

    let title = state
        .map(|s| s.current_task.clone())
        .filter(|t| !t.is_empty())
        .or_else(|| flow.map(|f| f.summary.clone()))
        .unwrap_or_else(|| format!("Session {}", meta.session_id));

    let mut issues: Vec<String> = sections
        .insights
        .content()
        .map(|r| {
            r.issues
                .iter()
                .map(|i| format!("{} ({})", i.description, i.severity))
                .collect()
        })
        .unwrap_or_default();
    if let Some(state) = state {
        issues.extend(state.blockers.iter().map(|b| format!("Blocked: {b}")));
    }

    EntryDraft {
        date: entry_date(&meta.timestamp),
        title: crate::agents::text::clip(&title, 80),
        fingerprint: meta.fingerprint.clone(),
        session_id: sanitize_value(&meta.session_id),
        checkpoint_number: meta.checkpoint_number,
        missing_signals: sections
            .errored_labels()
            .into_iter()
            .map(String::from)
            .collect(),
        what_we_did: flow
            .map(|f| {
                if f.assistant_actions.is_empty() {
                    vec![f.summary.clone()]
                } else {
                    f.assistant_actions.clone()
                }
            })
            .unwrap_or_default(),
        key_decisions: sections
            .decisions
            .content()
            .map(|d| {
                d.iter()
                    .map(|d| {
                        format!(
                            "{} (impact {}, confidence {})",
                            d.decision, d.impact, d.confidence
                        )
                    })
                    .collect()
            })
            .unwrap_or_default(),
        issues,
        next_steps: state.map(|s| s.next_steps.clone()).unwrap_or_default(),
        files_changed: state.map(|s| s.files_changed.clone()).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_layout_creates_blank_records_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::open(dir.path(), MemoryConfig::default());
        let created = store.ensure_layout().unwrap();
        assert_eq!(created.len(), 8);
        assert!(store.ensure_layout().unwrap().is_empty());

        let decisions = store.read_category(Category::Decisions).unwrap();
        assert_eq!(decisions.category(), Some(Category::Decisions));
        assert!(decisions.rows.is_empty());
        let index = store.read_index().unwrap();
        assert_eq!(index.counts.get("decisions"), Some("0"));
    }

    #[test]
    fn test_tracked_paths_skip_unknown_names() {
        let mut config = MemoryConfig::default();
        config.decay.tracked = vec!["conversations".to_string(), "bogus".to_string()];
        let store = MemoryStore::open("/tmp/p", config);
        assert_eq!(
            store.tracked_paths(),
            vec![PathBuf::from("/tmp/p/.aicf/conversations.aicf")]
        );
    }

    #[tokio::test]
    async fn test_lock_is_reacquirable_after_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::open(dir.path(), MemoryConfig::default());
        drop(store.lock().await.unwrap());
        let _again = store.lock().await.unwrap();
        assert!(dir.path().join(".aicf/.lock").exists());
    }

    #[test]
    fn test_entry_date_falls_back_for_garbage() {
        assert_eq!(entry_date("2025-03-01T10:00:00Z"), "2025-03-01");
        assert_eq!(entry_date("nope").len(), 10);
    }
}
