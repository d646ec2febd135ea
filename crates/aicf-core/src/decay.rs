//! Size and age driven compaction of category records.
//!
//! Triggered once per checkpoint after a successful write, never on a timer.
//! Rows are partitioned into tiers:
//!
//! - `recent`: the newest `keep_recent` rows; kept verbatim
//! - `medium`: younger than `old_age_days`; free-text fields truncated
//! - `old`: older (or undated); dropped when both low confidence and low
//!   impact, truncated otherwise
//! - `dropped`: rows removed from the file

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use aicf_format::{parse_category, Row};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize, Serializer};
use tracing::{info, instrument, warn};

use crate::agents::text::truncate_chars;
use crate::agents::Level;
use crate::error::{DecayError, DecayResult};
use crate::writer::{replace_in, SectionWriter};

/// Fields never truncated: identifiers, timestamps, ratings, counters.
const STRUCTURAL_FIELDS: &[&str] = &[
    "ID",
    "TIMESTAMP",
    "SESSION",
    "CHECKPOINT",
    "MESSAGES",
    "TOKENS",
    "CONFIDENCE",
    "IMPACT",
    "IMPACT_SCORE",
    "STATUS",
    "SEVERITY",
    "PRIORITY",
    "CATEGORY",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// File size (bytes) above which decay runs.
    pub threshold_bytes: u64,
    pub keep_recent: usize,
    pub old_age_days: i64,
    /// Length free-text fields are cut to in the medium and old tiers.
    pub summary_chars: usize,
    /// Old rows rated below this confidence are eligible for removal.
    pub min_confidence: Level,
    /// Old rows scored below this impact are eligible for removal.
    pub min_impact_score: f32,
    /// Category record files (by name) checked after each checkpoint.
    pub tracked: Vec<String>,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: 1024 * 1024,
            keep_recent: 50,
            old_age_days: 30,
            summary_chars: 80,
            min_confidence: Level::Medium,
            min_impact_score: 0.5,
            tracked: vec!["conversations".to_string()],
        }
    }
}

/// Outcome of one decay evaluation. Never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum DecayReport {
    Applied {
        items_processed: usize,
        compression_ratio: f64,
        decay_statistics: BTreeMap<String, usize>,
    },
    Skipped {
        reason: String,
    },
    Failed {
        error: String,
    },
}

impl DecayReport {
    pub fn applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportJson<'a> {
    applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    items_processed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    compression_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    decay_statistics: Option<&'a BTreeMap<String, usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

impl Serialize for DecayReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut json = ReportJson {
            applied: self.applied(),
            items_processed: None,
            compression_ratio: None,
            decay_statistics: None,
            reason: None,
            error: None,
        };
        match self {
            Self::Applied {
                items_processed,
                compression_ratio,
                decay_statistics,
            } => {
                json.items_processed = Some(*items_processed);
                json.compression_ratio = Some(*compression_ratio);
                json.decay_statistics = Some(decay_statistics);
            }
            Self::Skipped { reason } => json.reason = Some(reason),
            Self::Failed { error } => json.error = Some(error),
        }
        json.serialize(serializer)
    }
}

/// Size check result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecayCheck {
    pub size_bytes: u64,
    pub threshold_bytes: u64,
}

impl DecayCheck {
    pub fn over_threshold(&self) -> bool {
        self.size_bytes > self.threshold_bytes
    }
}

#[derive(Debug, Clone)]
pub struct DecayMonitor {
    config: DecayConfig,
    writer: SectionWriter,
}

impl DecayMonitor {
    pub fn new(config: DecayConfig, writer: SectionWriter) -> Self {
        Self { config, writer }
    }

    pub fn config(&self) -> &DecayConfig {
        &self.config
    }

    pub fn check(&self, path: &Path) -> DecayResult<DecayCheck> {
        let meta = fs::metadata(path).map_err(|source| DecayError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(DecayCheck {
            size_bytes: meta.len(),
            threshold_bytes: self.config.threshold_bytes,
        })
    }

    /// Apply decay when `path` exceeds the threshold. Errors are folded into
    /// [`DecayReport::Failed`].
    #[instrument(skip(self, now), fields(path = %path.display()))]
    pub fn maybe_apply(&self, path: &Path, now: DateTime<Utc>) -> DecayReport {
        let check = match self.check(path) {
            Ok(check) => check,
            Err(e) => {
                warn!(error = %e, "decay check failed");
                return DecayReport::Failed {
                    error: e.to_string(),
                };
            }
        };
        if !check.over_threshold() {
            return DecayReport::Skipped {
                reason: format!(
                    "size {} bytes is within threshold {} bytes",
                    check.size_bytes, check.threshold_bytes
                ),
            };
        }
        self.apply(path, now).unwrap_or_else(|e| {
            warn!(error = %e, "decay failed; skipped for this cycle");
            DecayReport::Failed {
                error: e.to_string(),
            }
        })
    }

    /// Compact `path` unconditionally.
    pub fn apply(&self, path: &Path, now: DateTime<Utc>) -> DecayResult<DecayReport> {
        let text = fs::read_to_string(path).map_err(|source| DecayError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let record = parse_category(&text);
        if record.schema.is_empty() {
            return Err(DecayError::NoSchema {
                path: path.to_path_buf(),
            });
        }

        let before = text.len();
        let total = record.rows.len();
        let original: Vec<String> = record.rows.iter().map(Row::to_line).collect();
        let (rows, stats) = self.partition(&record.schema, record.rows, now);
        let lines: Vec<String> = rows.iter().map(Row::to_line).collect();
        if lines == original {
            info!(items_processed = total, "no rows eligible for decay");
            return Ok(DecayReport::Skipped {
                reason: format!("none of {total} rows could be compacted"),
            });
        }
        self.writer
            .edit(path, |doc| replace_in(doc, path, "DATA", &lines))?;

        let after = fs::metadata(path)
            .map(|m| m.len() as usize)
            .map_err(|source| DecayError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let compression_ratio = if before == 0 {
            0.0
        } else {
            1.0 - after as f64 / before as f64
        };

        info!(
            items_processed = total,
            compression_ratio,
            dropped = stats.get("dropped").copied().unwrap_or_default(),
            "decay applied"
        );
        Ok(DecayReport::Applied {
            items_processed: total,
            compression_ratio,
            decay_statistics: stats,
        })
    }

    fn partition(
        &self,
        schema: &[String],
        rows: Vec<Row>,
        now: DateTime<Utc>,
    ) -> (Vec<Row>, BTreeMap<String, usize>) {
        let cfg = &self.config;
        let mut stats: BTreeMap<String, usize> = ["recent", "medium", "old", "dropped"]
            .into_iter()
            .map(|t| (t.to_string(), 0))
            .collect();
        let recent_from = rows.len().saturating_sub(cfg.keep_recent);
        let free_text: Vec<usize> = schema
            .iter()
            .enumerate()
            .filter(|(_, f)| !STRUCTURAL_FIELDS.contains(&f.as_str()))
            .map(|(i, _)| i)
            .collect();

        let mut kept = Vec::with_capacity(rows.len());
        for (pos, mut row) in rows.into_iter().enumerate() {
            let age = row_age_days(schema, &row, now);
            let tier = if pos >= recent_from {
                "recent"
            } else if age.is_some_and(|d| d < cfg.old_age_days) {
                "medium"
            } else {
                "old"
            };

            if tier == "old" && self.low_value(schema, &row) {
                *stats.entry("dropped".to_string()).or_default() += 1;
                continue;
            }
            *stats.entry(tier.to_string()).or_default() += 1;
            if tier != "recent" {
                for &i in &free_text {
                    if let Some(value) = row.values_mut().get_mut(i) {
                        *value = truncate_chars(value, cfg.summary_chars);
                    }
                }
            }
            kept.push(row);
        }
        (kept, stats)
    }

    /// Low confidence and low impact, judged only on the fields present.
    fn low_value(&self, schema: &[String], row: &Row) -> bool {
        let confidence = row
            .get(schema, "CONFIDENCE")
            .and_then(parse_level)
            .map(|l| l < self.config.min_confidence);
        let impact = row
            .get(schema, "IMPACT_SCORE")
            .and_then(|v| v.trim().parse::<f32>().ok())
            .map(|s| s < self.config.min_impact_score);
        match (confidence, impact) {
            (Some(c), Some(i)) => c && i,
            (Some(c), None) => c,
            (None, Some(i)) => i,
            (None, None) => false,
        }
    }
}

fn parse_level(value: &str) -> Option<Level> {
    match value.trim().to_ascii_uppercase().as_str() {
        "LOW" => Some(Level::Low),
        "MEDIUM" => Some(Level::Medium),
        "HIGH" => Some(Level::High),
        _ => None,
    }
}

/// Age in whole days, `None` when the timestamp is missing or unparseable.
fn row_age_days(schema: &[String], row: &Row, now: DateTime<Utc>) -> Option<i64> {
    let raw = row.get(schema, "TIMESTAMP")?;
    let ts = DateTime::parse_from_rfc3339(raw.trim()).ok()?;
    let age: Duration = now.signed_duration_since(ts.with_timezone(&Utc));
    Some(age.num_days())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aicf_format::{compile_category, Category, CategoryRecord};

    fn row(id: u64, ts: &str, summary: &str, conf: &str, impact: &str) -> Row {
        Row::new([
            id.to_string(),
            ts.to_string(),
            "sess".to_string(),
            "1".to_string(),
            "2".to_string(),
            "10".to_string(),
            summary.to_string(),
            conf.to_string(),
            impact.to_string(),
        ])
    }

    fn monitor(keep_recent: usize) -> DecayMonitor {
        DecayMonitor::new(
            DecayConfig {
                keep_recent,
                ..DecayConfig::default()
            },
            SectionWriter::new("/nonexistent/index.aicf"),
        )
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_partition_tiers() {
        let schema: Vec<String> = Category::Conversations
            .default_schema()
            .iter()
            .map(|s| s.to_string())
            .collect();
        let long = "x".repeat(200);
        let rows = vec![
            row(1, "2025-01-01T00:00:00Z", &long, "LOW", "0.2"),
            row(2, "2025-01-01T00:00:00Z", &long, "HIGH", "0.9"),
            row(3, "2025-05-20T00:00:00Z", &long, "LOW", "0.2"),
            row(4, "2025-05-30T00:00:00Z", &long, "LOW", "0.2"),
            row(5, "garbage", &long, "LOW", "0.1"),
            row(6, "2025-01-01T00:00:00Z", &long, "LOW", "0.2"),
        ];
        let (kept, stats) = monitor(1).partition(&schema, rows, now());
        assert_eq!(stats["dropped"], 2);
        assert_eq!(stats["old"], 1);
        assert_eq!(stats["medium"], 2);
        assert_eq!(stats["recent"], 1);
        let ids: Vec<&str> = kept.iter().map(|r| r.values()[0].as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "4", "6"]);
        assert_eq!(kept[0].values()[6].chars().count(), 80);
        // A two day old row outside the recent window is still summarised.
        assert_eq!(kept[2].values()[6].chars().count(), 80);
        assert_eq!(kept[3].values()[6].len(), 200);
    }

    fn write_rows(path: &Path, count: u64, ts: &str, summary: &str) {
        let mut record = CategoryRecord::new(Category::Conversations);
        for i in 1..=count {
            record.rows.push(row(i, ts, summary, "HIGH", "0.9"));
        }
        fs::write(path, compile_category(&record)).unwrap();
    }

    #[test]
    fn test_fresh_rows_beyond_recent_window_are_summarised() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.aicf");
        write_rows(&path, 200, "2025-05-31T12:00:00Z", &"fresh detail ".repeat(15));
        let size_before = fs::metadata(&path).unwrap().len();

        let mut m = monitor(10);
        m.config.threshold_bytes = 1024;
        let report = m.maybe_apply(&path, now());
        let DecayReport::Applied {
            items_processed,
            compression_ratio,
            decay_statistics,
        } = &report
        else {
            panic!("expected Applied, got {report:?}");
        };
        assert_eq!(*items_processed, 200);
        assert!(*compression_ratio > 0.0);
        assert_eq!(decay_statistics["recent"], 10);
        assert_eq!(decay_statistics["medium"], 190);
        assert_eq!(decay_statistics["dropped"], 0);
        assert!(fs::metadata(&path).unwrap().len() < size_before);
    }

    #[test]
    fn test_nothing_to_compact_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.aicf");
        write_rows(&path, 50, "2025-05-31T12:00:00Z", "short");
        let text = fs::read_to_string(&path).unwrap();

        let mut m = monitor(10);
        m.config.threshold_bytes = 64;
        let report = m.maybe_apply(&path, now());
        assert!(matches!(report, DecayReport::Skipped { .. }), "{report:?}");
        assert!(!report.applied());
        assert_eq!(fs::read_to_string(&path).unwrap(), text);
    }

    #[test]
    fn test_maybe_apply_respects_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.aicf");
        let mut record = CategoryRecord::new(Category::Conversations);
        for i in 1..=40 {
            record.rows.push(row(i, "2024-01-01T00:00:00Z", &"word ".repeat(40), "LOW", "0.1"));
        }
        fs::write(&path, compile_category(&record)).unwrap();
        let size = fs::metadata(&path).unwrap().len();

        let mut m = monitor(5);
        m.config.threshold_bytes = size;
        assert!(matches!(m.maybe_apply(&path, now()), DecayReport::Skipped { .. }));

        m.config.threshold_bytes = size - 1;
        match m.maybe_apply(&path, now()) {
            DecayReport::Applied {
                items_processed,
                compression_ratio,
                decay_statistics,
            } => {
                assert_eq!(items_processed, 40);
                assert!(compression_ratio > 0.0);
                assert_eq!(decay_statistics["dropped"], 35);
            }
            other => panic!("expected Applied, got {other:?}"),
        }
        let after = parse_category(&fs::read_to_string(&path).unwrap());
        assert_eq!(after.rows.len(), 5);
    }

    #[test]
    fn test_missing_schema_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.aicf");
        fs::write(&path, "@DATA\n1|2|3\n").unwrap();
        let mut m = monitor(1);
        m.config.threshold_bytes = 0;
        assert!(matches!(m.maybe_apply(&path, now()), DecayReport::Failed { .. }));
    }

    #[test]
    fn test_report_serialization_shape() {
        let json = serde_json::to_value(DecayReport::Skipped {
            reason: "small".to_string(),
        })
        .unwrap();
        assert_eq!(json["applied"], false);
        assert_eq!(json["reason"], "small");
        assert!(json.get("compressionRatio").is_none());
    }
}
