//! Project configuration, read from `.aicf/config.toml`.
//!
//! Every field has a default, so a missing file or a partial file is fine.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decay::DecayConfig;
use crate::error::ConfigError;
use crate::orchestrator::DispatchConfig;

pub const DEFAULT_RECORDS_DIR: &str = ".aicf";
pub const DEFAULT_NARRATIVE_DIR: &str = ".ai";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeConfig {
    pub log_file: String,
    pub archive_file: String,
    /// Entries kept verbatim by `compact` when the caller gives no count.
    pub keep_entries: usize,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            log_file: "conversation-log.md".to_string(),
            archive_file: "conversation-log-archive.md".to_string(),
            keep_entries: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Written into fresh index records; the project directory name when empty.
    pub project_name: String,
    pub records_dir: String,
    pub narrative_dir: String,
    pub activity_cap: usize,
    pub dispatch: DispatchConfig,
    pub decay: DecayConfig,
    pub narrative: NarrativeConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            project_name: String::new(),
            records_dir: DEFAULT_RECORDS_DIR.to_string(),
            narrative_dir: DEFAULT_NARRATIVE_DIR.to_string(),
            activity_cap: aicf_format::RECENT_ACTIVITY_CAP,
            dispatch: DispatchConfig::default(),
            decay: DecayConfig::default(),
            narrative: NarrativeConfig::default(),
        }
    }
}

impl MemoryConfig {
    pub fn config_path(project_root: &Path) -> PathBuf {
        project_root.join(DEFAULT_RECORDS_DIR).join(CONFIG_FILE)
    }

    /// Load `<root>/.aicf/config.toml`, or defaults when it does not exist.
    pub fn load(project_root: &Path) -> Result<Self, ConfigError> {
        let path = Self::config_path(project_root);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file; using defaults");
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        toml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Configured project name, else the last component of `project_root`.
    pub fn resolved_project_name(&self, project_root: &Path) -> String {
        if !self.project_name.trim().is_empty() {
            return self.project_name.clone();
        }
        project_root
            .canonicalize()
            .ok()
            .as_deref()
            .unwrap_or(project_root)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = MemoryConfig::default();
        assert_eq!(cfg.activity_cap, 20);
        assert_eq!(cfg.dispatch.agent_timeout_ms, 30_000);
        assert_eq!(cfg.decay.threshold_bytes, 1024 * 1024);
        assert_eq!(cfg.narrative.archive_file, "conversation-log-archive.md");
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let cfg = MemoryConfig::from_toml_str(
            r#"
            project_name = "demo"

            [dispatch]
            agent_timeout_ms = 500

            [decay]
            threshold_bytes = 2048
            min_confidence = "LOW"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.project_name, "demo");
        assert_eq!(cfg.dispatch.agent_timeout_ms, 500);
        assert_eq!(cfg.dispatch.max_concurrent, 4);
        assert_eq!(cfg.decay.threshold_bytes, 2048);
        assert_eq!(cfg.decay.keep_recent, 50);
        assert_eq!(cfg.decay.min_confidence, crate::agents::Level::Low);
    }

    #[test]
    fn test_load_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(MemoryConfig::load(dir.path()).unwrap(), MemoryConfig::default());

        fs::create_dir_all(dir.path().join(DEFAULT_RECORDS_DIR)).unwrap();
        fs::write(MemoryConfig::config_path(dir.path()), "activity_cap = \"many\"").unwrap();
        assert!(matches!(
            MemoryConfig::load(dir.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_resolved_project_name() {
        let mut cfg = MemoryConfig::default();
        assert_eq!(cfg.resolved_project_name(Path::new("/tmp/my-proj")), "my-proj");
        cfg.project_name = "named".to_string();
        assert_eq!(cfg.resolved_project_name(Path::new("/tmp/x")), "named");
    }
}
