//! Error taxonomy for checkpoint processing.
//!
//! - [`ValidationError`]: malformed checkpoint, fatal before any write
//! - [`AgentError`]: one extractor failed, recovered locally
//! - [`WriteError`]: persistence failed, fatal for the checkpoint
//! - [`DecayError`]: compaction failed, logged and skipped
//! - [`ConfigError`]: unreadable or invalid `config.toml`

use std::path::PathBuf;

/// Errors produced by checkpoint validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("checkpoint is missing sessionId")]
    MissingSessionId,

    #[error("checkpoint is missing checkpointNumber")]
    MissingCheckpointNumber,

    #[error("checkpoint has no messages")]
    NoMessages,

    #[error("checkpoint is not valid JSON: {0}")]
    Malformed(String),
}

/// Errors produced by a single extraction agent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    #[error("agent {agent} failed: {reason}")]
    Failed { agent: String, reason: String },

    #[error("agent {agent} timed out after {timeout_ms}ms")]
    TimedOut { agent: String, timeout_ms: u64 },

    #[error("agent {agent} panicked: {detail}")]
    Panicked { agent: String, detail: String },
}

/// Errors produced while persisting records.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("section @{section} not found in {}", path.display())]
    SectionNotFound { path: PathBuf, section: String },

    #[error("invalid row for {}: {source}", path.display())]
    InvalidRow {
        path: PathBuf,
        #[source]
        source: aicf_format::FormatError,
    },

    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("project lock unavailable: {0}")]
    Lock(String),

    #[error("write task aborted: {0}")]
    Task(String),
}

impl WriteError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors produced by the decay monitor.
#[derive(Debug, thiserror::Error)]
pub enum DecayError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("record {} has no schema; refusing to compact", path.display())]
    NoSchema { path: PathBuf },

    #[error("write error: {0}")]
    Write(#[from] WriteError),
}

/// Errors produced while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Any error that can end checkpoint processing.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("write error: {0}")]
    Write(#[from] WriteError),

    #[error("decay error: {0}")]
    Decay(#[from] DecayError),
}

impl PipelineError {
    /// Stable name of the error class, as surfaced in processing reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Agent(_) => "AgentError",
            Self::Write(_) => "WriteError",
            Self::Decay(_) => "DecayError",
        }
    }
}

/// Result type for agent operations.
pub type AgentResult<T> = std::result::Result<T, AgentError>;

/// Result type for record writes.
pub type WriteResult<T> = std::result::Result<T, WriteError>;

/// Result type for decay operations.
pub type DecayResult<T> = std::result::Result<T, DecayError>;
