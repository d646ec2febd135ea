//! AICF Core Library
//!
//! Turns captured AI session checkpoints into compact record files plus a
//! human-readable narrative log.
//!
//! # Module layout
//!
//! - [`checkpoint`]: input model and validation
//! - [`agents`]: the four extraction agents and their payload types
//! - [`orchestrator`]: dispatch, merge and the checkpoint pipeline
//! - [`store`]: on-disk layout, project lock, persistence of merged payloads
//! - [`writer`]: section-level atomic updates of record files
//! - [`narrative`]: markdown conversation log (prepend, compact, dedupe)
//! - [`decay`]: size and age driven compaction of category records
//! - [`stats`]: storage efficiency figures
//! - [`config`], [`error`], [`obs`], [`telemetry`]

pub mod agents;
pub mod checkpoint;
pub mod config;
pub mod decay;
pub mod error;
pub mod narrative;
pub mod obs;
pub mod orchestrator;
pub mod stats;
pub mod store;
pub mod telemetry;
pub mod writer;

pub use agents::{default_agents, AgentKind, ExtractionAgent, ExtractionResult, Level};
pub use checkpoint::{Checkpoint, Message, Role};
pub use config::{MemoryConfig, NarrativeConfig};
pub use decay::{DecayConfig, DecayMonitor, DecayReport};
pub use error::{
    AgentError, AgentResult, ConfigError, DecayError, DecayResult, PipelineError, ValidationError,
    WriteError, WriteResult,
};
pub use narrative::{CompactMode, CompactReport, DedupeReport, EntryDraft};
pub use orchestrator::{
    DispatchConfig, MergedPayload, Orchestrator, ProcessingFailure, ProcessingReport,
    ProcessingSuccess,
};
pub use stats::{analyze_file, analyze_store, FileStats, StoreStats};
pub use store::{MemoryStore, ProjectLock};
pub use telemetry::init_tracing;
pub use writer::{AppendOutcome, SectionWriter};
