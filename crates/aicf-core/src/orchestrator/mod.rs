//! Checkpoint orchestration.
//!
//! One checkpoint flows through five phases:
//!
//! ```text
//! Validate -> Dispatch -> Merge -> Write -> MaybeDecay
//! ```
//!
//! A validation failure stops before anything is written. Agent failures never
//! stop the pipeline; they surface as error sections in the merged payload.
//!
//! # Module layout
//!
//! - [`dispatch`]: concurrent settle-all agent execution
//! - [`merge`]: folding outcomes into one tagged payload

pub mod dispatch;
pub mod merge;

pub use dispatch::{dispatch_agents, AgentOutcome, DispatchConfig};
pub use merge::{merge_outcomes, MergedPayload, MergedSection, MergedSections, PayloadMetadata};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Serialize, Serializer};
use tracing::{debug, warn, Instrument};

use crate::agents::{default_agents, ExtractionAgent};
use crate::checkpoint::Checkpoint;
use crate::decay::{DecayMonitor, DecayReport};
use crate::error::PipelineError;
use crate::obs::{
    checkpoint_span, emit_checkpoint_failed, emit_checkpoint_finished, emit_checkpoint_started,
    emit_decay_applied,
};
use crate::store::MemoryStore;

/// Successful processing summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingSuccess {
    pub session_id: String,
    pub checkpoint_number: u64,
    /// Wall time in milliseconds.
    pub processing_time: u64,
    pub agents_executed: usize,
    /// Labels of agents whose section was recorded as an error.
    pub agents_failed: Vec<String>,
    pub files_updated: Vec<String>,
    pub memory_decay_applied: bool,
}

/// Failed processing summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingFailure {
    pub error: String,
    pub error_kind: String,
    pub processing_time: u64,
    pub session_id: String,
    pub checkpoint_number: Option<u64>,
}

/// Outcome of [`Orchestrator::process_checkpoint`]. Serialises with a
/// `success` flag next to the variant's fields.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingReport {
    Success(ProcessingSuccess),
    Failure(ProcessingFailure),
}

impl ProcessingReport {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

#[derive(Serialize)]
struct Tagged<'a, T: Serialize> {
    success: bool,
    #[serde(flatten)]
    body: &'a T,
}

impl Serialize for ProcessingReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Success(body) => Tagged {
                success: true,
                body,
            }
            .serialize(serializer),
            Self::Failure(body) => Tagged {
                success: false,
                body,
            }
            .serialize(serializer),
        }
    }
}

/// Drives checkpoints through the pipeline against one [`MemoryStore`].
pub struct Orchestrator {
    store: Arc<MemoryStore>,
    agents: Vec<Arc<dyn ExtractionAgent>>,
    dispatch: DispatchConfig,
    decay: DecayMonitor,
}

impl Orchestrator {
    /// Orchestrator running the four built-in agents.
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self::with_agents(store, default_agents())
    }

    pub fn with_agents(store: Arc<MemoryStore>, agents: Vec<Arc<dyn ExtractionAgent>>) -> Self {
        let config = store.config();
        let dispatch = config.dispatch.clone();
        let decay = DecayMonitor::new(config.decay.clone(), store.writer().clone());
        Self {
            store,
            agents,
            dispatch,
            decay,
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Process one checkpoint end to end. Never returns an error; failures
    /// are reported in the [`ProcessingReport`].
    pub async fn process_checkpoint(&self, checkpoint: &Checkpoint) -> ProcessingReport {
        let span = checkpoint_span(&checkpoint.session_id, checkpoint.number());
        async {
            let started = Instant::now();
            emit_checkpoint_started(
                &checkpoint.session_id,
                checkpoint.number(),
                checkpoint.messages.len(),
            );
            let result = self.run(checkpoint).await;
            let processing_time = started.elapsed().as_millis() as u64;
            match result {
                Ok((payload, files, decay_applied)) => {
                    emit_checkpoint_finished(
                        &payload.metadata.session_id,
                        payload.metadata.checkpoint_number,
                        processing_time,
                        files.len(),
                        decay_applied,
                    );
                    ProcessingReport::Success(ProcessingSuccess {
                        session_id: payload.metadata.session_id.clone(),
                        checkpoint_number: payload.metadata.checkpoint_number,
                        processing_time,
                        agents_executed: payload.metadata.agents_executed,
                        agents_failed: payload
                            .sections
                            .errored_labels()
                            .into_iter()
                            .map(String::from)
                            .collect(),
                        files_updated: files.iter().map(|p| p.display().to_string()).collect(),
                        memory_decay_applied: decay_applied,
                    })
                }
                Err(error) => {
                    emit_checkpoint_failed(
                        &checkpoint.session_id,
                        checkpoint.number(),
                        processing_time,
                        &error,
                    );
                    ProcessingReport::Failure(ProcessingFailure {
                        error: error.to_string(),
                        error_kind: error.kind().to_string(),
                        processing_time,
                        session_id: checkpoint.session_id.clone(),
                        checkpoint_number: checkpoint.checkpoint_number,
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        checkpoint: &Checkpoint,
    ) -> Result<(MergedPayload, Vec<PathBuf>, bool), PipelineError> {
        checkpoint.validate()?;

        let messages = Arc::new(checkpoint.messages.clone());
        let outcomes = dispatch_agents(&self.agents, messages, &self.dispatch).await;
        let payload = merge_outcomes(checkpoint, outcomes);
        debug!(
            agents_failed = payload.metadata.agents_failed,
            "agent outcomes merged"
        );

        let files = self.store.persist(&payload).await?;
        let decay_applied = !files.is_empty() && self.run_decay().await;
        Ok((payload, files, decay_applied))
    }

    /// Evaluate decay for every tracked file. Decay problems are logged and
    /// never fail the checkpoint.
    async fn run_decay(&self) -> bool {
        let _lock = match self.store.lock().await {
            Ok(lock) => lock,
            Err(e) => {
                warn!(error = %e, "could not lock project for decay; skipped");
                return false;
            }
        };
        let now = Utc::now();
        let mut applied = false;
        for path in self.store.tracked_paths() {
            let report = self.decay.maybe_apply(&path, now);
            if let DecayReport::Applied {
                items_processed,
                compression_ratio,
                ..
            } = &report
            {
                emit_decay_applied(
                    &path.display().to_string(),
                    *items_processed,
                    *compression_ratio,
                );
                applied = true;
            }
        }
        applied
    }
}
