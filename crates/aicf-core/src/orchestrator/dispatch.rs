//! Concurrent agent dispatch with settle-all collection.
//!
//! Every agent runs in its own tokio task behind a semaphore and a per-agent
//! timeout. Errors, timeouts and panics become [`AgentOutcome::Failed`]; they
//! never cancel sibling agents.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use crate::agents::{AgentKind, ExtractionAgent, ExtractionResult};
use crate::checkpoint::Message;
use crate::error::AgentError;
use crate::obs::emit_agent_settled;

/// Configuration for one dispatch batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-agent deadline in milliseconds.
    pub agent_timeout_ms: u64,
    /// Maximum number of agents running at once.
    pub max_concurrent: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            agent_timeout_ms: 30_000,
            max_concurrent: 4,
        }
    }
}

impl DispatchConfig {
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_timeout_ms)
    }
}

/// Settled outcome of a single agent.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutcome {
    Success {
        kind: AgentKind,
        result: ExtractionResult,
        elapsed_ms: u64,
    },
    Failed {
        kind: AgentKind,
        error: AgentError,
    },
}

impl AgentOutcome {
    pub fn kind(&self) -> AgentKind {
        match self {
            Self::Success { kind, .. } | Self::Failed { kind, .. } => *kind,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Run `agents` over `messages` and wait for every one of them to settle.
///
/// Outcomes are returned in the order of `agents`, independent of completion
/// order.
#[instrument(skip_all, fields(agents = agents.len(), messages = messages.len()))]
pub async fn dispatch_agents(
    agents: &[Arc<dyn ExtractionAgent>],
    messages: Arc<Vec<Message>>,
    config: &DispatchConfig,
) -> Vec<AgentOutcome> {
    let sem = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
    let timeout = config.agent_timeout();

    let handles: Vec<_> = agents
        .iter()
        .map(|agent| {
            let agent = Arc::clone(agent);
            let messages = Arc::clone(&messages);
            let sem = Arc::clone(&sem);
            tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                let started = Instant::now();
                let kind = agent.kind();
                match tokio::time::timeout(timeout, agent.extract(&messages)).await {
                    Ok(Ok(result)) => {
                        let elapsed_ms = started.elapsed().as_millis() as u64;
                        debug!(agent = %kind, elapsed_ms, "agent finished");
                        AgentOutcome::Success {
                            kind,
                            result,
                            elapsed_ms,
                        }
                    }
                    Ok(Err(error)) => AgentOutcome::Failed { kind, error },
                    Err(_) => AgentOutcome::Failed {
                        kind,
                        error: AgentError::TimedOut {
                            agent: kind.to_string(),
                            timeout_ms: timeout.as_millis() as u64,
                        },
                    },
                }
            })
        })
        .collect();

    let settled = join_all(handles).await;

    agents
        .iter()
        .zip(settled)
        .map(|(agent, joined)| {
            let outcome = joined.unwrap_or_else(|e| {
                let kind = agent.kind();
                AgentOutcome::Failed {
                    kind,
                    error: AgentError::Panicked {
                        agent: kind.to_string(),
                        detail: e.to_string(),
                    },
                }
            });
            log_outcome(&outcome);
            outcome
        })
        .collect()
}

fn log_outcome(outcome: &AgentOutcome) {
    match outcome {
        AgentOutcome::Success { kind, result, .. } => {
            emit_agent_settled(kind.label(), true, result.metadata.items_found)
        }
        AgentOutcome::Failed { kind, error } => {
            emit_agent_settled(kind.label(), false, 0);
            warn!(agent = %kind, error = %error, "agent failed");
        }
    }
}
