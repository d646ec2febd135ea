//! Structured lifecycle events for checkpoint processing.
//!
//! - [`checkpoint_span`]: span tagged with the session and checkpoint number
//! - `emit_*`: one function per lifecycle event, logged with an `event` field

use tracing::{info, warn, Span};

/// Span covering one checkpoint. Attach with `Instrument::instrument` so it
/// survives await points.
pub fn checkpoint_span(session_id: &str, checkpoint: u64) -> Span {
    tracing::info_span!("aicf.checkpoint", session_id = %session_id, checkpoint)
}

pub fn emit_checkpoint_started(session_id: &str, checkpoint: u64, messages: usize) {
    info!(
        event = "checkpoint.started",
        session_id = %session_id,
        checkpoint,
        messages,
    );
}

pub fn emit_agent_settled(agent: &str, success: bool, items_found: usize) {
    info!(event = "agent.settled", agent = %agent, success, items_found);
}

pub fn emit_checkpoint_finished(
    session_id: &str,
    checkpoint: u64,
    duration_ms: u64,
    files_updated: usize,
    decay_applied: bool,
) {
    info!(
        event = "checkpoint.finished",
        session_id = %session_id,
        checkpoint,
        duration_ms,
        files_updated,
        decay_applied,
    );
}

pub fn emit_checkpoint_failed(
    session_id: &str,
    checkpoint: u64,
    duration_ms: u64,
    error: &dyn std::fmt::Display,
) {
    warn!(
        event = "checkpoint.failed",
        session_id = %session_id,
        checkpoint,
        duration_ms,
        error = %error,
    );
}

pub fn emit_decay_applied(path: &str, items_processed: usize, compression_ratio: f64) {
    info!(
        event = "decay.applied",
        path = %path,
        items_processed,
        compression_ratio,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_inside_checkpoint_span() {
        let span = checkpoint_span("sess", 3);
        let _entered = span.enter();
        emit_checkpoint_started("sess", 3, 2);
        emit_agent_settled("flow", true, 1);
    }
}
