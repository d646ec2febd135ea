//! Merge of settled agent outcomes into one structured payload.
//!
//! Each section is either populated from a successful agent or an explicit
//! error placeholder labelled `error_<label>`, so a missing signal is visible
//! downstream instead of silently dropped.

use serde::{Deserialize, Serialize};

use crate::agents::{AgentKind, Decision, FlowSummary, InsightReport, SectionContent, WorkState};
use crate::checkpoint::Checkpoint;
use crate::orchestrator::dispatch::AgentOutcome;

/// One merged section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergedSection<T> {
    Populated {
        label: String,
        content: T,
        items_found: usize,
    },
    Errored {
        label: String,
        message: String,
    },
}

impl<T> MergedSection<T> {
    fn errored(kind: AgentKind, message: impl Into<String>) -> Self {
        Self::Errored {
            label: format!("error_{}", kind.label()),
            message: message.into(),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Populated { label, .. } | Self::Errored { label, .. } => label,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Errored { .. })
    }

    pub fn content(&self) -> Option<&T> {
        match self {
            Self::Populated { content, .. } => Some(content),
            Self::Errored { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Errored { message, .. } => Some(message),
            Self::Populated { .. } => None,
        }
    }
}

/// The four sections, one per agent capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedSections {
    pub flow: MergedSection<FlowSummary>,
    pub decisions: MergedSection<Vec<Decision>>,
    pub insights: MergedSection<InsightReport>,
    pub state: MergedSection<WorkState>,
}

impl MergedSections {
    /// Labels of sections that carry an error placeholder.
    pub fn errored_labels(&self) -> Vec<&str> {
        [
            (self.flow.is_error(), self.flow.label()),
            (self.decisions.is_error(), self.decisions.label()),
            (self.insights.is_error(), self.insights.label()),
            (self.state.is_error(), self.state.label()),
        ]
        .into_iter()
        .filter_map(|(err, label)| err.then_some(label))
        .collect()
    }
}

/// Checkpoint facts carried alongside the sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadMetadata {
    pub session_id: String,
    pub checkpoint_number: u64,
    pub start_time: String,
    pub end_time: String,
    /// Timestamp stamped on every row derived from this checkpoint.
    pub timestamp: String,
    pub token_count: u64,
    pub message_count: usize,
    pub fingerprint: String,
    pub agents_executed: usize,
    pub agents_failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedPayload {
    pub metadata: PayloadMetadata,
    pub sections: MergedSections,
}

const NOT_EXECUTED: &str = "agent was not executed";

#[derive(Default)]
struct Slots {
    flow: Option<MergedSection<FlowSummary>>,
    decisions: Option<MergedSection<Vec<Decision>>>,
    insights: Option<MergedSection<InsightReport>>,
    state: Option<MergedSection<WorkState>>,
}

impl Slots {
    fn fail(&mut self, kind: AgentKind, message: String) {
        match kind {
            AgentKind::Flow => self.flow = Some(MergedSection::errored(kind, message)),
            AgentKind::Decisions => self.decisions = Some(MergedSection::errored(kind, message)),
            AgentKind::Insights => self.insights = Some(MergedSection::errored(kind, message)),
            AgentKind::State => self.state = Some(MergedSection::errored(kind, message)),
        }
    }

    fn into_sections(self) -> MergedSections {
        MergedSections {
            flow: self
                .flow
                .unwrap_or_else(|| MergedSection::errored(AgentKind::Flow, NOT_EXECUTED)),
            decisions: self
                .decisions
                .unwrap_or_else(|| MergedSection::errored(AgentKind::Decisions, NOT_EXECUTED)),
            insights: self
                .insights
                .unwrap_or_else(|| MergedSection::errored(AgentKind::Insights, NOT_EXECUTED)),
            state: self
                .state
                .unwrap_or_else(|| MergedSection::errored(AgentKind::State, NOT_EXECUTED)),
        }
    }
}

/// Combine `outcomes` with checkpoint metadata.
///
/// A capability with no outcome at all is also reported as an error section.
pub fn merge_outcomes(checkpoint: &Checkpoint, outcomes: Vec<AgentOutcome>) -> MergedPayload {
    let agents_executed = outcomes.len();
    let agents_failed = outcomes.iter().filter(|o| !o.is_success()).count();
    let mut slots = Slots::default();

    for outcome in outcomes {
        let (kind, result) = match outcome {
            AgentOutcome::Success { kind, result, .. } => (kind, result),
            AgentOutcome::Failed { kind, error } => {
                slots.fail(kind, error.to_string());
                continue;
            }
        };
        let label = result.section_label;
        let items_found = result.metadata.items_found;
        match (kind, result.content) {
            (AgentKind::Flow, SectionContent::Flow(content)) => {
                slots.flow = Some(MergedSection::Populated {
                    label,
                    content,
                    items_found,
                })
            }
            (AgentKind::Decisions, SectionContent::Decisions(content)) => {
                slots.decisions = Some(MergedSection::Populated {
                    label,
                    content,
                    items_found,
                })
            }
            (AgentKind::Insights, SectionContent::Insights(content)) => {
                slots.insights = Some(MergedSection::Populated {
                    label,
                    content,
                    items_found,
                })
            }
            (AgentKind::State, SectionContent::State(content)) => {
                slots.state = Some(MergedSection::Populated {
                    label,
                    content,
                    items_found,
                })
            }
            (kind, other) => slots.fail(
                kind,
                format!("agent returned {} content", other.kind().label()),
            ),
        }
    }

    MergedPayload {
        metadata: PayloadMetadata {
            session_id: checkpoint.session_id.clone(),
            checkpoint_number: checkpoint.number(),
            start_time: checkpoint.start_time.clone(),
            end_time: checkpoint.end_time.clone(),
            timestamp: checkpoint.effective_end_time(),
            token_count: checkpoint.token_count,
            message_count: checkpoint.messages.len(),
            fingerprint: checkpoint.fingerprint(),
            agents_executed,
            agents_failed,
        },
        sections: slots.into_sections(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ExtractionResult;
    use crate::checkpoint::Message;
    use crate::error::AgentError;

    fn checkpoint() -> Checkpoint {
        Checkpoint::new("sess", 1)
            .with_times("2025-03-01T09:00:00Z", "2025-03-01T10:00:00Z")
            .with_messages(vec![Message::user("hi")])
    }

    fn success(content: SectionContent) -> AgentOutcome {
        AgentOutcome::Success {
            kind: content.kind(),
            result: ExtractionResult::new(content),
            elapsed_ms: 1,
        }
    }

    #[test]
    fn test_failed_agent_becomes_error_section() {
        let outcomes = vec![
            success(SectionContent::Flow(FlowSummary::default())),
            AgentOutcome::Failed {
                kind: AgentKind::Decisions,
                error: AgentError::Failed {
                    agent: "decisions".to_string(),
                    reason: "boom".to_string(),
                },
            },
            success(SectionContent::Insights(InsightReport::default())),
            success(SectionContent::State(WorkState {
                current_task: "x".to_string(),
                status: Default::default(),
                priority: crate::agents::Level::Low,
                blockers: vec![],
                next_steps: vec![],
                files_changed: vec![],
            })),
        ];
        let payload = merge_outcomes(&checkpoint(), outcomes);
        assert_eq!(payload.metadata.agents_executed, 4);
        assert_eq!(payload.metadata.agents_failed, 1);
        assert!(payload.sections.decisions.is_error());
        assert_eq!(payload.sections.decisions.label(), "error_decisions");
        assert!(payload
            .sections
            .decisions
            .error_message()
            .unwrap()
            .contains("boom"));
        assert!(!payload.sections.flow.is_error());
        assert_eq!(payload.sections.errored_labels(), vec!["error_decisions"]);
        assert_eq!(payload.metadata.timestamp, "2025-03-01T10:00:00Z");
    }

    #[test]
    fn test_missing_and_mismatched_outcomes_are_errors() {
        let outcomes = vec![AgentOutcome::Success {
            kind: AgentKind::Flow,
            result: ExtractionResult::new(SectionContent::Decisions(vec![])),
            elapsed_ms: 0,
        }];
        let payload = merge_outcomes(&checkpoint(), outcomes);
        assert_eq!(payload.sections.errored_labels().len(), 4);
        assert!(payload
            .sections
            .flow
            .error_message()
            .unwrap()
            .contains("decisions content"));
    }

    #[test]
    fn test_merged_section_serializes_with_status_tag() {
        let section: MergedSection<Vec<Decision>> =
            MergedSection::errored(AgentKind::Decisions, "timed out");
        let json = serde_json::to_value(&section).unwrap();
        assert_eq!(json["status"], "errored");
        assert_eq!(json["label"], "error_decisions");
    }
}
