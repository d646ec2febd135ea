//! Extraction agents.
//!
//! Four independent procedures read the same message sequence and each
//! produce one labelled partial result. Agents share no mutable state and do
//! no I/O, so the orchestrator can run them concurrently.
//!
//! # Module layout
//!
//! - [`flow`]: `FlowSummarizer`: conversation flow and intents
//! - [`decisions`]: `DecisionExtractor`: decisions with impact and confidence
//! - [`insights`]: `InsightAnalyzer`: insights, issues, architecture notes
//! - [`state`]: `StateTracker`: current task, blockers, next steps, files
//! - [`text`]: shared sentence and truncation helpers

pub mod decisions;
pub mod flow;
pub mod insights;
pub mod state;
pub mod text;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::checkpoint::Message;
use crate::error::AgentResult;

pub use decisions::DecisionExtractor;
pub use flow::FlowSummarizer;
pub use insights::InsightAnalyzer;
pub use state::StateTracker;

/// The capability an agent provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Flow,
    Decisions,
    Insights,
    State,
}

impl AgentKind {
    /// Canonical dispatch and merge order.
    pub const ALL: [AgentKind; 4] = [
        AgentKind::Flow,
        AgentKind::Decisions,
        AgentKind::Insights,
        AgentKind::State,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Flow => "flow",
            Self::Decisions => "decisions",
            Self::Insights => "insights",
            Self::State => "state",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Three-step rating used for confidence, impact, severity and priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Low,
    Medium,
    High,
}

impl Level {
    /// Numeric weight in `[0, 1]`.
    pub fn score(&self) -> f32 {
        match self {
            Self::Low => 0.2,
            Self::Medium => 0.5,
            Self::High => 0.8,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

/// Output of the flow summarizer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlowSummary {
    pub summary: String,
    pub user_turns: usize,
    pub assistant_turns: usize,
    pub user_intents: Vec<String>,
    pub assistant_actions: Vec<String>,
}

/// A decision taken during the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub decision: String,
    pub rationale: String,
    pub impact: Level,
    pub confidence: Level,
    pub impact_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub text: String,
    pub category: String,
    pub confidence: Level,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueNote {
    pub description: String,
    pub severity: Level,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureNote {
    pub component: String,
    pub description: String,
}

/// Output of the insight analyzer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InsightReport {
    pub insights: Vec<Insight>,
    pub issues: Vec<IssueNote>,
    pub architecture: Vec<ArchitectureNote>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    #[default]
    InProgress,
    Blocked,
    Completed,
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Blocked => write!(f, "blocked"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Output of the state tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkState {
    pub current_task: String,
    pub status: WorkStatus,
    pub priority: Level,
    pub blockers: Vec<String>,
    pub next_steps: Vec<String>,
    pub files_changed: Vec<String>,
}

/// Typed payload of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SectionContent {
    Flow(FlowSummary),
    Decisions(Vec<Decision>),
    Insights(InsightReport),
    State(WorkState),
}

impl SectionContent {
    pub fn kind(&self) -> AgentKind {
        match self {
            Self::Flow(_) => AgentKind::Flow,
            Self::Decisions(_) => AgentKind::Decisions,
            Self::Insights(_) => AgentKind::Insights,
            Self::State(_) => AgentKind::State,
        }
    }

    /// How much content was extracted. Diagnostic only.
    pub fn items_found(&self) -> usize {
        match self {
            Self::Flow(f) => f.user_intents.len() + f.assistant_actions.len(),
            Self::Decisions(d) => d.len(),
            Self::Insights(r) => r.insights.len() + r.issues.len() + r.architecture.len(),
            Self::State(s) => {
                usize::from(!s.current_task.is_empty())
                    + s.blockers.len()
                    + s.next_steps.len()
                    + s.files_changed.len()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionMetadata {
    pub items_found: usize,
}

/// One labelled partial result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub section_label: String,
    pub content: SectionContent,
    pub metadata: ExtractionMetadata,
}

impl ExtractionResult {
    pub fn new(content: SectionContent) -> Self {
        Self {
            section_label: content.kind().label().to_string(),
            metadata: ExtractionMetadata {
                items_found: content.items_found(),
            },
            content,
        }
    }
}

/// An extraction procedure over a message sequence.
///
/// Implementations must not perform I/O or share mutable state; a failure is
/// local to the agent and never aborts its siblings.
#[async_trait]
pub trait ExtractionAgent: Send + Sync {
    fn kind(&self) -> AgentKind;

    async fn extract(&self, messages: &[Message]) -> AgentResult<ExtractionResult>;
}

/// The four built-in agents in canonical order.
pub fn default_agents() -> Vec<Arc<dyn ExtractionAgent>> {
    vec![
        Arc::new(FlowSummarizer::default()),
        Arc::new(DecisionExtractor::default()),
        Arc::new(InsightAnalyzer::default()),
        Arc::new(StateTracker::default()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_agents_cover_every_kind_in_order() {
        let kinds: Vec<AgentKind> = default_agents().iter().map(|a| a.kind()).collect();
        assert_eq!(kinds, AgentKind::ALL.to_vec());
    }

    #[test]
    fn test_extraction_result_label_and_items() {
        let result = ExtractionResult::new(SectionContent::Decisions(vec![Decision {
            decision: "use JWT".to_string(),
            rationale: String::new(),
            impact: Level::High,
            confidence: Level::Medium,
            impact_score: 0.8,
        }]));
        assert_eq!(result.section_label, "decisions");
        assert_eq!(result.metadata.items_found, 1);
    }

    #[test]
    fn test_level_ordering_and_display() {
        assert!(Level::High > Level::Low);
        assert_eq!(Level::Medium.to_string(), "MEDIUM");
        assert_eq!(
            serde_json::to_string(&Level::High).unwrap(),
            "\"HIGH\""
        );
    }
}
