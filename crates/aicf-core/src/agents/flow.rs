//! Conversation flow summarizer.

use async_trait::async_trait;

use crate::agents::text::{clip, first_sentence, push_unique};
use crate::agents::{AgentKind, ExtractionAgent, ExtractionResult, FlowSummary, SectionContent};
use crate::checkpoint::{Message, Role};
use crate::error::AgentResult;

/// Summarises who asked for what and what was done about it.
#[derive(Debug, Clone)]
pub struct FlowSummarizer {
    /// Cap on intents and actions kept per checkpoint.
    pub max_items: usize,
}

impl Default for FlowSummarizer {
    fn default() -> Self {
        Self { max_items: 8 }
    }
}

impl FlowSummarizer {
    pub fn summarize(&self, messages: &[Message]) -> FlowSummary {
        let mut flow = FlowSummary::default();

        for message in messages {
            let sentence = first_sentence(&message.content);
            match message.role {
                Role::User => {
                    flow.user_turns += 1;
                    if flow.user_intents.len() < self.max_items {
                        push_unique(&mut flow.user_intents, sentence);
                    }
                }
                Role::Assistant => {
                    flow.assistant_turns += 1;
                    if flow.assistant_actions.len() < self.max_items {
                        push_unique(&mut flow.assistant_actions, sentence);
                    }
                }
                _ => {}
            }
        }

        flow.summary = match (flow.user_intents.first(), flow.assistant_actions.last()) {
            (Some(intent), Some(action)) => clip(&format!("{intent} -> {action}"), 200),
            (Some(intent), None) => intent.clone(),
            (None, Some(action)) => action.clone(),
            (None, None) => format!("{} messages without text", messages.len()),
        };
        flow
    }
}

#[async_trait]
impl ExtractionAgent for FlowSummarizer {
    fn kind(&self) -> AgentKind {
        AgentKind::Flow
    }

    async fn extract(&self, messages: &[Message]) -> AgentResult<ExtractionResult> {
        Ok(ExtractionResult::new(SectionContent::Flow(
            self.summarize(messages),
        )))
    }
}
