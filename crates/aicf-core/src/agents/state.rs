//! Work state tracker.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::agents::text::{clip, first_sentence, push_unique, sentences, MAX_VALUE_CHARS};
use crate::agents::{
    AgentKind, ExtractionAgent, ExtractionResult, Level, SectionContent, WorkState, WorkStatus,
};
use crate::checkpoint::{Message, Role};
use crate::error::AgentResult;

fn blocker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:blocked|blocker|stuck|waiting (?:on|for)|can't proceed|cannot proceed|depends on)\b")
            .expect("blocker regex is valid")
    })
}

fn next_step_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:next,?|then|todo|to do|follow[- ]up|after that|still need to|remaining)\b")
            .expect("next step regex is valid")
    })
}

fn completed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:done|completed?|finished|all tests pass(?:ing)?|shipped|merged)\b")
            .expect("completion regex is valid")
    })
}

fn urgent_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:urgent|asap|critical|immediately|hotfix|production)\b")
            .expect("priority regex is valid")
    })
}

fn file_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[\s`'(])((?:[\w.-]+/)*[\w-]+\.(?:rs|toml|md|json|ya?ml|ts|tsx|js|jsx|py|go|sh|sql|html|css|aicf|lock))\b")
            .expect("file regex is valid")
    })
}

/// Tracks what is being worked on and what stands in the way.
#[derive(Debug, Clone)]
pub struct StateTracker {
    pub max_items: usize,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self { max_items: 10 }
    }
}

impl StateTracker {
    pub fn track(&self, messages: &[Message]) -> WorkState {
        let current_task = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User && !m.content.trim().is_empty())
            .map(|m| first_sentence(&m.content))
            .unwrap_or_default();

        let mut blockers = Vec::new();
        let mut next_steps = Vec::new();
        let mut files_changed = Vec::new();
        let mut urgent = false;

        for message in messages {
            for caps in file_regex().captures_iter(&message.content) {
                if files_changed.len() < self.max_items {
                    push_unique(&mut files_changed, caps[1].to_string());
                }
            }
            urgent |= urgent_regex().is_match(&message.content);

            for sentence in sentences(&message.content) {
                if blocker_regex().is_match(&sentence) {
                    if blockers.len() < self.max_items {
                        push_unique(&mut blockers, clip(&sentence, MAX_VALUE_CHARS));
                    }
                } else if next_step_regex().is_match(&sentence) && next_steps.len() < self.max_items
                {
                    push_unique(&mut next_steps, clip(&sentence, MAX_VALUE_CHARS));
                }
            }
        }

        // Status reflects the tail of the conversation, not its history.
        let last_assistant = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let status = if !blockers.is_empty() && blocker_regex().is_match(last_assistant) {
            WorkStatus::Blocked
        } else if completed_regex().is_match(last_assistant) {
            WorkStatus::Completed
        } else if !blockers.is_empty() {
            WorkStatus::Blocked
        } else {
            WorkStatus::InProgress
        };

        let priority = if urgent {
            Level::High
        } else if status == WorkStatus::Blocked {
            Level::Medium
        } else {
            Level::Low
        };

        WorkState {
            current_task,
            status,
            priority,
            blockers,
            next_steps,
            files_changed,
        }
    }
}

#[async_trait]
impl ExtractionAgent for StateTracker {
    fn kind(&self) -> AgentKind {
        AgentKind::State
    }

    async fn extract(&self, messages: &[Message]) -> AgentResult<ExtractionResult> {
        Ok(ExtractionResult::new(SectionContent::State(
            self.track(messages),
        )))
    }
}
