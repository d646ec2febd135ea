//! Insight analyzer: learnings, issues and architecture notes.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::agents::text::{clip, sentences, MAX_VALUE_CHARS};
use crate::agents::{
    AgentKind, ArchitectureNote, ExtractionAgent, ExtractionResult, Insight, InsightReport,
    IssueNote, Level, SectionContent,
};
use crate::checkpoint::{Message, Role};
use crate::error::AgentResult;

fn insight_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:learned|realized|realised|turns out|insight|important|note that|key takeaway|lesson|discovered|the trick is|gotcha)\b",
        )
        .expect("insight regex is valid")
    })
}

fn issue_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:error|bug|fails?|failing|failed|broken|crash\w*|panic\w*|exception|regression|doesn't work|not working|leak\w*)\b",
        )
        .expect("issue regex is valid")
    })
}

fn critical_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:crash\w*|panic\w*|data loss|security|corrupt\w*|production|outage)\b")
            .expect("severity regex is valid")
    })
}

fn architecture_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(module|component|service|layer|pipeline|middleware|orchestrator|schema|interface|trait|crate|endpoint)s?\b",
        )
        .expect("architecture regex is valid")
    })
}

fn design_verb_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:architecture|design\w*|structure\w*|split|separate\w*|introduc\w*|added?|creat\w*|extract\w*|wraps?|owns?)\b",
        )
        .expect("architecture regex is valid")
    })
}

/// Classifies sentences into insights, issues and architecture notes.
#[derive(Debug, Clone)]
pub struct InsightAnalyzer {
    pub max_per_kind: usize,
}

impl Default for InsightAnalyzer {
    fn default() -> Self {
        Self { max_per_kind: 10 }
    }
}

impl InsightAnalyzer {
    pub fn analyze(&self, messages: &[Message]) -> InsightReport {
        let mut report = InsightReport::default();

        for message in messages {
            if !matches!(message.role, Role::User | Role::Assistant) {
                continue;
            }
            for sentence in sentences(&message.content) {
                let text = clip(&sentence, MAX_VALUE_CHARS);

                if issue_regex().is_match(&sentence) {
                    if report.issues.len() < self.max_per_kind
                        && !report.issues.iter().any(|i| i.description == text)
                    {
                        report.issues.push(IssueNote {
                            description: text,
                            severity: severity_of(&sentence),
                        });
                    }
                    continue;
                }

                if insight_regex().is_match(&sentence) {
                    if report.insights.len() < self.max_per_kind
                        && !report.insights.iter().any(|i| i.text == text)
                    {
                        report.insights.push(Insight {
                            category: category_of(&sentence).to_string(),
                            confidence: if message.role == Role::Assistant {
                                Level::Medium
                            } else {
                                Level::High
                            },
                            text,
                        });
                    }
                    continue;
                }

                if let Some(component) = architecture_component(&sentence) {
                    if report.architecture.len() < self.max_per_kind
                        && !report.architecture.iter().any(|a| a.description == text)
                    {
                        report.architecture.push(ArchitectureNote {
                            component,
                            description: text,
                        });
                    }
                }
            }
        }

        report
    }
}

fn severity_of(sentence: &str) -> Level {
    if critical_regex().is_match(sentence) {
        Level::High
    } else {
        Level::Medium
    }
}

fn category_of(sentence: &str) -> &'static str {
    let lower = sentence.to_lowercase();
    if ["performance", "slow", "fast", "latency", "memory"]
        .iter()
        .any(|k| lower.contains(k))
    {
        "performance"
    } else if ["test", "coverage", "assert"].iter().any(|k| lower.contains(k)) {
        "testing"
    } else if ["security", "auth", "token", "secret"]
        .iter()
        .any(|k| lower.contains(k))
    {
        "security"
    } else {
        "general"
    }
}

fn architecture_component(sentence: &str) -> Option<String> {
    if !design_verb_regex().is_match(sentence) {
        return None;
    }
    architecture_regex()
        .captures(sentence)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
}

#[async_trait]
impl ExtractionAgent for InsightAnalyzer {
    fn kind(&self) -> AgentKind {
        AgentKind::Insights
    }

    async fn extract(&self, messages: &[Message]) -> AgentResult<ExtractionResult> {
        Ok(ExtractionResult::new(SectionContent::Insights(
            self.analyze(messages),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifies_each_kind() {
        let report = InsightAnalyzer::default().analyze(&[
            Message::user("The login test fails on CI."),
            Message::assistant(
                "Turns out the token cache was stale. I added an auth middleware layer.",
            ),
        ]);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].severity, Level::Medium);
        assert_eq!(report.insights.len(), 1);
        assert_eq!(report.insights[0].category, "security");
        assert_eq!(report.architecture.len(), 1);
        assert_eq!(report.architecture[0].component, "middleware");
    }

    #[test]
    fn test_crash_is_high_severity() {
        let report =
            InsightAnalyzer::default().analyze(&[Message::user("The server panics on startup")]);
        assert_eq!(report.issues[0].severity, Level::High);
    }

    #[test]
    fn test_plain_chat_yields_nothing() {
        let report = InsightAnalyzer::default().analyze(&[
            Message::user("hello"),
            Message::assistant("hi, how can I help?"),
        ]);
        assert_eq!(report, InsightReport::default());
    }

    #[test]
    fn test_caps_per_kind() {
        let analyzer = InsightAnalyzer { max_per_kind: 2 };
        let text = "bug one. bug two. bug three.";
        let report = analyzer.analyze(&[Message::user(text)]);
        assert_eq!(report.issues.len(), 2);
    }
}
