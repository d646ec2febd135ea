//! Decision extractor.
//!
//! Finds sentences that commit to a course of action ("let's use X", "we'll
//! go with Y", "decided to Z"). A decision answered by an agreement from the
//! other side ("Agreed, implementing ...") is marked high confidence and the
//! agreement itself is not counted as a second decision.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::agents::text::{clip, sentences, MAX_VALUE_CHARS};
use crate::agents::{AgentKind, Decision, ExtractionAgent, ExtractionResult, Level, SectionContent};
use crate::checkpoint::{Message, Role};
use crate::error::AgentResult;

fn cue_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:let'?s|let us|we(?:'ll| will| should)|i(?:'ll| will))\s+(?:use|go with|switch to|adopt|implement|keep|move to|migrate to|stick with)\b|\b(?:decided|decide to|chose|choosing|opted for|going with|settled on|agreed to)\b",
        )
        .expect("decision cue regex is valid")
    })
}

fn agreement_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:agreed|sounds good|yes|yep|ok(?:ay)?|great|perfect|will do|good idea|makes sense|implementing|done)\b",
        )
        .expect("agreement regex is valid")
    })
}

fn rationale_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:because|since|so that|due to|to avoid)\b\s*(.+)")
            .expect("rationale regex is valid")
    })
}

fn high_impact_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:architecture|security|auth\w*|jwt|oauth|database|schema|migration|api|framework|deploy\w*|infrastructure|protocol)\b",
        )
        .expect("impact regex is valid")
    })
}

fn medium_impact_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:library|crate|dependency|config\w*|test\w*|refactor\w*|performance|cache|logging)\b",
        )
        .expect("impact regex is valid")
    })
}

/// Extracts decisions with impact and confidence ratings.
#[derive(Debug, Clone, Default)]
pub struct DecisionExtractor;

impl DecisionExtractor {
    pub fn find_decisions(&self, messages: &[Message]) -> Vec<Decision> {
        let mut decisions: Vec<Decision> = Vec::new();
        // Index range in `decisions` produced by the previous message, if any.
        let mut previous: Option<(Role, std::ops::Range<usize>)> = None;

        for message in messages {
            if !matches!(message.role, Role::User | Role::Assistant) {
                continue;
            }

            let confirmed = match &previous {
                Some((prev_role, range))
                    if *prev_role != message.role
                        && !range.is_empty()
                        && agreement_regex().is_match(&message.content) =>
                {
                    Some(range.clone())
                }
                _ => None,
            };
            if let Some(range) = confirmed {
                for decision in &mut decisions[range] {
                    confirm(decision, &message.content);
                }
                previous = None;
                continue;
            }

            let start = decisions.len();
            let rationale = rationale_regex()
                .captures(&message.content)
                .and_then(|c| c.get(1))
                .map(|m| clip(m.as_str(), MAX_VALUE_CHARS))
                .unwrap_or_default();

            for sentence in sentences(&message.content) {
                if !cue_regex().is_match(&sentence) {
                    continue;
                }
                let text = clip(&sentence, MAX_VALUE_CHARS);
                if decisions
                    .iter()
                    .any(|d| d.decision.eq_ignore_ascii_case(&text))
                {
                    continue;
                }
                let impact = impact_of(&sentence);
                decisions.push(Decision {
                    decision: text,
                    rationale: rationale.clone(),
                    impact,
                    confidence: Level::Medium,
                    impact_score: impact.score(),
                });
            }

            previous = Some((message.role, start..decisions.len()));
        }

        decisions
    }
}

fn impact_of(text: &str) -> Level {
    if high_impact_regex().is_match(text) {
        Level::High
    } else if medium_impact_regex().is_match(text) {
        Level::Medium
    } else {
        Level::Low
    }
}

fn confirm(decision: &mut Decision, agreement: &str) {
    decision.confidence = Level::High;
    decision.impact_score = (decision.impact_score + 0.1).min(1.0);
    if decision.rationale.is_empty() {
        decision.rationale = format!("confirmed: {}", clip(agreement, 80));
    }
}

#[async_trait]
impl ExtractionAgent for DecisionExtractor {
    fn kind(&self) -> AgentKind {
        AgentKind::Decisions
    }

    async fn extract(&self, messages: &[Message]) -> AgentResult<ExtractionResult> {
        Ok(ExtractionResult::new(SectionContent::Decisions(
            self.find_decisions(messages),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwt_decision_confirmed_by_assistant() {
        let decisions = DecisionExtractor.find_decisions(&[
            Message::user("Let's use JWT for auth"),
            Message::assistant("Agreed, implementing JWT middleware"),
        ]);
        assert_eq!(decisions.len(), 1);
        let d = &decisions[0];
        assert!(d.decision.contains("JWT"));
        assert_eq!(d.confidence, Level::High);
        assert_eq!(d.impact, Level::High);
        assert!(d.rationale.starts_with("confirmed:"));
    }

    #[test]
    fn test_unconfirmed_decision_is_medium_confidence() {
        let decisions = DecisionExtractor.find_decisions(&[Message::assistant(
            "We'll go with sqlite because it needs no server.",
        )]);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].confidence, Level::Medium);
        assert!(decisions[0].rationale.contains("no server"));
    }

    #[test]
    fn test_no_cue_no_decision() {
        let decisions = DecisionExtractor.find_decisions(&[
            Message::user("What time is it?"),
            Message::assistant("Ok, it is noon."),
        ]);
        assert!(decisions.is_empty());
    }

    #[test]
    fn test_duplicate_decisions_collapse() {
        let decisions = DecisionExtractor.find_decisions(&[
            Message::user("Let's use tokio."),
            Message::user("let's use tokio."),
        ]);
        assert_eq!(decisions.len(), 1);
    }

    #[test]
    fn test_impact_levels() {
        assert_eq!(impact_of("change the database schema"), Level::High);
        assert_eq!(impact_of("bump the logging crate"), Level::Medium);
        assert_eq!(impact_of("rename a variable"), Level::Low);
    }
}
