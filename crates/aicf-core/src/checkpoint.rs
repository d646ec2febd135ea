//! Checkpoint input model.
//!
//! A checkpoint is one unit of captured conversation handed over by a capture
//! adapter. It is consumed exactly once and never persisted verbatim.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ValidationError;

/// Speaker of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
            Self::Tool => write!(f, "tool"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// A single transcript message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Raw checkpoint as delivered by a capture source.
///
/// Required fields are optional here so that an incomplete checkpoint can be
/// deserialised and then rejected by [`Checkpoint::validate`] with a precise
/// error instead of a generic parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub checkpoint_number: Option<u64>,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    #[serde(default)]
    pub token_count: u64,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Checkpoint {
    pub fn new(session_id: impl Into<String>, checkpoint_number: u64) -> Self {
        Self {
            session_id: session_id.into(),
            checkpoint_number: Some(checkpoint_number),
            ..Self::default()
        }
    }

    pub fn with_times(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start_time = start.into();
        self.end_time = end.into();
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(json).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    /// Reject incomplete checkpoints before anything is dispatched or written.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.session_id.trim().is_empty() {
            return Err(ValidationError::MissingSessionId);
        }
        if self.checkpoint_number.is_none() {
            return Err(ValidationError::MissingCheckpointNumber);
        }
        if self.messages.is_empty() {
            return Err(ValidationError::NoMessages);
        }
        Ok(())
    }

    pub fn number(&self) -> u64 {
        self.checkpoint_number.unwrap_or_default()
    }

    /// Timestamp stamped on every row derived from this checkpoint:
    /// `endTime`, else `startTime`, else now.
    pub fn effective_end_time(&self) -> String {
        [&self.end_time, &self.start_time]
            .into_iter()
            .find(|t| !t.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    /// Stable content fingerprint (hex sha256, first 12 chars).
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.session_id.as_bytes());
        hasher.update(self.number().to_be_bytes());
        for message in &self.messages {
            hasher.update(message.role.to_string().as_bytes());
            hasher.update([0u8]);
            hasher.update(message.content.as_bytes());
            hasher.update([0u8]);
        }
        let digest = hex::encode(hasher.finalize());
        digest[..12].to_string()
    }
}
