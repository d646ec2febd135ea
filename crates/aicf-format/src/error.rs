//! Error types for the record format.

/// Errors produced while encoding or decoding record files.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("value contains the field separator '|': {value}")]
    SeparatorInValue { value: String },

    #[error("value contains a line break: {value:?}")]
    NewlineInValue { value: String },

    #[error("malformed typed id {input:?}: expected <Prefix>:<number>")]
    MalformedTypedId { input: String },

    #[error("malformed link {input:?}: {reason}")]
    MalformedLink { input: String, reason: String },

    #[error("unknown category: {0}")]
    UnknownCategory(String),
}

/// Result type for record format operations.
pub type FormatResult<T> = std::result::Result<T, FormatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separator_error_mentions_value() {
        let err = FormatError::SeparatorInValue {
            value: "a|b".to_string(),
        };
        assert!(err.to_string().contains("a|b"));
    }

    #[test]
    fn test_malformed_link_display() {
        let err = FormatError::MalformedLink {
            input: "C:1=>D:2".to_string(),
            reason: "missing '->'".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("C:1=>D:2"));
        assert!(msg.contains("missing"));
    }
}
