//! Boundary rules for field values.
//!
//! The format has no escape scheme: a `|` inside a value would silently split
//! it into two fields, and a line break would start a new row. Values are
//! therefore sanitised before they reach a record, and the section writer
//! validates every row it appends.

use crate::error::{FormatError, FormatResult};
use crate::FIELD_SEPARATOR;

/// Replacement written in place of the field separator.
pub const SEPARATOR_REPLACEMENT: char = '/';

/// Make `value` safe to store as a single field.
///
/// `|` becomes `/`, and every run of CR/LF characters collapses to one space.
pub fn sanitize_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_break = false;
    for c in value.chars() {
        match c {
            '\r' | '\n' => {
                if !in_break {
                    out.push(' ');
                }
                in_break = true;
            }
            FIELD_SEPARATOR => {
                out.push(SEPARATOR_REPLACEMENT);
                in_break = false;
            }
            other => {
                out.push(other);
                in_break = false;
            }
        }
    }
    out.trim().to_string()
}

/// Reject values that cannot be stored without escaping.
pub fn validate_value(value: &str) -> FormatResult<()> {
    if value.contains(FIELD_SEPARATOR) {
        return Err(FormatError::SeparatorInValue {
            value: value.to_string(),
        });
    }
    if value.contains(['\n', '\r']) {
        return Err(FormatError::NewlineInValue {
            value: value.to_string(),
        });
    }
    Ok(())
}
