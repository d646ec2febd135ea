//! Text helpers shared by the heuristic agents.

use aicf_format::sanitize_value;

/// Longest single value an agent emits.
pub const MAX_VALUE_CHARS: usize = 160;

/// Split `text` into trimmed, non-empty sentences.
///
/// Breaks on `.`, `?` or `!` followed by whitespace, and on line breaks.
pub fn sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\n' | '\r' => flush(&mut current, &mut out),
            '.' | '?' | '!' => {
                current.push(c);
                if chars.peek().map_or(true, |n| n.is_whitespace()) {
                    flush(&mut current, &mut out);
                }
            }
            _ => current.push(c),
        }
    }
    flush(&mut current, &mut out);
    out
}

fn flush(current: &mut String, out: &mut Vec<String>) {
    let trimmed = current.trim().trim_start_matches(['-', '*', '#', '>']).trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
    current.clear();
}

/// First sentence of `text`, sanitised and clipped.
pub fn first_sentence(text: &str) -> String {
    sentences(text)
        .into_iter()
        .next()
        .map(|s| clip(&s, MAX_VALUE_CHARS))
        .unwrap_or_default()
}

/// Sanitise `text` for storage and clip it to `max_chars` characters.
pub fn clip(text: &str, max_chars: usize) -> String {
    let clean = sanitize_value(text);
    truncate_chars(&clean, max_chars)
}

/// Truncate on a character boundary, marking the cut with `...`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.truncate(out.trim_end().len());
    out.push_str("...");
    out
}

/// Push `value` unless an equal value (ignoring case) is already present.
pub fn push_unique(list: &mut Vec<String>, value: String) {
    if value.is_empty() {
        return;
    }
    if !list.iter().any(|v| v.eq_ignore_ascii_case(&value)) {
        list.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentences_split_on_terminators_and_lines() {
        let s = sentences("Fix the bug. Then ship it!\n- add tests\nversion 1.2 is out");
        assert_eq!(
            s,
            vec!["Fix the bug.", "Then ship it!", "add tests", "version 1.2 is out"]
        );
    }

    #[test]
    fn test_first_sentence_sanitises() {
        assert_eq!(first_sentence("use a|b now. later"), "use a/b now.");
        assert_eq!(first_sentence("   "), "");
    }

    #[test]
    fn test_truncate_chars_is_char_safe() {
        assert_eq!(truncate_chars("héllo wörld", 8), "héllo...");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn test_push_unique_ignores_case() {
        let mut list = vec!["Use JWT".to_string()];
        push_unique(&mut list, "use jwt".to_string());
        push_unique(&mut list, String::new());
        push_unique(&mut list, "add tests".to_string());
        assert_eq!(list.len(), 2);
    }
}
