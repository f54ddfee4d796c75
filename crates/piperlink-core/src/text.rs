//! Normalisation of incoming synthesis text.

/// Collapse `text` onto one line and make sure it ends like a sentence.
///
/// Each line is trimmed and non-empty lines are joined with single spaces.
/// When `auto_punctuation` is non-empty and the result does not already end
/// with one of its characters, the first character is appended. Empty input
/// stays empty.
#[must_use]
pub fn normalize_text(text: &str, auto_punctuation: &str) -> String {
    let mut joined = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if joined.is_empty() {
        return joined;
    }

    if let Some(first) = auto_punctuation.chars().next() {
        let terminated = joined
            .chars()
            .last()
            .is_some_and(|last| auto_punctuation.contains(last));
        if !terminated {
            joined.push(first);
        }
    }

    joined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joins_lines() {
        assert_eq!(normalize_text("  Hello\n\n  world  \n", ""), "Hello world");
    }

    #[test]
    fn test_appends_first_punctuation() {
        assert_eq!(normalize_text("Hello world", ".?!"), "Hello world.");
    }

    #[test]
    fn test_keeps_existing_punctuation() {
        assert_eq!(normalize_text("Really?", ".?!"), "Really?");
        assert_eq!(normalize_text("Stop!\n", ".?!"), "Stop!");
    }

    #[test]
    fn test_empty_stays_empty() {
        assert_eq!(normalize_text(" \n\t\n", ".?!"), "");
    }

    #[test]
    fn test_crlf_lines() {
        assert_eq!(normalize_text("one\r\ntwo", "."), "one two.");
    }
}
