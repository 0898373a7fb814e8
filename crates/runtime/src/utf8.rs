//! UTF-8 codepoint helpers
//!
//! String cells store raw NUL-terminated UTF-8; the string operations
//! measure in codepoints, not bytes. These helpers do the translation.

/// Byte length of the first codepoint (0 for the empty string).
pub fn char_len(s: &str) -> usize {
    s.chars().next().map_or(0, char::len_utf8)
}

/// Codepoint count.
pub fn strlen(s: &str) -> usize {
    s.chars().count()
}

/// The codepoint at index `i`, if any.
pub fn codepoint_at(s: &str, i: usize) -> Option<char> {
    s.chars().nth(i)
}

/// The suffix starting at codepoint `n`; empty when `n` is past the end.
pub fn advance(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((i, _)) => &s[i..],
        None => "",
    }
}

/// The prefix holding the first `n` codepoints (the whole string when it
/// is shorter).
pub fn prefix(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

/// The string with its codepoints in reverse order.
pub fn reversed(s: &str) -> String {
    s.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_len() {
        assert_eq!(char_len("abc"), 1);
        assert_eq!(char_len("éx"), 2);
        assert_eq!(char_len("😀"), 4);
        assert_eq!(char_len(""), 0);
    }

    #[test]
    fn test_strlen_counts_codepoints() {
        assert_eq!(strlen("héllo"), 5);
        assert_eq!(strlen(""), 0);
        assert_eq!(strlen("日本語"), 3);
    }

    #[test]
    fn test_advance_and_prefix() {
        let s = "héllo";
        assert_eq!(advance(s, 0), "héllo");
        assert_eq!(advance(s, 1), "éllo");
        assert_eq!(advance(s, 5), "");
        assert_eq!(advance(s, 99), "");
        assert_eq!(prefix(s, 2), "hé");
        assert_eq!(prefix(s, 99), "héllo");
    }

    #[test]
    fn test_reversed() {
        assert_eq!(reversed("abc"), "cba");
        assert_eq!(reversed("héllo"), "olléh");
        assert_eq!(reversed(""), "");
    }

    #[test]
    fn test_codepoint_at() {
        assert_eq!(codepoint_at("héllo", 1), Some('é'));
        assert_eq!(codepoint_at("héllo", 5), None);
    }
}
