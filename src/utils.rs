//! String helpers shared by the stream sink, the authorizer and the tmux bridge.
//!
//! All limits are counted in characters, never bytes, so multi-byte text
//! (emoji, CJK) never splits inside a code point.

/// Keeps the first `max_chars` characters, marking a cut with "...".
///
/// The marker counts toward the limit, so the result never exceeds it.
///
/// ```
/// use chatpilot::utils::truncate_str;
///
/// assert_eq!(truncate_str("ls -la", 20), "ls -la");
/// assert_eq!(truncate_str("rm -rf /tmp/build", 10), "rm -rf ...");
/// ```
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    const ELLIPSIS: &str = "...";
    let end = byte_offset(s, max_chars);
    if end == s.len() {
        return s.to_string();
    }
    match max_chars.checked_sub(ELLIPSIS.len()) {
        Some(keep) => {
            let mut out = s[..byte_offset(s, keep)].to_string();
            out.push_str(ELLIPSIS);
            out
        }
        None => ELLIPSIS[..max_chars].to_string(),
    }
}

/// Keeps the last `max_chars` characters, replacing the dropped head with "…".
///
/// Used where the newest output matters most: streaming drafts and pane
/// captures.
pub fn truncate_tail(s: &str, max_chars: usize) -> String {
    const MARKER: char = '…';
    let count = s.chars().count();
    if count <= max_chars {
        return s.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let keep = max_chars - 1;
    let start = byte_offset(s, count - keep);
    let mut out = String::with_capacity(s.len() - start + MARKER.len_utf8());
    out.push(MARKER);
    out.push_str(&s[start..]);
    out
}

/// Byte offset of the `n`th character, or `s.len()` when `s` is shorter.
pub fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map_or(s.len(), |(i, _)| i)
}
