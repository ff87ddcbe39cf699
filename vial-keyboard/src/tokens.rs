//! Token helpers shared by the definition-string parsers

/// Split on commas that are not inside parentheses.
///
/// `"TAP(KC_A),TEXT(a,b)"` yields `["TAP(KC_A)", "TEXT(a,b)"]`. Segments are
/// trimmed; empty segments are kept so callers can reject them.
pub(crate) fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(s[start..].trim());
    parts
}

/// Split `NAME(ARG)` into the upper-cased name and the raw argument
pub(crate) fn split_call(token: &str) -> Option<(String, &str)> {
    let open = token.find('(')?;
    let arg = token[open + 1..].strip_suffix(')')?;
    let name = token[..open].trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_ascii_uppercase(), arg))
}
