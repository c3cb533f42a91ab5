//! Helpers for pulling structured replies out of free-form model output.

const FENCE: &str = "```";

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("no valid json object found")]
pub struct NoJsonObject;

/// Return the span from the first `{` to the last `}`, after stripping a
/// surrounding code fence. A fence whose first line mentions "json" has that
/// line dropped as well.
pub fn extract_json(input: &str) -> Result<&str, NoJsonObject> {
    let mut text = input;

    if let (Some(start), Some(end)) = (text.find(FENCE), text.rfind(FENCE)) {
        if end > start {
            let mut inner = &text[start + FENCE.len()..end];
            if let Some(nl) = inner.find('\n') {
                if inner[..nl].to_ascii_lowercase().contains("json") {
                    inner = &inner[nl + 1..];
                }
            }
            text = inner;
        }
    }

    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start <= end => Ok(&text[start..=end]),
        _ => Err(NoJsonObject),
    }
}

/// Cut `s` to at most `max` bytes on a char boundary, appending `...` when cut.
pub fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
