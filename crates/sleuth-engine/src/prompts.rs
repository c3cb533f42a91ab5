/// System prompt for the planner.
pub const PLANNER_PROMPT: &str = include_str!("../prompts/planner.md");

/// Template for a normal executor step.
pub const EXECUTOR_PROMPT: &str = include_str!("../prompts/executor.md");

/// Template for the final synthesis step.
pub const FINAL_PROMPT: &str = include_str!("../prompts/final.md");

/// Template for the compaction summarizer.
pub const SUMMARIZER_PROMPT: &str = include_str!("../prompts/summarizer.md");

/// Fill `{{key}}` placeholders in one pass. Substituted values are never
/// re-scanned, and unknown keys are left as written.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };
        let key = after[..close].trim();
        match vars.iter().find(|(k, _)| *k == key) {
            Some((_, value)) => out.push_str(value),
            None => out.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    out
}
