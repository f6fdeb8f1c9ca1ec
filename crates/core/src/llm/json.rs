use crate::domain::contract::{validate_decisions, LlmDecision};
use crate::domain::decision::Decision;
use anyhow::Context;

pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        // Remove Markdown fences (```json ... ``` or ``` ... ```).
        let mut inner = trimmed;
        if let Some(after_first) = inner.splitn(2, '\n').nth(1) {
            inner = after_first;
        }
        if let Some(end) = inner.rfind("```") {
            inner = &inner[..end];
        }
        return Some(inner.trim().to_string());
    }

    // Best-effort extraction: first '[' to last ']'.
    let start = trimmed.find('[')?;
    let end = trimmed.rfind(']')?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].trim().to_string())
}

/// Parses the reasoning service's reply into validated decisions. Any schema
/// violation fails the whole reply.
pub fn parse_decisions(text: &str) -> anyhow::Result<Vec<Decision>> {
    let json_str = extract_json(text).unwrap_or_else(|| text.trim().to_string());
    let parsed = serde_json::from_str::<Vec<LlmDecision>>(&json_str)
        .with_context(|| format!("LLM output is not a JSON array of decisions: {json_str}"))?;
    validate_decisions(parsed)
}
