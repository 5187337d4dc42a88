//! LLM access (spec.md §4.4). The `LlmClient` trait is narrowed from the
//! teacher's `LlmProvider` trait (`llm/mod.rs` in the teacher repo) down to
//! the two operations this engine needs — `generate` and `embed` — and the
//! concrete client speaks Ollama's HTTP protocol instead of an
//! OpenAI-style chat-completions endpoint.
//!
//! `extract_json_from_text` is referenced by the teacher's
//! `llm/remote.rs` (`extract_json_from_text(&content)`) but never defined
//! anywhere in the retrieved source — implemented fresh here per spec.md
//! §4.4's own description: locate the first `{` and the last `}` and parse
//! what's between.

pub mod ollama;

use async_trait::async_trait;
use serde::Deserialize;

pub use ollama::OllamaClient;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, model: &str, prompt: &str, temperature: f32) -> anyhow::Result<String>;
    async fn embed(&self, model: &str, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Per-prompt-kind content budgets (spec.md §4.4): truncate article text
/// before it ever reaches a template so a single huge article can't blow
/// out the request.
pub const SECURITY_CONTENT_BUDGET: usize = 2000;
pub const CURATION_CONTENT_BUDGET: usize = 2000;
pub const SUMMARIZATION_CONTENT_BUDGET: usize = 3000;
pub const RELATED_GROUPS_SUMMARY_BUDGET: usize = 500;

/// Truncate `s` to `budget` characters, appending an ellipsis when text was
/// actually cut (spec.md §4.4: "truncated with an ellipsis before templating").
pub fn truncate_chars(s: &str, budget: usize) -> String {
    if s.chars().count() <= budget {
        s.to_string()
    } else {
        let head: String = s.chars().take(budget.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

/// Locate the first `{` and the last `}` in `text` and attempt to parse the
/// substring between them (inclusive) as JSON. Models routinely wrap their
/// JSON answer in prose or markdown fences; this recovers it without
/// requiring strict output formatting.
pub fn extract_json_from_text(text: &str) -> Option<serde_json::Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SecurityAssessment {
    pub safe: bool,
    pub score: f64,
    pub reasoning: String,
    pub sanitized: String,
}

#[derive(Debug, Deserialize)]
struct RawSecurityAssessment {
    safe: bool,
    score: f64,
    reasoning: String,
    sanitized: String,
}

/// Parse a security-check response, falling back to a fail-closed,
/// conservative assessment when the model's output can't be parsed
/// (spec.md §4.4): unsafe, neutral mid score, and the original title
/// standing in for sanitized content.
pub fn parse_security_response(raw: &str, fallback_title: &str) -> SecurityAssessment {
    extract_json_from_text(raw)
        .and_then(|v| serde_json::from_value::<RawSecurityAssessment>(v).ok())
        .map(|r| SecurityAssessment {
            safe: r.safe,
            score: r.score,
            reasoning: r.reasoning,
            sanitized: r.sanitized,
        })
        .unwrap_or_else(|| SecurityAssessment {
            safe: false,
            score: 5.0,
            reasoning: "parse failure".to_string(),
            sanitized: fallback_title.to_string(),
        })
}

#[derive(Debug, Clone, PartialEq)]
pub struct CurationAssessment {
    pub score: f64,
    pub reasoning: String,
}

#[derive(Debug, Deserialize)]
struct RawCurationAssessment {
    score: f64,
    reasoning: String,
}

/// Parse a curation response, falling back to a neutral mid-scale score on
/// parse failure (spec.md §4.4) — neither promoted nor rejected by default.
pub fn parse_curation_response(raw: &str) -> CurationAssessment {
    extract_json_from_text(raw)
        .and_then(|v| serde_json::from_value::<RawCurationAssessment>(v).ok())
        .map(|r| CurationAssessment {
            score: r.score,
            reasoning: r.reasoning,
        })
        .unwrap_or_else(|| CurationAssessment {
            score: 5.0,
            reasoning: "parse failure".to_string(),
        })
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RelatedGroupsAssessment {
    pub related_groups: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawRelatedGroupsAssessment {
    related_groups: Vec<String>,
}

/// Parse a related-groups response, falling back to "no related groups" on
/// parse failure (spec.md §4.4) — the conservative choice is to let
/// GroupMatcher's own cosine-similarity pass decide instead.
pub fn parse_related_groups_response(raw: &str) -> RelatedGroupsAssessment {
    extract_json_from_text(raw)
        .and_then(|v| serde_json::from_value::<RawRelatedGroupsAssessment>(v).ok())
        .map(|r| RelatedGroupsAssessment {
            related_groups: r.related_groups,
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_skips_surrounding_prose() {
        let text = "Sure, here you go:\n```json\n{\"safe\": true, \"score\": 1.0, \"reasoning\": \"ok\", \"sanitized\": \"x\"}\n```\nHope that helps!";
        let value = extract_json_from_text(text).unwrap();
        assert_eq!(value["safe"], serde_json::Value::Bool(true));
    }

    #[test]
    fn extract_json_returns_none_without_braces() {
        assert!(extract_json_from_text("no json here").is_none());
    }

    #[test]
    fn security_parse_failure_is_fail_closed() {
        let assessment = parse_security_response("garbage", "Original Title");
        assert!(!assessment.safe);
        assert_eq!(assessment.score, 5.0);
        assert_eq!(assessment.sanitized, "Original Title");
    }

    #[test]
    fn curation_parse_failure_is_neutral() {
        let assessment = parse_curation_response("garbage");
        assert_eq!(assessment.score, 5.0);
    }

    #[test]
    fn related_groups_parse_failure_is_empty() {
        let assessment = parse_related_groups_response("garbage");
        assert!(assessment.related_groups.is_empty());
    }

    #[test]
    fn truncate_chars_respects_budget() {
        let long = "x".repeat(5000);
        let truncated = truncate_chars(&long, SUMMARIZATION_CONTENT_BUDGET);
        assert_eq!(truncated.chars().count(), SUMMARIZATION_CONTENT_BUDGET);
    }

    #[test]
    fn truncate_chars_leaves_short_text_untouched() {
        assert_eq!(truncate_chars("short", 2000), "short");
    }
}
