// src/subprocess/schemas.rs
// Structured-output JSON schemas passed to `codex exec --output-schema`,
// and deterministic Markdown rendering of the parsed output (spec.md §4.8).

use serde::Deserialize;
use serde_json::Value;

pub const RESEARCH_SCHEMA: &str = r#"{
  "type": "object",
  "properties": {
    "summary": { "type": "string" },
    "findings": { "type": "array", "items": { "type": "string" } },
    "recommendations": { "type": "array", "items": { "type": "string" } },
    "concerns": { "type": "array", "items": { "type": "string" } },
    "code_snippets": {
      "type": "array",
      "items": {
        "type": "object",
        "properties": { "language": { "type": "string" }, "code": { "type": "string" } },
        "required": ["code"]
      }
    }
  },
  "required": ["summary", "findings"],
  "additionalProperties": false
}"#;

pub const REVIEW_SCHEMA: &str = r#"{
  "type": "object",
  "properties": {
    "summary": { "type": "string" },
    "verdict": { "type": "string", "enum": ["approve", "request_changes", "comment"] },
    "issues": {
      "type": "array",
      "items": {
        "type": "object",
        "properties": {
          "severity": { "type": "string" },
          "location": { "type": "string" },
          "description": { "type": "string" },
          "suggestion": { "type": "string" }
        },
        "required": ["description"]
      }
    },
    "strengths": { "type": "array", "items": { "type": "string" } },
    "recommendations": { "type": "array", "items": { "type": "string" } }
  },
  "required": ["summary", "verdict"],
  "additionalProperties": false
}"#;

pub const GENERAL_SCHEMA: &str = r#"{
  "type": "object",
  "properties": {
    "response": { "type": "string" },
    "summary": { "type": "string" },
    "references": { "type": "array", "items": { "type": "string" } }
  },
  "required": ["response"],
  "additionalProperties": false
}"#;

/// Select the schema text for `codex exec --output-schema` by message type
/// (spec.md §4.8).
pub fn schema_for_message_type(message_type: &str) -> &'static str {
    match message_type {
        "research_request" => RESEARCH_SCHEMA,
        "review_request" => REVIEW_SCHEMA,
        _ => GENERAL_SCHEMA,
    }
}

#[derive(Debug, Deserialize)]
pub struct ResearchOutput {
    pub summary: String,
    #[serde(default)]
    pub findings: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub code_snippets: Vec<CodeSnippet>,
}

#[derive(Debug, Deserialize)]
pub struct CodeSnippet {
    #[serde(default)]
    pub language: Option<String>,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct ReviewOutput {
    pub summary: String,
    pub verdict: String,
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewIssue {
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub description: String,
    #[serde(default)]
    pub suggestion: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GeneralOutput {
    pub response: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
}

/// Render a structured JSON output to Markdown, picking the renderer by
/// message type. Falls back to the raw text if the JSON doesn't parse or
/// doesn't match the expected shape.
pub fn render_markdown(message_type: &str, raw: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(raw) else {
        return raw.to_string();
    };
    match message_type {
        "research_request" => serde_json::from_value::<ResearchOutput>(value)
            .map(|r| render_research(&r))
            .unwrap_or_else(|_| raw.to_string()),
        "review_request" => serde_json::from_value::<ReviewOutput>(value)
            .map(|r| render_review(&r))
            .unwrap_or_else(|_| raw.to_string()),
        _ => serde_json::from_value::<GeneralOutput>(value)
            .map(|g| render_general(&g))
            .unwrap_or_else(|_| raw.to_string()),
    }
}

fn render_review(review: &ReviewOutput) -> String {
    let mut out = format!("## Review: {}\n\n{}\n", review.verdict.to_uppercase(), review.summary);

    if !review.strengths.is_empty() {
        out.push_str("\n### Strengths\n");
        for s in &review.strengths {
            out.push_str(&format!("- {s}\n"));
        }
    }

    if !review.issues.is_empty() {
        out.push_str("\n### Issues\n");
        for issue in &review.issues {
            let severity = issue.severity.as_deref().unwrap_or("note");
            let mut line = format!("- [{severity}]");
            if let Some(loc) = &issue.location {
                line.push_str(&format!(" {loc}:"));
            }
            line.push(' ');
            line.push_str(&issue.description);
            if let Some(suggestion) = &issue.suggestion {
                line.push_str(&format!(" — suggestion: {suggestion}"));
            }
            out.push_str(&line);
            out.push('\n');
        }
    }

    if !review.recommendations.is_empty() {
        out.push_str("\n### Recommendations\n");
        for r in &review.recommendations {
            out.push_str(&format!("- {r}\n"));
        }
    }

    out
}

fn render_research(research: &ResearchOutput) -> String {
    let mut out = format!("{}\n", research.summary);

    if !research.findings.is_empty() {
        out.push_str("\n### Findings\n");
        for (i, finding) in research.findings.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, finding));
        }
    }

    if !research.concerns.is_empty() {
        out.push_str("\n### Concerns\n");
        for c in &research.concerns {
            out.push_str(&format!("- {c}\n"));
        }
    }

    if !research.recommendations.is_empty() {
        out.push_str("\n### Recommendations\n");
        for r in &research.recommendations {
            out.push_str(&format!("- {r}\n"));
        }
    }

    if !research.code_snippets.is_empty() {
        out.push_str("\n### Code examples\n");
        for snippet in &research.code_snippets {
            let lang = snippet.language.as_deref().unwrap_or("");
            out.push_str(&format!("```{lang}\n{}\n```\n", snippet.code));
        }
    }

    out
}

fn render_general(general: &GeneralOutput) -> String {
    let mut out = String::new();
    if general.response.len() > 500 {
        if let Some(summary) = &general.summary {
            out.push_str(summary);
            out.push_str("\n\n");
        }
    }
    out.push_str(&general.response);

    if !general.references.is_empty() {
        out.push_str("\n\n### References\n");
        for r in &general.references {
            out.push_str(&format!("- {r}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_review_markdown() {
        let raw = r#"{"summary":"looks fine","verdict":"approve","issues":[{"severity":"minor","location":"src/foo.rs:10","description":"unused import","suggestion":"remove it"}],"strengths":["good tests"],"recommendations":[]}"#;
        let md = render_markdown("review_request", raw);
        assert!(md.starts_with("## Review: APPROVE"));
        assert!(md.contains("[minor] src/foo.rs:10: unused import — suggestion: remove it"));
        assert!(md.contains("good tests"));
    }

    #[test]
    fn renders_research_markdown_with_code() {
        let raw = r#"{"summary":"investigated the bug","findings":["root cause is X"],"code_snippets":[{"language":"rust","code":"fn x() {}"}]}"#;
        let md = render_markdown("research_request", raw);
        assert!(md.contains("investigated the bug"));
        assert!(md.contains("1. root cause is X"));
        assert!(md.contains("```rust\nfn x() {}\n```"));
    }

    #[test]
    fn general_output_prepends_summary_when_long() {
        let long_response = "x".repeat(600);
        let raw = serde_json::json!({ "response": long_response, "summary": "short version" }).to_string();
        let md = render_markdown("message", &raw);
        assert!(md.starts_with("short version"));
    }

    #[test]
    fn falls_back_to_raw_text_on_parse_failure() {
        let md = render_markdown("message", "not json");
        assert_eq!(md, "not json");
    }
}
