//! Extraction helpers for agent replies: fenced blocks, JSON snippets,
//! and PASS/FAIL verdicts.

use regex::Regex;

/// Content of the first fenced code block. When `language` is given, a
/// matching language-tagged block is preferred, falling back to any block.
#[must_use]
pub fn extract_code_block(text: &str, language: &str) -> Option<String> {
    let tagged = Regex::new(&format!(r"(?s)```{}\s*\n(.*?)\n```", regex::escape(language)))
        .expect("valid regex");
    if let Some(captures) = tagged.captures(text) {
        return Some(captures[1].trim().to_string());
    }
    if !language.is_empty() {
        let any = Regex::new(r"(?s)```\s*\n(.*?)\n```").expect("valid regex");
        if let Some(captures) = any.captures(text) {
            return Some(captures[1].trim().to_string());
        }
    }
    None
}

/// Best-effort JSON payload extraction: a ```json fence first, then the
/// widest brace span.
#[must_use]
pub fn extract_json_snippet(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + "```json".len()..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim());
        }
    }
    if let Some(start) = text.find('{')
        && let Some(end) = text.rfind('}')
        && end > start
    {
        return Some(text[start..=end].trim());
    }
    None
}

/// Verifier reports state their verdict on a line of their own, e.g.
/// `VERDICT: PASS` or a bare `FAIL`. The first verdict line wins; a report
/// with no verdict line is treated as a failure by callers.
#[must_use]
pub fn parse_verdict(report: &str) -> Option<bool> {
    for line in report.lines() {
        let upper = line.trim().trim_start_matches("VERDICT:").trim().to_ascii_uppercase();
        match upper.as_str() {
            "PASS" | "PASSED" => return Some(true),
            "FAIL" | "FAILED" => return Some(false),
            _ => {}
        }
    }
    None
}

/// Strip surrounding markdown fences from a reply, keeping inner content.
/// Used to clean generated commit messages.
#[must_use]
pub fn strip_fences(text: &str) -> String {
    if !text.contains("```") {
        return text.trim().to_string();
    }
    let mut lines = Vec::new();
    let mut in_block = false;
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_block = !in_block;
            continue;
        }
        if in_block {
            lines.push(line);
        }
    }
    if lines.is_empty() {
        // Fences present but empty: fall back to the raw text minus fences.
        return text.replace("```", "").trim().to_string();
    }
    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_language_tagged_block() {
        let text = "intro\n```json\n{\"a\": 1}\n```\noutro";
        assert_eq!(
            extract_code_block(text, "json").as_deref(),
            Some("{\"a\": 1}")
        );
    }

    #[test]
    fn falls_back_to_untagged_block() {
        let text = "```\nplain content\n```";
        assert_eq!(
            extract_code_block(text, "yaml").as_deref(),
            Some("plain content")
        );
    }

    #[test]
    fn no_block_returns_none() {
        assert!(extract_code_block("no fences here", "json").is_none());
    }

    #[test]
    fn json_snippet_from_brace_span() {
        let text = "Here is the plan: {\"tasks\": []} — done.";
        assert_eq!(extract_json_snippet(text), Some("{\"tasks\": []}"));
    }

    #[test]
    fn verdict_lines() {
        assert_eq!(parse_verdict("VERDICT: PASS\ndetails"), Some(true));
        assert_eq!(parse_verdict("analysis...\nFAIL"), Some(false));
        assert_eq!(parse_verdict("looks good to me"), None);
    }

    #[test]
    fn verdict_is_not_matched_mid_sentence() {
        // "should PASS eventually" is commentary, not a verdict line.
        assert_eq!(parse_verdict("the tests should PASS eventually"), None);
    }

    #[test]
    fn strip_fences_extracts_inner_message() {
        let text = "Here you go:\n```\nfeat: add parser\n\nbody line\n```";
        assert_eq!(strip_fences(text), "feat: add parser\n\nbody line");
    }

    #[test]
    fn strip_fences_passthrough_without_fences() {
        assert_eq!(strip_fences("  fix: trim spaces  "), "fix: trim spaces");
    }
}
