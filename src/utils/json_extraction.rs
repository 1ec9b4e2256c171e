//! JSON extraction from free-form LLM replies.
//!
//! Models sometimes answer a forced tool call with plain content instead of
//! tool arguments, wrapping the object in markdown fences or prose. The
//! helpers here recover the JSON payload in this order:
//! 1. fenced ```json block
//! 2. any fenced block whose body starts with `{` or `[`
//! 3. first balanced object or array found by bracket matching
//!
//! ```
//! use template_reviewer::utils::json_extraction::extract_json_from_response;
//!
//! let reply = "Verdict below:\n{\"met\": true, \"justification\": \"ok\"}";
//! assert_eq!(extract_json_from_response(reply), "{\"met\": true, \"justification\": \"ok\"}");
//! ```

/// Best-effort extraction of a JSON document from `content`.
///
/// Falls back to the trimmed input when nothing JSON-like is found, so the
/// caller's parser produces the error message.
pub fn extract_json_from_response(content: &str) -> String {
    let trimmed = content.trim();

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Some(end) = find_matching_close(trimmed) {
            return trimmed[..=end].to_string();
        }
        return trimmed.to_string();
    }

    if let Some(block) = extract_from_json_code_block(trimmed) {
        return block;
    }
    if let Some(block) = extract_from_generic_code_block(trimmed) {
        return block;
    }

    if let Some(start) = trimmed.find(|c: char| c == '{' || c == '[') {
        let candidate = &trimmed[start..];
        if let Some(end) = find_matching_close(candidate) {
            return candidate[..=end].to_string();
        }
    }

    trimmed.to_string()
}

/// Body of the first ```json fenced block.
pub fn extract_from_json_code_block(content: &str) -> Option<String> {
    let start = content.find("```json")? + "```json".len();
    let rest = &content[start..];
    let end = rest.find("```")?;
    let body = rest[..end].trim();
    (!body.is_empty()).then(|| body.to_string())
}

/// Body of the first fenced block that looks like JSON, whatever its tag.
pub fn extract_from_generic_code_block(content: &str) -> Option<String> {
    let mut rest = content;
    while let Some(open) = rest.find("```") {
        let after_fence = &rest[open + 3..];
        // Skip the language tag on the fence line.
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        let close = body.find("```")?;
        let candidate = body[..close].trim();
        if candidate.starts_with('{') || candidate.starts_with('[') {
            return Some(candidate.to_string());
        }
        rest = &body[close + 3..];
    }
    None
}

/// Index of the bracket closing the one at position 0, string-aware.
///
/// Works for both `{` and `[` openers; returns `None` on unbalanced input.
pub fn find_matching_close(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_object_with_trailing_text() {
        let content = r#"{"score": 4} thanks"#;
        assert_eq!(extract_json_from_response(content), r#"{"score": 4}"#);
    }

    #[test]
    fn test_json_code_block() {
        let content = "Here you go:\n```json\n{\"plans\": []}\n```\nDone.";
        assert_eq!(extract_json_from_response(content), "{\"plans\": []}");
    }

    #[test]
    fn test_generic_code_block_skips_non_json_blocks() {
        let content = "```bash\nnpm install\n```\nand\n```\n[1, 2]\n```";
        assert_eq!(extract_json_from_response(content), "[1, 2]");
    }

    #[test]
    fn test_embedded_object_with_braces_in_strings() {
        let content = r#"Result: {"justification": "saw } and { in text", "met": false} end"#;
        assert_eq!(
            extract_json_from_response(content),
            r#"{"justification": "saw } and { in text", "met": false}"#
        );
    }

    #[test]
    fn test_no_json_returns_trimmed_input() {
        assert_eq!(extract_json_from_response("  no json here "), "no json here");
        assert_eq!(find_matching_close("{\"a\": 1"), None);
    }
}
