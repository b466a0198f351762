//! Shared "pull one JSON object out of free-form LLM text" helper.
//!
//! Every LLM-driven layer (Planner, Micro-Resolver, Error Analyzer,
//! Contextual Re-Resolver) needs the same brace-balance scan described in
//! §4.2, so it lives here once instead of four times.

/// Strip markdown fences and locate the outer JSON object by brace-balance
/// scanning that respects string/escape state.
pub fn extract_json_object(raw: &str) -> Result<String, String> {
    let stripped = raw.trim().trim_start_matches("```json").trim_start_matches("```").trim_end_matches("```").trim();

    let start = stripped.find('{').ok_or_else(|| "no JSON object found in response".to_string())?;

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut end = None;

    for (i, ch) in stripped[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    end = Some(start + i + ch.len_utf8());
                    break;
                }
            }
            _ => {}
        }
    }

    let end = end.ok_or_else(|| "unbalanced braces in response".to_string())?;
    Ok(stripped[start..end].to_string())
}
