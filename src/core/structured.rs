use serde::de::DeserializeOwned;
use tracing::warn;

/// Parses LLM output into `T`, substituting `fallback` when the text does not
/// contain a usable JSON value.
///
/// Every stage boundary that consumes model output goes through this one
/// function, so the defensive-parsing contract lives in exactly one place.
pub fn parse_structured_output<T: DeserializeOwned>(raw: &str, fallback: T) -> T {
    match try_parse_structured(raw) {
        Some(value) => value,
        None => {
            warn!("unparseable model output ({} chars), using fallback", raw.len());
            fallback
        }
    }
}

/// Like [`parse_structured_output`] but surfaces the failure instead of
/// swallowing it. The debate loop needs to distinguish "the validator
/// rejected everything" from "the validator returned garbage".
pub fn try_parse_structured<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let cleaned = strip_code_fences(raw);

    if let Ok(value) = serde_json::from_str::<T>(cleaned.trim()) {
        return Some(value);
    }

    // Models often wrap the JSON in prose. Try every balanced object or
    // array block, outermost first.
    for open in ['{', '['] {
        let mut search_from = 0;
        while let Some(offset) = cleaned[search_from..].find(open) {
            let start = search_from + offset;
            if let Some(end) = matching_close(&cleaned[start..], open) {
                let candidate = &cleaned[start..start + end + 1];
                if let Ok(value) = serde_json::from_str::<T>(candidate) {
                    return Some(value);
                }
            }
            search_from = start + 1;
        }
    }

    None
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the language tag on the opening fence.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Index of the bracket closing the block that starts at `text[0]`, skipping
/// over string literals and escapes. Returns `None` for unbalanced input.
fn matching_close(text: &str, open: char) -> Option<usize> {
    let close = if open == '{' { '}' } else { ']' };
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}
