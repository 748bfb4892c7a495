//! Defensive parsing of text-completion output.
//!
//! Completion text is untrusted: the structured payload may be wrapped in a
//! markdown fence or surrounded by prose. These helpers find it anyway.

use serde::de::DeserializeOwned;

use crate::{HeddleError, Result};

/// Characters of offending text quoted in extraction errors.
const ERROR_SNIPPET_CHARS: usize = 120;

/// Strips a surrounding markdown code fence (```` ```json ... ``` ````).
pub fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    if text.starts_with("```") {
        // Skip the opening line, which may carry a language tag.
        let after_open = if let Some(nl) = text.find('\n') {
            &text[nl + 1..]
        } else {
            return text;
        };
        if let Some(close) = after_open.rfind("```") {
            return after_open[..close].trim();
        }
        return after_open.trim();
    }
    text
}

/// Truncates to at most `max` characters, appending `...` when cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((idx, _)) => format!("{}...", &s[..idx]),
    }
}

/// Parses the first JSON array found in `text`.
///
/// # Errors
///
/// Returns [`HeddleError::Extraction`] when no array parses as `Vec<T>`.
pub fn extract_json_array<T: DeserializeOwned>(text: &str) -> Result<Vec<T>> {
    extract_delimited(text, '[')
}

/// Parses the first JSON object found in `text`.
///
/// # Errors
///
/// Returns [`HeddleError::Extraction`] when no object parses as `T`.
pub fn extract_json_object<T: DeserializeOwned>(text: &str) -> Result<T> {
    extract_delimited(text, '{')
}

fn extract_delimited<T: DeserializeOwned>(text: &str, open: char) -> Result<T> {
    let body = strip_code_fences(text);
    if let Ok(parsed) = serde_json::from_str(body) {
        return Ok(parsed);
    }

    // Prose may carry stray delimiters. Try each one; a stream stops at the
    // end of the first value, so trailing text is ignored.
    let mut first_error = None;
    for (start, _) in body.match_indices(open) {
        let mut values = serde_json::Deserializer::from_str(&body[start..]).into_iter::<T>();
        match values.next() {
            Some(Ok(parsed)) => return Ok(parsed),
            Some(Err(e)) if first_error.is_none() => first_error = Some((start, e)),
            _ => {}
        }
    }

    match first_error {
        Some((start, e)) => Err(HeddleError::Extraction(format!(
            "invalid JSON {}: {e}: {}",
            kind(open),
            truncate_chars(&body[start..], ERROR_SNIPPET_CHARS)
        ))),
        None => Err(HeddleError::Extraction(format!(
            "no JSON {} in completion output: {}",
            kind(open),
            truncate_chars(body, ERROR_SNIPPET_CHARS)
        ))),
    }
}

fn kind(open: char) -> &'static str {
    if open == '[' {
        "array"
    } else {
        "object"
    }
}
