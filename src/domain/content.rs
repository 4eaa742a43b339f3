//! Interpretation of raw generator output.

use serde_json::Value;

/// Generator output after an attempt to read it as structured JSON
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedContent {
    /// The output was a JSON object
    Structured(Value),

    /// Anything else, kept verbatim
    Raw(String),
}

impl ParsedContent {
    /// Structured content as-is, or raw text wrapped by `fallback`
    pub fn into_value_or(self, fallback: impl FnOnce(String) -> Value) -> Value {
        match self {
            Self::Structured(value) => value,
            Self::Raw(text) => fallback(text),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured(_))
    }
}

/// Read model output as a JSON object, tolerating a surrounding code fence.
pub fn parse_structured(raw: &str) -> ParsedContent {
    let body = strip_code_fence(raw.trim());

    match serde_json::from_str::<Value>(body) {
        Ok(value @ Value::Object(_)) => ParsedContent::Structured(value),
        _ => ParsedContent::Raw(raw.to_string()),
    }
}

/// Strip a ```` ``` ```` / ```` ```json ```` fence if the whole text is fenced
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(rest) = rest.strip_suffix("```") else {
        return text;
    };

    // Drop the info string (e.g. "json") on the opening line
    match rest.find('\n') {
        Some(newline) => rest[newline + 1..].trim(),
        None => rest.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_is_structured() {
        let parsed = parse_structured(r#"{"post": "Hi"}"#);
        assert_eq!(parsed, ParsedContent::Structured(json!({"post": "Hi"})));
    }

    #[test]
    fn test_plain_text_is_raw() {
        assert_eq!(parse_structured("Hello"), ParsedContent::Raw("Hello".into()));
    }

    #[test]
    fn test_scalar_json_is_raw() {
        assert_eq!(parse_structured("42"), ParsedContent::Raw("42".into()));
        assert_eq!(parse_structured("[1]"), ParsedContent::Raw("[1]".into()));
    }

    #[test]
    fn test_fenced_json_is_structured() {
        let raw = "```json\n{\"thread\": []}\n```";
        assert_eq!(
            parse_structured(raw),
            ParsedContent::Structured(json!({"thread": []}))
        );
    }

    #[test]
    fn test_broken_fence_stays_raw() {
        let raw = "```json\n{\"thread\": \n```";
        assert_eq!(parse_structured(raw), ParsedContent::Raw(raw.into()));
    }

    #[test]
    fn test_fallback_wraps_raw_text() {
        let value = parse_structured("Hello").into_value_or(|t| json!({"post": t}));
        assert_eq!(value, json!({"post": "Hello"}));
    }
}
