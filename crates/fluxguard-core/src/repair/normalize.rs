//! Text normalizer: isolate a candidate snippet from raw model output.
//!
//! Extraction tries, in order, a fenced code block, a `<code>` tag, and
//! finally the whole trimmed text. The result is then cleaned of
//! typographic punctuation and answer labels, and unwrapped from a JSON
//! `{"code": "..."}` envelope when the model used one.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{trace, warn};

lazy_static! {
    /// Fenced block with an optional `python`/`py` tag.
    static ref FENCED_BLOCK: Regex =
        Regex::new(r"(?i)```(?:python3?|py)?\s*([\s\S]*?)```").unwrap();

    static ref CODE_TAG: Regex = Regex::new(r"(?i)<code>\s*([\s\S]*?)</code>").unwrap();

    /// Line starts that mark the whole text as a script.
    static ref SCRIPT_HINT: Regex =
        Regex::new(r"(?m)^\s*(?:def\s+|result\s*=|import\s+|from\s+\w+\s+import\s+|df[.\[])").unwrap();

    static ref ANSWER_LABEL: Regex = Regex::new(r"(?i)^(?:answer|result|output):\s*").unwrap();

    /// `"code": "..."` inside text that is not valid JSON as a whole.
    static ref JSON_CODE_FIELD: Regex =
        Regex::new(r#""code"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap();
}

/// Typographic characters and their ASCII replacements.
const SMART_PUNCTUATION: [(char, &str); 8] = [
    ('\u{2018}', "'"),
    ('\u{2019}', "'"),
    ('\u{201c}', "\""),
    ('\u{201d}', "\""),
    ('\u{2014}', "-"),
    ('\u{2013}', "-"),
    ('\u{2026}', "..."),
    ('\u{00a0}', " "),
];

/// Where the candidate snippet came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    FencedBlock,
    CodeTag,
    ScriptText,
    PlainText,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub snippet: String,
    pub source: ExtractionSource,
}

/// Pick the most likely code region of `text`.
pub fn extract_code_block(text: &str) -> Extraction {
    if let Some(caps) = FENCED_BLOCK.captures(text) {
        return Extraction {
            snippet: caps[1].trim().to_string(),
            source: ExtractionSource::FencedBlock,
        };
    }
    if let Some(caps) = CODE_TAG.captures(text) {
        return Extraction {
            snippet: caps[1].trim().to_string(),
            source: ExtractionSource::CodeTag,
        };
    }
    let source = if SCRIPT_HINT.is_match(text) {
        ExtractionSource::ScriptText
    } else {
        ExtractionSource::PlainText
    };
    Extraction {
        snippet: text.trim().to_string(),
        source,
    }
}

/// Replace smart quotes, dashes, ellipses and non-breaking spaces.
pub fn replace_smart_punctuation(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match SMART_PUNCTUATION.iter().find(|(smart, _)| *smart == c) {
            Some((_, plain)) => out.push_str(plain),
            None => out.push(c),
        }
    }
    out
}

/// Drop a leading `Answer:`, `Result:` or `Output:` label.
pub fn strip_answer_label(text: &str) -> String {
    ANSWER_LABEL.replace(text, "").into_owned()
}

/// The `code` string of a JSON envelope, if `text` carries one.
pub fn json_code_field(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        if let Ok(JsonValue::Object(map)) = serde_json::from_str::<JsonValue>(trimmed) {
            if let Some(JsonValue::String(code)) = map.get("code") {
                return Some(code.trim().to_string());
            }
        }
    }
    let caps = JSON_CODE_FIELD.captures(text)?;
    match serde_json::from_str::<String>(&format!("\"{}\"", &caps[1])) {
        Ok(code) => Some(code.trim().to_string()),
        Err(e) => {
            warn!(error = %e, "ignoring undecodable code field");
            None
        }
    }
}

/// Full normalization of raw model output into a candidate snippet.
pub fn normalize(raw: &str) -> Extraction {
    let Extraction { snippet, source } = extract_code_block(raw);
    let mut snippet = strip_answer_label(&replace_smart_punctuation(&snippet));
    if let Some(code) = json_code_field(&snippet) {
        trace!("unwrapped JSON code envelope");
        snippet = code;
    }
    Extraction { snippet, source }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_block_wins() {
        let raw = "Here you go:\n```python\nresult = df.head()\n```\nEnjoy.";
        let out = normalize(raw);
        assert_eq!(out.snippet, "result = df.head()");
        assert_eq!(out.source, ExtractionSource::FencedBlock);
    }

    #[test]
    fn test_code_tag() {
        let out = normalize("See <code>len(df)</code>");
        assert_eq!(out.snippet, "len(df)");
        assert_eq!(out.source, ExtractionSource::CodeTag);
    }

    #[test]
    fn test_script_hint_keeps_whole_text() {
        let out = normalize("  x = 1\ndf.head()  ");
        assert_eq!(out.snippet, "x = 1\ndf.head()");
        assert_eq!(out.source, ExtractionSource::ScriptText);
    }

    #[test]
    fn test_smart_punctuation_and_label() {
        let out = normalize("Answer: df[\u{201c}src\u{201d}].nunique()\u{00a0}");
        assert_eq!(out.snippet, "df[\"src\"].nunique()");
    }

    #[test]
    fn test_json_envelope_is_unwrapped() {
        let raw = r#"{"answer": "two rows", "code": "result = len(df)\nprint(result)"}"#;
        assert_eq!(normalize(raw).snippet, "result = len(df)\nprint(result)");

        let loose = r#"answer: 'x', "code": "result = df['a'].sum()", trailing"#;
        assert_eq!(json_code_field(loose).as_deref(), Some("result = df['a'].sum()"));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(normalize("").snippet, "");
        assert_eq!(normalize("   \n").source, ExtractionSource::PlainText);
    }
}
