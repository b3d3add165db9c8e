//! Prompt templates.
//!
//! Two fixed templates: one asks the model for an analysis snippet over the
//! dataset handle, the other for an executive narrative over metrics and
//! evidence rows. Only the bracketed sections change between calls.

use fluxguard_core::{Cell, Dataset};
use serde_json::Value as JsonValue;

/// System prompt for the analyst (code-writing) call.
pub const ANALYST_SYSTEM_PROMPT: &str = r#"
You are a strict Python/pandas analyst working inside a sandbox.

You must produce either:
1) A JSON object with keys 'answer' and 'code' where 'code' assigns the final output to `result`, OR
2) Plain code that assigns the analysis output to a variable named `result`.

Constraints:
- Only use DataFrame/Series operations on `df` and the `pd`/`np` handles.
- No file IO, no shell, no imports.
- No def, for, if, while, with or lambda blocks: one statement per line.
- The snippet MUST assign `result`.
- Keep it short and deterministic.

Return only code or a JSON wrapper (no extra commentary).
"#;

/// System prompt for the narrative call.
pub const NARRATIVE_SYSTEM_PROMPT: &str = r#"
You are a concise cyber security analyst. Using ONLY the metrics and evidence you are given, produce JSON with:
- summary: 2-4 sentence executive summary
- recommendations: list of objects like {"text": ..., "evidence_ids": [ints]}

Do not mention numbers or addresses that are not in the metrics or evidence.
Return ONLY valid JSON.
"#;

/// User message for the analyst call.
pub fn analyst_prompt(columns: &[String], question: &str) -> String {
    let columns = columns
        .iter()
        .map(|c| format!("'{}'", c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "The DataFrame variable is `df` and has columns: {}.\n\nQuestion:\n{}",
        columns,
        question.trim()
    )
}

fn field(evidence: &Dataset, row: usize, name: &str) -> String {
    match evidence.get(row, name) {
        Some(Cell::Null) | None => String::new(),
        Some(cell) => cell.to_string(),
    }
}

/// One line per evidence row: `[i] time | src -> dst | bytes=.. | attackType=..`.
pub fn evidence_lines(evidence: &Dataset) -> String {
    (0..evidence.len())
        .map(|i| {
            format!(
                "[{}] {} | {} -> {} | bytes={} | attackType={}",
                i,
                field(evidence, i, "time"),
                field(evidence, i, "src"),
                field(evidence, i, "dst"),
                field(evidence, i, "bytes"),
                field(evidence, i, "attackType"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// User message for the narrative call.
pub fn narrative_prompt(metrics: &JsonValue, evidence: &Dataset) -> String {
    let metrics = serde_json::to_string_pretty(metrics).unwrap_or_else(|_| metrics.to_string());
    format!(
        "METRICS:\n{}\n\nEVIDENCE:\n{}",
        metrics,
        evidence_lines(evidence)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_analyst_prompt_lists_columns() {
        let prompt = analyst_prompt(&["src".to_string(), "Bytes_int".to_string()], "  top talkers? ");
        assert!(prompt.contains("columns: 'src', 'Bytes_int'."));
        assert!(prompt.ends_with("Question:\ntop talkers?"));
    }

    #[test]
    fn test_evidence_lines_tolerate_missing_fields() {
        let evidence = Dataset::from_json_str(
            r#"[{"src": "1.1.1.1", "dst": "2.2.2.2", "bytes": 10, "attackType": "dos"}, {"src": "3.3.3.3"}]"#,
        )
        .unwrap();
        assert_eq!(
            evidence_lines(&evidence),
            "[0]  | 1.1.1.1 -> 2.2.2.2 | bytes=10 | attackType=dos\n[1]  | 3.3.3.3 ->  | bytes= | attackType="
        );
    }

    #[test]
    fn test_narrative_prompt_sections() {
        let prompt = narrative_prompt(&json!({"total_rows": 2}), &Dataset::default());
        assert!(prompt.starts_with("METRICS:\n{\n  \"total_rows\": 2\n}"));
        assert!(prompt.ends_with("EVIDENCE:\n"));
    }
}
