//! The repair state machine.
//!
//! ```text
//! RAW -> EXTRACTED -> CONTRACT_ENFORCED -> SANITIZED -> VALIDATED
//!                                              |
//!                                              +-> FALLBACK_ATTEMPTED -> VALIDATED
//!                                                                     -> BEST_EFFORT
//! ```
//!
//! Every stage is a total function over text, so the pipeline cannot fail;
//! a snippet that never parses comes back as [`RepairOutcome::BestEffort`]
//! and must not be executed.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::contract::{bind_result, enforce_contract, has_assignment, MAX_WRAP_LEN};
use super::neutralize::{neutralize, DangerFinding};
use super::normalize::{normalize, ExtractionSource};
use crate::script::{ParseError, ValidatedSnippet};

lazy_static! {
    static ref BACKTICKS: Regex = Regex::new(r"`+").unwrap();
    /// An angle-bracket tag fragment at the very start of the text.
    static ref LEADING_TAG: Regex = Regex::new(r"^\s*<.*?>\s*").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairState {
    Raw,
    Extracted,
    ContractEnforced,
    Sanitized,
    FallbackAttempted,
    Validated,
    BestEffort,
}

impl fmt::Display for RepairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RepairState::Raw => "RAW",
            RepairState::Extracted => "EXTRACTED",
            RepairState::ContractEnforced => "CONTRACT_ENFORCED",
            RepairState::Sanitized => "SANITIZED",
            RepairState::FallbackAttempted => "FALLBACK_ATTEMPTED",
            RepairState::Validated => "VALIDATED",
            RepairState::BestEffort => "BEST_EFFORT",
        };
        f.write_str(name)
    }
}

/// Which fallback produced a validated snippet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fallback {
    /// Stray backticks and a leading tag fragment removed.
    StripMarkers,
    /// Last line rewritten as a result binding.
    BindLastLine,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RepairOutcome {
    Validated(ValidatedSnippet),
    /// Sanitized but unparsed text. Diagnostic only.
    BestEffort(String),
}

impl RepairOutcome {
    pub fn text(&self) -> &str {
        match self {
            RepairOutcome::Validated(snippet) => snippet.source(),
            RepairOutcome::BestEffort(text) => text,
        }
    }

    pub fn validated(&self) -> Option<&ValidatedSnippet> {
        match self {
            RepairOutcome::Validated(snippet) => Some(snippet),
            RepairOutcome::BestEffort(_) => None,
        }
    }

    pub fn is_validated(&self) -> bool {
        matches!(self, RepairOutcome::Validated(_))
    }
}

/// Outcome plus the audit trail of how it was reached.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairReport {
    pub outcome: RepairOutcome,
    pub trail: Vec<RepairState>,
    pub extraction: ExtractionSource,
    pub findings: Vec<DangerFinding>,
    pub fallback: Option<Fallback>,
    /// Parse error of the sanitized snippet, when it did not parse as is.
    pub parse_error: Option<ParseError>,
}

impl RepairReport {
    pub fn final_state(&self) -> RepairState {
        self.trail.last().copied().unwrap_or(RepairState::Raw)
    }
}

/// Fallback 1: drop stray fence markers and a leading tag fragment.
pub fn strip_stray_markers(snippet: &str) -> String {
    let without_ticks = BACKTICKS.replace_all(snippet, "");
    LEADING_TAG.replace(&without_ticks, "").into_owned()
}

/// Fallback 2: rewrite the last line as `result = <line>` when it is a
/// short bare expression.
pub fn bind_last_line(snippet: &str) -> Option<String> {
    let mut lines: Vec<&str> = snippet.lines().collect();
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    let last = lines.pop()?.trim();
    if has_assignment(last) || last.len() >= MAX_WRAP_LEN {
        return None;
    }
    let head = lines.join("\n");
    Some(if lines.is_empty() {
        bind_result(last)
    } else {
        format!("{}\n{}", head, bind_result(last))
    })
}

/// Run raw model output through the full repair state machine.
pub fn repair(raw: &str) -> RepairReport {
    let mut trail = vec![RepairState::Raw];

    let extraction = normalize(raw);
    trail.push(RepairState::Extracted);
    debug!(source = ?extraction.source, len = extraction.snippet.len(), "extracted snippet");

    let enforced = enforce_contract(&extraction.snippet);
    trail.push(RepairState::ContractEnforced);
    if enforced != extraction.snippet {
        debug!("wrapped bare expression in result binding");
    }

    let neutralized = neutralize(&enforced);
    trail.push(RepairState::Sanitized);
    if !neutralized.findings.is_empty() {
        warn!(count = neutralized.findings.len(), "neutralized dangerous patterns");
    }
    let sanitized = neutralized.text;

    let mut report = RepairReport {
        outcome: RepairOutcome::BestEffort(sanitized.clone()),
        trail,
        extraction: extraction.source,
        findings: neutralized.findings,
        fallback: None,
        parse_error: None,
    };

    let parse_error = match ValidatedSnippet::parse(sanitized.clone()) {
        Ok(snippet) => {
            report.trail.push(RepairState::Validated);
            report.outcome = RepairOutcome::Validated(snippet);
            return report;
        }
        Err(e) => e,
    };
    debug!(error = %parse_error, "sanitized snippet does not parse");
    report.parse_error = Some(parse_error);
    report.trail.push(RepairState::FallbackAttempted);

    let attempts = [
        (Fallback::StripMarkers, Some(strip_stray_markers(&sanitized))),
        (Fallback::BindLastLine, bind_last_line(&sanitized)),
    ];
    for (fallback, candidate) in attempts {
        let Some(candidate) = candidate else {
            continue;
        };
        if let Ok(snippet) = ValidatedSnippet::parse(candidate) {
            info!(?fallback, "fallback repair validated snippet");
            report.trail.push(RepairState::Validated);
            report.fallback = Some(fallback);
            report.outcome = RepairOutcome::Validated(snippet);
            return report;
        }
    }

    warn!("snippet could not be validated; returning best-effort text");
    report.trail.push(RepairState::BestEffort);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_valid_snippet_goes_straight_through() {
        let report = repair("```python\nresult = df['Bytes_int'].sum()\n```");
        assert_eq!(report.outcome.text(), "result = df['Bytes_int'].sum()");
        assert_eq!(
            report.trail,
            vec![
                RepairState::Raw,
                RepairState::Extracted,
                RepairState::ContractEnforced,
                RepairState::Sanitized,
                RepairState::Validated,
            ]
        );
        assert!(report.fallback.is_none());
    }

    #[test]
    fn test_bare_expression_is_bound() {
        let report = repair("df.groupby('src').size().nlargest(5)");
        assert_eq!(report.outcome.text(), "result = df.groupby('src').size().nlargest(5)");
        assert!(report.outcome.is_validated());
    }

    #[test]
    fn test_stray_backtick_fallback() {
        let report = repair("result = len(df)`");
        assert_eq!(report.fallback, Some(Fallback::StripMarkers));
        assert_eq!(report.outcome.text(), "result = len(df)");
        assert_eq!(report.final_state(), RepairState::Validated);
        assert!(report.trail.contains(&RepairState::FallbackAttempted));
    }

    #[test]
    fn test_last_line_fallback() {
        let report = repair("top = df['src'].value_counts()\n    top.head(3)");
        assert_eq!(report.fallback, Some(Fallback::BindLastLine));
        assert_eq!(
            report.outcome.text(),
            "top = df['src'].value_counts()\nresult = top.head(3)"
        );
    }

    #[test]
    fn test_fallback_exhaustion_is_best_effort() {
        let raw = "x = (1 +\ny = [2,";
        let report = repair(raw);
        assert_eq!(report.final_state(), RepairState::BestEffort);
        assert_eq!(report.outcome, RepairOutcome::BestEffort(raw.to_string()));
        assert!(report.outcome.validated().is_none());
        assert!(report.parse_error.is_some());
    }

    #[test]
    fn test_dangerous_call_ends_best_effort_with_marker() {
        let report = repair("result = open('/etc/passwd').read()");
        assert_eq!(report.final_state(), RepairState::BestEffort);
        assert!(report.outcome.text().contains("# [REMOVED_DANGEROUS] open("));
        assert_eq!(report.findings.len(), 1);
    }

    #[test]
    fn test_bind_last_line() {
        assert_eq!(bind_last_line("a = 1\nlen(df)\n\n").as_deref(), Some("a = 1\nresult = len(df)"));
        assert_eq!(bind_last_line("len(df)").as_deref(), Some("result = len(df)"));
        assert_eq!(bind_last_line("a = 1"), None);
        assert_eq!(bind_last_line("   "), None);
    }

    fn column() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("src".to_string()),
            Just("dst".to_string()),
            Just("Bytes_int".to_string()),
            Just("Attack_type".to_string()),
        ]
    }

    fn bare_expression() -> impl Strategy<Value = String> {
        (column(), 1..20usize, 0..4usize).prop_map(|(col, n, shape)| match shape {
            0 => format!("df['{}'].value_counts().head({})", col, n),
            1 => format!("df.nlargest({}, '{}')", n, col),
            2 => format!("len(df['{}'].unique())", col),
            _ => format!("df[df['{}'] != 'normal'].shape", col),
        })
    }

    fn valid_program() -> impl Strategy<Value = String> {
        (prop::collection::vec((column(), 0..100i64), 0..4), bare_expression()).prop_map(
            |(lines, last)| {
                let mut out: Vec<String> = lines
                    .iter()
                    .enumerate()
                    .map(|(i, (col, n))| format!("v{} = df['{}'].head({})", i, col, n))
                    .collect();
                out.push(format!("result = {}", last));
                out.join("\n")
            },
        )
    }

    proptest! {
        #[test]
        fn prop_repair_is_idempotent_on_valid_snippets(source in valid_program()) {
            let first = repair(&source);
            prop_assert_eq!(first.outcome.text(), source.as_str());
            let second = repair(first.outcome.text());
            prop_assert_eq!(second.outcome, first.outcome);
        }

        #[test]
        fn prop_bare_expression_wraps_exactly(expr in bare_expression()) {
            let report = repair(&expr);
            prop_assert!(report.outcome.is_validated());
            prop_assert_eq!(report.outcome.text(), format!("result = {}", expr));
        }
    }
}
