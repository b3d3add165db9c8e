//! Danger neutralizer.
//!
//! Capability-escaping text is prefixed with a comment marker instead of
//! being deleted, so the line layout stays intact and an auditor can still
//! see what the model tried to do. The sandbox has none of these
//! capabilities anyway; this pass exists for the audit trail.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Prefix inserted in front of every match.
pub const NEUTRALIZED_MARKER: &str = "# [REMOVED_DANGEROUS] ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DangerCategory {
    /// `import os`, `import sys`, `__import__(...)`.
    ProcessImport,
    /// `open(...)`.
    FileOpen,
    /// Any mention of `subprocess`.
    Subprocess,
    /// `os.system`.
    ShellExec,
    /// `eval(...)`, `exec(...)`.
    DynamicEval,
}

impl fmt::Display for DangerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProcessImport => write!(f, "process_import"),
            Self::FileOpen => write!(f, "file_open"),
            Self::Subprocess => write!(f, "subprocess"),
            Self::ShellExec => write!(f, "shell_exec"),
            Self::DynamicEval => write!(f, "dynamic_eval"),
        }
    }
}

struct DangerPattern {
    id: &'static str,
    category: DangerCategory,
    regex: Regex,
}

fn pattern(id: &'static str, category: DangerCategory, source: &str) -> DangerPattern {
    DangerPattern {
        id,
        category,
        regex: Regex::new(&format!("(?i){}", source)).unwrap(),
    }
}

lazy_static! {
    static ref DANGER_PATTERNS: Vec<DangerPattern> = vec![
        pattern("import_os", DangerCategory::ProcessImport, r"\bimport\s+os\b"),
        pattern("import_sys", DangerCategory::ProcessImport, r"\bimport\s+sys\b"),
        pattern("dunder_import", DangerCategory::ProcessImport, r"\b__import__\s*\("),
        pattern("open_call", DangerCategory::FileOpen, r"\bopen\s*\("),
        pattern("subprocess", DangerCategory::Subprocess, r"\bsubprocess\b"),
        pattern("os_system", DangerCategory::ShellExec, r"\bos\.system\b"),
        pattern("eval_call", DangerCategory::DynamicEval, r"\beval\s*\("),
        pattern("exec_call", DangerCategory::DynamicEval, r"\bexec\s*\("),
    ];

    /// Every pattern as one alternation, so a single left-to-right pass
    /// marks each match exactly once.
    static ref ANY_DANGER: Regex = Regex::new(&format!(
        "(?i){}",
        DANGER_PATTERNS
            .iter()
            .map(|p| format!("(?:{})", p.regex.as_str().trim_start_matches("(?i)")))
            .collect::<Vec<_>>()
            .join("|")
    ))
    .unwrap();
}

/// One neutralized match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DangerFinding {
    pub pattern_id: String,
    pub category: DangerCategory,
    /// One-based line where the match starts.
    pub line: usize,
    pub matched: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neutralized {
    pub text: String,
    pub findings: Vec<DangerFinding>,
}

fn classify(matched: &str) -> (&'static str, DangerCategory) {
    DANGER_PATTERNS
        .iter()
        .find(|p| p.regex.is_match(matched))
        .map_or(("unknown", DangerCategory::DynamicEval), |p| (p.id, p.category))
}

/// Prefix every dangerous match with [`NEUTRALIZED_MARKER`].
pub fn neutralize(snippet: &str) -> Neutralized {
    let mut text = String::with_capacity(snippet.len());
    let mut findings = Vec::new();
    let mut last = 0;
    for m in ANY_DANGER.find_iter(snippet) {
        let (pattern_id, category) = classify(m.as_str());
        findings.push(DangerFinding {
            pattern_id: pattern_id.to_string(),
            category,
            line: snippet[..m.start()].matches('\n').count() + 1,
            matched: m.as_str().to_string(),
        });
        text.push_str(&snippet[last..m.start()]);
        text.push_str(NEUTRALIZED_MARKER);
        text.push_str(m.as_str());
        last = m.end();
    }
    text.push_str(&snippet[last..]);
    Neutralized { text, findings }
}

/// True if `snippet` contains anything [`neutralize`] would mark.
pub fn contains_danger(snippet: &str) -> bool {
    ANY_DANGER.is_match(snippet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_marks_without_deleting() {
        let out = neutralize("import os\nresult = open('x').read()");
        assert_eq!(
            out.text,
            "# [REMOVED_DANGEROUS] import os\nresult = # [REMOVED_DANGEROUS] open('x').read()"
        );
        assert_eq!(out.findings.len(), 2);
        assert_eq!(out.findings[0].category, DangerCategory::ProcessImport);
        assert_eq!(out.findings[1].line, 2);
        assert_eq!(out.findings[1].pattern_id, "open_call");
    }

    #[test]
    fn test_case_insensitive_and_word_bounded() {
        assert!(contains_danger("EVAL (x)"));
        assert!(contains_danger("os.system('ls')"));
        assert!(!contains_danger("reopen(x)"));
        assert!(!contains_danger("df['opened'].sum()"));
        assert!(!contains_danger("import osmosis"));
    }

    #[test]
    fn test_clean_text_is_untouched() {
        let clean = "result = df.groupby('src').size()";
        let out = neutralize(clean);
        assert_eq!(out.text, clean);
        assert!(out.findings.is_empty());
    }

    fn dangerous() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("import os".to_string()),
            Just("import sys".to_string()),
            Just("open('/tmp/x')".to_string()),
            Just("subprocess.run(['ls'])".to_string()),
            Just("os.system('id')".to_string()),
            Just("eval('1+1')".to_string()),
            Just("exec ('x=1')".to_string()),
            Just("__import__('os')".to_string()),
        ]
    }

    fn filler() -> impl Strategy<Value = String> {
        "[a-z_ =0-9.()\\[\\]']{0,20}"
    }

    proptest! {
        #[test]
        fn prop_line_count_preserved_and_matches_kept(
            lines in prop::collection::vec((filler(), prop::option::of(dangerous()), filler()), 1..8)
        ) {
            let snippet = lines
                .iter()
                .map(|(a, d, b)| format!("{} {} {}", a, d.clone().unwrap_or_default(), b))
                .collect::<Vec<_>>()
                .join("\n");
            let out = neutralize(&snippet);
            prop_assert_eq!(out.text.lines().count(), snippet.lines().count());
            prop_assert_eq!(out.text.replace(NEUTRALIZED_MARKER, ""), snippet.clone());
            for finding in &out.findings {
                let marked = format!("{}{}", NEUTRALIZED_MARKER, finding.matched);
                prop_assert!(out.text.contains(&marked));
            }
            let planted = lines.iter().filter(|(_, d, _)| d.is_some()).count();
            prop_assert!(out.findings.len() >= planted);
        }
    }
}
