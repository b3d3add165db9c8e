//! Sandboxed execution of validated snippets.
//!
//! The executor hands the interpreter a private copy of the dataset and the
//! fixed capability set (`df`, `pd`, `np` and the builtin allow-list), runs
//! the snippet under a step budget and classifies what came out:
//!
//! - **Success**: the snippet bound `result`; the value is previewed.
//! - **ExecutionError**: evaluation raised; message and trace are captured.
//! - **ContractViolation**: evaluation finished but `result` is unbound.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::dataset::Dataset;
use crate::script::{Budget, ExecError, Interpreter, ValidatedSnippet, Value};

/// The name every snippet must assign its answer to.
pub const RESULT_BINDING: &str = "result";

/// Rows shown when the result is a frame.
pub const FRAME_PREVIEW_ROWS: usize = 10;

/// Elements shown when the result is a list or tuple.
pub const SEQUENCE_PREVIEW_LEN: usize = 50;

/// Message used when a snippet runs but leaves `result` unbound.
pub const CONTRACT_VIOLATION_MESSAGE: &str = "Code executed but did not set 'result' variable.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxLimits {
    /// Evaluation steps, counting every element a vectorised operation touches.
    pub max_steps: u64,
    /// Longest collection a snippet may materialise.
    pub max_collection_len: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_steps: 5_000_000,
            max_collection_len: 1_000_000,
        }
    }
}

impl SandboxLimits {
    fn budget(&self) -> Budget {
        Budget::new(self.max_steps, self.max_collection_len)
    }
}

/// How a result was rendered for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewKind {
    /// Leading rows of a frame, as records.
    Table,
    /// Leading elements of a list or tuple.
    Sequence,
    /// A Series or array materialised as a plain list.
    ArrayLike,
    /// The value itself.
    Scalar,
    /// The value's string form.
    Opaque,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPreview {
    pub kind: PreviewKind,
    pub result_type: String,
    pub preview: JsonValue,
}

impl ResultPreview {
    pub fn of(value: &Value) -> Self {
        let result_type = match value {
            Value::Frame(_) => "dataframe".to_string(),
            other => other.type_name().to_string(),
        };
        let (kind, preview) = match value {
            Value::Frame(frame) => {
                let head: Vec<usize> = (0..frame.len().min(FRAME_PREVIEW_ROWS)).collect();
                (
                    PreviewKind::Table,
                    JsonValue::Array(frame.select_rows(&head).to_records()),
                )
            }
            Value::List(items) | Value::Tuple(items) => (
                PreviewKind::Sequence,
                JsonValue::Array(
                    items
                        .iter()
                        .take(SEQUENCE_PREVIEW_LEN)
                        .map(Value::to_json)
                        .collect(),
                ),
            ),
            Value::Series(_) | Value::ListSeries(_) | Value::Array(_) => {
                (PreviewKind::ArrayLike, value.to_json())
            }
            Value::None
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Str(_)
            | Value::Dict(_) => (PreviewKind::Scalar, value.to_json()),
            other => (PreviewKind::Opaque, JsonValue::String(other.to_string())),
        };
        Self {
            kind,
            result_type,
            preview,
        }
    }
}

/// Outcome of one sandboxed run.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    Success {
        value: Value,
        preview: ResultPreview,
    },
    ExecutionError {
        message: String,
        trace: String,
        error: ExecError,
    },
    ContractViolation {
        message: String,
    },
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExecutionResult::Success { .. } => "success",
            ExecutionResult::ExecutionError { .. } => "execution_error",
            ExecutionResult::ContractViolation { .. } => "contract_violation",
        }
    }
}

/// Runs a validated snippet against a dataset.
pub trait Executor: Send + Sync {
    fn execute(&self, snippet: &ValidatedSnippet, dataset: &Dataset) -> ExecutionResult;
}

/// The in-process interpreter sandbox.
#[derive(Debug, Clone, Default)]
pub struct SandboxExecutor {
    limits: SandboxLimits,
}

impl SandboxExecutor {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }
}

impl Executor for SandboxExecutor {
    fn execute(&self, snippet: &ValidatedSnippet, dataset: &Dataset) -> ExecutionResult {
        let mut interp = Interpreter::new(dataset.clone(), self.limits.budget());
        if let Err(error) = interp.run(snippet.program()) {
            info!(kind = %error.kind, line = ?error.line, "snippet raised");
            return ExecutionResult::ExecutionError {
                message: error.message.clone(),
                trace: format_traceback(snippet.source(), &error),
                error,
            };
        }
        let used = self.limits.max_steps - interp.budget().remaining();
        match interp.into_locals().remove(RESULT_BINDING) {
            Some(value) => {
                let preview = ResultPreview::of(&value);
                debug!(steps = used, result_type = %preview.result_type, "snippet finished");
                ExecutionResult::Success { value, preview }
            }
            None => {
                info!(steps = used, "snippet did not bind result");
                ExecutionResult::ContractViolation {
                    message: CONTRACT_VIOLATION_MESSAGE.to_string(),
                }
            }
        }
    }
}

/// Python-style traceback pointing at the failing snippet line.
pub fn format_traceback(source: &str, error: &ExecError) -> String {
    let mut trace = String::from("Traceback (most recent call last):\n");
    if let Some(line) = error.line {
        trace.push_str(&format!("  Snippet line {}, in <snippet>\n", line));
        if let Some(text) = source.lines().nth(line.saturating_sub(1)) {
            trace.push_str(&format!("    {}\n", text.trim()));
        }
    }
    trace.push_str(&format!("{}: {}", error.kind, error.message));
    trace
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ExecErrorKind;

    fn dataset() -> Dataset {
        Dataset::from_json_str(
            r#"[
                {"src": "1.1.1.1", "dst": "9.9.9.9", "Bytes_int": 100},
                {"src": "2.2.2.2", "dst": "9.9.9.9", "Bytes_int": 200}
            ]"#,
        )
        .unwrap()
    }

    fn execute(source: &str, data: &Dataset) -> ExecutionResult {
        let snippet = ValidatedSnippet::parse(source).unwrap();
        SandboxExecutor::default().execute(&snippet, data)
    }

    #[test]
    fn test_missing_result_is_contract_violation() {
        let outcome = execute("x = 1 + 1", &dataset());
        assert_eq!(
            outcome,
            ExecutionResult::ContractViolation {
                message: CONTRACT_VIOLATION_MESSAGE.to_string()
            }
        );
    }

    #[test]
    fn test_forbidden_capability_fails_and_leaves_dataset_alone() {
        let data = dataset();
        let before = data.clone();
        let outcome = execute(
            "df['Bytes_int'] = 0\ndf['owned'] = 1\nresult = open('/etc/passwd').read()",
            &data,
        );
        let ExecutionResult::ExecutionError { error, trace, .. } = outcome else {
            panic!("expected an execution error, got {outcome:?}");
        };
        assert_eq!(error.kind, ExecErrorKind::NameError);
        assert!(trace.contains("Snippet line 3"));
        assert!(trace.ends_with("NameError: name 'open' is not defined"));
        assert_eq!(data, before);
        assert!(!data.has_column("owned"));
    }

    #[test]
    fn test_extreme_arguments_fail_cleanly() {
        let cases = [
            ("result = list(range(9223372036854775807))", ExecErrorKind::ResourceLimit),
            ("result = enumerate([1,2], 9223372036854775807)", ExecErrorKind::ValueError),
            ("result = 'x'.zfill(100000000000)", ExecErrorKind::ResourceLimit),
            ("result = 'ab' * 9223372036854775807", ExecErrorKind::ResourceLimit),
            ("result = [0] * 9223372036854775807", ExecErrorKind::ResourceLimit),
            ("result = '{:>100000000000}'.format('x')", ExecErrorKind::ResourceLimit),
            ("result = f\"{1.5:.100000000000f}\"", ExecErrorKind::ResourceLimit),
            ("result = '%.100000000000f' % 1.5", ExecErrorKind::ResourceLimit),
        ];
        for (source, kind) in cases {
            let outcome = execute(source, &dataset());
            let ExecutionResult::ExecutionError { error, .. } = outcome else {
                panic!("{source}: expected an execution error, got {outcome:?}");
            };
            assert_eq!(error.kind, kind, "{source}");
        }
    }

    #[test]
    fn test_extreme_arguments_with_defined_results() {
        let cases = [
            (
                "result = df['Bytes_int'].shift(-9223372036854775807)",
                serde_json::json!([null, null]),
            ),
            (
                "result = df['Bytes_int'].shift(-9223372036854775807 - 1)",
                serde_json::json!([null, null]),
            ),
            (
                "result = list(range(-9223372036854775807-1, 9223372036854775807, 4611686018427387904))",
                serde_json::json!([i64::MIN, -(1_i64 << 62), 0, 1_i64 << 62]),
            ),
            ("result = [1, 2, 3][::9223372036854775807]", serde_json::json!([1])),
            ("result = df['src'].str.split('.').str[10]", serde_json::json!([null, null])),
            ("result = df['src'].str.split('.').str[0]", serde_json::json!(["1", "2"])),
        ];
        for (source, expected) in cases {
            let outcome = execute(source, &dataset());
            let ExecutionResult::Success { preview, .. } = outcome else {
                panic!("{source}: expected success, got {outcome:?}");
            };
            assert_eq!(preview.preview, expected, "{source}");
        }
    }

    #[test]
    fn test_frame_preview_is_records() {
        let outcome = execute("result = df[df['Bytes_int'] > 150]", &dataset());
        let ExecutionResult::Success { preview, .. } = outcome else {
            panic!("expected success");
        };
        assert_eq!(preview.kind, PreviewKind::Table);
        assert_eq!(preview.result_type, "dataframe");
        assert_eq!(
            preview.preview,
            serde_json::json!([{"src": "2.2.2.2", "dst": "9.9.9.9", "Bytes_int": 200}])
        );
    }

    #[test]
    fn test_scalar_and_series_previews() {
        let ExecutionResult::Success { preview, .. } = execute("result = df['Bytes_int'].sum()", &dataset()) else {
            panic!("expected success");
        };
        assert_eq!(preview.kind, PreviewKind::Scalar);
        assert_eq!(preview.result_type, "int");
        assert_eq!(preview.preview, serde_json::json!(300));

        let ExecutionResult::Success { preview, .. } = execute("result = df['src']", &dataset()) else {
            panic!("expected success");
        };
        assert_eq!(preview.kind, PreviewKind::ArrayLike);
        assert_eq!(preview.result_type, "Series");
        assert_eq!(preview.preview, serde_json::json!(["1.1.1.1", "2.2.2.2"]));
    }

    #[test]
    fn test_sequence_preview_is_truncated() {
        let ExecutionResult::Success { preview, .. } = execute("result = list(range(80))", &dataset()) else {
            panic!("expected success");
        };
        assert_eq!(preview.kind, PreviewKind::Sequence);
        assert_eq!(preview.preview.as_array().map(Vec::len), Some(SEQUENCE_PREVIEW_LEN));
    }

    #[test]
    fn test_step_limit_surfaces_as_execution_error() {
        let snippet = ValidatedSnippet::parse("result = sorted(range(100000))").unwrap();
        let executor = SandboxExecutor::new(SandboxLimits {
            max_steps: 1_000,
            max_collection_len: 1_000_000,
        });
        let outcome = executor.execute(&snippet, &dataset());
        let ExecutionResult::ExecutionError { error, .. } = outcome else {
            panic!("expected an execution error");
        };
        assert_eq!(error.kind, ExecErrorKind::ResourceLimit);
    }
}
