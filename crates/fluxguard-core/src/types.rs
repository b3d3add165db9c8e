//! Caller-facing result shape of the repair + execute path.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::sandbox::ExecutionResult;

/// Returned when the repair pipeline ends in BEST_EFFORT.
pub const UNPARSABLE_MESSAGE: &str =
    "LLM returned invalid/unparsable code and the repair pipeline couldn't fix it.";

/// Returned when the snippet raised inside the sandbox.
pub const EXECUTION_FAILED_MESSAGE: &str = "Exception during code execution";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Success,
    Error,
}

/// `{status, answer, code, result_preview, result_type, raw_llm, error?,
/// exec_error?, traceback?}` plus the diagnostic fields of the error paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub status: QueryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_preview: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_llm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
    /// Best-effort text when repair could not validate the snippet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempted_fix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_code: Option<String>,
}

impl QueryResponse {
    fn empty(status: QueryStatus) -> Self {
        Self {
            status,
            answer: None,
            code: None,
            result_preview: None,
            result_type: None,
            raw_llm: None,
            error: None,
            exec_error: None,
            traceback: None,
            attempted_fix: None,
            executed_code: None,
        }
    }

    /// A bare error with only a message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::empty(QueryStatus::Error)
        }
    }

    /// Repair could not produce an executable snippet.
    pub fn best_effort(attempted_fix: impl Into<String>, raw_llm: Option<String>) -> Self {
        Self {
            attempted_fix: Some(attempted_fix.into()),
            raw_llm,
            ..Self::error(UNPARSABLE_MESSAGE)
        }
    }

    /// Map a sandbox outcome onto the response shape.
    pub fn from_execution(
        outcome: ExecutionResult,
        answer: impl Into<String>,
        code: &str,
        raw_llm: Option<String>,
    ) -> Self {
        match outcome {
            ExecutionResult::Success { preview, .. } => Self {
                answer: Some(answer.into()),
                code: Some(code.to_string()),
                result_preview: Some(preview.preview),
                result_type: Some(preview.result_type),
                raw_llm,
                ..Self::empty(QueryStatus::Success)
            },
            ExecutionResult::ExecutionError { message, trace, .. } => Self {
                exec_error: Some(message),
                traceback: Some(trace),
                raw_llm,
                executed_code: Some(code.to_string()),
                ..Self::error(EXECUTION_FAILED_MESSAGE)
            },
            ExecutionResult::ContractViolation { message } => Self {
                raw_llm,
                executed_code: Some(code.to_string()),
                ..Self::error(message)
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }
}
