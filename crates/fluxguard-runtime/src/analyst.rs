//! Question -> model -> repair -> sandbox -> [`QueryResponse`].
//!
//! The analyst never raises: a missing provider, a failed model call, an
//! unrepairable snippet, an exception, a contract violation and a timeout
//! all come back as an error-status response.

use std::sync::Arc;
use std::time::Duration;

use fluxguard_core::sandbox::format_traceback;
use fluxguard_core::script::ExecError;
use fluxguard_core::{
    repair, Dataset, ExecutionResult, Executor, QueryResponse, RepairOutcome, SandboxExecutor,
    ValidatedSnippet,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::prompts::{analyst_prompt, ANALYST_SYSTEM_PROMPT};
use crate::providers::{ChatMessage, CompletionConfig, LlmProvider, ProviderError};

/// Returned when no provider could be built.
pub const NOT_CONFIGURED_MESSAGE: &str =
    "LLM provider not configured: set provider.api_key or the OPENAI_API_KEY environment variable.";

lazy_static! {
    /// Outermost `{...}` span in free text.
    static ref JSON_OBJECT: Regex = Regex::new(r"(?s)\{.*\}").unwrap();
}

/// Parse `text` as a JSON object, or the outermost `{...}` inside it.
pub fn find_json_object(text: &str) -> Option<JsonValue> {
    let parse = |s: &str| serde_json::from_str::<JsonValue>(s).ok().filter(JsonValue::is_object);
    parse(text.trim()).or_else(|| JSON_OBJECT.find(text).and_then(|m| parse(m.as_str())))
}

/// The `{answer, code}` wrapper a model may reply with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AnswerEnvelope {
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl AnswerEnvelope {
    pub fn parse(raw: &str) -> Self {
        find_json_object(raw)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }
}

pub struct Analyst {
    provider: Option<Arc<dyn LlmProvider>>,
    executor: Arc<dyn Executor>,
    completion: CompletionConfig,
    exec_timeout: Duration,
}

impl Analyst {
    pub fn new(provider: Option<Arc<dyn LlmProvider>>, config: &RuntimeConfig) -> Self {
        Self {
            provider,
            executor: Arc::new(SandboxExecutor::new(config.sandbox.limits)),
            completion: config.completion_config(),
            exec_timeout: config.sandbox.timeout,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Ask the model a question about `dataset` and run what it writes.
    pub async fn ask(&self, dataset: &Dataset, question: &str) -> QueryResponse {
        let Some(provider) = &self.provider else {
            return QueryResponse::error(NOT_CONFIGURED_MESSAGE);
        };

        let messages = vec![
            ChatMessage::system(ANALYST_SYSTEM_PROMPT),
            ChatMessage::user(analyst_prompt(dataset.columns(), question)),
        ];
        let raw = match provider.complete(messages, &self.completion).await {
            Ok(response) => response.content,
            Err(e) => {
                warn!(provider = provider.name(), error = %e, "LLM call failed");
                return QueryResponse::error(llm_failure_message(&e));
            }
        };
        debug!(len = raw.len(), "model replied");

        let envelope = AnswerEnvelope::parse(&raw);
        let answer = envelope.answer.unwrap_or_default();
        let code = envelope.code.unwrap_or_else(|| raw.clone());
        self.run_snippet(&code, &answer, dataset, Some(raw)).await
    }

    /// Repair `code` and run it in the sandbox under the wall-clock limit.
    pub async fn run_snippet(
        &self,
        code: &str,
        answer: &str,
        dataset: &Dataset,
        raw_llm: Option<String>,
    ) -> QueryResponse {
        let report = repair(code);
        let snippet = match report.outcome {
            RepairOutcome::Validated(snippet) => snippet,
            RepairOutcome::BestEffort(text) => {
                info!("snippet could not be validated; not executing");
                return QueryResponse::best_effort(text, raw_llm);
            }
        };
        let source = snippet.source().to_string();
        let outcome = self.execute_with_timeout(snippet, dataset).await;
        info!(outcome = outcome.label(), "snippet executed");
        QueryResponse::from_execution(outcome, answer, &source, raw_llm)
    }

    async fn execute_with_timeout(&self, snippet: ValidatedSnippet, dataset: &Dataset) -> ExecutionResult {
        let executor = Arc::clone(&self.executor);
        let dataset = dataset.clone();
        let source = snippet.source().to_string();
        let task = tokio::task::spawn_blocking(move || executor.execute(&snippet, &dataset));

        let error = match tokio::time::timeout(self.exec_timeout, task).await {
            Ok(Ok(outcome)) => return outcome,
            Ok(Err(join_error)) => ExecError::resource(format!("sandbox task failed: {}", join_error)),
            Err(_) => {
                warn!(timeout = ?self.exec_timeout, "snippet timed out");
                ExecError::resource(format!(
                    "execution exceeded the {} wall-clock limit",
                    humantime::format_duration(self.exec_timeout)
                ))
            }
        };
        ExecutionResult::ExecutionError {
            message: error.message.clone(),
            trace: format_traceback(&source, &error),
            error,
        }
    }
}

fn llm_failure_message(error: &ProviderError) -> String {
    match error {
        ProviderError::BothEndpointsFailed { .. } => error.to_string(),
        other => format!("LLM call failed: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::ScriptedProvider;
    use fluxguard_core::QueryStatus;

    fn flows() -> Dataset {
        Dataset::from_json_str(
            r#"[
                {"src": "1.1.1.1", "dst": "9.9.9.9", "Bytes_int": 100},
                {"src": "2.2.2.2", "dst": "9.9.9.9", "Bytes_int": 200},
                {"src": "1.1.1.1", "dst": "8.8.8.8", "Bytes_int": 50}
            ]"#,
        )
        .unwrap()
    }

    fn analyst(reply: &str) -> (Arc<ScriptedProvider>, Analyst) {
        let provider = Arc::new(ScriptedProvider::replying(reply));
        let analyst = Analyst::new(
            Some(provider.clone() as Arc<dyn LlmProvider>),
            &RuntimeConfig::default(),
        );
        (provider, analyst)
    }

    #[test]
    fn test_find_json_object() {
        assert!(find_json_object(r#"{"a": 1}"#).is_some());
        assert!(find_json_object("Sure! {\"code\": \"len(df)\"} hope it helps").is_some());
        assert!(find_json_object("[1, 2]").is_none());
        assert!(find_json_object("no json here").is_none());
    }

    #[tokio::test]
    async fn test_json_envelope_is_executed() {
        let (provider, analyst) =
            analyst(r#"{"answer": "Total bytes", "code": "result = df['Bytes_int'].sum()"}"#);
        let response = analyst.ask(&flows(), "How many bytes?").await;
        assert!(response.is_success(), "{:?}", response);
        assert_eq!(response.answer.as_deref(), Some("Total bytes"));
        assert_eq!(response.result_preview, Some(serde_json::json!(350)));
        assert_eq!(response.result_type.as_deref(), Some("int"));

        let prompts = provider.prompts.lock().unwrap();
        assert!(prompts[0][1].content.contains("'src', 'dst', 'Bytes_int'"));
    }

    #[tokio::test]
    async fn test_fenced_bare_expression_is_wrapped() {
        let (_, analyst) = analyst("```python\ndf['src'].value_counts()\n```");
        let response = analyst.ask(&flows(), "top sources").await;
        assert!(response.is_success());
        assert_eq!(response.code.as_deref(), Some("result = df['src'].value_counts()"));
        assert_eq!(response.result_type.as_deref(), Some("Series"));
    }

    #[tokio::test]
    async fn test_contract_violation_is_an_error() {
        let (_, analyst) = analyst("x = 1 + 1\ny = x * 2");
        let response = analyst.ask(&flows(), "anything").await;
        assert_eq!(response.status, QueryStatus::Error);
        assert_eq!(
            response.error.as_deref(),
            Some("Code executed but did not set 'result' variable.")
        );
        assert_eq!(response.executed_code.as_deref(), Some("x = 1 + 1\ny = x * 2"));
    }

    #[tokio::test]
    async fn test_unrepairable_reply_is_not_executed() {
        let (_, analyst) = analyst("for row in df:\n    print(row)");
        let response = analyst.ask(&flows(), "loop").await;
        assert_eq!(response.status, QueryStatus::Error);
        assert!(response.attempted_fix.is_some());
        assert!(response.raw_llm.is_some());
    }

    #[tokio::test]
    async fn test_provider_failure_is_reported() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::BothEndpointsFailed {
            modern: Box::new(ProviderError::AuthError),
            legacy: Box::new(ProviderError::HttpError("refused".to_string())),
        })]));
        let analyst = Analyst::new(Some(provider as Arc<dyn LlmProvider>), &RuntimeConfig::default());
        let response = analyst.ask(&flows(), "q").await;
        assert_eq!(
            response.error.as_deref(),
            Some("LLM call failed. NewErr:Authentication failed OldErr:HTTP request failed: refused")
        );
    }

    #[tokio::test]
    async fn test_missing_provider() {
        let analyst = Analyst::new(None, &RuntimeConfig::default());
        let response = analyst.ask(&flows(), "q").await;
        assert_eq!(response.error.as_deref(), Some(NOT_CONFIGURED_MESSAGE));
    }

    struct SlowExecutor;

    impl Executor for SlowExecutor {
        fn execute(&self, _snippet: &ValidatedSnippet, _dataset: &Dataset) -> ExecutionResult {
            std::thread::sleep(Duration::from_millis(500));
            ExecutionResult::ContractViolation {
                message: "late".to_string(),
            }
        }
    }

    #[tokio::test]
    async fn test_wall_clock_timeout() {
        let mut config = RuntimeConfig::default();
        config.sandbox.timeout = Duration::from_millis(20);
        let analyst = Analyst::new(None, &config).with_executor(Arc::new(SlowExecutor));
        let response = analyst.run_snippet("result = 1", "", &flows(), None).await;
        assert_eq!(response.status, QueryStatus::Error);
        assert!(response
            .exec_error
            .as_deref()
            .is_some_and(|m| m.contains("wall-clock limit")));
    }
}
