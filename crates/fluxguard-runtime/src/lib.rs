//! # fluxguard-runtime
//!
//! Language-model side of fluxguard.
//!
//! This crate asks a model for analysis snippets and narratives, then hands
//! what comes back to `fluxguard-core` for repair, sandboxed execution and
//! the faithfulness audit.
//!
//! ## Important
//!
//! Everything here is OPTIONAL. `fluxguard-core` is deterministic and
//! never talks to a model. Without credentials the analyst answers with a
//! "not configured" error and the narrative falls back to a deterministic
//! summary.
//!
//! ## Example
//!
//! ```rust,ignore
//! use fluxguard_runtime::{Runtime, RuntimeConfig};
//!
//! let runtime = Runtime::new(RuntimeConfig::from_file("fluxguard.yaml")?);
//! let data = fluxguard_runtime::load_dataset("flows.json")?;
//!
//! let response = runtime.analyst().ask(&data, "Which source sent the most bytes?").await;
//! let audit = runtime.auditor().audit(&data, None).await;
//! println!("trust = {}", audit.faithfulness.trust_score);
//! ```

pub mod analyst;
pub mod config;
pub mod narrative;
pub mod prompts;
pub mod providers;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use fluxguard_core::{Dataset, DatasetError};
use thiserror::Error;
use tracing::{info, warn};

pub use analyst::{find_json_object, AnswerEnvelope, Analyst};
pub use config::{ConfigError, ProviderConfig, RuntimeConfig, SandboxConfig};
pub use narrative::{AuditReport, Auditor, GeneratedNarrative, NarrativeMetrics, NarrativeSource};
pub use providers::{LlmProvider, OpenAiProvider, ProviderError};

/// Errors from the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Failed to read dataset: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

/// Read a JSON array of records.
pub fn load_dataset(path: impl AsRef<Path>) -> Result<Dataset, RuntimeError> {
    let contents = fs::read_to_string(path)?;
    Ok(Dataset::from_json_str(&contents)?)
}

/// A configuration plus the provider built from it.
pub struct Runtime {
    config: RuntimeConfig,
    provider: Option<Arc<dyn LlmProvider>>,
}

impl Runtime {
    /// Build the provider from `config`. A missing key is not an error:
    /// the runtime runs without a model.
    pub fn new(config: RuntimeConfig) -> Self {
        let provider = match config.provider() {
            Ok(provider) => {
                info!(model = %config.provider.model, "LLM provider configured");
                Some(Arc::new(provider) as Arc<dyn LlmProvider>)
            }
            Err(e) => {
                warn!(error = %e, "running without an LLM provider");
                None
            }
        };
        Self { config, provider }
    }

    pub fn with_provider(config: RuntimeConfig, provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            config,
            provider: Some(provider),
        }
    }

    /// Load the config at `path`, or use defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, RuntimeError> {
        let config = match path {
            Some(path) => RuntimeConfig::from_file(path)?,
            None => RuntimeConfig::default(),
        };
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The provider, or why there is none.
    pub fn provider(&self) -> Result<&Arc<dyn LlmProvider>, RuntimeError> {
        self.provider.as_ref().ok_or_else(|| {
            RuntimeError::Provider(ProviderError::NotConfigured(
                analyst::NOT_CONFIGURED_MESSAGE.to_string(),
            ))
        })
    }

    pub fn analyst(&self) -> Analyst {
        Analyst::new(self.provider.clone(), &self.config)
    }

    pub fn auditor(&self) -> Auditor {
        Auditor::new(self.provider.clone(), &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::ScriptedProvider;

    #[test]
    fn test_runtime_without_provider() {
        let runtime = Runtime {
            config: RuntimeConfig::default(),
            provider: None,
        };
        assert!(matches!(
            runtime.provider(),
            Err(RuntimeError::Provider(ProviderError::NotConfigured(_)))
        ));
    }

    #[test]
    fn test_runtime_with_provider() {
        let runtime = Runtime::with_provider(
            RuntimeConfig::default(),
            Arc::new(ScriptedProvider::replying("result = len(df)")),
        );
        assert_eq!(runtime.provider().unwrap().name(), "scripted");
    }

    #[test]
    fn test_load_dataset_errors() {
        assert!(matches!(
            load_dataset("/nonexistent/flows.json"),
            Err(RuntimeError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_runtime_analyst_round_trip() {
        let runtime = Runtime::with_provider(
            RuntimeConfig::default(),
            Arc::new(ScriptedProvider::replying("result = len(df)")),
        );
        let data = Dataset::from_json_str(r#"[{"src": "1.1.1.1"}, {"src": "2.2.2.2"}]"#).unwrap();
        let response = runtime.analyst().ask(&data, "how many rows?").await;
        assert_eq!(response.result_preview, Some(serde_json::json!(2)));
    }
}
