//! Runtime configuration.
//!
//! Everything the runtime needs is injected through [`RuntimeConfig`];
//! the only ambient lookup is the `OPENAI_API_KEY` fallback when no key
//! is configured.
//!
//! ```yaml
//! provider:
//!   model: gpt-4o-mini
//!   timeout: 30s
//! sandbox:
//!   max_steps: 5000000
//!   timeout: 10s
//! verifier:
//!   tolerance: 0.1
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use fluxguard_core::{SandboxLimits, VerifierConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::providers::{
    ApiCredential, CompletionConfig, OpenAiProvider, ProviderError, DEFAULT_BASE_URL,
    OPENAI_API_KEY_ENV,
};

/// Errors that can occur when loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub model: String,
    pub base_url: String,
    /// Falls back to `OPENAI_API_KEY` when unset. Never serialized.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Token cap for code-writing calls.
    pub max_tokens: u32,
    /// Token cap for narrative calls.
    pub narrative_max_tokens: u32,
    pub temperature: f32,
    #[serde(with = "humantime_duration")]
    pub timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            max_tokens: 700,
            narrative_max_tokens: 400,
            temperature: 0.0,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    #[serde(flatten)]
    pub limits: SandboxLimits,
    /// Wall-clock cap on one snippet run.
    #[serde(with = "humantime_duration")]
    pub timeout: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            limits: SandboxLimits::default(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub provider: ProviderConfig,
    pub sandbox: SandboxConfig,
    pub verifier: VerifierConfig,
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a `.json` file as JSON and anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let tolerance = self.verifier.tolerance;
        if !(0.0..=1.0).contains(&tolerance) {
            return Err(ConfigError::ValidationError(format!(
                "verifier.tolerance must be between 0 and 1, got {}",
                tolerance
            )));
        }

        let url = &self.provider.base_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::ValidationError(
                "provider.base_url must start with http:// or https://".to_string(),
            ));
        }

        if self.sandbox.limits.max_steps == 0 || self.sandbox.limits.max_collection_len == 0 {
            return Err(ConfigError::ValidationError(
                "sandbox limits must be greater than zero".to_string(),
            ));
        }

        if self.sandbox.timeout.is_zero() || self.provider.timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "timeouts must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// The configured key, or `OPENAI_API_KEY`.
    pub fn credential(&self) -> Result<ApiCredential, ProviderError> {
        ApiCredential::resolve(
            self.provider.api_key.as_deref(),
            OPENAI_API_KEY_ENV,
            "OpenAI API key",
        )
    }

    /// Build the provider, or explain why it cannot be built.
    pub fn provider(&self) -> Result<OpenAiProvider, ProviderError> {
        Ok(OpenAiProvider::from_credential(self.credential()?).with_base_url(&self.provider.base_url))
    }

    /// Request settings for code-writing calls.
    pub fn completion_config(&self) -> CompletionConfig {
        CompletionConfig {
            model: self.provider.model.clone(),
            max_tokens: self.provider.max_tokens,
            temperature: self.provider.temperature,
            timeout: self.provider.timeout,
        }
    }

    /// Request settings for narrative calls.
    pub fn narrative_completion_config(&self) -> CompletionConfig {
        CompletionConfig {
            max_tokens: self.provider.narrative_max_tokens,
            ..self.completion_config()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.provider.max_tokens, 700);
        assert_eq!(config.provider.temperature, 0.0);
        assert_eq!(config.verifier.tolerance, 0.1);
        assert_eq!(config.sandbox.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = RuntimeConfig::from_yaml(
            r#"
provider:
  model: gpt-4o
  timeout: 1m 30s
sandbox:
  max_steps: 1000
  timeout: 500ms
verifier:
  tolerance: 0.2
  attack_columns: [label]
"#,
        )
        .unwrap();
        assert_eq!(config.provider.model, "gpt-4o");
        assert_eq!(config.provider.timeout, Duration::from_secs(90));
        assert_eq!(config.provider.max_tokens, 700);
        assert_eq!(config.sandbox.limits.max_steps, 1000);
        assert_eq!(config.sandbox.limits.max_collection_len, 1_000_000);
        assert_eq!(config.sandbox.timeout, Duration::from_millis(500));
        assert_eq!(config.verifier.attack_columns, vec!["label".to_string()]);
        assert_eq!(config.verifier.src_column, "src");
    }

    #[test]
    fn test_json_config() {
        let config = RuntimeConfig::from_json(r#"{"provider": {"api_key": "k"}}"#).unwrap();
        assert_eq!(config.credential().unwrap().expose(), "k");
        assert_eq!(config.completion_config().max_tokens, 700);
        assert_eq!(config.narrative_completion_config().max_tokens, 400);
    }

    #[test]
    fn test_api_key_is_never_serialized() {
        let mut config = RuntimeConfig::default();
        config.provider.api_key = Some("sk-secret".to_string());
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("sk-secret"));
        assert!(yaml.contains("timeout: 30s"));
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            RuntimeConfig::from_yaml("verifier:\n  tolerance: 2.0\n"),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_yaml("provider:\n  base_url: localhost\n"),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_yaml("sandbox:\n  timeout: soon\n"),
            Err(ConfigError::YamlError(_))
        ));
    }
}
