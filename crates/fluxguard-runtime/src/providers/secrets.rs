//! API key wrapper.
//!
//! The key lives in a `secrecy` box, so it is zeroed on drop and neither
//! `Debug` nor `Display` can print it. [`ApiCredential::expose`] is called
//! in exactly one place: when the bearer header is set.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};

use super::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// `provider.api_key` in the runtime config.
    Config,
    /// The provider's environment variable.
    Environment,
    /// Passed in by code.
    Programmatic,
}

impl CredentialSource {
    fn label(self) -> &'static str {
        match self {
            CredentialSource::Config => "config",
            CredentialSource::Environment => "environment",
            CredentialSource::Programmatic => "programmatic",
        }
    }
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub struct ApiCredential {
    secret: SecretString,
    source: CredentialSource,
    label: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, label: &'static str) -> Self {
        Self {
            secret: SecretString::from(value.into()),
            source,
            label,
        }
    }

    /// A non-empty configured key, else a non-empty `env_var`.
    pub fn resolve(
        configured: Option<&str>,
        env_var: &str,
        label: &'static str,
    ) -> Result<Self, ProviderError> {
        let present = |v: &str| !v.trim().is_empty();
        if let Some(key) = configured.filter(|v| present(v)) {
            return Ok(Self::new(key, CredentialSource::Config, label));
        }
        match std::env::var(env_var) {
            Ok(key) if present(&key) => Ok(Self::new(key, CredentialSource::Environment, label)),
            _ => Err(ProviderError::NotConfigured(format!(
                "no {}: set provider.api_key or {}",
                label, env_var
            ))),
        }
    }

    pub fn expose(&self) -> &str {
        self.secret.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiCredential({}, {}, [REDACTED])", self.label, self.source)
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): [REDACTED]", self.label, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "sk-proj-abcdef0123456789";

    #[test]
    fn test_formatting_never_shows_the_key() {
        let cred = ApiCredential::new(KEY, CredentialSource::Config, "OpenAI API key");
        for shown in [format!("{:?}", cred), cred.to_string()] {
            assert!(!shown.contains(KEY), "key leaked: {}", shown);
            assert!(shown.contains("[REDACTED]"));
        }
        assert_eq!(cred.to_string(), "OpenAI API key (config): [REDACTED]");
        assert_eq!(cred.expose(), KEY);
    }

    #[test]
    fn test_configured_key_beats_environment() {
        std::env::set_var("FLUXGUARD_TEST_KEY_PRIORITY", "from-env");
        let cred = ApiCredential::resolve(Some("from-config"), "FLUXGUARD_TEST_KEY_PRIORITY", "key").unwrap();
        assert_eq!((cred.expose(), cred.source()), ("from-config", CredentialSource::Config));
        std::env::remove_var("FLUXGUARD_TEST_KEY_PRIORITY");
    }

    #[test]
    fn test_blank_config_falls_through_to_environment() {
        std::env::set_var("FLUXGUARD_TEST_KEY_FALLBACK", "from-env");
        let cred = ApiCredential::resolve(Some("  "), "FLUXGUARD_TEST_KEY_FALLBACK", "key").unwrap();
        assert_eq!((cred.expose(), cred.source()), ("from-env", CredentialSource::Environment));
        std::env::remove_var("FLUXGUARD_TEST_KEY_FALLBACK");
    }

    #[test]
    fn test_missing_key_is_not_configured() {
        let err = ApiCredential::resolve(None, "FLUXGUARD_TEST_KEY_ABSENT", "Test key").unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
        assert_eq!(
            err.to_string(),
            "Provider not configured: no Test key: set provider.api_key or FLUXGUARD_TEST_KEY_ABSENT"
        );
    }
}
