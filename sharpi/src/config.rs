use crate::retry::RetryConfig;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.sharpi.com.br/v1/partner";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("api_key cannot be empty")]
    EmptyApiKey,

    #[error("base_url must be an http(s) URL with a path, got {0}")]
    InvalidBaseUrl(String),

    #[error("request_timeout_secs cannot be 0")]
    InvalidTimeout,

    #[error("retry.budget_secs and retry.base_delay_ms cannot be 0")]
    InvalidRetry,
}

/// Settings of the partner API client.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Partner API key, sent as `X-API-Key`.
    pub api_key: String,
    /// Root of the partner API. Only overridden in tests and staging setups.
    #[serde(default = "default_base_url")]
    pub base_url: Url,
    /// Timeout of a single HTTP attempt.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_base_url() -> Url {
    Url::parse(DEFAULT_BASE_URL).expect("default base url is valid")
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Config {
    pub fn new(api_key: impl Into<String>) -> Self {
        Config {
            api_key: api_key.into(),
            base_url: default_base_url(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            retry: RetryConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.api_key.trim().is_empty() {
            return Err(ValidationError::EmptyApiKey);
        }

        if !matches!(self.base_url.scheme(), "http" | "https") || self.base_url.cannot_be_a_base()
        {
            return Err(ValidationError::InvalidBaseUrl(self.base_url.to_string()));
        }

        if self.request_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }

        if self.retry.budget_secs == 0 || self.retry.base_delay_ms == 0 {
            return Err(ValidationError::InvalidRetry);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config: Config = serde_json::from_str(r#"{"api_key": "secret"}"#).unwrap();
        assert_eq!(config, Config::new("secret"));
        assert_eq!(config.base_url.as_str(), DEFAULT_BASE_URL);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn partial_retry_section() {
        let config: Config =
            serde_json::from_str(r#"{"api_key": "secret", "retry": {"budget_secs": 5}}"#).unwrap();
        assert_eq!(config.retry.budget_secs, 5);
        assert_eq!(config.retry.base_delay_ms, 500);
    }

    #[test]
    fn missing_api_key_does_not_parse() {
        assert!(serde_json::from_str::<Config>("{}").is_err());
    }

    #[test]
    fn validation() {
        assert_eq!(
            Config::new("  ").validate(),
            Err(ValidationError::EmptyApiKey)
        );

        let mut config = Config::new("secret");
        config.base_url = Url::parse("mailto:someone@example.com").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidBaseUrl(_))
        ));

        let mut config = Config::new("secret");
        config.request_timeout_secs = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidTimeout));

        let mut config = Config::new("secret");
        config.retry.budget_secs = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidRetry));
    }
}
