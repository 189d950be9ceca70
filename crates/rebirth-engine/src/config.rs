use std::env;
use std::time::Duration;

use crate::compress::CompressionTarget;
use crate::error::{PipelineError, Result};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_RELAY_BASE: &str = "http://127.0.0.1:8787";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: f64 = 90.0;
const MIN_REQUEST_TIMEOUT_SECS: f64 = 15.0;
const MAX_REQUEST_TIMEOUT_SECS: f64 = 300.0;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub api_key: Option<String>,
    pub model: String,
    /// Used only by the credential check.
    pub text_model: String,
    pub api_base: String,
    pub relay_base: String,
    pub request_timeout: Duration,
    pub compression: CompressionTarget,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_IMAGE_MODEL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            relay_base: DEFAULT_RELAY_BASE.to_string(),
            request_timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_SECS),
            compression: CompressionTarget::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let timeout_secs = non_empty_env("REBIRTH_REQUEST_TIMEOUT_SECS")
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|value| value.is_finite())
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)
            .clamp(MIN_REQUEST_TIMEOUT_SECS, MAX_REQUEST_TIMEOUT_SECS);
        Self {
            api_key: non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY")),
            model: non_empty_env("GEMINI_IMAGE_MODEL")
                .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
            text_model: non_empty_env("GEMINI_TEXT_MODEL")
                .unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string()),
            api_base: non_empty_env("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            relay_base: non_empty_env("REBIRTH_RELAY_URL")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_RELAY_BASE.to_string()),
            request_timeout: Duration::from_secs_f64(timeout_secs),
            compression: CompressionTarget::default(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_text_model(mut self, text_model: impl Into<String>) -> Self {
        self.text_model = text_model.into();
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_relay_base(mut self, relay_base: impl Into<String>) -> Self {
        self.relay_base = relay_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| PipelineError::Configuration("Missing GEMINI_API_KEY".to_string()))
    }

    pub fn require_model(&self) -> Result<&str> {
        let trimmed = self.model.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::Configuration(
                "Missing model identifier (GEMINI_IMAGE_MODEL)".to_string(),
            ));
        }
        Ok(trimmed)
    }

    pub fn require_text_model(&self) -> Result<&str> {
        let trimmed = self.text_model.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::Configuration(
                "Missing text model identifier (GEMINI_TEXT_MODEL)".to_string(),
            ));
        }
        Ok(trimmed)
    }

    pub fn require_relay_base(&self) -> Result<&str> {
        let trimmed = self.relay_base.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::Configuration(
                "Missing relay URL (REBIRTH_RELAY_URL)".to_string(),
            ));
        }
        Ok(trimmed)
    }

    pub fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credential_is_a_configuration_error() {
        let config = EngineConfig::default();
        let err = config.require_api_key().unwrap_err();
        assert_eq!(err.kind(), "configuration");

        let blank = EngineConfig::default().with_api_key("   ");
        assert!(blank.require_api_key().is_err());
        assert_eq!(
            EngineConfig::default().with_api_key("k").require_api_key().ok(),
            Some("k")
        );
    }

    #[test]
    fn blank_model_is_a_configuration_error() {
        let config = EngineConfig::default().with_model(" ");
        assert!(matches!(
            config.require_model(),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn endpoint_accepts_bare_and_prefixed_model_names() {
        let config = EngineConfig::default().with_api_base("https://example.test/v1beta/");
        assert_eq!(
            config.endpoint_for_model("gemini-2.5-flash-image"),
            "https://example.test/v1beta/models/gemini-2.5-flash-image:generateContent"
        );
        assert_eq!(
            config.endpoint_for_model(" models/custom "),
            "https://example.test/v1beta/models/custom:generateContent"
        );
    }

    #[test]
    fn defaults_carry_an_explicit_timeout() {
        let config = EngineConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(90));
        assert_eq!(config.model, DEFAULT_IMAGE_MODEL);
        assert_eq!(config.text_model, DEFAULT_TEXT_MODEL);
        assert!(config.with_text_model("").require_text_model().is_err());
    }
}
