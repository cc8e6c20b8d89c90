use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{AssistantError, Result};
use crate::models::DEFAULT_HISTORY_CAP;

/// Crate configuration: defaults, optional `config.yaml`, then
/// environment-variable overrides, in that order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub groq: GroqConfig,
    pub tavily: TavilyConfig,
    pub retry: RetryConfig,
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroqConfig {
    pub api_key: String,
    pub chat_model: String,
    pub classifier_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TavilyConfig {
    pub api_key: String,
    pub max_results: u32,
    pub min_request_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub completion_base_delay_ms: u64,
    pub search_base_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_messages: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            groq: GroqConfig::default(),
            tavily: TavilyConfig::default(),
            retry: RetryConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

impl Default for GroqConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            chat_model: "deepseek-r1-distill-llama-70b".to_string(),
            classifier_model: "llama-3.1-8b-instant".to_string(),
            temperature: 0.7,
            max_tokens: 2048,
            top_p: 0.95,
        }
    }
}

impl Default for TavilyConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            max_results: 3,
            min_request_interval_ms: 1000,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            completion_base_delay_ms: 2000,
            search_base_delay_ms: 500,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_HISTORY_CAP,
        }
    }
}

impl Config {
    /// Load configuration. Always returns a config; credential checks
    /// are deferred to `validate()` so startup can fail with a clear
    /// message instead of a parse panic.
    pub fn load() -> Self {
        for path in [".env", "../.env"] {
            if dotenvy::from_path(path).is_ok() {
                tracing::info!("Loaded .env from: {}", path);
                break;
            }
        }

        let config_path =
            env::var("RA_CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            match fs::read_to_string(&config_path) {
                Ok(contents) => match serde_yaml::from_str::<Config>(&contents) {
                    Ok(config) => {
                        tracing::info!("Loaded configuration from {}", config_path);
                        config
                    }
                    Err(e) => {
                        tracing::error!(
                            "Failed to parse config file {}: {} - using defaults",
                            config_path,
                            e
                        );
                        Self::default()
                    }
                },
                Err(e) => {
                    tracing::error!(
                        "Failed to read config file {}: {} - using defaults",
                        config_path,
                        e
                    );
                    Self::default()
                }
            }
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = env::var("GROQ_API_KEY") {
            self.groq.api_key = key;
        }
        if let Ok(model) = env::var("RA_CHAT_MODEL") {
            self.groq.chat_model = model;
        }
        if let Ok(model) = env::var("RA_CLASSIFIER_MODEL") {
            self.groq.classifier_model = model;
        }
        if let Ok(key) = env::var("TAVILY_API_KEY") {
            self.tavily.api_key = key;
        }
        if let Ok(max) = env::var("RA_MAX_SEARCH_RESULTS") {
            if let Ok(max) = max.parse() {
                self.tavily.max_results = max;
            }
        }
        if let Ok(cap) = env::var("RA_HISTORY_MAX_MESSAGES") {
            if let Ok(cap) = cap.parse() {
                self.history.max_messages = cap;
            }
        }
    }

    /// Fail fast before any query is accepted: a missing credential is
    /// unrecoverable at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.groq.api_key.trim().is_empty() {
            return Err(AssistantError::Config(
                "GROQ_API_KEY is not set (env var or groq.api_key in config.yaml)".to_string(),
            ));
        }
        if self.tavily.api_key.trim().is_empty() {
            return Err(AssistantError::Config(
                "TAVILY_API_KEY is not set (env var or tavily.api_key in config.yaml)".to_string(),
            ));
        }
        Ok(())
    }

    pub fn completion_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry.completion_base_delay_ms)
    }

    pub fn search_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry.search_base_delay_ms)
    }

    pub fn min_search_interval(&self) -> Duration {
        Duration::from_millis(self.tavily.min_request_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.tavily.max_results, 3);
        assert_eq!(config.history.max_messages, DEFAULT_HISTORY_CAP);
        assert_eq!(config.min_search_interval(), Duration::from_millis(1000));
    }

    #[test]
    fn test_validate_rejects_missing_credentials() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.groq.api_key = "gsk_test".to_string();
        assert!(config.validate().is_err());

        config.tavily.api_key = "tvly_test".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_in_defaults() {
        let config: Config =
            serde_yaml::from_str("groq:\n  api_key: gsk_test\n").expect("parse partial config");
        assert_eq!(config.groq.api_key, "gsk_test");
        assert_eq!(config.groq.chat_model, "deepseek-r1-distill-llama-70b");
        assert_eq!(config.retry.max_attempts, 3);
    }
}
