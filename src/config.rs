//! Configuration for the evaluator.
//!
//! Supports both environment variables and YAML config file.
//! Environment variables take precedence over config file values,
//! and command-line flags take precedence over both.

use crate::dataset::Protocol;
use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Vision-language model endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Base URL for an OpenAI-compatible API (e.g., "http://localhost:8000")
    pub api_base: String,

    /// API key for authentication (may be empty for local servers)
    pub api_key: String,

    /// Model identifier (e.g., "llava-onevision-qwen2-7b-ov")
    pub model: String,

    /// Fine-tuned checkpoint served under its own name (optional)
    #[serde(default)]
    pub checkpoint: Option<String>,

    /// How many alternatives the server reports for the generated token
    #[serde(default = "default_top_logprobs")]
    pub top_logprobs: u8,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_top_logprobs() -> u8 {
    20
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            api_key: String::new(),
            model: String::new(),
            checkpoint: None,
            top_logprobs: default_top_logprobs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ModelConfig {
    /// Name the server should route the request to.
    ///
    /// A checkpoint, when given, is served under its own name.
    pub fn served_model(&self) -> &str {
        self.checkpoint.as_deref().unwrap_or(&self.model)
    }

    /// Label written into score files, `<model>` or `<model>_<checkpoint>`.
    pub fn method_name(&self) -> String {
        match &self.checkpoint {
            Some(ckpt) => format!("{}_{}", self.model, ckpt),
            None => self.model.clone(),
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Model endpoint settings
    pub model: ModelConfig,

    /// Shape every annotation record must have
    #[serde(default)]
    pub protocol: Protocol,
}

/// Configuration file structure (YAML format).
#[derive(Debug, Deserialize)]
struct ConfigFile {
    model: Option<ModelFileSection>,
    protocol: Option<ProtocolFileSection>,
}

#[derive(Debug, Deserialize)]
struct ModelFileSection {
    api_base: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    checkpoint: Option<String>,
    top_logprobs: Option<u8>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ProtocolFileSection {
    num_choices: Option<usize>,
    num_images: Option<usize>,
}

impl Config {
    /// Load configuration from environment variables and optional config file.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (VLM_API_BASE, VLM_API_KEY, VLM_MODEL, ...)
    /// 2. Config file (~/.config/pairwise-vqa-eval/config.yaml)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                config = Self::load_from_file(&config_path)?;
            }
        }

        if let Ok(api_base) = env::var("VLM_API_BASE") {
            config.model.api_base = api_base;
        }

        if let Ok(api_key) = env::var("VLM_API_KEY") {
            config.model.api_key = api_key;
        }

        if let Ok(model) = env::var("VLM_MODEL") {
            config.model.model = model;
        }

        if let Ok(top) = env::var("VLM_TOP_LOGPROBS") {
            if let Ok(top) = top.parse() {
                config.model.top_logprobs = top;
            }
        }

        if let Ok(timeout) = env::var("VLM_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse() {
                config.model.timeout_secs = timeout;
            }
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text, filling gaps with defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file_config: ConfigFile = serde_yaml::from_str(content)
            .map_err(|e| EvalError::Config(format!("Failed to parse config file: {}", e)))?;

        let mut config = Config::default();

        if let Some(model) = file_config.model {
            if let Some(api_base) = model.api_base {
                config.model.api_base = api_base;
            }
            if let Some(api_key) = model.api_key {
                config.model.api_key = api_key;
            }
            if let Some(name) = model.model {
                config.model.model = name;
            }
            if model.checkpoint.is_some() {
                config.model.checkpoint = model.checkpoint;
            }
            if let Some(top) = model.top_logprobs {
                config.model.top_logprobs = top;
            }
            if let Some(timeout) = model.timeout_secs {
                config.model.timeout_secs = timeout;
            }
        }

        if let Some(protocol) = file_config.protocol {
            if let Some(n) = protocol.num_choices {
                config.protocol.num_choices = n;
            }
            if let Some(n) = protocol.num_images {
                config.protocol.num_images = n;
            }
        }

        Ok(config)
    }

    /// Get the default config file path.
    pub fn config_file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "pairwise-vqa-eval")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Validate settings needed to talk to the model API.
    pub fn validate(&self) -> Result<()> {
        if self.model.api_base.is_empty() {
            return Err(EvalError::Config(
                "VLM API base URL is required. Set VLM_API_BASE environment variable or add to config file.".to_string()
            ));
        }

        if self.model.model.is_empty() {
            return Err(EvalError::Config(
                "Model is required. Pass --model, set VLM_MODEL, or add to config file."
                    .to_string(),
            ));
        }

        self.validate_protocol()
    }

    /// Validate the record shape on its own (no model needed).
    pub fn validate_protocol(&self) -> Result<()> {
        if !(2..=9).contains(&self.protocol.num_choices) {
            return Err(EvalError::Config(format!(
                "num_choices must be between 2 and 9 so every answer is a single digit, got {}",
                self.protocol.num_choices
            )));
        }

        if self.protocol.num_images == 0 {
            return Err(EvalError::Config(
                "num_images must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.model.api_base.is_empty());
        assert!(config.model.checkpoint.is_none());
        assert_eq!(config.model.top_logprobs, 20);
        assert_eq!(config.model.timeout_secs, 120);
        assert_eq!(config.protocol.num_choices, 4);
        assert_eq!(config.protocol.num_images, 2);
    }

    #[test]
    fn test_validate_fails_without_required_fields() {
        let config = Config::default();
        assert!(config.validate().is_err());
        assert!(config.validate_protocol().is_ok());
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
model:
  api_base: "http://localhost:8000"
  model: "qwen2.5-vl-7b"
  checkpoint: "cam-motion"
protocol:
  num_choices: 5
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.model.api_base, "http://localhost:8000");
        assert_eq!(config.model.served_model(), "cam-motion");
        assert_eq!(config.model.method_name(), "qwen2.5-vl-7b_cam-motion");
        assert_eq!(config.model.top_logprobs, 20);
        assert_eq!(config.protocol.num_choices, 5);
        assert_eq!(config.protocol.num_images, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_protocol_rejects_multi_digit_answers() {
        let mut config = Config::default();
        config.protocol.num_choices = 10;
        assert!(config.validate_protocol().is_err());
    }
}
