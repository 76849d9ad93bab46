// Required external crates for configuration management and serialization
use serde::Deserialize;
use std::path::{Path, PathBuf};
use config::{Config, ConfigError, Environment, File};

use crate::llm::backend::SamplingConfig;
use crate::llm::model::ModelParams;
use crate::llm::session::{GenerationRequest, SessionConfig};

/// Configuration for model loading
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    /// Backend used to run the weights ("llama" or "echo")
    pub backend: String,
    /// Path to the GGUF weight file
    pub path: PathBuf,
    /// Context capacity in tokens
    pub context_size: usize,
    /// Layers offloaded to the accelerator (0 = CPU only)
    pub gpu_layers: u32,
    pub use_mmap: bool,
    pub use_mlock: bool,
}

/// Configuration for generation
#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    /// Maximum number of tokens to generate per turn
    pub max_tokens: usize,
    /// Generation stops when one of these appears
    pub stop_sequences: Vec<String>,
    /// Standing instruction at the head of every conversation
    pub system_prompt: Option<String>,
    /// "greedy" or "standard"
    pub sampling: String,
    /// Controls randomness in generation (0.0-2.0)
    pub temperature: f32,
    pub top_k: i32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    pub repeat_last_n: usize,
    /// Fragments buffered between generation and the reader
    pub stream_buffer: usize,
}

/// Configuration for application logging
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Optional directory for rolling log files
    pub file: Option<PathBuf>,
}

/// Main settings struct that contains all configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Model-related settings
    pub model: ModelConfig,
    /// Inference-related settings
    pub inference: InferenceConfig,
    /// Logging-related settings
    pub logging: LoggingConfig,
}

/// Implementation for loading and parsing configuration
impl Settings {
    /// Loads settings from `./config`.
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = std::env::current_dir()
            .map_err(|e| ConfigError::Message(
                format!("Failed to get current directory: {}", e)
            ))?
            .join("config");
        Self::from_dir(&config_dir)
    }

    /// Loads settings from `config_dir` in the following order of precedence
    /// (highest to lowest):
    /// 1. Environment variables prefixed with WEAI_ (`WEAI_MODEL__PATH`)
    /// 2. Local config file (local.toml) if present
    /// 3. Default config file (default.toml)
    pub fn from_dir(config_dir: &Path) -> Result<Self, ConfigError> {
        // Check if config directory exists
        if !config_dir.exists() {
            return Err(ConfigError::Message(
                format!("Config directory not found at: {}", config_dir.display())
            ));
        }

        // Check if default.toml exists
        let default_config = config_dir.join("default.toml");
        if !default_config.exists() {
            return Err(ConfigError::Message(
                format!("Default configuration file not found at: {}", default_config.display())
            ));
        }

        let local_config = config_dir.join("local.toml");

        // Convert paths to strings and keep them alive
        let default_config_path = default_config.to_string_lossy();
        let local_config_path = local_config.to_string_lossy();

        // Load and validate configuration
        let settings = Config::builder()
            .add_source(File::with_name(&default_config_path))
            .add_source(File::with_name(&local_config_path).required(false))
            .add_source(
                Environment::with_prefix("WEAI")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize::<Settings>()?;

        // Validate settings after loading
        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.model.backend.as_str() {
            "llama" | "echo" => {}
            other => {
                return Err(ConfigError::Message(
                    format!("Unknown backend: {}. Must be one of: llama, echo", other)
                ))
            }
        }

        if self.model.context_size == 0 {
            return Err(ConfigError::Message(
                "context_size must be greater than 0".to_string()
            ));
        }

        if self.inference.max_tokens == 0 {
            return Err(ConfigError::Message(
                "max_tokens must be greater than 0".to_string()
            ));
        }

        // Leave room for at least one prompt token
        if self.inference.max_tokens >= self.model.context_size {
            return Err(ConfigError::Message(format!(
                "max_tokens ({}) must be smaller than context_size ({})",
                self.inference.max_tokens, self.model.context_size
            )));
        }

        if self.inference.stream_buffer == 0 {
            return Err(ConfigError::Message(
                "stream_buffer must be greater than 0".to_string()
            ));
        }

        match self.inference.sampling.as_str() {
            "greedy" | "standard" => {}
            other => {
                return Err(ConfigError::Message(
                    format!("Unknown sampling mode: {}. Must be one of: greedy, standard", other)
                ))
            }
        }

        // Validate temperature range
        if !(0.0..=2.0).contains(&self.inference.temperature) {
            return Err(ConfigError::Message(
                format!("Temperature must be between 0.0 and 2.0, got: {}", self.inference.temperature)
            ));
        }

        if !(0.0..=1.0).contains(&self.inference.top_p) {
            return Err(ConfigError::Message(
                format!("top_p must be between 0.0 and 1.0, got: {}", self.inference.top_p)
            ));
        }

        // Validate logging level
        match self.logging.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            _ => Err(ConfigError::Message(
                format!("Invalid logging level: {}. Must be one of: error, warn, info, debug, trace",
                    self.logging.level)
            )),
        }?;

        // Create log directory if configured and doesn't exist
        if let Some(log_dir) = &self.logging.file {
            if !log_dir.exists() {
                std::fs::create_dir_all(log_dir).map_err(|e| {
                    ConfigError::Message(format!(
                        "Failed to create log directory at {}: {}",
                        log_dir.display(), e
                    ))
                })?;
            }
        }

        Ok(())
    }

    pub fn sampling(&self) -> SamplingConfig {
        let inference = &self.inference;
        match inference.sampling.as_str() {
            "greedy" => SamplingConfig::Greedy,
            _ => SamplingConfig::Standard {
                temperature: inference.temperature,
                top_k: inference.top_k,
                top_p: inference.top_p,
                repeat_penalty: inference.repeat_penalty,
                repeat_last_n: inference.repeat_last_n,
            },
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            system_prompt: self.inference.system_prompt
                .clone()
                .filter(|prompt| !prompt.trim().is_empty()),
            request: GenerationRequest {
                max_tokens: self.inference.max_tokens,
                stop_sequences: self.inference.stop_sequences.clone(),
                sampling: self.sampling(),
            },
            stream_buffer: self.inference.stream_buffer,
        }
    }

    pub fn model_params(&self) -> ModelParams {
        ModelParams {
            path: self.model.path.clone(),
            context_size: self.model.context_size,
            gpu_layers: self.model.gpu_layers,
            use_mmap: self.model.use_mmap,
            use_mlock: self.model.use_mlock,
        }
    }
}
