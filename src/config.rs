//! Configuration management for the IDE agent backend.
//!
//! Configuration can be set via environment variables:
//! - `OPENROUTER_API_KEY` - Required. API key for the chat completions endpoint.
//! - `LLM_API_URL` - Optional. OpenAI-compatible completions URL. Defaults to OpenRouter.
//! - `PLAN_MODEL` - Optional. Model for the planning pass. Defaults to `openai/gpt-5-mini`.
//! - `EDIT_MODEL` - Optional. Model for the edit pass. Defaults to `openai/gpt-5.1-codex-mini`.
//! - `WORKSPACE_PATH` - Optional. Sandbox directory. Defaults to `./temp-workspace`.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `4000`.
//! - `SESSION_MAX_AGE_SECS` - Optional. Age after which sessions are reaped. Defaults to `3600`.
//! - `SESSION_SWEEP_INTERVAL_SECS` - Optional. Sweep period. Defaults to `300`.
//! - `MAX_CONTEXT_BYTES` - Optional. Cap on workspace text inlined into prompts. Defaults to `200000`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_PLAN_MODEL: &str = "openai/gpt-5-mini";
pub const DEFAULT_EDIT_MODEL: &str = "openai/gpt-5.1-codex-mini";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Model selection for the two completion passes.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Model used when the request is routed through planning
    pub plan_model: String,

    /// Model used for the patch-producing pass
    pub edit_model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            plan_model: DEFAULT_PLAN_MODEL.to_string(),
            edit_model: DEFAULT_EDIT_MODEL.to_string(),
        }
    }
}

/// Session bookkeeping limits.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sessions started longer ago than this are dropped by the sweep
    pub max_age: Duration,

    /// How often the sweep runs
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the completions endpoint
    pub api_key: String,

    /// OpenAI-compatible chat completions URL
    pub api_url: String,

    pub models: ModelConfig,

    /// Root of the sandboxed workspace the agent may edit
    pub workspace_path: PathBuf,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    pub sessions: SessionConfig,

    /// Upper bound on file bytes inlined into a prompt when the client sends no files
    pub max_context_bytes: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENROUTER_API_KEY` is not set, and
    /// `ConfigError::InvalidValue` if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()))?;

        let api_url = std::env::var("LLM_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        let models = ModelConfig {
            plan_model: std::env::var("PLAN_MODEL")
                .unwrap_or_else(|_| DEFAULT_PLAN_MODEL.to_string()),
            edit_model: std::env::var("EDIT_MODEL")
                .unwrap_or_else(|_| DEFAULT_EDIT_MODEL.to_string()),
        };

        let workspace_path = std::env::var("WORKSPACE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("temp-workspace"));

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_env("PORT", 4000u16)?;

        let sessions = SessionConfig {
            max_age: Duration::from_secs(parse_env("SESSION_MAX_AGE_SECS", 3600u64)?),
            sweep_interval: Duration::from_secs(parse_env("SESSION_SWEEP_INTERVAL_SECS", 300u64)?),
        };

        let max_context_bytes = parse_env("MAX_CONTEXT_BYTES", 200_000usize)?;

        Ok(Self {
            api_key,
            api_url,
            models,
            workspace_path,
            host,
            port,
            sessions,
            max_context_bytes,
        })
    }

    /// Create a config with default values (useful for testing).
    pub fn new(api_key: String, workspace_path: PathBuf) -> Self {
        Self {
            api_key,
            api_url: DEFAULT_API_URL.to_string(),
            models: ModelConfig::default(),
            workspace_path,
            host: "127.0.0.1".to_string(),
            port: 4000,
            sessions: SessionConfig::default(),
            max_context_bytes: 200_000,
        }
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}
