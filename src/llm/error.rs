//! LLM error types with retry classification.

use std::time::Duration;

use thiserror::Error;

/// Error from a completion call.
#[derive(Debug, Error)]
pub enum LlmError {
    /// 429 from the provider
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Non-success HTTP status other than 429
    #[error("Provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Connection failure or timeout before a response arrived
    #[error("Network error: {0}")]
    Network(String),

    /// The provider answered with something we could not decode
    #[error("Malformed provider response: {0}")]
    Parse(String),

    /// The response stream broke after it started
    #[error("Stream interrupted: {0}")]
    Stream(String),
}

impl LlmError {
    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } | LlmError::Network(_) => true,
            LlmError::Http { status, .. } => *status >= 500,
            LlmError::Parse(_) | LlmError::Stream(_) => false,
        }
    }

    /// Delay before retry `attempt` (0-based): `Retry-After` if the provider sent one,
    /// otherwise exponential backoff capped at 60 seconds.
    pub fn suggested_delay(&self, attempt: u32) -> Duration {
        if let LlmError::RateLimited {
            retry_after: Some(delay),
            ..
        } = self
        {
            return *delay;
        }

        let base_secs: u64 = match self {
            LlmError::RateLimited { .. } => 5,
            LlmError::Http { .. } => 2,
            _ => 1,
        };
        let delay = base_secs.saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_secs(delay.min(60))
    }
}

/// Build the error for a non-success HTTP status.
pub fn classify_http_status(status: u16, body: String, retry_after: Option<Duration>) -> LlmError {
    if status == 429 {
        LlmError::RateLimited {
            message: body,
            retry_after,
        }
    } else {
        LlmError::Http {
            status,
            message: body,
        }
    }
}

/// Configuration for retrying the initial request.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Maximum total time to spend retrying
    pub max_retry_duration: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_retry_duration: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    /// Never retry (useful in tests).
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            max_retry_duration: Duration::ZERO,
        }
    }

    pub fn should_retry(&self, error: &LlmError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_retries
    }
}
