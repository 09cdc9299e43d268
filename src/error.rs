//! Error types for ticket-scout.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Normalization error: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),
}

/// Configuration-related errors. Fatal: the process must not start.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Allowed {kind} enumeration is empty")]
    EmptyAllowedValues { kind: String },
}

/// Event normalization errors. Recoverable: drop the event and continue.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Malformed event: {reason}")]
    MalformedEvent { reason: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Request to {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Extraction errors. Recoverable: the window is deferred to the next cycle.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error(
        "Extraction unavailable for window {window_id} after {attempts} attempts: {last_error}"
    )]
    Unavailable {
        window_id: Uuid,
        attempts: u32,
        last_error: String,
    },
}

/// Issue tracker transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Tracker {operation} request failed: {reason}")]
    RequestFailed { operation: String, reason: String },

    #[error("Tracker {operation} returned {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Tracker {operation} response invalid: {reason}")]
    InvalidResponse { operation: String, reason: String },
}

/// Publish errors. Recoverable per candidate: the working set stays
/// consistent and the candidate remains eligible for reprocessing.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Publishing \"{title}\" failed after {attempts} attempts: {last_error}")]
    Failed {
        title: String,
        attempts: u32,
        last_error: String,
    },
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
