//! Game and batch error types.
//!
//! # Error Classification
//!
//! Errors fall into two groups:
//!
//! - **Recoverable inside a game**: `ModelTimeout`, `MalformedDecision`,
//!   `Network` and `Upstream` are raised by the inference layer but are
//!   absorbed by [`AgentSession`](crate::agent::AgentSession), which retries
//!   once and then falls back to a default decision.
//! - **Fatal for one game only**: anything else that escapes a
//!   [`Game`](crate::game::Game) is turned into a `BatchItemFailure` by the
//!   batch runner and never aborts the remaining repetitions.
//!
//! A game that hits its round limit is not an error at all; it finishes with
//! [`OutcomeKind::Timeout`](crate::game::OutcomeKind::Timeout).

use thiserror::Error;

/// Mafia graph errors.
#[derive(Error, Debug)]
pub enum GameError {
    /// The model-serving endpoint did not answer in time.
    #[error("Model {model} timed out after {timeout_ms}ms")]
    ModelTimeout {
        /// Model identity that was queried.
        model: String,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// Model output could not be decoded into a legal decision.
    #[error("Malformed decision: {0}")]
    MalformedDecision(String),

    /// Network communication error.
    #[error("Network error: {0}")]
    Network(String),

    /// Upstream service returned an error status or unusable body.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Game could not be set up (bad roster, bad role counts).
    #[error("Invalid setup: {0}")]
    InvalidSetup(String),

    /// Results store rejected a record.
    #[error("Store error: {0}")]
    Store(String),

    /// One game of a batch failed; the batch continues.
    #[error("Game {game_index} failed: {reason}")]
    BatchItemFailure {
        /// Index of the game inside the batch.
        game_index: usize,
        /// Human-readable failure reason.
        reason: String,
    },

    /// Work was cancelled before it started or while in flight.
    #[error("Cancelled")]
    Cancelled,

    /// Internal invariant violated.
    #[error("Internal error: {0}")]
    Internal(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GameError {
    /// Whether an agent session should retry the call that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GameError::ModelTimeout { .. }
                | GameError::MalformedDecision(_)
                | GameError::Network(_)
                | GameError::Upstream(_)
        )
    }
}

/// Result type alias for game operations
pub type Result<T> = std::result::Result<T, GameError>;

impl From<reqwest::Error> for GameError {
    fn from(err: reqwest::Error) -> Self {
        GameError::Network(err.to_string())
    }
}

impl From<toml::de::Error> for GameError {
    fn from(err: toml::de::Error) -> Self {
        GameError::Config(err.to_string())
    }
}
