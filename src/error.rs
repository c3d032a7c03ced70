//! Error types shared across the guardian's subsystems

use std::io;
use thiserror::Error;

/// Error type shared by the guardian's subsystems
#[derive(Error, Debug)]
pub enum GuardianError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Action error: {0}")]
    Action(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for guardian subsystems
pub type Result<T> = std::result::Result<T, GuardianError>;

impl GuardianError {
    /// Create a provider error
    pub fn provider<S: Into<String>>(msg: S) -> Self {
        GuardianError::Provider(msg.into())
    }

    /// Create a network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        GuardianError::Network(msg.into())
    }

    /// Create an action error
    pub fn action<S: Into<String>>(msg: S) -> Self {
        GuardianError::Action(msg.into())
    }

    /// Create a settings error
    pub fn settings<S: Into<String>>(msg: S) -> Self {
        GuardianError::Settings(msg.into())
    }
}
