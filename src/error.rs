//! Error types for dhamma-stream

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Flat error codes reported across the application bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Resolution errors
    NotFound,
    Timeout,
    ProviderError,
    Cancelled,

    // Playback errors
    NotLoaded,
    EngineError,

    // System errors
    InvalidConfig,
    FileError,
    JsonError,
    SpawnError,
    MissingDependency,
}

/// Main error type for dhamma-stream
///
/// `Clone` so a single resolution outcome can be handed to every waiter
/// attached to the same in-flight request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DhammaError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Resolution timed out after {0:?}")]
    Timeout(Duration),

    #[error("Extraction failed: {0}")]
    Provider(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Nothing is loaded")]
    NotLoaded,

    #[error("Media engine error: {0}")]
    Engine(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("File error: {0}")]
    File(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("Missing dependency: {0}. Please install it.")]
    MissingDependency(String),
}

impl DhammaError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::Provider(_) => ErrorCode::ProviderError,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::NotLoaded => ErrorCode::NotLoaded,
            Self::Engine(_) => ErrorCode::EngineError,
            Self::InvalidConfig(_) => ErrorCode::InvalidConfig,
            Self::File(_) => ErrorCode::FileError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Spawn(_) => ErrorCode::SpawnError,
            Self::MissingDependency(_) => ErrorCode::MissingDependency,
        }
    }
}

impl From<std::io::Error> for DhammaError {
    fn from(err: std::io::Error) -> Self {
        Self::File(err.to_string())
    }
}

impl From<serde_json::Error> for DhammaError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DhammaError>;
