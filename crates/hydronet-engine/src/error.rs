//! Error types for the Hydronet engine binary.

use hydronet_core::{ConfigError, SystemError};

/// Errors that can occur while running the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Bootstrapping the water system failed.
    #[error("system error: {0}")]
    System(#[from] SystemError),

    /// The tracing subscriber could not be installed.
    #[error("logging error: {message}")]
    Logging {
        /// Description of the failure.
        message: String,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {0}")]
    Signal(#[from] std::io::Error),
}
