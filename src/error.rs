//! Error types for revoice.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RevoiceError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Backend setup errors
    #[error("Voice model not found at {path}")]
    ModelNotFound { path: String },

    #[error("Backend initialization failed: {message}")]
    BackendInit { message: String },

    // Conversion errors
    #[error("Inference failed: {message}")]
    Inference { message: String },

    #[error("Audio file error: {message}")]
    AudioFile { message: String },

    // Pipeline errors
    #[error("Pipeline error: {message}")]
    Pipeline { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, RevoiceError>;
