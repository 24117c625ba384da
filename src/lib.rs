//! revoice - Real-time voice conversion streaming pipeline
//!
//! Streams captured audio through a pluggable conversion backend and back
//! out to playback with bounded latency. Device I/O and the conversion
//! model itself live behind trait boundaries; this crate owns the
//! buffering, the threading, and the chunk-seam smoothing in between.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod config;
pub mod defaults;
pub mod error;
pub mod streaming;

// Core traits (capture → convert → playback)
pub use streaming::backend::ConversionBackend;
pub use streaming::batch::FileConverter;
pub use streaming::converter::ChunkInference;

// Pipeline
pub use streaming::pipeline::{MetricsUpdate, PipelineMetrics, StreamingPipeline};

// Buffering
pub use streaming::buffer::{BufferConfig, BufferHealth, BufferManager};

// Backend configuration and metrics
pub use streaming::backend::{ConversionConfig, ConversionMetrics};
pub use streaming::batch::BatchConverter;
pub use streaming::converter::StreamingConverter;

// Error handling
pub use error::{Result, RevoiceError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.2.0+abc1234"` when git hash is available, `"0.2.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
