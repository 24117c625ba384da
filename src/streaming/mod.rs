//! Streaming pipeline for real-time voice conversion.
//!
//! Implements a three-thread architecture around a shared buffer manager:
//! ```text
//! ┌───────────┐                ┌───────────────┐                ┌───────────┐
//! │  Capture  │─process_input─▶│ BufferManager │──get_output───▶│ Playback  │
//! │  thread   │                │  (input ring, │                │  thread   │
//! └───────────┘                │  output queue)│                └───────────┘
//!                              └───────┬───────┘
//!                                      │ chunk + context
//!                                      ▼
//!                              ┌───────────────┐
//!                              │  Conversion   │── ConversionBackend
//!                              │    thread     │   (batch / streaming)
//!                              └───────────────┘
//! ```
//!
//! Capture and playback callers never block on conversion progress: input
//! overflow discards the oldest audio, output underflow returns nothing and
//! the caller substitutes silence.

pub mod backend;
pub mod batch;
pub mod buffer;
pub mod converter;
pub mod pipeline;

pub use backend::{ConversionBackend, ConversionConfig, ConversionMetrics};
pub use batch::{BatchConverter, FileConverter};
pub use buffer::{BufferConfig, BufferHealth, BufferManager};
pub use converter::{ChunkInference, StreamingConverter};
pub use pipeline::{MetricsUpdate, PipelineMetrics, StreamingPipeline};
