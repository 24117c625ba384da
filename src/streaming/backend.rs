//! Conversion backend interface.
//!
//! Defines the contract every voice-conversion backend implements, so the
//! pipeline can swap the file-round-trip fallback and the low-latency
//! in-memory converter without touching orchestration code.

use crate::defaults;
use crate::error::{Result, RevoiceError};
use std::path::PathBuf;

/// Configuration for a voice conversion backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionConfig {
    /// Voice model reference handed to the inference engine.
    pub model_path: PathBuf,
    /// Pitch shift in semitones, -24 to 24.
    pub pitch_shift: i32,
    /// Feature index mixing rate, 0.0 to 1.0.
    pub index_rate: f32,
    /// Sample rate of the audio flowing through the backend.
    pub sample_rate: u32,
    /// Prefer the slower, more accurate pitch estimator.
    pub use_high_accuracy_pitch: bool,
    /// Samples per chunk.
    pub chunk_size: usize,
    /// Future context in samples.
    pub lookahead_size: usize,
    /// Past context in samples.
    pub context_size: usize,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            pitch_shift: defaults::PITCH_SHIFT,
            index_rate: defaults::INDEX_RATE,
            sample_rate: defaults::SAMPLE_RATE,
            use_high_accuracy_pitch: true,
            chunk_size: defaults::CHUNK_SIZE,
            lookahead_size: 0,
            context_size: 0,
        }
    }
}

impl ConversionConfig {
    /// Duration of one chunk at the configured sample rate, in milliseconds.
    pub fn chunk_duration_ms(&self) -> f64 {
        (self.chunk_size as f64 / self.sample_rate as f64) * 1000.0
    }
}

/// Per-backend performance metrics.
///
/// Mutated only by the backend that owns it; the pipeline clones it out
/// for reporting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversionMetrics {
    /// Wall time spent converting the most recent chunk.
    pub processing_time_ms: f64,
    /// Measured per-chunk latency.
    pub chunk_latency_ms: f64,
    /// Chunks converted since initialization.
    pub total_chunks_processed: u64,
    /// Chunks that fell back to unconverted audio after an internal failure.
    pub dropped_chunks: u64,
}

/// Trait for voice conversion backends.
///
/// Implementations: [`BatchConverter`](super::batch::BatchConverter) (file
/// round-trip fallback) and
/// [`StreamingConverter`](super::converter::StreamingConverter) (in-memory,
/// low latency).
///
/// The central contract is that [`convert_chunk`](Self::convert_chunk)
/// never fails and never changes length: a backend that cannot convert a
/// chunk returns the input unchanged and increments
/// [`ConversionMetrics::dropped_chunks`]. The pipeline sees degradation
/// only through metrics, never through errors or length mismatches.
pub trait ConversionBackend: Send {
    /// Load models and prepare for conversion.
    ///
    /// Called once before streaming starts. This is the only fallible
    /// point of the backend lifecycle; a failure here aborts
    /// `StreamingPipeline::start()`.
    fn initialize(&mut self) -> Result<()>;

    /// Convert a single audio chunk.
    ///
    /// # Arguments
    /// * `chunk` - Input audio, exactly one chunk of mono samples
    /// * `context` - Preceding audio for continuity, when tracked
    ///
    /// # Returns
    /// Converted audio of exactly `chunk.len()` samples. On internal
    /// failure, the input chunk is returned unchanged.
    fn convert_chunk(&mut self, chunk: &[f32], context: Option<&[f32]>) -> Vec<f32>;

    /// Release models, temp files, and other held resources.
    ///
    /// Called when streaming stops.
    fn cleanup(&mut self);

    /// Performance counters for this backend instance.
    fn metrics(&self) -> &ConversionMetrics;

    /// Expected latency for the current configuration, in milliseconds.
    ///
    /// Used for buffer sizing and operator feedback, never for scheduling.
    fn latency_estimate_ms(&self) -> f64 {
        let measured = self.metrics().chunk_latency_ms;
        if measured > 0.0 {
            measured
        } else {
            defaults::FALLBACK_LATENCY_MS
        }
    }
}

/// Mock backend for testing.
///
/// Echoes its input by default; behavior is adjusted with the builder
/// methods.
pub struct MockBackend {
    metrics: ConversionMetrics,
    initialized: bool,
    fail_init: bool,
    /// Chunk indices (0-based) on which conversion should fail.
    fail_on_chunks: Vec<u64>,
    /// When set, output samples are this constant instead of the input.
    constant: Option<f32>,
    latency_ms: f64,
    cleaned_up: bool,
}

impl MockBackend {
    /// Create a mock that echoes input unchanged.
    pub fn new() -> Self {
        Self {
            metrics: ConversionMetrics::default(),
            initialized: false,
            fail_init: false,
            fail_on_chunks: Vec::new(),
            constant: None,
            latency_ms: defaults::FALLBACK_LATENCY_MS,
            cleaned_up: false,
        }
    }

    /// Configure the mock to fail `initialize()`.
    pub fn with_init_failure(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Configure the mock to fail converting the given chunk indices.
    pub fn with_failure_on_chunks(mut self, chunks: &[u64]) -> Self {
        self.fail_on_chunks = chunks.to_vec();
        self
    }

    /// Configure the mock to emit a constant value instead of echoing.
    pub fn with_constant_output(mut self, value: f32) -> Self {
        self.constant = Some(value);
        self
    }

    /// Configure the reported latency estimate.
    pub fn with_latency_ms(mut self, latency_ms: f64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// True once `initialize()` has run.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// True once `cleanup()` has run.
    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionBackend for MockBackend {
    fn initialize(&mut self) -> Result<()> {
        if self.fail_init {
            return Err(RevoiceError::BackendInit {
                message: "mock initialization failure".to_string(),
            });
        }
        self.initialized = true;
        Ok(())
    }

    fn convert_chunk(&mut self, chunk: &[f32], _context: Option<&[f32]>) -> Vec<f32> {
        let index = self.metrics.total_chunks_processed + self.metrics.dropped_chunks;
        if self.fail_on_chunks.contains(&index) {
            self.metrics.dropped_chunks += 1;
            return chunk.to_vec();
        }

        self.metrics.total_chunks_processed += 1;
        self.metrics.chunk_latency_ms = self.latency_ms;
        match self.constant {
            Some(value) => vec![value; chunk.len()],
            None => chunk.to_vec(),
        }
    }

    fn cleanup(&mut self) {
        self.initialized = false;
        self.cleaned_up = true;
    }

    fn metrics(&self) -> &ConversionMetrics {
        &self.metrics
    }

    fn latency_estimate_ms(&self) -> f64 {
        self.latency_ms
    }
}
