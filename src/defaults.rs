//! Default configuration constants for revoice.
//!
//! This module provides shared constants used across different configuration
//! types to ensure consistency and eliminate duplication.

/// Default audio sample rate in Hz.
///
/// 48kHz matches typical desktop audio servers, so captured blocks reach the
/// pipeline without an extra resampling stage.
pub const SAMPLE_RATE: u32 = 48_000;

/// Default channel count. The pipeline processes mono audio throughout.
pub const CHANNELS: u16 = 1;

/// Default processing chunk size in samples.
///
/// 4096 samples is ~85ms at 48kHz — large enough to give the conversion
/// model usable context, small enough to keep round-trip latency bounded.
pub const CHUNK_SIZE: usize = 4096;

/// Sample rates accepted by configuration validation.
pub const VALID_SAMPLE_RATES: [u32; 10] = [
    8_000, 16_000, 22_050, 24_000, 32_000, 44_100, 48_000, 88_200, 96_000, 192_000,
];

/// Input ring capacity, in chunks.
///
/// The capture side may outrun conversion; beyond this bound the oldest
/// unconsumed samples are discarded rather than growing the buffer.
pub const INPUT_BUFFER_CHUNKS: usize = 10;

/// Output queue capacity, in converted chunks (~400ms at the defaults).
pub const OUTPUT_QUEUE_CHUNKS: usize = 20;

/// Upper bound on the crossfade window between output chunks.
///
/// The effective window is `min(512, chunk_size / 8)` — roughly 10ms at
/// 48kHz with the default chunk size.
pub const MAX_CROSSFADE_SAMPLES: usize = 512;

/// Default pitch shift in semitones.
pub const PITCH_SHIFT: i32 = 0;

/// Pitch shift limits in semitones.
pub const MIN_PITCH_SHIFT: i32 = -24;
pub const MAX_PITCH_SHIFT: i32 = 24;

/// Default feature index mixing rate.
pub const INDEX_RATE: f32 = 0.75;

/// Chunk size limits in samples.
pub const MIN_CHUNK_SIZE: usize = 64;
pub const MAX_CHUNK_SIZE: usize = 8192;

/// RMS level below which a chunk is treated as silence.
///
/// Silent chunks skip RMS continuity scaling; there is no volume to match.
pub const SILENCE_RMS: f32 = 1e-6;

/// Gain clamp for RMS continuity between consecutive chunks.
pub const RMS_GAIN_MIN: f32 = 0.5;
pub const RMS_GAIN_MAX: f32 = 2.0;

/// Cutoff frequency for the chunk-seam smoothing filter, in Hz.
///
/// Above the voice band; the filter only strips processing artifacts.
pub const SMOOTHING_CUTOFF_HZ: f64 = 8_000.0;

/// Sleep interval for the conversion thread while the input ring has no
/// complete chunk, in milliseconds.
pub const CONVERSION_POLL_MS: u64 = 1;

/// Minimum interval between metrics callback invocations, in milliseconds.
pub const METRICS_INTERVAL_MS: u64 = 500;

/// How long `stop()` waits for the conversion thread to finish, in
/// milliseconds. A thread that misses the deadline is logged and detached.
pub const STOP_JOIN_TIMEOUT_MS: u64 = 2_000;

/// Latency estimate reported before any chunk has been measured, in
/// milliseconds.
pub const FALLBACK_LATENCY_MS: f64 = 500.0;

/// File write + read overhead assumed by the batch backend latency model,
/// in milliseconds.
pub const BATCH_FILE_IO_MS: f64 = 40.0;

/// Processing cost of the batch backend relative to real time.
pub const BATCH_PROCESSING_FACTOR: f64 = 4.0;
