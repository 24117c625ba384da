//! Buffer management for streaming audio processing.
//!
//! Decouples variable-rate audio capture from fixed-size chunk processing
//! and hides chunk-boundary artifacts from the output stream. One instance
//! sits between the capture, conversion, and playback threads; the pipeline
//! wraps it in a mutex and keeps every critical section to a single chunk
//! copy.

use crate::defaults;
use std::collections::VecDeque;

/// Configuration for the buffer manager.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferConfig {
    /// Samples per processing chunk.
    pub chunk_size: usize,
    /// Future context, in chunks.
    pub lookahead_chunks: usize,
    /// Past context retained for the backend, in chunks.
    pub context_chunks: usize,
    /// Sample rate for latency calculations.
    pub sample_rate: u32,
    /// Channel count (the pipeline is mono throughout).
    pub channels: u16,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::CHUNK_SIZE,
            lookahead_chunks: 0,
            context_chunks: 0,
            sample_rate: defaults::SAMPLE_RATE,
            channels: defaults::CHANNELS,
        }
    }
}

impl BufferConfig {
    /// Number of lookahead samples.
    pub fn lookahead_size(&self) -> usize {
        self.chunk_size * self.lookahead_chunks
    }

    /// Number of context samples.
    pub fn context_size(&self) -> usize {
        self.chunk_size * self.context_chunks
    }
}

/// Buffer status snapshot for monitoring.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferHealth {
    /// Input ring fill level, 0–100.
    pub input_fill_percent: f32,
    /// Converted chunks queued for playback.
    pub output_chunks_ready: usize,
    /// Past chunks currently held as context.
    pub context_chunks: usize,
    /// Queued output expressed as playback time.
    pub total_latency_ms: f64,
    /// Input samples discarded by the overflow policy since creation.
    pub dropped_input_samples: u64,
}

/// Ring buffer with context tracking and crossfaded output queueing.
///
/// Input side: a bounded ring that discards the oldest samples on overflow
/// so a stalled converter can never grow memory or block the capture
/// callback. Output side: a bounded queue of converted chunks, each
/// crossfaded against the tail of its predecessor so chunk seams are no
/// more audible than a continuous stream.
pub struct BufferManager {
    config: BufferConfig,
    /// Input ring (capture side writes, conversion side pops chunks).
    input: VecDeque<f32>,
    /// Input ring capacity in samples.
    input_capacity: usize,
    /// Previously read chunks, oldest first, for backend context.
    context: VecDeque<Vec<f32>>,
    /// Converted chunks ready for playback.
    output: VecDeque<Vec<f32>>,
    /// Tail of the most recently enqueued output chunk, for crossfading.
    last_tail: Option<Vec<f32>>,
    /// Crossfade window length in samples.
    crossfade_samples: usize,
    total_samples_received: u64,
    total_samples_output: u64,
    dropped_input_samples: u64,
}

impl BufferManager {
    /// Creates a buffer manager for the given configuration.
    pub fn new(config: BufferConfig) -> Self {
        let input_capacity = config.chunk_size * defaults::INPUT_BUFFER_CHUNKS;
        let crossfade_samples =
            usize::min(defaults::MAX_CROSSFADE_SAMPLES, config.chunk_size / 8);
        Self {
            input: VecDeque::with_capacity(input_capacity),
            input_capacity,
            context: VecDeque::with_capacity(config.context_chunks),
            output: VecDeque::with_capacity(defaults::OUTPUT_QUEUE_CHUNKS),
            last_tail: None,
            crossfade_samples,
            total_samples_received: 0,
            total_samples_output: 0,
            dropped_input_samples: 0,
            config,
        }
    }

    /// Returns the buffer configuration.
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Crossfade window length between output chunks, in samples.
    pub fn crossfade_samples(&self) -> usize {
        self.crossfade_samples
    }

    /// Appends captured audio to the input ring.
    ///
    /// The ring never grows and never blocks the caller: when the incoming
    /// block would overflow capacity, the oldest unconsumed samples are
    /// discarded first. Sustained overflow is visible through
    /// [`BufferHealth::dropped_input_samples`].
    pub fn write_input(&mut self, samples: &[f32]) {
        self.total_samples_received += samples.len() as u64;

        if samples.len() >= self.input_capacity {
            // Block larger than the whole ring: keep only its newest tail.
            self.dropped_input_samples +=
                (self.input.len() + samples.len() - self.input_capacity) as u64;
            self.input.clear();
            self.input
                .extend(&samples[samples.len() - self.input_capacity..]);
            return;
        }

        let overflow = (self.input.len() + samples.len()).saturating_sub(self.input_capacity);
        if overflow > 0 {
            self.input.drain(..overflow);
            self.dropped_input_samples += overflow as u64;
            tracing::debug!(dropped = overflow, "input ring overflow, oldest samples discarded");
        }

        self.input.extend(samples);
    }

    /// True when the input ring holds at least one full chunk.
    pub fn has_chunk_ready(&self) -> bool {
        self.input.len() >= self.config.chunk_size
    }

    /// Pops one chunk from the input ring, together with accumulated context.
    ///
    /// The context is the concatenation of up to `context_chunks` previously
    /// read chunks, most recent last, or `None` when context tracking is
    /// disabled or nothing has been read yet. The popped chunk becomes part
    /// of the context for the *next* call.
    ///
    /// Callers must check [`has_chunk_ready`](Self::has_chunk_ready) first;
    /// a short read is padded with silence to keep the chunk-length
    /// invariant.
    pub fn read_chunk_for_processing(&mut self) -> (Vec<f32>, Option<Vec<f32>>) {
        let take = usize::min(self.config.chunk_size, self.input.len());
        let mut chunk: Vec<f32> = self.input.drain(..take).collect();
        chunk.resize(self.config.chunk_size, 0.0);

        let context = if self.context.is_empty() {
            None
        } else {
            let mut joined =
                Vec::with_capacity(self.context.iter().map(Vec::len).sum());
            for past in &self.context {
                joined.extend_from_slice(past);
            }
            Some(joined)
        };

        if self.config.context_chunks > 0 {
            if self.context.len() == self.config.context_chunks {
                self.context.pop_front();
            }
            self.context.push_back(chunk.clone());
        }

        (chunk, context)
    }

    /// Enqueues a converted chunk for playback, crossfading its head
    /// against the tail of the previous chunk.
    ///
    /// The linear blend runs over `min(512, chunk_size / 8)` samples and
    /// guarantees no discontinuity at chunk boundaries regardless of what
    /// the backend did internally. The new chunk's own tail is stored for
    /// the next call.
    pub fn write_output(&mut self, converted: Vec<f32>) {
        let mut chunk = converted;
        let fade = self.crossfade_samples;

        if let Some(tail) = &self.last_tail
            && chunk.len() > fade
        {
            // A shorter-than-window tail (from a short previous chunk)
            // shrinks the blend to what it holds.
            let blend = usize::min(fade, tail.len());
            for i in 0..blend {
                let fade_out = 1.0 - (i as f32 / blend as f32);
                let fade_in = i as f32 / blend as f32;
                chunk[i] = tail[i] * fade_out + chunk[i] * fade_in;
            }
        }

        self.last_tail = if chunk.len() > fade {
            Some(chunk[chunk.len() - fade..].to_vec())
        } else {
            Some(chunk.clone())
        };

        if self.output.len() == defaults::OUTPUT_QUEUE_CHUNKS {
            // Playback has fallen behind; bounded memory wins over old audio.
            self.output.pop_front();
            tracing::debug!("output queue full, oldest converted chunk evicted");
        }

        self.total_samples_output += chunk.len() as u64;
        self.output.push_back(chunk);
    }

    /// Pops the oldest converted chunk for playback.
    ///
    /// Chunks of at least `size` samples are truncated to `size`; shorter
    /// chunks are returned whole. Returns `None` when nothing is queued —
    /// the playback side substitutes silence.
    pub fn read_output(&mut self, size: usize) -> Option<Vec<f32>> {
        let mut chunk = self.output.pop_front()?;
        if chunk.len() >= size {
            chunk.truncate(size);
        }
        Some(chunk)
    }

    /// Returns a snapshot of buffer state for monitoring.
    ///
    /// `total_latency_ms` is the queued output expressed as playback time —
    /// the single latency figure exposed to operators.
    pub fn buffer_health(&self) -> BufferHealth {
        let queued_samples = self.output.len() * self.config.chunk_size;
        BufferHealth {
            input_fill_percent: (self.input.len() as f32 / self.input_capacity as f32) * 100.0,
            output_chunks_ready: self.output.len(),
            context_chunks: self.context.len(),
            total_latency_ms: (queued_samples as f64 / self.config.sample_rate as f64) * 1000.0,
            dropped_input_samples: self.dropped_input_samples,
        }
    }

    /// Resets all buffers and crossfade state. Used on stop/restart.
    pub fn clear(&mut self) {
        self.input.clear();
        self.context.clear();
        self.output.clear();
        self.last_tail = None;
    }
}
