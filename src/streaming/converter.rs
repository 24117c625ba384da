//! Low-latency streaming conversion backend.
//!
//! Feeds chunks straight through an in-memory inference engine and smooths
//! the seams between independently converted chunks: overlap context into
//! the model, RMS continuity between neighbors, a Hann-windowed crossfade
//! against the previous output, and a zero-phase low-pass to strip
//! boundary artifacts.

use crate::defaults;
use crate::error::Result;
use crate::streaming::backend::{ConversionBackend, ConversionConfig, ConversionMetrics};
use std::time::Instant;

/// Inference cost assumed before the first chunk is measured, in ms.
const INFERENCE_ESTIMATE_MS: f64 = 50.0;
/// Context management and smoothing overhead per chunk, in ms.
const SMOOTHING_OVERHEAD_MS: f64 = 10.0;

/// Trait for the in-memory model inference call.
///
/// May be slow (tens to hundreds of milliseconds) and may fail; the
/// backend treats it as synchronous and blocking within the conversion
/// thread.
pub trait ChunkInference: Send {
    /// Load the voice model. Called once before streaming starts.
    fn load(&mut self) -> Result<()>;

    /// Convert `audio` (one chunk, possibly with leading context samples)
    /// into the target voice.
    fn infer(&mut self, audio: &[f32], pitch_shift: i32, index_rate: f32) -> Result<Vec<f32>>;

    /// Release model resources. Called once when streaming stops.
    fn unload(&mut self) {}
}

/// Low-latency backend processing chunks in memory.
///
/// Per chunk: peak-normalize, prepend the tail of the previous raw input
/// as model context, infer, strip the context from the result, fit to the
/// input length, then smooth (RMS continuity, Hann crossfade, zero-phase
/// low-pass). Any failure falls back to the unprocessed input chunk.
pub struct StreamingConverter<I: ChunkInference> {
    config: ConversionConfig,
    engine: I,
    /// Overlap fed to the model from the previous raw input chunk.
    overlap_samples: usize,
    /// Crossfade window against the previous output chunk.
    fade_samples: usize,
    /// Previous raw input chunk, the source of model context.
    context: Option<Vec<f32>>,
    /// Previous smoothed output chunk, the crossfade partner.
    previous_output: Option<Vec<f32>>,
    /// RMS of the previous output chunk after continuity scaling.
    previous_rms: Option<f32>,
    metrics: ConversionMetrics,
    initialized: bool,
}

impl<I: ChunkInference> StreamingConverter<I> {
    /// Creates a streaming converter around the given inference engine.
    pub fn new(config: ConversionConfig, engine: I) -> Self {
        let overlap_samples = config.chunk_size / 2;
        let fade_samples = config.chunk_size / 4;
        Self {
            config,
            engine,
            overlap_samples,
            fade_samples,
            context: None,
            previous_output: None,
            previous_rms: None,
            metrics: ConversionMetrics::default(),
            initialized: false,
        }
    }

    /// Returns the backend configuration.
    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Returns the wrapped inference engine.
    pub fn engine(&self) -> &I {
        &self.engine
    }

    /// The full conversion path for one chunk. Failures bubble up to
    /// `convert_chunk`, which handles the fallback.
    fn process(&mut self, chunk: &[f32]) -> Result<Vec<f32>> {
        let normalized = peak_normalize(chunk);

        // Prepend the tail of the previous raw input so the model sees
        // continuous audio across the chunk boundary.
        let context_tail: Option<Vec<f32>> = self.context.as_ref().map(|previous| {
            let take = usize::min(self.overlap_samples, previous.len());
            previous[previous.len() - take..].to_vec()
        });
        let context_len = context_tail.as_ref().map_or(0, Vec::len);

        let mut buffer = Vec::with_capacity(context_len + normalized.len());
        if let Some(tail) = &context_tail {
            buffer.extend_from_slice(tail);
        }
        buffer.extend_from_slice(&normalized);

        let converted = self
            .engine
            .infer(&buffer, self.config.pitch_shift, self.config.index_rate)?;

        // Strip the converted context and fit to the input length.
        let mut output: Vec<f32> = converted.get(context_len..).unwrap_or(&[]).to_vec();
        output.resize(chunk.len(), 0.0);

        // Volume continuity between neighboring chunks.
        let current_rms = rms(&output);
        if current_rms >= defaults::SILENCE_RMS {
            if let Some(previous_rms) = self.previous_rms
                && previous_rms >= defaults::SILENCE_RMS
            {
                let gain = rms_blend_gain(previous_rms, current_rms);
                for sample in &mut output {
                    *sample *= gain;
                }
            }
            self.previous_rms = Some(rms(&output));
        }

        if let Some(previous) = &self.previous_output {
            apply_hann_crossfade(previous, &mut output, self.fade_samples);
        }

        let output = smooth_boundaries(&output, self.config.sample_rate);

        self.previous_output = Some(output.clone());
        self.context = Some(chunk.to_vec());

        Ok(output)
    }
}

impl<I: ChunkInference> ConversionBackend for StreamingConverter<I> {
    fn initialize(&mut self) -> Result<()> {
        tracing::info!(
            model = %self.config.model_path.display(),
            chunk_size = self.config.chunk_size,
            overlap = self.overlap_samples,
            fade = self.fade_samples,
            "initializing streaming converter"
        );

        self.engine.load()?;
        self.initialized = true;
        Ok(())
    }

    fn convert_chunk(&mut self, chunk: &[f32], _context: Option<&[f32]>) -> Vec<f32> {
        if !self.initialized {
            tracing::error!("streaming converter used before initialize()");
            self.metrics.dropped_chunks += 1;
            return chunk.to_vec();
        }

        let chunk_id = self.metrics.total_chunks_processed;
        let start = Instant::now();

        match self.process(chunk) {
            Ok(output) => {
                let processing_time_ms = start.elapsed().as_secs_f64() * 1000.0;
                self.metrics.processing_time_ms = processing_time_ms;
                self.metrics.chunk_latency_ms = processing_time_ms;
                self.metrics.total_chunks_processed += 1;

                tracing::debug!(chunk = chunk_id, ms = processing_time_ms, "chunk converted");
                output
            }
            Err(e) => {
                tracing::error!(chunk = chunk_id, error = %e, "chunk conversion failed");
                self.metrics.dropped_chunks += 1;
                chunk.to_vec()
            }
        }
    }

    fn cleanup(&mut self) {
        self.engine.unload();
        self.context = None;
        self.previous_output = None;
        self.previous_rms = None;
        self.initialized = false;

        tracing::info!(
            processed = self.metrics.total_chunks_processed,
            dropped = self.metrics.dropped_chunks,
            "streaming converter cleaned up"
        );
    }

    fn metrics(&self) -> &ConversionMetrics {
        &self.metrics
    }

    fn latency_estimate_ms(&self) -> f64 {
        if self.metrics.chunk_latency_ms > 0.0 {
            return self.metrics.chunk_latency_ms;
        }
        self.config.chunk_duration_ms() + INFERENCE_ESTIMATE_MS + SMOOTHING_OVERHEAD_MS
    }
}

/// Scales a chunk so its peak sits at 0.95. Chunks already below that
/// level, and silent chunks, pass through unchanged.
fn peak_normalize(chunk: &[f32]) -> Vec<f32> {
    let peak = chunk.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
    if peak <= 0.0 {
        return chunk.to_vec();
    }
    let divisor = f32::max(peak / 0.95, 1.0);
    chunk.iter().map(|&s| s / divisor).collect()
}

/// Root-mean-square level of a sample block.
fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Gain that blends the current chunk's RMS halfway toward the previous
/// chunk's, clamped so one chunk can never step more than 2x up or down.
fn rms_blend_gain(previous_rms: f32, current_rms: f32) -> f32 {
    let target_rms = 0.5 * previous_rms + 0.5 * current_rms;
    (target_rms / current_rms).clamp(defaults::RMS_GAIN_MIN, defaults::RMS_GAIN_MAX)
}

/// Symmetric Hann window of the given length.
fn hann_window(len: usize) -> Vec<f32> {
    if len <= 1 {
        return vec![0.0; len];
    }
    (0..len)
        .map(|n| {
            let phase = 2.0 * std::f64::consts::PI * n as f64 / (len - 1) as f64;
            (0.5 * (1.0 - phase.cos())) as f32
        })
        .collect()
}

/// Crossfades the head of `current` against the tail of `previous` using
/// the two halves of a `2 * fade_samples` Hann window.
fn apply_hann_crossfade(previous: &[f32], current: &mut [f32], fade_samples: usize) {
    let fade_len = fade_samples.min(previous.len()).min(current.len());
    if fade_len == 0 {
        return;
    }

    let window = hann_window(fade_len * 2);
    let previous_tail = &previous[previous.len() - fade_len..];

    for i in 0..fade_len {
        let fade_out = window[i];
        let fade_in = window[fade_len + i];
        current[i] = previous_tail[i] * fade_out + current[i] * fade_in;
    }
}

/// Second-order Butterworth low-pass coefficients via bilinear transform.
///
/// Returns `(b, a)` with `a0` normalized to 1.
fn butter2_lowpass(cutoff_hz: f64, sample_rate: f64) -> ([f64; 3], [f64; 2]) {
    let c = 1.0 / (std::f64::consts::PI * cutoff_hz / sample_rate).tan();
    let sqrt2 = std::f64::consts::SQRT_2;
    let norm = 1.0 / (1.0 + sqrt2 * c + c * c);

    let b = [norm, 2.0 * norm, norm];
    let a = [2.0 * (1.0 - c * c) * norm, (1.0 - sqrt2 * c + c * c) * norm];
    (b, a)
}

/// Single forward pass of the biquad (direct form II transposed).
fn biquad_forward(b: &[f64; 3], a: &[f64; 2], input: &[f32]) -> Vec<f32> {
    let mut z1 = 0.0f64;
    let mut z2 = 0.0f64;
    input
        .iter()
        .map(|&x| {
            let x = x as f64;
            let y = b[0] * x + z1;
            z1 = b[1] * x - a[0] * y + z2;
            z2 = b[2] * x - a[1] * y;
            y as f32
        })
        .collect()
}

/// Zero-phase low-pass over chunk seams: the biquad runs forward then
/// backward, cancelling its own group delay.
///
/// The cutoff must sit below Nyquist; at sample rates where the smoothing
/// band does not exist the chunk passes through unchanged.
fn smooth_boundaries(chunk: &[f32], sample_rate: u32) -> Vec<f32> {
    if defaults::SMOOTHING_CUTOFF_HZ * 2.0 >= sample_rate as f64 {
        return chunk.to_vec();
    }

    let (b, a) = butter2_lowpass(defaults::SMOOTHING_CUTOFF_HZ, sample_rate as f64);

    let mut forward = biquad_forward(&b, &a, chunk);
    forward.reverse();
    let mut backward = biquad_forward(&b, &a, &forward);
    backward.reverse();
    backward
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RevoiceError;
    use std::path::PathBuf;

    /// Inference double that records what it receives.
    struct MockInference {
        gain: f32,
        fail: bool,
        fail_load: bool,
        /// Extra samples appended to every result.
        extra_output: usize,
        received_lens: Vec<usize>,
        loaded: bool,
        unloaded: bool,
    }

    impl MockInference {
        fn new() -> Self {
            Self {
                gain: 1.0,
                fail: false,
                fail_load: false,
                extra_output: 0,
                received_lens: Vec::new(),
                loaded: false,
                unloaded: false,
            }
        }

        fn with_gain(mut self, gain: f32) -> Self {
            self.gain = gain;
            self
        }

        fn with_failure(mut self) -> Self {
            self.fail = true;
            self
        }

        fn with_load_failure(mut self) -> Self {
            self.fail_load = true;
            self
        }

        fn with_extra_output(mut self, extra: usize) -> Self {
            self.extra_output = extra;
            self
        }
    }

    impl ChunkInference for MockInference {
        fn load(&mut self) -> Result<()> {
            if self.fail_load {
                return Err(RevoiceError::ModelNotFound {
                    path: "missing.pth".to_string(),
                });
            }
            self.loaded = true;
            Ok(())
        }

        fn infer(&mut self, audio: &[f32], _pitch: i32, _index_rate: f32) -> Result<Vec<f32>> {
            self.received_lens.push(audio.len());
            if self.fail {
                return Err(RevoiceError::Inference {
                    message: "mock inference failure".to_string(),
                });
            }
            let mut out: Vec<f32> = audio.iter().map(|&s| s * self.gain).collect();
            out.extend(std::iter::repeat_n(0.0, self.extra_output));
            Ok(out)
        }

        fn unload(&mut self) {
            self.unloaded = true;
        }
    }

    fn test_config(chunk_size: usize) -> ConversionConfig {
        ConversionConfig {
            model_path: PathBuf::from("models/test.pth"),
            chunk_size,
            ..Default::default()
        }
    }

    #[test]
    fn test_overlap_and_fade_sizing() {
        let converter = StreamingConverter::new(test_config(4096), MockInference::new());
        assert_eq!(converter.overlap_samples, 2048);
        assert_eq!(converter.fade_samples, 1024);
    }

    #[test]
    fn test_initialize_loads_engine() {
        let mut converter = StreamingConverter::new(test_config(4096), MockInference::new());
        converter.initialize().unwrap();
        assert!(converter.engine().loaded);
    }

    #[test]
    fn test_initialize_propagates_load_failure() {
        let mut converter =
            StreamingConverter::new(test_config(4096), MockInference::new().with_load_failure());
        assert!(converter.initialize().is_err());
    }

    #[test]
    fn test_convert_before_initialize_falls_back() {
        let mut converter = StreamingConverter::new(test_config(256), MockInference::new());

        let chunk = vec![0.3; 256];
        let converted = converter.convert_chunk(&chunk, None);

        assert_eq!(converted, chunk);
        assert_eq!(converter.metrics().dropped_chunks, 1);
    }

    #[test]
    fn test_output_length_matches_input() {
        let mut converter = StreamingConverter::new(test_config(256), MockInference::new());
        converter.initialize().unwrap();

        for _ in 0..4 {
            let converted = converter.convert_chunk(&vec![0.1; 256], None);
            assert_eq!(converted.len(), 256);
        }
        assert_eq!(converter.metrics().total_chunks_processed, 4);
    }

    #[test]
    fn test_length_fit_with_oversized_engine_output() {
        let mut converter = StreamingConverter::new(
            test_config(256),
            MockInference::new().with_extra_output(100),
        );
        converter.initialize().unwrap();

        let converted = converter.convert_chunk(&vec![0.1; 256], None);
        assert_eq!(converted.len(), 256);
    }

    #[test]
    fn test_engine_output_flows_through() {
        let mut converter =
            StreamingConverter::new(test_config(1024), MockInference::new().with_gain(2.0));
        converter.initialize().unwrap();

        let converted = converter.convert_chunk(&vec![0.3; 1024], None);

        // Mid-chunk, past the filter warm-up: the doubled level survives
        // the smoothing stages.
        assert!((converted[512] - 0.6).abs() < 1e-2, "got {}", converted[512]);
    }

    #[test]
    fn test_context_prepended_on_second_chunk() {
        let mut converter = StreamingConverter::new(test_config(256), MockInference::new());
        converter.initialize().unwrap();

        let _ = converter.convert_chunk(&vec![0.1; 256], None);
        let _ = converter.convert_chunk(&vec![0.1; 256], None);

        // First call sees a bare chunk, second call the chunk plus a
        // half-chunk of overlap context.
        assert_eq!(converter.engine().received_lens, vec![256, 256 + 128]);
    }

    #[test]
    fn test_engine_failure_falls_back_to_input() {
        let mut converter =
            StreamingConverter::new(test_config(256), MockInference::new().with_failure());
        converter.initialize().unwrap();

        let chunk = vec![0.3; 256];
        let converted = converter.convert_chunk(&chunk, None);

        assert_eq!(converted, chunk);
        assert_eq!(converter.metrics().dropped_chunks, 1);
        assert_eq!(converter.metrics().total_chunks_processed, 0);
    }

    #[test]
    fn test_cleanup_drops_state_and_unloads() {
        let mut converter = StreamingConverter::new(test_config(256), MockInference::new());
        converter.initialize().unwrap();
        let _ = converter.convert_chunk(&vec![0.1; 256], None);

        converter.cleanup();

        assert!(converter.engine().unloaded);
        assert!(converter.context.is_none());
        assert!(converter.previous_output.is_none());
        assert!(converter.previous_rms.is_none());
    }

    #[test]
    fn test_latency_estimate_model() {
        let converter = StreamingConverter::new(test_config(4096), MockInference::new());

        let chunk_ms = 4096.0 / 48_000.0 * 1000.0;
        let expected = chunk_ms + INFERENCE_ESTIMATE_MS + SMOOTHING_OVERHEAD_MS;
        assert!((converter.latency_estimate_ms() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_peak_normalize_attenuates_hot_chunks() {
        let chunk = vec![2.0, -2.0, 1.0];
        let normalized = peak_normalize(&chunk);

        let peak = normalized.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
        assert!((peak - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_peak_normalize_leaves_quiet_chunks_alone() {
        let chunk = vec![0.4, -0.2, 0.1];
        assert_eq!(peak_normalize(&chunk), chunk);
    }

    #[test]
    fn test_peak_normalize_silence_is_noop() {
        let chunk = vec![0.0; 16];
        assert_eq!(peak_normalize(&chunk), chunk);
    }

    #[test]
    fn test_rms_of_constant_signal() {
        assert!((rms(&vec![0.5; 100]) - 0.5).abs() < 1e-6);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn test_rms_blend_gain_midpoint() {
        // Halfway blend: target (0.25) over current (0.4).
        let gain = rms_blend_gain(0.1, 0.4);
        assert!((gain - 0.625).abs() < 1e-6);
        assert!(gain <= defaults::RMS_GAIN_MAX);
    }

    #[test]
    fn test_rms_blend_gain_clamped_upward() {
        // Raw ratio would be 10.25x; the clamp caps the step at 2x.
        let gain = rms_blend_gain(0.4, 0.02);
        assert_eq!(gain, defaults::RMS_GAIN_MAX);
    }

    #[test]
    fn test_rms_blend_gain_clamped_downward() {
        let gain = rms_blend_gain(0.001, 0.9);
        assert_eq!(gain, defaults::RMS_GAIN_MIN);
    }

    #[test]
    fn test_silent_chunk_skips_rms_tracking() {
        let mut converter = StreamingConverter::new(test_config(256), MockInference::new());
        converter.initialize().unwrap();

        let _ = converter.convert_chunk(&vec![0.0; 256], None);
        assert!(converter.previous_rms.is_none());

        let _ = converter.convert_chunk(&vec![0.5; 256], None);
        assert!(converter.previous_rms.is_some());
    }

    #[test]
    fn test_hann_window_shape() {
        let window = hann_window(8);
        assert_eq!(window.len(), 8);
        assert!(window[0].abs() < 1e-6);
        assert!(window[7].abs() < 1e-6);
        // Symmetric around the center.
        assert!((window[1] - window[6]).abs() < 1e-6);
        assert!((window[3] - window[4]).abs() < 1e-6);
    }

    #[test]
    fn test_hann_crossfade_blends_head() {
        let previous = vec![1.0; 16];
        let mut current = vec![0.0; 16];
        apply_hann_crossfade(&previous, &mut current, 4);

        let window = hann_window(8);
        for i in 0..4 {
            // Current head is zero, so the blend is the window applied to
            // the previous tail.
            assert!((current[i] - window[i]).abs() < 1e-6);
        }
        // Past the fade window the chunk is untouched.
        assert_eq!(current[4], 0.0);
    }

    #[test]
    fn test_hann_crossfade_short_chunks() {
        let previous = vec![1.0; 2];
        let mut current = vec![0.5; 2];
        // Fade window longer than the chunks shrinks to fit.
        apply_hann_crossfade(&previous, &mut current, 64);
        assert_eq!(current.len(), 2);
    }

    #[test]
    fn test_lowpass_preserves_dc() {
        // A constant signal sits far below the cutoff; away from the edge
        // transient it passes unchanged.
        let chunk = vec![0.5; 2048];
        let smoothed = smooth_boundaries(&chunk, 48_000);

        for &sample in &smoothed[512..1536] {
            assert!((sample - 0.5).abs() < 1e-3, "got {}", sample);
        }
    }

    #[test]
    fn test_lowpass_attenuates_nyquist() {
        // Alternating samples at 24kHz, far above the 8kHz cutoff.
        let chunk: Vec<f32> = (0..2048).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let smoothed = smooth_boundaries(&chunk, 48_000);

        let mid_rms = rms(&smoothed[512..1536]);
        assert!(mid_rms < 0.05, "nyquist energy not attenuated: {}", mid_rms);
    }

    #[test]
    fn test_lowpass_skipped_when_band_absent() {
        // At 16kHz the 8kHz cutoff is Nyquist itself; the chunk passes
        // through unchanged.
        let chunk: Vec<f32> = (0..256).map(|i| (i as f32 * 0.01).sin()).collect();
        assert_eq!(smooth_boundaries(&chunk, 16_000), chunk);
    }

    #[test]
    fn test_rms_step_is_bounded_between_chunks() {
        let mut converter = StreamingConverter::new(test_config(1024), MockInference::new());
        converter.initialize().unwrap();

        // Loud chunk, then a much quieter one.
        let _ = converter.convert_chunk(&vec![0.8; 1024], None);
        let quiet_before = rms(&vec![0.02f32; 1024]);
        let converted = converter.convert_chunk(&vec![0.02; 1024], None);

        // Continuity scaling raised the quiet chunk, but by at most 2x.
        let quiet_after = rms(&converted[512..]);
        assert!(quiet_after > quiet_before);
        assert!(quiet_after <= quiet_before * defaults::RMS_GAIN_MAX * 1.01);
    }
}
