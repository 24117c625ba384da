//! Batch conversion backend.
//!
//! Robust fallback that round-trips every chunk through transient WAV
//! files and an external file-based converter. Latency is several times
//! real time, but the path reuses a conversion engine that only speaks
//! files.

use crate::defaults;
use crate::error::{Result, RevoiceError};
use crate::streaming::backend::{ConversionBackend, ConversionConfig, ConversionMetrics};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::TempDir;

/// Trait for the external file-based conversion call.
///
/// The engine behind it is out of scope here; the backend owns creation
/// and deletion of the files on both sides of the call.
pub trait FileConverter: Send {
    /// Load the voice model. Called once before streaming starts.
    fn load(&mut self) -> Result<()>;

    /// Convert `input` into `output`, both WAV paths owned by the caller.
    fn convert(
        &mut self,
        input: &Path,
        output: &Path,
        pitch_shift: i32,
        index_rate: f32,
    ) -> Result<()>;

    /// Release model resources. Called once when streaming stops.
    fn unload(&mut self) {}
}

/// Fallback backend converting chunks through temporary WAV files.
///
/// Strategy per chunk: write the chunk to a transient WAV, invoke the
/// file converter, read the result back, and fit it to the input length.
/// Temp files carry a monotonically increasing id and are removed on
/// every exit path.
pub struct BatchConverter<C: FileConverter> {
    config: ConversionConfig,
    converter: C,
    temp_dir: Option<TempDir>,
    next_chunk_id: u64,
    metrics: ConversionMetrics,
}

impl<C: FileConverter> BatchConverter<C> {
    /// Creates a batch converter around the given file conversion call.
    pub fn new(config: ConversionConfig, converter: C) -> Self {
        Self {
            config,
            converter,
            temp_dir: None,
            next_chunk_id: 0,
            metrics: ConversionMetrics::default(),
        }
    }

    /// Returns the backend configuration.
    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: 1,
            sample_rate: self.config.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        }
    }

    fn write_chunk_wav(&self, path: &Path, chunk: &[f32]) -> Result<()> {
        let mut writer =
            hound::WavWriter::create(path, self.wav_spec()).map_err(|e| {
                RevoiceError::AudioFile {
                    message: format!("failed to create {}: {}", path.display(), e),
                }
            })?;
        for &sample in chunk {
            writer
                .write_sample(sample)
                .map_err(|e| RevoiceError::AudioFile {
                    message: format!("failed to write {}: {}", path.display(), e),
                })?;
        }
        writer.finalize().map_err(|e| RevoiceError::AudioFile {
            message: format!("failed to finalize {}: {}", path.display(), e),
        })
    }

    fn read_chunk_wav(&self, path: &Path) -> Result<Vec<f32>> {
        let mut reader = hound::WavReader::open(path).map_err(|e| RevoiceError::AudioFile {
            message: format!("failed to open {}: {}", path.display(), e),
        })?;

        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| RevoiceError::AudioFile {
                    message: format!("failed to read {}: {}", path.display(), e),
                })?,
            hound::SampleFormat::Int => reader
                .samples::<i16>()
                .map(|s| s.map(|v| v as f32 / 32_768.0))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| RevoiceError::AudioFile {
                    message: format!("failed to read {}: {}", path.display(), e),
                })?,
        };

        Ok(samples)
    }

    /// One full round-trip: chunk → temp WAV → converter → samples back.
    fn convert_via_files(
        &mut self,
        chunk: &[f32],
        input_path: &Path,
        output_path: &Path,
    ) -> Result<Vec<f32>> {
        self.write_chunk_wav(input_path, chunk)?;
        self.converter.convert(
            input_path,
            output_path,
            self.config.pitch_shift,
            self.config.index_rate,
        )?;
        self.read_chunk_wav(output_path)
    }

    fn temp_paths(&self, chunk_id: u64) -> Option<(PathBuf, PathBuf)> {
        let dir = self.temp_dir.as_ref()?.path();
        Some((
            dir.join(format!("chunk_{:06}_in.wav", chunk_id)),
            dir.join(format!("chunk_{:06}_out.wav", chunk_id)),
        ))
    }
}

impl<C: FileConverter> ConversionBackend for BatchConverter<C> {
    fn initialize(&mut self) -> Result<()> {
        tracing::info!(
            model = %self.config.model_path.display(),
            chunk_size = self.config.chunk_size,
            chunk_ms = self.config.chunk_duration_ms(),
            "initializing batch converter"
        );

        let temp_dir = tempfile::Builder::new()
            .prefix("revoice-stream-")
            .tempdir()
            .map_err(|e| RevoiceError::BackendInit {
                message: format!("failed to create temp directory: {}", e),
            })?;

        // Temp dir is removed again by Drop if the model fails to load.
        self.converter.load()?;
        self.temp_dir = Some(temp_dir);
        Ok(())
    }

    fn convert_chunk(&mut self, chunk: &[f32], _context: Option<&[f32]>) -> Vec<f32> {
        let chunk_id = self.next_chunk_id;
        self.next_chunk_id += 1;

        let Some((input_path, output_path)) = self.temp_paths(chunk_id) else {
            tracing::error!(chunk = chunk_id, "batch converter used before initialize()");
            self.metrics.dropped_chunks += 1;
            return chunk.to_vec();
        };

        let start = Instant::now();
        let result = self.convert_via_files(chunk, &input_path, &output_path);

        // Transient files go away on success and failure alike.
        for path in [&input_path, &output_path] {
            if path.exists()
                && let Err(e) = fs::remove_file(path)
            {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove temp file");
            }
        }

        match result {
            Ok(mut converted) => {
                // Fit to input length: trim the excess or zero-pad the gap.
                converted.resize(chunk.len(), 0.0);

                let processing_time_ms = start.elapsed().as_secs_f64() * 1000.0;
                self.metrics.processing_time_ms = processing_time_ms;
                self.metrics.chunk_latency_ms = processing_time_ms;
                self.metrics.total_chunks_processed += 1;

                tracing::debug!(
                    chunk = chunk_id,
                    ms = processing_time_ms,
                    "chunk converted via file round-trip"
                );
                converted
            }
            Err(e) => {
                tracing::error!(chunk = chunk_id, error = %e, "chunk conversion failed");
                self.metrics.dropped_chunks += 1;
                chunk.to_vec()
            }
        }
    }

    fn cleanup(&mut self) {
        if let Some(temp_dir) = self.temp_dir.take()
            && let Err(e) = temp_dir.close()
        {
            tracing::warn!(error = %e, "failed to remove temp directory");
        }

        self.converter.unload();
        tracing::info!(
            processed = self.metrics.total_chunks_processed,
            dropped = self.metrics.dropped_chunks,
            "batch converter cleaned up"
        );
    }

    fn metrics(&self) -> &ConversionMetrics {
        &self.metrics
    }

    /// Latency model absent a measurement: chunk duration, file I/O
    /// overhead, processing at several times real time, and one chunk of
    /// buffering — roughly 6x real time. Operator-facing only.
    fn latency_estimate_ms(&self) -> f64 {
        if self.metrics.chunk_latency_ms > 0.0 {
            return self.metrics.chunk_latency_ms;
        }

        let chunk_duration_ms = self.config.chunk_duration_ms();
        chunk_duration_ms
            + defaults::BATCH_FILE_IO_MS
            + chunk_duration_ms * defaults::BATCH_PROCESSING_FACTOR
            + chunk_duration_ms
    }
}
