//! Streaming pipeline orchestration.
//!
//! Connects capture → buffering → conversion → playback. Capture and
//! playback threads call [`process_input`](StreamingPipeline::process_input)
//! and [`get_output`](StreamingPipeline::get_output); one dedicated
//! conversion thread drains the input ring through the backend and fills
//! the output queue.

use crate::defaults;
use crate::error::{Result, RevoiceError};
use crate::streaming::backend::{ConversionBackend, ConversionMetrics};
use crate::streaming::buffer::{BufferConfig, BufferHealth, BufferManager};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Metrics snapshot handed to the optional callback.
///
/// Delivered from the conversion thread at most every 500ms; the callback
/// must not block for long or it will stall conversion throughput.
#[derive(Debug, Clone)]
pub struct MetricsUpdate {
    /// Wall time spent converting the most recent chunk.
    pub processing_time_ms: f64,
    /// Backend latency estimate for the session.
    pub total_latency_ms: f64,
    /// Chunks converted so far.
    pub chunks_processed: u64,
    /// Chunks that fell back to unconverted audio.
    pub dropped_chunks: u64,
    /// Buffer state at the time of the update.
    pub buffer_health: BufferHealth,
}

/// Full pipeline metrics snapshot.
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    /// Seconds since `start()`.
    pub uptime_seconds: f64,
    /// Most recent backend latency estimate.
    pub total_latency_ms: f64,
    /// Backend counters.
    pub backend: ConversionMetrics,
    /// Buffer state.
    pub buffer: BufferHealth,
}

/// Callback type for periodic metrics updates.
pub type MetricsCallback = dyn Fn(&MetricsUpdate) + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Locks a mutex, recovering the data if a panicking thread poisoned it.
/// Audio state stays usable; a poisoned lock here only means a conversion
/// callback panicked mid-chunk.
fn lock_or_recover<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Real-time voice conversion pipeline.
///
/// Owns a [`BufferManager`] and a [`ConversionBackend`] and runs one
/// dedicated conversion thread between them. `process_input` and
/// `get_output` are safe to call from the capture and playback threads and
/// never block on conversion progress.
pub struct StreamingPipeline {
    backend: Arc<Mutex<Box<dyn ConversionBackend>>>,
    buffer: Arc<Mutex<BufferManager>>,
    on_metrics: Option<Arc<MetricsCallback>>,
    running: Arc<AtomicBool>,
    state: PipelineState,
    conversion_thread: Option<JoinHandle<()>>,
    start_time: Option<Instant>,
    total_latency_ms: Arc<Mutex<f64>>,
}

impl StreamingPipeline {
    /// Creates a pipeline around the given backend and buffer configuration.
    pub fn new(backend: Box<dyn ConversionBackend>, buffer_config: BufferConfig) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
            buffer: Arc::new(Mutex::new(BufferManager::new(buffer_config))),
            on_metrics: None,
            running: Arc::new(AtomicBool::new(false)),
            state: PipelineState::Stopped,
            conversion_thread: None,
            start_time: None,
            total_latency_ms: Arc::new(Mutex::new(0.0)),
        }
    }

    /// Registers a callback invoked from the conversion thread at most
    /// every 500ms.
    pub fn with_metrics_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&MetricsUpdate) + Send + Sync + 'static,
    {
        self.on_metrics = Some(Arc::new(callback));
        self
    }

    /// Initializes the backend and starts the conversion thread.
    ///
    /// # Errors
    /// Backend initialization failures abort the start; the pipeline
    /// returns to the stopped state and `start()` may be retried.
    pub fn start(&mut self) -> Result<()> {
        if self.state != PipelineState::Stopped {
            return Err(RevoiceError::Pipeline {
                message: "pipeline is already running".to_string(),
            });
        }
        self.state = PipelineState::Starting;
        tracing::info!("starting streaming pipeline");

        if let Err(e) = lock_or_recover(&self.backend).initialize() {
            self.state = PipelineState::Stopped;
            return Err(e);
        }

        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let buffer = self.buffer.clone();
        let backend = self.backend.clone();
        let total_latency_ms = self.total_latency_ms.clone();
        let on_metrics = self.on_metrics.clone();

        let handle = match thread::Builder::new()
            .name("revoice-conversion".to_string())
            .spawn(move || {
                conversion_loop(&running, &buffer, &backend, &total_latency_ms, on_metrics);
            }) {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                lock_or_recover(&self.backend).cleanup();
                self.state = PipelineState::Stopped;
                return Err(RevoiceError::Pipeline {
                    message: format!("failed to spawn conversion thread: {}", e),
                });
            }
        };

        self.conversion_thread = Some(handle);
        self.start_time = Some(Instant::now());
        self.state = PipelineState::Running;

        tracing::info!("streaming pipeline started");
        Ok(())
    }

    /// Stops the conversion thread and releases backend resources.
    ///
    /// Cooperative: the running flag is cleared and the thread joined with
    /// a bounded timeout. A thread that misses the deadline is detached
    /// with a warning, never killed.
    pub fn stop(&mut self) {
        if self.state == PipelineState::Stopped {
            return;
        }
        self.state = PipelineState::Stopping;
        tracing::info!("stopping streaming pipeline");

        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.conversion_thread.take()
            && !join_with_timeout(handle, Duration::from_millis(defaults::STOP_JOIN_TIMEOUT_MS))
        {
            tracing::warn!("conversion thread did not stop gracefully");
        }

        lock_or_recover(&self.backend).cleanup();
        lock_or_recover(&self.buffer).clear();
        self.start_time = None;
        self.state = PipelineState::Stopped;

        tracing::info!("streaming pipeline stopped");
    }

    /// Called by the audio capture thread to feed captured samples in.
    /// Never blocks on conversion; overflow discards the oldest audio.
    pub fn process_input(&self, samples: &[f32]) {
        lock_or_recover(&self.buffer).write_input(samples);
    }

    /// Called by the audio playback thread to pull converted audio.
    /// Returns `None` when nothing is ready; the caller plays silence.
    pub fn get_output(&self, size: usize) -> Option<Vec<f32>> {
        lock_or_recover(&self.buffer).read_output(size)
    }

    /// True while the conversion thread is alive and running.
    pub fn is_running(&self) -> bool {
        self.state == PipelineState::Running
            && self
                .conversion_thread
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    /// Returns a snapshot of pipeline, backend, and buffer metrics.
    pub fn metrics(&self) -> PipelineMetrics {
        PipelineMetrics {
            uptime_seconds: self
                .start_time
                .map_or(0.0, |started| started.elapsed().as_secs_f64()),
            total_latency_ms: *lock_or_recover(&self.total_latency_ms),
            backend: lock_or_recover(&self.backend).metrics().clone(),
            buffer: lock_or_recover(&self.buffer).buffer_health(),
        }
    }
}

impl Drop for StreamingPipeline {
    fn drop(&mut self) {
        if self.state != PipelineState::Stopped {
            self.stop();
        }
    }
}

/// Conversion thread main loop.
///
/// Single cooperative consumer of the shared buffer: polls for a ready
/// chunk, sleeps briefly when there is none, and never holds the buffer
/// lock across a backend call.
fn conversion_loop(
    running: &AtomicBool,
    buffer: &Mutex<BufferManager>,
    backend: &Mutex<Box<dyn ConversionBackend>>,
    total_latency_ms: &Mutex<f64>,
    on_metrics: Option<Arc<MetricsCallback>>,
) {
    tracing::debug!("conversion loop started");

    let poll_interval = Duration::from_millis(defaults::CONVERSION_POLL_MS);
    let metrics_interval = Duration::from_millis(defaults::METRICS_INTERVAL_MS);
    let mut last_metrics_update: Option<Instant> = None;

    while running.load(Ordering::SeqCst) {
        if !lock_or_recover(buffer).has_chunk_ready() {
            thread::sleep(poll_interval);
            continue;
        }

        let (chunk, context) = lock_or_recover(buffer).read_chunk_for_processing();

        let start = Instant::now();
        let (converted, chunks_processed, dropped_chunks, latency_estimate) = {
            // The backend is not assumed reentrant; one mutex serializes
            // every caller, present and future.
            let mut backend = lock_or_recover(backend);
            let converted = backend.convert_chunk(&chunk, context.as_deref());
            let metrics = backend.metrics();
            (
                converted,
                metrics.total_chunks_processed,
                metrics.dropped_chunks,
                backend.latency_estimate_ms(),
            )
        };
        let processing_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        lock_or_recover(buffer).write_output(converted);
        *lock_or_recover(total_latency_ms) = latency_estimate;

        if let Some(callback) = &on_metrics {
            let due = last_metrics_update
                .is_none_or(|last| last.elapsed() >= metrics_interval);
            if due {
                let update = MetricsUpdate {
                    processing_time_ms,
                    total_latency_ms: latency_estimate,
                    chunks_processed,
                    dropped_chunks,
                    buffer_health: lock_or_recover(buffer).buffer_health(),
                };
                callback(&update);
                last_metrics_update = Some(Instant::now());
            }
        }
    }

    tracing::debug!("conversion loop stopped");
}

/// Joins a thread, giving up after `timeout`. Returns false when the
/// deadline passes; the handle is dropped and the thread detached.
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
    handle.join().is_ok()
}
