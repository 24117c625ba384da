//! End-to-end scenarios for the streaming pipeline.
//!
//! Everything here goes through the public API with mock backends; the
//! real inference engines live behind the `ChunkInference`/`FileConverter`
//! traits and are exercised elsewhere.

use revoice::streaming::backend::MockBackend;
use revoice::streaming::buffer::{BufferConfig, BufferManager};
use revoice::streaming::converter::{ChunkInference, StreamingConverter};
use revoice::streaming::pipeline::StreamingPipeline;
use revoice::{ConversionConfig, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn wait_for<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn buffer_config(chunk_size: usize) -> BufferConfig {
    BufferConfig {
        chunk_size,
        ..Default::default()
    }
}

#[test]
fn chunk_ready_cycle_with_two_chunks_of_input() {
    let mut buffer = BufferManager::new(buffer_config(1024));
    buffer.write_input(&vec![0.0; 2048]);

    assert!(buffer.has_chunk_ready());
    let _ = buffer.read_chunk_for_processing();
    assert!(buffer.has_chunk_ready());
    let _ = buffer.read_chunk_for_processing();
    assert!(!buffer.has_chunk_ready());
}

#[test]
fn echo_pipeline_round_trip() {
    let mut pipeline =
        StreamingPipeline::new(Box::new(MockBackend::new()), buffer_config(1024));
    pipeline.start().unwrap();

    pipeline.process_input(&vec![0.0; 4096]);

    assert!(wait_for(
        || pipeline.metrics().backend.total_chunks_processed >= 4,
        Duration::from_secs(2)
    ));

    // Zeros in, zeros out (crossfade edge effects blend zero with zero).
    for _ in 0..4 {
        let output = pipeline.get_output(1024).unwrap();
        assert_eq!(output.len(), 1024);
        assert!(output.iter().all(|&s| s == 0.0));
    }
    assert!(pipeline.get_output(1024).is_none());

    pipeline.stop();
}

#[test]
fn pipeline_survives_first_chunk_failure() {
    let backend = MockBackend::new().with_failure_on_chunks(&[0]);
    let mut pipeline = StreamingPipeline::new(Box::new(backend), buffer_config(1024));
    pipeline.start().unwrap();

    pipeline.process_input(&vec![0.5; 3072]);

    assert!(wait_for(
        || pipeline.metrics().backend.total_chunks_processed >= 2,
        Duration::from_secs(2)
    ));

    let metrics = pipeline.metrics();
    assert_eq!(metrics.backend.dropped_chunks, 1);
    assert!(pipeline.is_running());

    pipeline.stop();
}

#[test]
fn stop_while_conversion_thread_is_idle() {
    let mut pipeline =
        StreamingPipeline::new(Box::new(MockBackend::new()), buffer_config(1024));
    pipeline.start().unwrap();

    // Nothing queued; the thread is sleeping between polls.
    thread::sleep(Duration::from_millis(50));

    let begin = Instant::now();
    pipeline.stop();

    assert!(begin.elapsed() < Duration::from_secs(2));
    assert!(!pipeline.is_running());
}

#[test]
fn concurrent_capture_and_playback() {
    let mut pipeline =
        StreamingPipeline::new(Box::new(MockBackend::new()), buffer_config(512));
    pipeline.start().unwrap();
    let pipeline = Arc::new(pipeline);

    let capture = {
        let pipeline = pipeline.clone();
        thread::spawn(move || {
            for _ in 0..50 {
                pipeline.process_input(&vec![0.1; 512]);
                thread::sleep(Duration::from_millis(2));
            }
        })
    };

    let received = Arc::new(AtomicU64::new(0));
    let playback = {
        let pipeline = pipeline.clone();
        let received = received.clone();
        thread::spawn(move || {
            for _ in 0..100 {
                if let Some(chunk) = pipeline.get_output(512) {
                    assert!(chunk.len() <= 512);
                    received.fetch_add(1, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_millis(1));
            }
        })
    };

    capture.join().unwrap();
    playback.join().unwrap();

    assert!(received.load(Ordering::SeqCst) > 0);
    assert!(pipeline.metrics().backend.total_chunks_processed > 0);
}

/// Inference double that shifts everything toward a constant, making
/// converted chunks distinguishable from raw input.
struct ConstantVoice(f32);

impl ChunkInference for ConstantVoice {
    fn load(&mut self) -> Result<()> {
        Ok(())
    }

    fn infer(&mut self, audio: &[f32], _pitch: i32, _index_rate: f32) -> Result<Vec<f32>> {
        Ok(vec![self.0; audio.len()])
    }
}

#[test]
fn streaming_converter_inside_pipeline() {
    let config = ConversionConfig {
        chunk_size: 1024,
        ..Default::default()
    };
    let converter = StreamingConverter::new(config, ConstantVoice(0.5));

    let mut pipeline = StreamingPipeline::new(Box::new(converter), buffer_config(1024));
    pipeline.start().unwrap();

    pipeline.process_input(&vec![0.2; 4096]);

    assert!(wait_for(
        || pipeline.metrics().backend.total_chunks_processed >= 4,
        Duration::from_secs(2)
    ));

    // Converted output reflects the engine, not the input. Skip the first
    // chunk (filter and crossfade warm-up) and sample mid-chunk.
    let _ = pipeline.get_output(1024).unwrap();
    let chunk = pipeline.get_output(1024).unwrap();
    let mid = chunk[512];
    assert!(mid > 0.2, "expected converted level, got {}", mid);

    pipeline.stop();
}

#[test]
fn metrics_update_cadence_is_bounded() {
    let updates = Arc::new(AtomicU64::new(0));
    let counter = updates.clone();

    let mut pipeline = StreamingPipeline::new(
        Box::new(MockBackend::new()),
        buffer_config(256),
    )
    .with_metrics_callback(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    pipeline.start().unwrap();

    // Feed steadily for ~600ms. At a 500ms minimum interval that allows
    // at most two callback invocations however fast conversion runs.
    let begin = Instant::now();
    while begin.elapsed() < Duration::from_millis(600) {
        pipeline.process_input(&vec![0.1; 256]);
        thread::sleep(Duration::from_millis(10));
    }

    pipeline.stop();

    let count = updates.load(Ordering::SeqCst);
    assert!(count >= 1, "callback never invoked");
    assert!(count <= 2, "callback invoked too often: {}", count);
}
