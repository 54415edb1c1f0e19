//! Microphone capture for the streaming client.
//!
//! The cpal input stream is not `Send`, so it lives on a dedicated capture
//! thread for its whole life. The audio callback folds samples into
//! fixed-size blocks, encodes them as 16-bit PCM and pushes them onto a
//! bounded queue; the async side drains that queue onto the WebSocket.
//!
//! The device must deliver 16kHz mono f32 directly. There is no
//! resampling, so an unsupported device fails at startup with a clear
//! error instead of streaming audio the server would misread.

use crate::audio::processor::float_to_pcm;
use crate::constants::{CAPTURE_BLOCK_SAMPLES, CHANNELS, SAMPLE_RATE};
use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Queue capacity in blocks; at 1024 samples per block this is about
/// four seconds of backlog before new blocks are dropped.
pub const CAPTURE_QUEUE_BLOCKS: usize = 64;

/// How long to wait for the capture thread to report a running stream.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Gathers callback samples into fixed-size PCM blocks.
struct BlockAccumulator {
    pending: Vec<f32>,
    block_samples: usize,
}

impl BlockAccumulator {
    fn new(block_samples: usize) -> Self {
        Self {
            pending: Vec::with_capacity(block_samples * 2),
            block_samples,
        }
    }

    /// Absorb a callback buffer, returning every block it completes.
    fn push(&mut self, samples: &[f32]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(samples);

        let mut blocks = Vec::new();
        while self.pending.len() >= self.block_samples {
            let rest = self.pending.split_off(self.block_samples);
            let block = std::mem::replace(&mut self.pending, rest);
            blocks.push(float_to_pcm(&block));
        }
        blocks
    }
}

/// Running capture session; dropping it stops the thread.
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    blocks_sent: Arc<AtomicU64>,
    blocks_dropped: Arc<AtomicU64>,
}

impl CaptureHandle {
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn blocks_sent(&self) -> u64 {
        self.blocks_sent.load(Ordering::Relaxed)
    }

    /// Blocks discarded because the send queue was full.
    pub fn blocks_dropped(&self) -> u64 {
        self.blocks_dropped.load(Ordering::Relaxed)
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open the default input device and start streaming PCM blocks.
///
/// Returns once the stream is actually playing, or with the reason it
/// could not start. The receiver yields encoded 16-bit PCM blocks in
/// capture order.
pub fn start_capture() -> Result<(CaptureHandle, mpsc::Receiver<Vec<u8>>)> {
    let (block_tx, block_rx) = mpsc::channel::<Vec<u8>>(CAPTURE_QUEUE_BLOCKS);
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<String, String>>();

    let running = Arc::new(AtomicBool::new(true));
    let blocks_sent = Arc::new(AtomicU64::new(0));
    let blocks_dropped = Arc::new(AtomicU64::new(0));

    let thread_running = running.clone();
    let thread_sent = blocks_sent.clone();
    let thread_dropped = blocks_dropped.clone();

    let thread_handle = thread::Builder::new()
        .name("mic-capture".to_string())
        .spawn(move || {
            capture_thread(
                thread_running,
                thread_sent,
                thread_dropped,
                block_tx,
                ready_tx,
            );
        })
        .map_err(|e| anyhow!("Failed to spawn capture thread: {}", e))?;

    let mut handle = CaptureHandle {
        running,
        thread_handle: Some(thread_handle),
        blocks_sent,
        blocks_dropped,
    };

    match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
        Ok(Ok(device_name)) => {
            info!(
                "Capturing from '{}' at {}Hz mono",
                device_name, SAMPLE_RATE
            );
            Ok((handle, block_rx))
        }
        Ok(Err(reason)) => {
            handle.stop();
            Err(anyhow!("Capture failed to start: {}", reason))
        }
        Err(_) => {
            handle.stop();
            Err(anyhow!("Capture thread did not report within {:?}", STARTUP_TIMEOUT))
        }
    }
}

/// Offer one encoded block to the queue, updating the counters.
///
/// When the queue is full the block is discarded and counted; the audio
/// callback must never wait. Returns false once the receiver is gone.
fn dispatch_block(
    block_tx: &mpsc::Sender<Vec<u8>>,
    block: Vec<u8>,
    blocks_sent: &AtomicU64,
    blocks_dropped: &AtomicU64,
) -> bool {
    match block_tx.try_send(block) {
        Ok(()) => {
            blocks_sent.fetch_add(1, Ordering::Relaxed);
            true
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            // Newest block loses; counted and reported at exit.
            blocks_dropped.fetch_add(1, Ordering::Relaxed);
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

fn capture_thread(
    running: Arc<AtomicBool>,
    blocks_sent: Arc<AtomicU64>,
    blocks_dropped: Arc<AtomicU64>,
    block_tx: mpsc::Sender<Vec<u8>>,
    ready_tx: std::sync::mpsc::Sender<Result<String, String>>,
) {
    let host = cpal::default_host();
    let device = match host.default_input_device() {
        Some(device) => device,
        None => {
            let _ = ready_tx.send(Err("No default input device".to_string()));
            return;
        }
    };
    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

    let config = cpal::StreamConfig {
        channels: CHANNELS,
        sample_rate: cpal::SampleRate(SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let callback_running = running.clone();
    let mut accumulator = BlockAccumulator::new(CAPTURE_BLOCK_SAMPLES);

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if !callback_running.load(Ordering::Relaxed) {
                return;
            }
            for block in accumulator.push(data) {
                if !dispatch_block(&block_tx, block, &blocks_sent, &blocks_dropped) {
                    callback_running.store(false, Ordering::Relaxed);
                    break;
                }
            }
        },
        |err| {
            warn!("Capture stream error: {}", err);
        },
        None,
    );

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(format!(
                "Device '{}' cannot stream {}Hz mono f32: {}",
                device_name, SAMPLE_RATE, e
            )));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(format!("Failed to start stream: {}", e)));
        return;
    }

    let _ = ready_tx.send(Ok(device_name));

    // The stream is dropped when this loop ends, which stops capture.
    while running.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(10));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_emits_complete_blocks_only() {
        let mut acc = BlockAccumulator::new(256);

        assert!(acc.push(&[0.0; 100]).is_empty());
        assert!(acc.push(&[0.0; 100]).is_empty());

        // 300 total pending after this push: one block out, 44 left over.
        let blocks = acc.push(&[0.0; 100]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].len(), 512);
        assert_eq!(acc.pending.len(), 44);
    }

    #[test]
    fn accumulator_splits_large_buffers() {
        let mut acc = BlockAccumulator::new(256);
        let blocks = acc.push(&[0.5; 1000]);
        assert_eq!(blocks.len(), 3);
        assert_eq!(acc.pending.len(), 232);
    }

    #[test]
    fn blocks_preserve_sample_order() {
        let mut acc = BlockAccumulator::new(4);
        let samples: Vec<f32> = vec![0.0, 0.25, 0.5, 0.75, -0.25];
        let blocks = acc.push(&samples);

        assert_eq!(blocks.len(), 1);
        let decoded = crate::audio::processor::pcm_to_float(&blocks[0]).unwrap();
        for (got, want) in decoded.iter().zip(&samples[..4]) {
            assert!((got - want).abs() < 1e-3);
        }
        assert_eq!(acc.pending, vec![-0.25]);
    }

    #[test]
    fn overflow_drops_newest_and_counts() {
        let (tx, mut rx) = mpsc::channel(2);
        let sent = AtomicU64::new(0);
        let dropped = AtomicU64::new(0);

        for value in 0u8..4 {
            assert!(dispatch_block(&tx, vec![value], &sent, &dropped));
        }
        assert_eq!(sent.load(Ordering::Relaxed), 2);
        assert_eq!(dropped.load(Ordering::Relaxed), 2);

        // The queue kept the oldest blocks.
        assert_eq!(rx.try_recv().unwrap(), vec![0]);
        assert_eq!(rx.try_recv().unwrap(), vec![1]);

        drop(rx);
        assert!(!dispatch_block(&tx, vec![9], &sent, &dropped));
    }
}
