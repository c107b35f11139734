// Capture pipeline: microphone windows -> fixed-size frames -> wire frames
//
// The device pushes windows at its own cadence. The pipeline re-frames them
// into fixed windows, encodes each one and hands it to the session's
// outbound queue. While the session is not open, frames are dropped rather
// than queued so capture time never drifts from session time. The same
// holds when the outbound queue is full.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::codec::{self, WireFrame};
use super::device::AudioInput;
use crate::error::{LiveError, LiveResult};
use crate::live::SessionGate;

/// Configuration for microphone capture
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Input sample rate in Hz
    pub sample_rate: u32,
    /// Number of input channels (1 = mono)
    pub channels: u16,
    /// Framing window in sample frames
    pub window_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            window_size: 4096,
        }
    }
}

/// Splits an arbitrary stream of interleaved samples into fixed windows
#[derive(Debug)]
pub struct Framer {
    window_len: usize,
    pending: Vec<f32>,
}

impl Framer {
    pub fn new(window_size: usize, channels: u16) -> Self {
        let window_len = window_size.max(1) * channels.max(1) as usize;
        Self {
            window_len,
            pending: Vec::with_capacity(window_len),
        }
    }

    /// Append samples and return every window that is now complete
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let complete = self.pending.len() / self.window_len;
        if complete == 0 {
            return Vec::new();
        }

        let rest = self.pending.split_off(complete * self.window_len);
        let full = std::mem::replace(&mut self.pending, rest);
        full.chunks_exact(self.window_len).map(<[f32]>::to_vec).collect()
    }

    /// Samples waiting for the next window
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Counters shared with the capture task
#[derive(Debug, Default)]
pub struct CaptureCounters {
    pub frames_sent: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub frames_malformed: AtomicU64,
}

/// Owns the microphone stream and the framing task
pub struct CapturePipeline {
    config: CaptureConfig,
    input: Box<dyn AudioInput>,
    task: Option<JoinHandle<()>>,
    counters: Arc<CaptureCounters>,
    device_closed: bool,
}

impl CapturePipeline {
    /// Open the input device and start streaming frames into `outbound`
    ///
    /// Any failure to open the device is reported as `CaptureUnavailable`.
    pub async fn start(
        mut input: Box<dyn AudioInput>,
        config: CaptureConfig,
        gate: SessionGate,
        outbound: mpsc::Sender<WireFrame>,
    ) -> LiveResult<Self> {
        info!(
            "Starting capture on {} ({}Hz, {} channels, {} sample window)",
            input.name(),
            config.sample_rate,
            config.channels,
            config.window_size
        );

        let windows = match input.open(config.sample_rate, config.channels).await {
            Ok(rx) => rx,
            Err(LiveError::CaptureUnavailable(reason)) => {
                return Err(LiveError::CaptureUnavailable(reason))
            }
            Err(e) => return Err(LiveError::CaptureUnavailable(e.to_string())),
        };

        let counters = Arc::new(CaptureCounters::default());
        let task = tokio::spawn(run_capture(
            windows,
            config.clone(),
            gate,
            outbound,
            Arc::clone(&counters),
        ));

        Ok(Self {
            config,
            input,
            task: Some(task),
            counters,
            device_closed: false,
        })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn counters(&self) -> Arc<CaptureCounters> {
        Arc::clone(&self.counters)
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Stop the outbound flow. Returns false if it was already stopped.
    pub fn stop(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                task.abort();
                info!(
                    "Capture stopped ({} frames sent, {} dropped)",
                    self.counters.frames_sent.load(Ordering::Relaxed),
                    self.counters.frames_dropped.load(Ordering::Relaxed)
                );
                true
            }
            None => false,
        }
    }

    /// Release the input device. Returns Ok(false) if it was already released.
    pub fn close_device(&mut self) -> LiveResult<bool> {
        if self.device_closed {
            return Ok(false);
        }
        self.device_closed = true;
        self.input
            .close()
            .map_err(|e| LiveError::Teardown(format!("{}: {}", self.input.name(), e)))?;
        Ok(true)
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_capture(
    mut windows: mpsc::Receiver<Vec<f32>>,
    config: CaptureConfig,
    gate: SessionGate,
    outbound: mpsc::Sender<WireFrame>,
    counters: Arc<CaptureCounters>,
) {
    debug!("Capture task started");

    let mut framer = Framer::new(config.window_size, config.channels);

    while let Some(chunk) = windows.recv().await {
        for window in framer.push(&chunk) {
            if !gate.is_open() {
                counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Session not open, dropping capture frame");
                continue;
            }

            match codec::encode(&window, config.channels, config.sample_rate) {
                Ok(frame) => match outbound.try_send(frame) {
                    Ok(()) => {
                        counters.frames_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Full(_)) => {
                        counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                        debug!("Outbound queue full, dropping capture frame");
                    }
                    Err(TrySendError::Closed(_)) => {
                        counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                        debug!("Outbound queue closed, dropping capture frame");
                    }
                },
                Err(e) => {
                    counters.frames_malformed.fetch_add(1, Ordering::Relaxed);
                    warn!("Dropping capture frame: {}", e);
                }
            }
        }
    }

    debug!("Capture task finished: input stream ended");
}
