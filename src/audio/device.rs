use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::LiveResult;

/// Identifier of one scheduled playback buffer
pub type EntryId = u64;

/// Microphone input device
///
/// Implementations deliver float sample windows (interleaved) at the device's
/// own cadence. Window size is whatever the device hands out; the capture
/// pipeline does its own framing.
#[async_trait]
pub trait AudioInput: Send {
    /// Open the input stream at the given rate and start delivering windows
    async fn open(&mut self, sample_rate: u32, channels: u16) -> LiveResult<mpsc::Receiver<Vec<f32>>>;

    /// Release the device. Must be safe to call more than once.
    fn close(&mut self) -> LiveResult<()>;

    /// Get device name for logging
    fn name(&self) -> &str;
}

/// Audio output device context with sample-accurate scheduling
pub trait AudioOutput: Send {
    /// Open the output context at the given rate
    fn open(&mut self, sample_rate: u32, channels: u16) -> LiveResult<()>;

    /// Monotonic device clock in seconds
    fn current_time(&self) -> f64;

    /// Queue interleaved samples to start playing at `start_time` (device clock)
    fn schedule(&mut self, id: EntryId, samples: Vec<f32>, start_time: f64) -> LiveResult<()>;

    /// Stop a scheduled or playing buffer. Unknown ids are ignored.
    fn cancel(&mut self, id: EntryId);

    /// Release the device. Must be safe to call more than once.
    fn close(&mut self) -> LiveResult<()>;

    /// Get device name for logging
    fn name(&self) -> &str;
}

/// Factory for the device pair one conversation needs
///
/// A fresh pair is opened for every conversation and closed at teardown.
pub trait AudioDevices: Send + Sync {
    fn input(&self) -> LiveResult<Box<dyn AudioInput>>;
    fn output(&self) -> LiveResult<Box<dyn AudioOutput>>;
}
