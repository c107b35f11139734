// In-process audio devices driven by a manually advanced clock
//
// Used for headless runs and tests: input windows are pushed by the caller,
// scheduled output is recorded instead of played.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::device::{AudioDevices, AudioInput, AudioOutput, EntryId};
use crate::error::{LiveError, LiveResult};

/// Monotonic clock shared between a test and its devices
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> f64 {
        *self.now.lock()
    }

    pub fn advance(&self, secs: f64) {
        *self.now.lock() += secs;
    }

    pub fn set(&self, secs: f64) {
        let mut now = self.now.lock();
        if secs > *now {
            *now = secs;
        }
    }
}

/// A buffer handed to the virtual output
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledBuffer {
    pub id: EntryId,
    pub start_time: f64,
    pub duration: f64,
    pub sample_count: usize,
}

#[derive(Debug, Default)]
struct DeviceState {
    input_tx: Option<mpsc::Sender<Vec<f32>>>,
    input_failure: Option<String>,
    input_close_failure: Option<String>,
    output_close_failure: Option<String>,
    input_opens: usize,
    input_closes: usize,
    output_opens: usize,
    output_closes: usize,
    scheduled: Vec<ScheduledBuffer>,
    cancelled: Vec<EntryId>,
}

/// Factory and inspection handle for a virtual input/output pair
#[derive(Debug, Clone, Default)]
pub struct VirtualDevices {
    clock: ManualClock,
    state: Arc<Mutex<DeviceState>>,
}

impl VirtualDevices {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            state: Arc::default(),
        }
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Make the next input open fail (simulates denied microphone permission)
    pub fn fail_input(&self, reason: impl Into<String>) {
        self.state.lock().input_failure = Some(reason.into());
    }

    /// Make the next input close fail after releasing the stream
    pub fn fail_input_close(&self, reason: impl Into<String>) {
        self.state.lock().input_close_failure = Some(reason.into());
    }

    /// Make the next output close fail after silencing the device
    pub fn fail_output_close(&self, reason: impl Into<String>) {
        self.state.lock().output_close_failure = Some(reason.into());
    }

    /// Deliver one window as if the hardware produced it
    ///
    /// Returns false when no input stream is open.
    pub async fn push_input(&self, window: Vec<f32>) -> bool {
        let tx = self.state.lock().input_tx.clone();
        match tx {
            Some(tx) => tx.send(window).await.is_ok(),
            None => false,
        }
    }

    pub fn scheduled(&self) -> Vec<ScheduledBuffer> {
        self.state.lock().scheduled.clone()
    }

    pub fn cancelled(&self) -> Vec<EntryId> {
        self.state.lock().cancelled.clone()
    }

    pub fn input_open_count(&self) -> usize {
        self.state.lock().input_opens
    }

    pub fn input_close_count(&self) -> usize {
        self.state.lock().input_closes
    }

    pub fn output_open_count(&self) -> usize {
        self.state.lock().output_opens
    }

    pub fn output_close_count(&self) -> usize {
        self.state.lock().output_closes
    }
}

impl AudioDevices for VirtualDevices {
    fn input(&self) -> LiveResult<Box<dyn AudioInput>> {
        Ok(Box::new(VirtualInput {
            state: Arc::clone(&self.state),
            stream: None,
        }))
    }

    fn output(&self) -> LiveResult<Box<dyn AudioOutput>> {
        Ok(Box::new(VirtualOutput {
            clock: self.clock.clone(),
            state: Arc::clone(&self.state),
            sample_rate: 0,
            channels: 1,
            open: false,
        }))
    }
}

pub struct VirtualInput {
    state: Arc<Mutex<DeviceState>>,
    stream: Option<mpsc::Sender<Vec<f32>>>,
}

#[async_trait]
impl AudioInput for VirtualInput {
    async fn open(&mut self, sample_rate: u32, channels: u16) -> LiveResult<mpsc::Receiver<Vec<f32>>> {
        let mut state = self.state.lock();
        if let Some(reason) = state.input_failure.take() {
            return Err(LiveError::CaptureUnavailable(reason));
        }

        let (tx, rx) = mpsc::channel(64);
        state.input_tx = Some(tx.clone());
        state.input_opens += 1;
        self.stream = Some(tx);

        debug!("Virtual input opened: {}Hz, {} channels", sample_rate, channels);
        Ok(rx)
    }

    fn close(&mut self) -> LiveResult<()> {
        let mut state = self.state.lock();
        state.input_closes += 1;
        if let Some(stream) = self.stream.take() {
            // A later open may own the shared slot by now
            if state
                .input_tx
                .as_ref()
                .is_some_and(|current| current.same_channel(&stream))
            {
                state.input_tx = None;
            }
        }
        match state.input_close_failure.take() {
            Some(reason) => Err(LiveError::Transport(reason)),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "virtual input"
    }
}

pub struct VirtualOutput {
    clock: ManualClock,
    state: Arc<Mutex<DeviceState>>,
    sample_rate: u32,
    channels: u16,
    open: bool,
}

impl AudioOutput for VirtualOutput {
    fn open(&mut self, sample_rate: u32, channels: u16) -> LiveResult<()> {
        self.sample_rate = sample_rate;
        self.channels = channels.max(1);
        self.open = true;
        self.state.lock().output_opens += 1;
        debug!("Virtual output opened: {}Hz, {} channels", sample_rate, channels);
        Ok(())
    }

    fn current_time(&self) -> f64 {
        self.clock.now()
    }

    fn schedule(&mut self, id: EntryId, samples: Vec<f32>, start_time: f64) -> LiveResult<()> {
        if !self.open {
            return Err(LiveError::Transport("virtual output is not open".to_string()));
        }

        let frames = samples.len() / self.channels as usize;
        self.state.lock().scheduled.push(ScheduledBuffer {
            id,
            start_time,
            duration: frames as f64 / self.sample_rate as f64,
            sample_count: samples.len(),
        });
        Ok(())
    }

    fn cancel(&mut self, id: EntryId) {
        self.state.lock().cancelled.push(id);
    }

    fn close(&mut self) -> LiveResult<()> {
        let mut state = self.state.lock();
        state.output_closes += 1;
        self.open = false;
        match state.output_close_failure.take() {
            Some(reason) => Err(LiveError::Transport(reason)),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "virtual output"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let clock = ManualClock::new();
        clock.advance(1.5);
        clock.set(1.0);
        assert_eq!(clock.now(), 1.5);
        clock.set(2.0);
        assert_eq!(clock.now(), 2.0);
    }

    #[tokio::test]
    async fn test_input_delivers_pushed_windows() {
        let devices = VirtualDevices::default();
        let mut input = devices.input().unwrap();
        let mut rx = input.open(16000, 1).await.unwrap();

        assert!(devices.push_input(vec![0.1; 8]).await);
        assert_eq!(rx.recv().await.unwrap().len(), 8);

        input.close().unwrap();
        assert!(!devices.push_input(vec![0.1; 8]).await);
        assert_eq!(devices.input_close_count(), 1);
    }

    #[tokio::test]
    async fn test_input_failure_is_capture_unavailable() {
        let devices = VirtualDevices::default();
        devices.fail_input("permission denied");
        let mut input = devices.input().unwrap();
        let err = input.open(16000, 1).await.unwrap_err();
        assert!(matches!(err, LiveError::CaptureUnavailable(_)));
    }

    #[test]
    fn test_injected_close_failure_fires_once() {
        let devices = VirtualDevices::default();
        devices.fail_output_close("device unplugged");

        let mut output = devices.output().unwrap();
        output.open(24000, 1).unwrap();
        assert!(output.close().is_err());
        assert!(output.close().is_ok());
        assert_eq!(devices.output_close_count(), 2);
    }

    #[tokio::test]
    async fn test_closing_stale_input_keeps_newer_stream() {
        let devices = VirtualDevices::default();
        let mut first = devices.input().unwrap();
        let _first_rx = first.open(16000, 1).await.unwrap();
        let mut second = devices.input().unwrap();
        let mut second_rx = second.open(16000, 1).await.unwrap();

        first.close().unwrap();
        assert!(devices.push_input(vec![0.1; 4]).await);
        assert_eq!(second_rx.recv().await.unwrap().len(), 4);
    }

    #[test]
    fn test_output_records_schedule() {
        let devices = VirtualDevices::default();
        let mut output = devices.output().unwrap();
        output.open(24000, 1).unwrap();
        output.schedule(7, vec![0.0; 2400], 0.5).unwrap();

        let scheduled = devices.scheduled();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].id, 7);
        assert!((scheduled[0].duration - 0.1).abs() < 1e-9);
    }
}
