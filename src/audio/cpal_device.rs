// Hardware audio devices via cpal
//
// cpal streams are not Send on every platform, so each stream lives on its
// own thread and is dropped there when the device is closed. The output
// device mixes scheduled buffers itself and derives its clock from the
// number of frames it has rendered.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleRate, StreamConfig};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::device::{AudioDevices, AudioInput, AudioOutput, EntryId};
use crate::error::{LiveError, LiveResult};

/// Windows buffered between the cpal callback and the capture pipeline
const INPUT_QUEUE_DEPTH: usize = 32;

/// Default (or named) system input/output devices
#[derive(Debug, Clone, Default)]
pub struct CpalDevices {
    /// Input device name (None = system default)
    pub input_device: Option<String>,
    /// Output device name (None = system default)
    pub output_device: Option<String>,
}

impl AudioDevices for CpalDevices {
    fn input(&self) -> LiveResult<Box<dyn AudioInput>> {
        Ok(Box::new(CpalInput {
            device_name: self.input_device.clone(),
            stream: None,
        }))
    }

    fn output(&self) -> LiveResult<Box<dyn AudioOutput>> {
        Ok(Box::new(CpalOutput {
            device_name: self.output_device.clone(),
            stream: None,
            mix: Arc::new(Mutex::new(Vec::new())),
            frames_rendered: Arc::new(AtomicU64::new(0)),
            sample_rate: 0,
            channels: 1,
        }))
    }
}

fn find_device(name: Option<&str>, input: bool) -> Result<Device, String> {
    let host = cpal::default_host();
    match name {
        None if input => host
            .default_input_device()
            .ok_or_else(|| "no default input device".to_string()),
        None => host
            .default_output_device()
            .ok_or_else(|| "no default output device".to_string()),
        Some(wanted) => {
            let devices = if input {
                host.input_devices()
            } else {
                host.output_devices()
            }
            .map_err(|e| e.to_string())?;

            for device in devices {
                if let Ok(device_name) = device.name() {
                    if device_name.contains(wanted) {
                        return Ok(device);
                    }
                }
            }
            Err(format!("audio device not found: {}", wanted))
        }
    }
}

fn stream_config(sample_rate: u32, channels: u16) -> StreamConfig {
    StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: BufferSize::Default,
    }
}

/// Keeps a cpal stream alive on a dedicated thread
struct StreamThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    fn spawn<F>(name: &str, build: F) -> Result<Self, String>
    where
        F: FnOnce() -> Result<cpal::Stream, String> + Send + 'static,
    {
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || match build() {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Block until close; the stream stops when dropped
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| e.to_string())?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop_tx,
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err("audio thread exited before the stream was ready".to_string()),
        }
    }

    fn stop(&mut self) -> Result<(), String> {
        let _ = self.stop_tx.send(());
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| "audio thread panicked".to_string()),
            None => Ok(()),
        }
    }
}

pub struct CpalInput {
    device_name: Option<String>,
    stream: Option<StreamThread>,
}

#[async_trait]
impl AudioInput for CpalInput {
    async fn open(&mut self, sample_rate: u32, channels: u16) -> LiveResult<mpsc::Receiver<Vec<f32>>> {
        if self.stream.is_some() {
            return Err(LiveError::CaptureUnavailable("input already open".to_string()));
        }

        let (tx, rx) = mpsc::channel(INPUT_QUEUE_DEPTH);
        let name = self.device_name.clone();

        let stream = StreamThread::spawn("loqa-live-capture", move || {
            let device = find_device(name.as_deref(), true)?;
            let stream = device
                .build_input_stream(
                    &stream_config(sample_rate, channels),
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if tx.try_send(data.to_vec()).is_err() {
                            warn!("Capture queue full, dropping {} samples", data.len());
                        }
                    },
                    |err| error!("Capture stream error: {}", err),
                    None,
                )
                .map_err(|e| e.to_string())?;
            stream.play().map_err(|e| e.to_string())?;
            Ok(stream)
        })
        .map_err(LiveError::CaptureUnavailable)?;

        info!("Microphone opened: {}Hz, {} channels", sample_rate, channels);
        self.stream = Some(stream);
        Ok(rx)
    }

    fn close(&mut self) -> LiveResult<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.stop().map_err(LiveError::Teardown)?;
            debug!("Microphone closed");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        self.device_name.as_deref().unwrap_or("default input")
    }
}

struct MixEntry {
    id: EntryId,
    start_frame: u64,
    samples: Vec<f32>,
}

pub struct CpalOutput {
    device_name: Option<String>,
    stream: Option<StreamThread>,
    mix: Arc<Mutex<Vec<MixEntry>>>,
    frames_rendered: Arc<AtomicU64>,
    sample_rate: u32,
    channels: u16,
}

/// Render every scheduled buffer overlapping [base, base + frames) into `out`
fn render(out: &mut [f32], channels: usize, base: u64, entries: &mut Vec<MixEntry>) {
    out.fill(0.0);
    let frames = (out.len() / channels) as u64;
    let window_end = base + frames;

    for entry in entries.iter() {
        let entry_frames = (entry.samples.len() / channels) as u64;
        let from = entry.start_frame.max(base);
        let to = (entry.start_frame + entry_frames).min(window_end);
        for frame in from..to {
            let src = ((frame - entry.start_frame) as usize) * channels;
            let dst = ((frame - base) as usize) * channels;
            for ch in 0..channels {
                out[dst + ch] += entry.samples[src + ch];
            }
        }
    }

    entries.retain(|e| e.start_frame + (e.samples.len() / channels) as u64 > window_end);
}

impl AudioOutput for CpalOutput {
    fn open(&mut self, sample_rate: u32, channels: u16) -> LiveResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let name = self.device_name.clone();
        let mix = Arc::clone(&self.mix);
        let rendered = Arc::clone(&self.frames_rendered);
        let channel_count = channels.max(1) as usize;

        let stream = StreamThread::spawn("loqa-live-playback", move || {
            let device = find_device(name.as_deref(), false)?;
            let stream = device
                .build_output_stream(
                    &stream_config(sample_rate, channels),
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let base = rendered.load(Ordering::Acquire);
                        render(data, channel_count, base, &mut mix.lock());
                        rendered.store(base + (data.len() / channel_count) as u64, Ordering::Release);
                    },
                    |err| error!("Playback stream error: {}", err),
                    None,
                )
                .map_err(|e| e.to_string())?;
            stream.play().map_err(|e| e.to_string())?;
            Ok(stream)
        })
        .map_err(LiveError::Transport)?;

        self.sample_rate = sample_rate;
        self.channels = channels.max(1);
        self.stream = Some(stream);
        info!("Speaker opened: {}Hz, {} channels", sample_rate, channels);
        Ok(())
    }

    fn current_time(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames_rendered.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn schedule(&mut self, id: EntryId, samples: Vec<f32>, start_time: f64) -> LiveResult<()> {
        if self.stream.is_none() {
            return Err(LiveError::Transport("output device is not open".to_string()));
        }

        let start_frame = (start_time * self.sample_rate as f64).round().max(0.0) as u64;
        self.mix.lock().push(MixEntry {
            id,
            start_frame,
            samples,
        });
        Ok(())
    }

    fn cancel(&mut self, id: EntryId) {
        self.mix.lock().retain(|e| e.id != id);
    }

    fn close(&mut self) -> LiveResult<()> {
        self.mix.lock().clear();
        if let Some(mut stream) = self.stream.take() {
            stream.stop().map_err(LiveError::Teardown)?;
            debug!("Speaker closed");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        self.device_name.as_deref().unwrap_or("default output")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_mixes_overlapping_window() {
        let mut entries = vec![
            MixEntry {
                id: 0,
                start_frame: 2,
                samples: vec![0.5; 4],
            },
            MixEntry {
                id: 1,
                start_frame: 6,
                samples: vec![0.25; 4],
            },
        ];

        let mut out = vec![1.0; 6];
        render(&mut out, 1, 0, &mut entries);
        assert_eq!(out, vec![0.0, 0.0, 0.5, 0.5, 0.5, 0.5]);
        assert_eq!(entries.len(), 1);

        render(&mut out, 1, 6, &mut entries);
        assert_eq!(out, vec![0.25, 0.25, 0.25, 0.25, 0.0, 0.0]);
        assert!(entries.is_empty());
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_open_default_output() {
        let mut output = CpalDevices::default().output().unwrap();
        output.open(24000, 1).unwrap();
        output.schedule(0, vec![0.0; 2400], 0.0).unwrap();
        output.close().unwrap();
    }
}
