pub mod capture;
pub mod codec;
pub mod device;
pub mod playback;
pub mod virtual_device;

#[cfg(feature = "cpal")]
pub mod cpal_device;

pub use capture::{CaptureConfig, CaptureCounters, CapturePipeline, Framer};
pub use codec::{AudioFrame, DecodedAudio, WireFrame};
pub use device::{AudioDevices, AudioInput, AudioOutput, EntryId};
pub use playback::{EntryState, PlaybackConfig, PlaybackEntry, PlaybackScheduler, PlaybackStats};
pub use virtual_device::{ManualClock, ScheduledBuffer, VirtualDevices};

#[cfg(feature = "cpal")]
pub use cpal_device::CpalDevices;
