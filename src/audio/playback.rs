// Playback scheduler: gapless, ordered output of streamed audio chunks
//
// Each decoded chunk starts at max(next_start_time, device clock) and pushes
// next_start_time forward by its duration, so chunks never overlap and never
// start in the device's past. An interruption cancels everything in flight
// and resets next_start_time to the device clock.
//
// The scheduler is only driven from the session event loop; nothing else
// touches next_start_time or the in-flight set.

use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

use super::codec::{self, WireFrame};
use super::device::{AudioOutput, EntryId};
use crate::error::{LiveError, LiveResult};

/// Configuration for audio playback
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// Number of output channels
    pub channels: u16,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            channels: 1,
        }
    }
}

/// Lifecycle of one scheduled chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Scheduled,
    Playing,
    Finished,
}

/// A decoded chunk and the absolute device time it starts at
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlaybackEntry {
    pub id: EntryId,
    /// Device clock, seconds
    pub start_time: f64,
    /// Seconds
    pub duration: f64,
}

impl PlaybackEntry {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    pub fn state_at(&self, now: f64) -> EntryState {
        if now < self.start_time {
            EntryState::Scheduled
        } else if now < self.end_time() {
            EntryState::Playing
        } else {
            EntryState::Finished
        }
    }
}

/// Scheduler counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PlaybackStats {
    pub chunks_scheduled: u64,
    pub chunks_dropped: u64,
    pub interruptions: u64,
    pub entries_cancelled: u64,
}

pub struct PlaybackScheduler {
    config: PlaybackConfig,
    output: Box<dyn AudioOutput>,
    next_start_time: f64,
    in_flight: VecDeque<PlaybackEntry>,
    next_id: EntryId,
    stats: PlaybackStats,
    device_closed: bool,
}

impl PlaybackScheduler {
    /// Open the output context and anchor the schedule at its current time
    pub fn new(mut output: Box<dyn AudioOutput>, config: PlaybackConfig) -> LiveResult<Self> {
        output.open(config.sample_rate, config.channels)?;
        let next_start_time = output.current_time();

        info!(
            "Playback scheduler ready on {} ({}Hz, {} channels)",
            output.name(),
            config.sample_rate,
            config.channels
        );

        Ok(Self {
            config,
            output,
            next_start_time,
            in_flight: VecDeque::new(),
            next_id: 0,
            stats: PlaybackStats::default(),
            device_closed: false,
        })
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn current_time(&self) -> f64 {
        self.output.current_time()
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }

    /// Decode and schedule one chunk right after the previous one
    ///
    /// Empty chunks are accepted but not scheduled.
    pub fn enqueue(&mut self, frame: &WireFrame) -> LiveResult<Option<PlaybackEntry>> {
        self.reap();

        let audio = codec::decode(frame, self.config.sample_rate, self.config.channels)?;
        if audio.is_empty() {
            debug!("Skipping empty audio chunk");
            return Ok(None);
        }

        let now = self.output.current_time();
        let start_time = self.next_start_time.max(now);
        let entry = PlaybackEntry {
            id: self.next_id,
            start_time,
            duration: audio.duration_secs(),
        };

        self.output.schedule(entry.id, audio.interleaved(), start_time)?;

        self.next_id += 1;
        self.next_start_time = entry.end_time();
        self.in_flight.push_back(entry);
        self.stats.chunks_scheduled += 1;

        debug!(
            "Scheduled chunk {} at {:.3}s for {:.3}s (device time {:.3}s)",
            entry.id, entry.start_time, entry.duration, now
        );

        Ok(Some(entry))
    }

    /// Schedule a chunk, logging and dropping it if it can't be played
    pub fn handle_audio(&mut self, frame: &WireFrame) -> Option<PlaybackEntry> {
        match self.enqueue(frame) {
            Ok(entry) => entry,
            Err(e) => {
                self.stats.chunks_dropped += 1;
                match &e {
                    LiveError::MalformedAudio(_) => warn!("Dropping audio chunk: {}", e),
                    _ => warn!("Failed to schedule audio chunk: {}", e),
                }
                None
            }
        }
    }

    /// Remote speech was cut off: flush everything and restart at device time
    pub fn interrupt(&mut self) -> usize {
        let cancelled = self.cancel_in_flight();
        self.next_start_time = self.output.current_time();
        self.stats.interruptions += 1;

        info!(
            "Playback interrupted: {} entries cancelled, restarting at {:.3}s",
            cancelled, self.next_start_time
        );
        cancelled
    }

    /// Cancel every scheduled or playing entry (teardown path)
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.cancel_in_flight();
        if cancelled > 0 {
            debug!("Cancelled {} playback entries", cancelled);
        }
        cancelled
    }

    /// Entries not yet finished, in start order
    pub fn in_flight(&mut self) -> Vec<PlaybackEntry> {
        self.reap();
        self.in_flight.iter().copied().collect()
    }

    /// Release the output device. Returns Ok(false) if it was already released.
    pub fn close_device(&mut self) -> LiveResult<bool> {
        if self.device_closed {
            return Ok(false);
        }
        self.device_closed = true;
        self.output
            .close()
            .map_err(|e| LiveError::Teardown(format!("{}: {}", self.output.name(), e)))?;
        Ok(true)
    }

    fn cancel_in_flight(&mut self) -> usize {
        let count = self.in_flight.len();
        for entry in self.in_flight.drain(..) {
            self.output.cancel(entry.id);
        }
        self.stats.entries_cancelled += count as u64;
        count
    }

    fn reap(&mut self) {
        let now = self.output.current_time();
        while let Some(entry) = self.in_flight.front() {
            if entry.state_at(now) == EntryState::Finished {
                self.in_flight.pop_front();
            } else {
                break;
            }
        }
    }
}
