// Resource lifecycle for one conversation
//
// Every resource acquired at start is attached here and released by a single
// teardown path. Release order:
//
//   1. outbound capture    (nothing more is sent on a closing session)
//   2. playback entries    (scheduled and playing buffers cancelled)
//   3. input device
//   4. output device
//   5. session handle      (last, so the close notice can still go out)
//
// Teardown runs on stop, on a fatal error, and from Drop when the owning
// task is cancelled. Each resource is released at most once.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audio::{CapturePipeline, PlaybackScheduler};
use crate::error::LiveError;
use crate::live::{apply_event, EventOutcome, ServerEvent, SessionHandle, SessionState, TranscriptAccumulator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Capture,
    Playback,
    InputDevice,
    OutputDevice,
    Session,
}

impl ResourceKind {
    /// Release order
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Capture,
        ResourceKind::Playback,
        ResourceKind::InputDevice,
        ResourceKind::OutputDevice,
        ResourceKind::Session,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    acquired: [bool; 5],
    releases: [u32; 5],
}

/// Acquire/release record shared with observers of the conversation
#[derive(Debug, Clone, Default)]
pub struct ReleaseLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl ReleaseLedger {
    pub fn is_acquired(&self, kind: ResourceKind) -> bool {
        self.state.lock().acquired[kind.index()]
    }

    pub fn is_released(&self, kind: ResourceKind) -> bool {
        self.state.lock().releases[kind.index()] > 0
    }

    pub fn release_count(&self, kind: ResourceKind) -> u32 {
        self.state.lock().releases[kind.index()]
    }

    /// True once every acquired resource has been released
    pub fn all_released(&self) -> bool {
        let state = self.state.lock();
        ResourceKind::ALL
            .iter()
            .all(|kind| !state.acquired[kind.index()] || state.releases[kind.index()] > 0)
    }

    fn acquire(&self, kind: ResourceKind) {
        self.state.lock().acquired[kind.index()] = true;
    }

    fn release(&self, kind: ResourceKind) {
        self.state.lock().releases[kind.index()] += 1;
    }
}

/// Outcome of one teardown pass
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Resources released by this pass, in order
    pub released: Vec<ResourceKind>,
    /// Release failures; teardown continued past each one
    pub errors: Vec<LiveError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Owns the capture pipeline, playback scheduler and session handle
pub struct ResourceLifecycle {
    capture: Option<CapturePipeline>,
    scheduler: Option<PlaybackScheduler>,
    session: Option<SessionHandle>,
    ledger: ReleaseLedger,
    torn_down: bool,
}

impl ResourceLifecycle {
    pub fn new(ledger: ReleaseLedger) -> Self {
        Self {
            capture: None,
            scheduler: None,
            session: None,
            ledger,
            torn_down: false,
        }
    }

    pub fn ledger(&self) -> &ReleaseLedger {
        &self.ledger
    }

    /// Output device plus the scheduler's in-flight entries
    pub fn attach_playback(&mut self, scheduler: PlaybackScheduler) {
        self.ledger.acquire(ResourceKind::OutputDevice);
        self.ledger.acquire(ResourceKind::Playback);
        self.scheduler = Some(scheduler);
    }

    pub fn attach_session(&mut self, session: SessionHandle) {
        self.ledger.acquire(ResourceKind::Session);
        self.session = Some(session);
    }

    /// Input device plus the outbound capture task
    pub fn attach_capture(&mut self, capture: CapturePipeline) {
        self.ledger.acquire(ResourceKind::InputDevice);
        self.ledger.acquire(ResourceKind::Capture);
        self.capture = Some(capture);
    }

    pub fn session_state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(SessionHandle::state)
            .unwrap_or(SessionState::Closed)
    }

    pub fn scheduler(&self) -> Option<&PlaybackScheduler> {
        self.scheduler.as_ref()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Route one inbound event to the scheduler and the transcript
    pub fn dispatch(&mut self, event: ServerEvent, transcript: &mut TranscriptAccumulator) -> EventOutcome {
        let state = self.session_state();
        match self.scheduler.as_mut() {
            Some(scheduler) => apply_event(state, event, scheduler, transcript),
            None => EventOutcome::Ignored,
        }
    }

    /// Release everything still held. Safe to call any number of times.
    pub fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.torn_down {
            debug!("Teardown already completed");
            return report;
        }
        self.torn_down = true;

        if let Some(session) = self.session.as_mut() {
            session.begin_close();
        }

        if let Some(capture) = self.capture.as_mut() {
            if capture.stop() {
                self.release(ResourceKind::Capture, &mut report);
            }
        }

        if let Some(scheduler) = self.scheduler.as_mut() {
            let cancelled = scheduler.cancel_all();
            debug!("Flushed {} playback entries", cancelled);
            self.release(ResourceKind::Playback, &mut report);
        }

        if let Some(capture) = self.capture.as_mut() {
            let result = capture.close_device();
            self.release_device(ResourceKind::InputDevice, result, &mut report);
        }

        if let Some(scheduler) = self.scheduler.as_mut() {
            let result = scheduler.close_device();
            self.release_device(ResourceKind::OutputDevice, result, &mut report);
        }

        if let Some(session) = self.session.as_mut() {
            if session.close() {
                self.release(ResourceKind::Session, &mut report);
            }
        }

        info!(
            "Teardown released {:?} ({} errors)",
            report.released,
            report.errors.len()
        );
        report
    }

    fn release(&self, kind: ResourceKind, report: &mut TeardownReport) {
        self.ledger.release(kind);
        report.released.push(kind);
    }

    fn release_device(
        &self,
        kind: ResourceKind,
        result: Result<bool, LiveError>,
        report: &mut TeardownReport,
    ) {
        match result {
            Ok(true) => self.release(kind, report),
            Ok(false) => {}
            Err(e) => {
                // The handle is gone either way; count it released
                warn!("Failed to release {:?}: {}", kind, e);
                self.release(kind, report);
                report.errors.push(e);
            }
        }
    }
}

impl Drop for ResourceLifecycle {
    fn drop(&mut self) {
        if !self.torn_down {
            info!("Resources dropped without teardown, releasing now");
            self.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioDevices, CaptureConfig, PlaybackConfig, VirtualDevices};
    use crate::live::{LoopbackServer, LoopbackTransport, SessionSetup};

    async fn acquire_all(devices: &VirtualDevices) -> (ResourceLifecycle, LoopbackServer) {
        let (transport, server) = LoopbackTransport::new();
        let mut lifecycle = ResourceLifecycle::new(ReleaseLedger::default());

        let scheduler =
            PlaybackScheduler::new(devices.output().unwrap(), PlaybackConfig::default()).unwrap();
        lifecycle.attach_playback(scheduler);

        let session = SessionHandle::connect(&transport, &SessionSetup::voice("m", "i"))
            .await
            .unwrap();
        let capture = CapturePipeline::start(
            devices.input().unwrap(),
            CaptureConfig::default(),
            session.gate(),
            session.frame_sender(),
        )
        .await
        .unwrap();
        lifecycle.attach_session(session);
        lifecycle.attach_capture(capture);

        (lifecycle, server)
    }

    async fn wait_for_close(server: &LoopbackServer) {
        for _ in 0..100 {
            if server.close_count() > 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_teardown_releases_in_order() {
        let devices = VirtualDevices::default();
        let (mut lifecycle, server) = acquire_all(&devices).await;

        let report = lifecycle.teardown();
        assert!(report.is_clean());
        assert_eq!(report.released, ResourceKind::ALL.to_vec());
        assert_eq!(lifecycle.session_state(), SessionState::Closed);

        wait_for_close(&server).await;
        assert_eq!(server.close_count(), 1);
        assert_eq!(devices.input_close_count(), 1);
        assert_eq!(devices.output_close_count(), 1);
    }

    #[tokio::test]
    async fn test_teardown_twice_releases_once() {
        let devices = VirtualDevices::default();
        let (mut lifecycle, _server) = acquire_all(&devices).await;

        lifecycle.teardown();
        let second = lifecycle.teardown();
        assert!(second.released.is_empty());

        for kind in ResourceKind::ALL {
            assert_eq!(lifecycle.ledger().release_count(kind), 1, "{:?}", kind);
        }
    }

    #[tokio::test]
    async fn test_drop_tears_down() {
        let devices = VirtualDevices::default();
        let (lifecycle, server) = acquire_all(&devices).await;
        let ledger = lifecycle.ledger().clone();

        drop(lifecycle);

        assert!(ledger.all_released());
        wait_for_close(&server).await;
        assert_eq!(server.close_count(), 1);
        assert_eq!(devices.output_close_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_device_close_continues_teardown() {
        let devices = VirtualDevices::default();
        let (mut lifecycle, server) = acquire_all(&devices).await;
        devices.fail_output_close("device unplugged");

        let report = lifecycle.teardown();

        assert_eq!(report.errors.len(), 1);
        assert!(matches!(&report.errors[0], LiveError::Teardown(reason) if reason.contains("device unplugged")));
        // The failed output still counts as released and the session after it is closed
        assert_eq!(report.released, ResourceKind::ALL.to_vec());
        assert!(lifecycle.ledger().is_released(ResourceKind::OutputDevice));
        assert!(lifecycle.ledger().is_released(ResourceKind::Session));
        assert!(lifecycle.ledger().all_released());
        assert_eq!(lifecycle.session_state(), SessionState::Closed);

        wait_for_close(&server).await;
        assert_eq!(server.close_count(), 1);

        // Nothing is retried
        assert!(lifecycle.teardown().errors.is_empty());
        assert_eq!(devices.output_close_count(), 1);
    }

    #[tokio::test]
    async fn test_partial_acquisition_releases_what_was_held() {
        let devices = VirtualDevices::default();
        let mut lifecycle = ResourceLifecycle::new(ReleaseLedger::default());
        lifecycle.attach_playback(
            PlaybackScheduler::new(devices.output().unwrap(), PlaybackConfig::default()).unwrap(),
        );

        let report = lifecycle.teardown();
        assert_eq!(
            report.released,
            vec![ResourceKind::Playback, ResourceKind::OutputDevice]
        );
        assert!(lifecycle.ledger().all_released());
        assert!(!lifecycle.ledger().is_acquired(ResourceKind::Session));
    }
}
