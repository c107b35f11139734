// Live session state machine
//
//   Connecting --handshake ok--> Open --stop--> Closing --> Closed
//        |                         |
//        +--handshake failed-------+--server error / remote close--> Closed
//
// Inbound events are applied one at a time by `apply_event`; the only
// state shared with the capture side is the open gate.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::messages::{ServerEvent, SessionSetup};
use super::transcript::{Speaker, TranscriptAccumulator, TranscriptTurn};
use super::transport::{LiveLink, LiveTransport};
use crate::audio::{PlaybackScheduler, WireFrame};
use crate::error::{LiveError, LiveResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// "Is the session open" flag read by the capture side
#[derive(Debug, Clone, Default)]
pub struct SessionGate(Arc<AtomicBool>);

impl SessionGate {
    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, open: bool) {
        self.0.store(open, Ordering::Release);
    }
}

/// The one live connection of a conversation
pub struct SessionHandle {
    link: LiveLink,
    state: SessionState,
    gate: SessionGate,
}

impl SessionHandle {
    /// Run the handshake. Any failure is reported as `Connect`.
    pub async fn connect(transport: &dyn LiveTransport, setup: &SessionSetup) -> LiveResult<Self> {
        info!(
            "Session connecting via {} (model {})",
            transport.name(),
            setup.model
        );

        match transport.connect(setup).await {
            Ok(link) => {
                let gate = SessionGate::default();
                gate.set(true);
                info!("Session {} open", link.session_id());
                Ok(Self {
                    link,
                    state: SessionState::Open,
                    gate,
                })
            }
            Err(e) => {
                warn!("Session handshake failed: {}", e);
                Err(match e {
                    LiveError::Connect(reason) => LiveError::Connect(reason),
                    other => LiveError::Connect(other.to_string()),
                })
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> &str {
        self.link.session_id()
    }

    pub fn gate(&self) -> SessionGate {
        self.gate.clone()
    }

    /// Outbound queue for the capture pipeline
    pub fn frame_sender(&self) -> mpsc::Sender<WireFrame> {
        self.link.frame_sender()
    }

    /// Send one frame. Returns Ok(false) without sending unless the session is open.
    pub fn send_audio(&self, frame: WireFrame) -> LiveResult<bool> {
        if self.state != SessionState::Open {
            debug!("Session {} not open, dropping frame", self.session_id());
            return Ok(false);
        }
        self.link.send_audio(frame)?;
        Ok(true)
    }

    pub fn take_events(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.link.take_events()
    }

    /// Open -> Closing: stop accepting outbound audio
    pub fn begin_close(&mut self) {
        if self.state == SessionState::Open {
            self.gate.set(false);
            self.state = SessionState::Closing;
            info!("Session {} closing", self.session_id());
        }
    }

    /// -> Closed. Returns false if the session was already closed.
    pub fn close(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.gate.set(false);
        self.link.close();
        self.state = SessionState::Closed;
        info!("Session {} closed", self.session_id());
        true
    }
}

/// What the event loop should do after one inbound event
#[derive(Debug)]
pub enum EventOutcome {
    /// Nothing visible changed
    Continue,
    /// Turn boundary: finalized turns, possibly none
    TurnsCompleted(Vec<TranscriptTurn>),
    /// Playback flushed; number of cancelled entries
    Interrupted(usize),
    /// Remote fault; the session must be torn down
    Fatal(LiveError),
    /// Remote side closed the session
    RemoteClosed,
    /// Event arrived while the session was not open
    Ignored,
}

/// Apply one inbound event to the playback and transcript state
pub fn apply_event(
    state: SessionState,
    event: ServerEvent,
    scheduler: &mut PlaybackScheduler,
    transcript: &mut TranscriptAccumulator,
) -> EventOutcome {
    if state != SessionState::Open {
        debug!("Ignoring {} in state {:?}", event.kind(), state);
        return EventOutcome::Ignored;
    }

    match event {
        ServerEvent::InputTranscriptionDelta { text } => {
            transcript.append(Speaker::User, &text);
            EventOutcome::Continue
        }
        ServerEvent::OutputTranscriptionDelta { text } => {
            transcript.append(Speaker::Assistant, &text);
            EventOutcome::Continue
        }
        ServerEvent::TurnComplete => EventOutcome::TurnsCompleted(transcript.complete_turn()),
        ServerEvent::AudioChunk { frame } => {
            scheduler.handle_audio(&frame);
            EventOutcome::Continue
        }
        ServerEvent::Interrupted => EventOutcome::Interrupted(scheduler.interrupt()),
        ServerEvent::Error { reason } => EventOutcome::Fatal(LiveError::Session(reason)),
        ServerEvent::Closed => EventOutcome::RemoteClosed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{codec, AudioDevices, PlaybackConfig, VirtualDevices};
    use crate::live::LoopbackTransport;

    fn fixtures() -> (VirtualDevices, PlaybackScheduler, TranscriptAccumulator) {
        let devices = VirtualDevices::default();
        let scheduler =
            PlaybackScheduler::new(devices.output().unwrap(), PlaybackConfig::default()).unwrap();
        (devices, scheduler, TranscriptAccumulator::new())
    }

    #[test]
    fn test_transcription_deltas_route_by_speaker() {
        let (_devices, mut scheduler, mut transcript) = fixtures();

        for event in [
            ServerEvent::InputTranscriptionDelta { text: "Hi".into() },
            ServerEvent::OutputTranscriptionDelta { text: "Hel".into() },
            ServerEvent::OutputTranscriptionDelta { text: "lo".into() },
        ] {
            apply_event(SessionState::Open, event, &mut scheduler, &mut transcript);
        }

        match apply_event(SessionState::Open, ServerEvent::TurnComplete, &mut scheduler, &mut transcript) {
            EventOutcome::TurnsCompleted(turns) => {
                assert_eq!(turns.len(), 2);
                assert_eq!(turns[0].text, "Hi");
                assert_eq!(turns[1].text, "Hello");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_audio_and_interrupt_reach_scheduler() {
        let (devices, mut scheduler, mut transcript) = fixtures();
        let frame = codec::encode(&vec![0.1; 2400], 1, 24000).unwrap();

        apply_event(SessionState::Open, ServerEvent::AudioChunk { frame }, &mut scheduler, &mut transcript);
        assert_eq!(devices.scheduled().len(), 1);

        match apply_event(SessionState::Open, ServerEvent::Interrupted, &mut scheduler, &mut transcript) {
            EventOutcome::Interrupted(cancelled) => assert_eq!(cancelled, 1),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_server_error_is_fatal() {
        let (_devices, mut scheduler, mut transcript) = fixtures();
        let outcome = apply_event(
            SessionState::Open,
            ServerEvent::Error { reason: "quota".into() },
            &mut scheduler,
            &mut transcript,
        );
        assert!(matches!(outcome, EventOutcome::Fatal(LiveError::Session(_))));
    }

    #[test]
    fn test_events_ignored_unless_open() {
        let (devices, mut scheduler, mut transcript) = fixtures();
        let frame = codec::encode(&vec![0.1; 240], 1, 24000).unwrap();

        for state in [SessionState::Connecting, SessionState::Closing, SessionState::Closed] {
            let outcome = apply_event(state, ServerEvent::AudioChunk { frame: frame.clone() }, &mut scheduler, &mut transcript);
            assert!(matches!(outcome, EventOutcome::Ignored));
        }
        assert!(devices.scheduled().is_empty());
    }

    #[tokio::test]
    async fn test_send_audio_only_while_open() {
        let (transport, server) = LoopbackTransport::new();
        let mut session = SessionHandle::connect(&transport, &SessionSetup::voice("m", "i"))
            .await
            .unwrap();
        let frame = codec::encode(&[0.2; 160], 1, 16000).unwrap();

        assert!(session.send_audio(frame.clone()).unwrap());
        for _ in 0..100 {
            if server.frames().len() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(server.frames().len(), 1);

        session.begin_close();
        assert!(!session.send_audio(frame.clone()).unwrap());
        session.close();
        assert!(!session.send_audio(frame).unwrap());
        assert_eq!(server.frames().len(), 1);
    }
}
