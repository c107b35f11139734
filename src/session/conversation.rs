use chrono::{DateTime, Utc};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::ConversationConfig;
use super::lifecycle::{ReleaseLedger, ResourceLifecycle};
use super::stats::ConversationStats;
use crate::audio::{AudioDevices, CaptureCounters, CapturePipeline, PlaybackScheduler, PlaybackStats};
use crate::context::{build_context, DocumentPart, Summarizer};
use crate::error::{LiveError, LiveResult};
use crate::live::{
    EventOutcome, LiveTransport, ServerEvent, SessionHandle, SessionSetup, SessionState,
    TranscriptAccumulator, TranscriptTurn,
};

/// Collaborators a conversation is started with
#[derive(Clone)]
pub struct ConversationDeps {
    pub transport: Arc<dyn LiveTransport>,
    pub devices: Arc<dyn AudioDevices>,
    pub summarizer: Arc<dyn Summarizer>,
}

/// Notifications for the UI shell
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    Opened { session_id: String },
    Turn(TranscriptTurn),
    Interrupted { cancelled: usize },
    Failed { message: String },
    Closed,
}

#[derive(Debug)]
enum Control {
    Stop,
}

/// Why the event loop ended
#[derive(Debug)]
enum Ending {
    Stopped,
    RemoteClosed,
    StreamEnded,
    Failed(LiveError),
}

#[derive(Debug)]
struct LoopStatus {
    state: SessionState,
    playback: PlaybackStats,
    last_error: Option<String>,
}

/// State shared between the conversation handle and its event loop
struct Shared {
    status: Mutex<LoopStatus>,
    transcript: Mutex<Vec<TranscriptTurn>>,
    events: broadcast::Sender<ConversationEvent>,
}

impl Shared {
    fn notify(&self, event: ConversationEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// One running voice conversation
///
/// Owns the event loop task; the loop in turn owns every hardware and
/// network resource through a `ResourceLifecycle`.
pub struct LiveConversation {
    id: String,
    session_id: String,
    config: ConversationConfig,
    started_at: DateTime<Utc>,
    control: mpsc::Sender<Control>,
    task: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<Shared>,
    capture_counters: Arc<CaptureCounters>,
    ledger: ReleaseLedger,
}

impl LiveConversation {
    /// Summarize the documents, open the devices and the session, start capture
    ///
    /// On any failure, everything acquired so far is released before the
    /// error is returned.
    pub async fn start(
        deps: &ConversationDeps,
        config: ConversationConfig,
        documents: &[DocumentPart],
    ) -> LiveResult<Self> {
        let id = format!("conversation-{}", uuid::Uuid::new_v4());
        info!("Starting voice conversation {}", id);

        let context =
            build_context(deps.summarizer.as_ref(), documents, config.summary_word_limit).await?;
        let setup = SessionSetup::voice(
            config.model.clone(),
            context.system_instruction(&config.instruction_template),
        );

        let ledger = ReleaseLedger::default();
        let mut lifecycle = ResourceLifecycle::new(ledger.clone());

        // Dropping `lifecycle` on any early return below releases what it holds
        let output = deps.devices.output()?;
        lifecycle.attach_playback(PlaybackScheduler::new(output, config.playback.clone())?);

        let mut session = SessionHandle::connect(deps.transport.as_ref(), &setup).await?;
        let events = session
            .take_events()
            .ok_or_else(|| LiveError::Connect("event stream already taken".to_string()))?;
        let session_id = session.session_id().to_string();
        let gate = session.gate();
        let frames = session.frame_sender();
        lifecycle.attach_session(session);

        let capture = match deps.devices.input() {
            Ok(input) => CapturePipeline::start(input, config.capture.clone(), gate, frames).await,
            Err(e) => Err(LiveError::CaptureUnavailable(e.to_string())),
        };
        let capture = match capture {
            Ok(capture) => capture,
            Err(e) => {
                error!("Capture unavailable, aborting conversation {}: {}", id, e);
                lifecycle.teardown();
                return Err(e);
            }
        };
        let capture_counters = capture.counters();
        lifecycle.attach_capture(capture);

        let (events_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let shared = Arc::new(Shared {
            status: Mutex::new(LoopStatus {
                state: SessionState::Open,
                playback: PlaybackStats::default(),
                last_error: None,
            }),
            transcript: Mutex::new(Vec::new()),
            events: events_tx,
        });
        shared.notify(ConversationEvent::Opened {
            session_id: session_id.clone(),
        });

        let (control_tx, control_rx) = mpsc::channel(4);
        let task = tokio::spawn(run_event_loop(
            id.clone(),
            lifecycle,
            events,
            control_rx,
            Arc::clone(&shared),
        ));

        info!("Conversation {} live on session {}", id, session_id);

        Ok(Self {
            id,
            session_id,
            config,
            started_at: Utc::now(),
            control: control_tx,
            task: Mutex::new(Some(task)),
            shared,
            capture_counters,
            ledger,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Release ledger for every resource this conversation acquired
    pub fn ledger(&self) -> &ReleaseLedger {
        &self.ledger
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.shared.events.subscribe()
    }

    /// Stop the conversation and wait for teardown to finish
    ///
    /// Safe to call repeatedly, and after the session already ended on its own.
    pub async fn stop(&self) -> LiveResult<ConversationStats> {
        let task = self.task.lock().await.take();

        match task {
            Some(task) => {
                info!("Stopping conversation {}", self.id);
                // The loop may already be gone after a fatal error
                let _ = self.control.send(Control::Stop).await;
                if let Err(e) = task.await {
                    error!("Event loop for {} panicked: {}", self.id, e);
                }
            }
            None => debug!("Conversation {} already stopped", self.id),
        }

        Ok(self.get_stats().await)
    }

    pub async fn get_stats(&self) -> ConversationStats {
        let duration = Utc::now().signed_duration_since(self.started_at);
        let status = self.shared.status.lock().await;
        let turns_count = self.shared.transcript.lock().await.len();

        ConversationStats {
            conversation_id: self.id.clone(),
            session_id: Some(self.session_id.clone()),
            state: status.state,
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            frames_sent: self.capture_counters.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.capture_counters.frames_dropped.load(Ordering::Relaxed),
            frames_malformed: self.capture_counters.frames_malformed.load(Ordering::Relaxed),
            chunks_scheduled: status.playback.chunks_scheduled,
            chunks_dropped: status.playback.chunks_dropped,
            interruptions: status.playback.interruptions,
            turns_count,
            last_error: status.last_error.clone(),
        }
    }

    /// Finalized turns so far, oldest first
    pub async fn get_transcript(&self) -> Vec<TranscriptTurn> {
        self.shared.transcript.lock().await.clone()
    }

    pub async fn is_active(&self) -> bool {
        self.shared.status.lock().await.state == SessionState::Open
    }
}

impl Drop for LiveConversation {
    fn drop(&mut self) {
        // Abrupt cancellation: aborting the loop drops its lifecycle, which tears down
        if let Ok(mut task) = self.task.try_lock() {
            if let Some(task) = task.take() {
                debug!("Conversation {} dropped while running", self.id);
                task.abort();
            }
        }
    }
}

/// Single consumer of inbound session events
///
/// Events are handled one at a time in arrival order. The loop ends on stop,
/// on a fatal error, or when the remote side closes; every ending runs the
/// same teardown.
async fn run_event_loop(
    id: String,
    mut lifecycle: ResourceLifecycle,
    mut events: mpsc::Receiver<ServerEvent>,
    mut control: mpsc::Receiver<Control>,
    shared: Arc<Shared>,
) {
    let mut transcript = TranscriptAccumulator::new();

    let ending = loop {
        tokio::select! {
            biased;

            command = control.recv() => match command {
                Some(Control::Stop) | None => break Ending::Stopped,
            },

            event = events.recv() => {
                let Some(event) = event else { break Ending::StreamEnded };
                let kind = event.kind();

                let outcome = lifecycle.dispatch(event, &mut transcript);
                if let Some(playback) = lifecycle.scheduler().map(PlaybackScheduler::stats) {
                    shared.status.lock().await.playback = playback;
                }

                match outcome {
                    EventOutcome::Continue => {}
                    EventOutcome::Ignored => debug!("{} ignored {}", id, kind),
                    EventOutcome::TurnsCompleted(turns) => {
                        shared.transcript.lock().await.extend(turns.iter().cloned());
                        for turn in turns {
                            info!("{} [{}] {}", id, turn.speaker.as_str(), turn.text);
                            shared.notify(ConversationEvent::Turn(turn));
                        }
                    }
                    EventOutcome::Interrupted(cancelled) => {
                        shared.notify(ConversationEvent::Interrupted { cancelled });
                    }
                    EventOutcome::Fatal(e) => break Ending::Failed(e),
                    EventOutcome::RemoteClosed => break Ending::RemoteClosed,
                }
            }
        }
    };

    match &ending {
        Ending::Stopped => info!("Conversation {} stopped by user", id),
        Ending::RemoteClosed => info!("Conversation {} closed by remote", id),
        Ending::StreamEnded => warn!("Conversation {} lost its event stream", id),
        Ending::Failed(e) => error!("Conversation {} failed: {}", id, e),
    }

    {
        let mut status = shared.status.lock().await;
        status.state = SessionState::Closing;
    }

    let report = lifecycle.teardown();
    for e in &report.errors {
        warn!("Conversation {} teardown: {}", id, e);
    }

    let playback = lifecycle.scheduler().map(PlaybackScheduler::stats);
    {
        let mut status = shared.status.lock().await;
        status.state = SessionState::Closed;
        if let Some(playback) = playback {
            status.playback = playback;
        }
        if let Ending::Failed(e) = &ending {
            status.last_error = Some(e.user_message());
        }
    }

    if let Ending::Failed(e) = ending {
        shared.notify(ConversationEvent::Failed {
            message: e.user_message(),
        });
    }
    shared.notify(ConversationEvent::Closed);
}
