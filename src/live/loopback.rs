// In-process live transport
//
// The server half is driven by the caller: it emits events into the session
// and records what the session sent. Used by the integration tests and by
// the service when no NATS server is configured.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use super::messages::{ServerEvent, SessionSetup};
use super::transport::{FrameSink, LiveLink, LiveTransport};
use crate::audio::WireFrame;
use crate::error::{LiveError, LiveResult};

#[derive(Debug, Default)]
struct LoopbackState {
    connect_failure: Option<String>,
    setups: Vec<SessionSetup>,
    /// Live sessions in connect order
    sessions: Vec<(String, mpsc::Sender<ServerEvent>)>,
    frames: Vec<(String, u64, WireFrame)>,
    closes: usize,
}

impl LoopbackState {
    fn sender(&self, session_id: Option<&str>) -> Option<mpsc::Sender<ServerEvent>> {
        match session_id {
            Some(id) => self
                .sessions
                .iter()
                .find(|(session, _)| session == id)
                .map(|(_, tx)| tx.clone()),
            None => self.sessions.last().map(|(_, tx)| tx.clone()),
        }
    }
}

/// Client half handed to the conversation
#[derive(Debug, Clone, Default)]
pub struct LoopbackTransport {
    state: Arc<Mutex<LoopbackState>>,
}

/// Server half kept by the caller
#[derive(Debug, Clone)]
pub struct LoopbackServer {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackTransport {
    pub fn new() -> (Self, LoopbackServer) {
        let transport = Self::default();
        let server = LoopbackServer {
            state: Arc::clone(&transport.state),
        };
        (transport, server)
    }
}

impl LoopbackServer {
    /// Reject the next handshake with `reason`
    pub fn fail_next_connect(&self, reason: impl Into<String>) {
        self.state.lock().connect_failure = Some(reason.into());
    }

    /// Deliver an event to the most recently connected live session
    ///
    /// Returns false if no session is listening.
    pub async fn emit(&self, event: ServerEvent) -> bool {
        let tx = self.state.lock().sender(None);
        Self::deliver(tx, event).await
    }

    /// Deliver an event to one session by id
    pub async fn emit_to(&self, session_id: &str, event: ServerEvent) -> bool {
        let tx = self.state.lock().sender(Some(session_id));
        Self::deliver(tx, event).await
    }

    async fn deliver(tx: Option<mpsc::Sender<ServerEvent>>, event: ServerEvent) -> bool {
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Setups received by successful and failed handshakes
    pub fn setups(&self) -> Vec<SessionSetup> {
        self.state.lock().setups.clone()
    }

    /// Frames received from every session, with their sequence numbers
    pub fn frames(&self) -> Vec<(u64, WireFrame)> {
        self.state
            .lock()
            .frames
            .iter()
            .map(|(_, sequence, frame)| (*sequence, frame.clone()))
            .collect()
    }

    /// Frames received from one session
    pub fn frames_from(&self, session_id: &str) -> Vec<(u64, WireFrame)> {
        self.state
            .lock()
            .frames
            .iter()
            .filter(|(session, _, _)| session == session_id)
            .map(|(_, sequence, frame)| (*sequence, frame.clone()))
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }

    /// Sessions connected and not yet closed
    pub fn live_sessions(&self) -> Vec<String> {
        self.state
            .lock()
            .sessions
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[async_trait]
impl LiveTransport for LoopbackTransport {
    async fn connect(&self, setup: &SessionSetup) -> LiveResult<LiveLink> {
        let (events_tx, events_rx) = mpsc::channel(64);
        let session_id = format!("loopback-{}", uuid::Uuid::new_v4());

        {
            let mut state = self.state.lock();
            state.setups.push(setup.clone());
            if let Some(reason) = state.connect_failure.take() {
                return Err(LiveError::Connect(reason));
            }
            state.sessions.push((session_id.clone(), events_tx));
        }

        info!("Loopback session {} connected", session_id);

        let sink = LoopbackSink {
            session_id: session_id.clone(),
            state: Arc::clone(&self.state),
        };
        Ok(LiveLink::new(session_id, sink, events_rx))
    }

    fn name(&self) -> &str {
        "loopback"
    }
}

struct LoopbackSink {
    session_id: String,
    state: Arc<Mutex<LoopbackState>>,
}

#[async_trait]
impl FrameSink for LoopbackSink {
    async fn send_frame(&mut self, sequence: u64, frame: WireFrame) -> LiveResult<()> {
        self.state
            .lock()
            .frames
            .push((self.session_id.clone(), sequence, frame));
        Ok(())
    }

    async fn close(&mut self) -> LiveResult<()> {
        let mut state = self.state.lock();
        state.closes += 1;
        state.sessions.retain(|(id, _)| id != &self.session_id);
        Ok(())
    }
}
