use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::messages::{ServerEvent, SessionSetup};
use crate::audio::WireFrame;
use crate::error::{LiveError, LiveResult};

/// Remote live-session protocol
///
/// Implementations:
/// - NATS request/reply handshake plus pub/sub streams (`live::nats`)
/// - In-process loopback for tests and demos (`live::loopback`)
#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Perform the handshake and return the open link
    async fn connect(&self, setup: &SessionSetup) -> LiveResult<LiveLink>;

    /// Get transport name for logging
    fn name(&self) -> &str;
}

/// Outbound half of one link, driven by the link's writer task
#[async_trait]
pub trait FrameSink: Send + 'static {
    async fn send_frame(&mut self, sequence: u64, frame: WireFrame) -> LiveResult<()>;

    /// Final close notice; the writer exits afterwards
    async fn close(&mut self) -> LiveResult<()>;
}

/// Outbound frames a link holds before senders start dropping
pub const OUTBOUND_QUEUE_FRAMES: usize = 32;

/// One established duplex connection
///
/// Outbound frames go through a bounded queue drained by a writer task.
/// Senders never wait: when the queue is full the frame is dropped at the
/// source. Closing abandons whatever is still queued and lets the writer
/// deliver the close notice.
pub struct LiveLink {
    session_id: String,
    outbound: mpsc::Sender<WireFrame>,
    close_tx: Option<oneshot::Sender<()>>,
    events: Option<mpsc::Receiver<ServerEvent>>,
    reader: Option<JoinHandle<()>>,
}

impl LiveLink {
    /// Spawn the writer task for `sink` and wrap the inbound event stream
    pub fn new(
        session_id: impl Into<String>,
        sink: impl FrameSink,
        events: mpsc::Receiver<ServerEvent>,
    ) -> Self {
        let session_id = session_id.into();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_FRAMES);
        let (close_tx, close_rx) = oneshot::channel();

        tokio::spawn(run_writer(session_id.clone(), sink, outbound_rx, close_rx));

        Self {
            session_id,
            outbound,
            close_tx: Some(close_tx),
            events: Some(events),
            reader: None,
        }
    }

    /// Attach the task feeding the event stream so close can stop it
    pub fn with_reader(mut self, reader: JoinHandle<()>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Queue handle for outbound audio
    pub fn frame_sender(&self) -> mpsc::Sender<WireFrame> {
        self.outbound.clone()
    }

    /// Queue one frame without waiting
    pub fn send_audio(&self, frame: WireFrame) -> LiveResult<()> {
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => LiveError::Transport("outbound queue is full".to_string()),
            TrySendError::Closed(_) => LiveError::Transport("link is closed".to_string()),
        })
    }

    /// Hand the inbound event stream to its single consumer
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.events.take()
    }

    /// Signal close. Returns false if the link was already closed.
    pub fn close(&mut self) -> bool {
        let Some(close_tx) = self.close_tx.take() else {
            return false;
        };

        // The writer may already be gone if the remote side hung up
        let _ = close_tx.send(());
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        debug!("Link {} closing", self.session_id);
        true
    }
}

impl Drop for LiveLink {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_writer(
    session_id: String,
    mut sink: impl FrameSink,
    mut outbound: mpsc::Receiver<WireFrame>,
    mut close_rx: oneshot::Receiver<()>,
) {
    let mut sequence = 0u64;

    loop {
        tokio::select! {
            biased;

            // Fires on an explicit close and when the link is dropped
            _ = &mut close_rx => {
                let abandoned = {
                    outbound.close();
                    let mut count = 0usize;
                    while outbound.try_recv().is_ok() {
                        count += 1;
                    }
                    count
                };
                if abandoned > 0 {
                    debug!("Abandoned {} queued frames on {}", abandoned, session_id);
                }
                if let Err(e) = sink.close().await {
                    warn!("Failed to send close for {}: {}", session_id, e);
                }
                break;
            }

            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = sink.send_frame(sequence, frame).await {
                    warn!("Failed to send audio frame {} on {}: {}", sequence, session_id, e);
                }
                sequence += 1;
            }
        }
    }

    debug!("Writer for {} stopped after {} frames", session_id, sequence);
}
