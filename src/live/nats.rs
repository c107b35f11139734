use async_nats::Client;
use async_trait::async_trait;
use futures::stream::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::messages::{CloseNotice, ConnectReply, ConnectRequest, RealtimeInput, ServerEvent, SessionSetup};
use super::transport::{FrameSink, LiveLink, LiveTransport};
use crate::audio::WireFrame;
use crate::error::{LiveError, LiveResult};

/// Inbound events buffered between the NATS subscription and the session
const EVENT_QUEUE_DEPTH: usize = 256;

/// Subjects used by one live session
///
/// - `<prefix>.connect`            handshake (request/reply)
/// - `<prefix>.<session>.input`    outbound audio frames
/// - `<prefix>.<session>.events`   inbound server events
/// - `<prefix>.<session>.close`    close notice
#[derive(Debug, Clone)]
pub struct LiveSubjects {
    prefix: String,
}

impl LiveSubjects {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn connect(&self) -> String {
        format!("{}.connect", self.prefix)
    }

    pub fn input(&self, session_id: &str) -> String {
        format!("{}.{}.input", self.prefix, session_id)
    }

    pub fn events(&self, session_id: &str) -> String {
        format!("{}.{}.events", self.prefix, session_id)
    }

    pub fn close(&self, session_id: &str) -> String {
        format!("{}.{}.close", self.prefix, session_id)
    }
}

/// Live session transport over NATS
pub struct NatsLiveTransport {
    client: Client,
    subjects: LiveSubjects,
    connect_timeout: Duration,
}

impl NatsLiveTransport {
    /// Connect to NATS server
    pub async fn connect(url: &str, prefix: &str, connect_timeout: Duration) -> anyhow::Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url).await?;

        info!("Connected to NATS successfully");

        Ok(Self::with_client(client, prefix, connect_timeout))
    }

    pub fn with_client(client: Client, prefix: &str, connect_timeout: Duration) -> Self {
        Self {
            client,
            subjects: LiveSubjects::new(prefix),
            connect_timeout,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl LiveTransport for NatsLiveTransport {
    async fn connect(&self, setup: &SessionSetup) -> LiveResult<LiveLink> {
        let session_id = uuid::Uuid::new_v4().to_string();

        // Subscribe before the handshake so no early event is missed
        let events_subject = self.subjects.events(&session_id);
        let mut subscriber = self
            .client
            .subscribe(events_subject.clone())
            .await
            .map_err(|e| LiveError::Connect(format!("subscribe {}: {}", events_subject, e)))?;

        let request = ConnectRequest {
            session_id: session_id.clone(),
            setup: setup.clone(),
        };
        let payload = serde_json::to_vec(&request)?;

        info!(
            "Requesting live session {} (model {}) on {}",
            session_id,
            setup.model,
            self.subjects.connect()
        );

        let reply = tokio::time::timeout(
            self.connect_timeout,
            self.client.request(self.subjects.connect(), payload.into()),
        )
        .await
        .map_err(|_| LiveError::Connect("handshake timed out".to_string()))?
        .map_err(|e| LiveError::Connect(e.to_string()))?;

        let reply: ConnectReply = serde_json::from_slice(&reply.payload)
            .map_err(|e| LiveError::Connect(format!("invalid handshake reply: {}", e)))?;
        if !reply.ok {
            return Err(LiveError::Connect(
                reply.error.unwrap_or_else(|| "rejected by server".to_string()),
            ));
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let reader_session = session_id.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                match serde_json::from_slice::<ServerEvent>(&msg.payload) {
                    Ok(event) => {
                        if events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to parse server event on {}: {}", reader_session, e),
                }
            }
            debug!("Event reader for {} stopped", reader_session);
        });

        let sink = NatsFrameSink {
            client: self.client.clone(),
            subjects: self.subjects.clone(),
            session_id: session_id.clone(),
        };

        Ok(LiveLink::new(session_id, sink, events_rx).with_reader(reader))
    }

    fn name(&self) -> &str {
        "nats"
    }
}

struct NatsFrameSink {
    client: Client,
    subjects: LiveSubjects,
    session_id: String,
}

#[async_trait]
impl FrameSink for NatsFrameSink {
    async fn send_frame(&mut self, sequence: u64, frame: WireFrame) -> LiveResult<()> {
        let message = RealtimeInput {
            session_id: self.session_id.clone(),
            sequence,
            media: frame,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let payload = serde_json::to_vec(&message)?;

        self.client
            .publish(self.subjects.input(&self.session_id), payload.into())
            .await
            .map_err(|e| LiveError::Transport(e.to_string()))
    }

    async fn close(&mut self) -> LiveResult<()> {
        let notice = CloseNotice {
            session_id: self.session_id.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let payload = serde_json::to_vec(&notice)?;

        self.client
            .publish(self.subjects.close(&self.session_id), payload.into())
            .await
            .map_err(|e| LiveError::Transport(e.to_string()))?;
        self.client
            .flush()
            .await
            .map_err(|e| LiveError::Transport(e.to_string()))?;

        info!("Closed live session {}", self.session_id);
        Ok(())
    }
}
