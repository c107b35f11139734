//! Live duplex session with the remote voice service
//!
//! - `messages`: wire types for the handshake and the event stream
//! - `transport`: the `LiveTransport` seam and the `LiveLink` it produces
//! - `nats` / `loopback`: transport implementations
//! - `session`: state machine and inbound event dispatch
//! - `transcript`: turn assembly from transcription deltas

pub mod loopback;
pub mod messages;
pub mod nats;
pub mod session;
pub mod transcript;
pub mod transport;

pub use loopback::{LoopbackServer, LoopbackTransport};
pub use messages::{Modality, ServerEvent, SessionSetup};
pub use nats::NatsLiveTransport;
pub use session::{apply_event, EventOutcome, SessionGate, SessionHandle, SessionState};
pub use transcript::{Speaker, TranscriptAccumulator, TranscriptTurn};
pub use transport::{FrameSink, LiveLink, LiveTransport, OUTBOUND_QUEUE_FRAMES};
