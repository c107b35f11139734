pub mod audio;
pub mod config;
pub mod context;
pub mod error;
pub mod history;
pub mod http;
pub mod live;
pub mod session;

pub use audio::{
    AudioDevices, AudioFrame, AudioInput, AudioOutput, CaptureConfig, CapturePipeline,
    PlaybackConfig, PlaybackScheduler, VirtualDevices, WireFrame,
};
pub use config::Config;
pub use context::{DocumentPart, SessionContext, Summarizer};
pub use error::{LiveError, LiveResult};
pub use history::{HistoryRecord, HistoryStore};
pub use http::{create_router, AppState};
pub use live::{LiveTransport, ServerEvent, SessionHandle, SessionState, TranscriptAccumulator, TranscriptTurn};
pub use session::{ConversationConfig, ConversationDeps, ConversationEvent, ConversationStats, LiveConversation};
