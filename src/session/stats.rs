use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::live::SessionState;

/// Statistics about a voice conversation
#[derive(Debug, Clone, Serialize)]
pub struct ConversationStats {
    pub conversation_id: String,

    /// Remote session id, once connected
    pub session_id: Option<String>,

    pub state: SessionState,

    /// When the conversation started
    pub started_at: DateTime<Utc>,

    /// Wall-clock duration in seconds
    pub duration_secs: f64,

    /// Capture frames handed to the session
    pub frames_sent: u64,

    /// Capture frames dropped while the session was not open
    pub frames_dropped: u64,

    /// Capture frames that failed to encode
    pub frames_malformed: u64,

    /// Audio chunks scheduled for playback
    pub chunks_scheduled: u64,

    /// Inbound chunks dropped as malformed
    pub chunks_dropped: u64,

    pub interruptions: u64,

    /// Finalized transcript turns
    pub turns_count: usize,

    /// User-facing message of the fatal error that ended the session, if any
    pub last_error: Option<String>,
}
