use crate::audio::{CaptureConfig, PlaybackConfig};
use crate::context::{DEFAULT_INSTRUCTION_TEMPLATE, SUMMARY_WORD_LIMIT};

/// Configuration for one voice conversation
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Microphone side (16kHz mono by default)
    pub capture: CaptureConfig,

    /// Speaker side (24kHz mono by default)
    pub playback: PlaybackConfig,

    /// Remote voice model
    pub model: String,

    /// System instruction; `{summary}` is replaced by the document summary
    pub instruction_template: String,

    /// Summary length cap in words
    pub summary_word_limit: usize,

    /// Buffered `ConversationEvent`s per subscriber
    pub event_capacity: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            playback: PlaybackConfig::default(),
            model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            instruction_template: DEFAULT_INSTRUCTION_TEMPLATE.to_string(),
            summary_word_limit: SUMMARY_WORD_LIMIT,
            event_capacity: 64,
        }
    }
}
