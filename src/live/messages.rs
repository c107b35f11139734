use serde::{Deserialize, Serialize};

use crate::audio::WireFrame;

/// Response modality requested from the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modality {
    Audio,
    Text,
}

/// Session configuration sent with the handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSetup {
    pub model: String,
    pub response_modalities: Vec<Modality>,
    /// Transcribe the user's speech
    pub input_audio_transcription: bool,
    /// Transcribe the assistant's speech
    pub output_audio_transcription: bool,
    /// Grounding context for the assistant
    pub system_instruction: String,
}

impl SessionSetup {
    /// Audio responses with transcription in both directions
    pub fn voice(model: impl Into<String>, system_instruction: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            response_modalities: vec![Modality::Audio],
            input_audio_transcription: true,
            output_audio_transcription: true,
            system_instruction: system_instruction.into(),
        }
    }
}

/// Handshake request
#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub session_id: String,
    pub setup: SessionSetup,
}

/// Handshake reply
#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectReply {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Captured audio frame sent to the remote service
#[derive(Debug, Serialize, Deserialize)]
pub struct RealtimeInput {
    pub session_id: String,
    pub sequence: u64,
    pub media: WireFrame,
    pub timestamp: String, // RFC3339 timestamp
}

/// Close notice sent when the session ends
#[derive(Debug, Serialize, Deserialize)]
pub struct CloseNotice {
    pub session_id: String,
    pub timestamp: String,
}

/// Inbound event from the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    InputTranscriptionDelta { text: String },
    OutputTranscriptionDelta { text: String },
    AudioChunk { frame: WireFrame },
    TurnComplete,
    Interrupted,
    Error { reason: String },
    Closed,
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::InputTranscriptionDelta { .. } => "input_transcription_delta",
            ServerEvent::OutputTranscriptionDelta { .. } => "output_transcription_delta",
            ServerEvent::AudioChunk { .. } => "audio_chunk",
            ServerEvent::TurnComplete => "turn_complete",
            ServerEvent::Interrupted => "interrupted",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Closed => "closed",
        }
    }
}
