use thiserror::Error;

/// Errors raised by the live voice core
///
/// Fatal kinds tear the whole conversation down; `MalformedAudio` is
/// absorbed where it happens and only ever logged.
#[derive(Debug, Error)]
pub enum LiveError {
    /// Microphone unreachable (permission denied, no device)
    #[error("capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// Session handshake failed; no session was created
    #[error("connect error: {0}")]
    Connect(String),

    /// Remote service reported a fault mid-session
    #[error("session error: {0}")]
    Session(String),

    /// One frame failed to encode or decode
    #[error("malformed audio: {0}")]
    MalformedAudio(String),

    /// A resource failed to release cleanly
    #[error("teardown error: {0}")]
    Teardown(String),

    #[error("no documents provided")]
    NoDocuments,

    #[error("summarizer error: {0}")]
    Summarizer(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type LiveResult<T> = Result<T, LiveError>;

impl LiveError {
    /// Message shown to the end user in place of the active session
    pub fn user_message(&self) -> String {
        match self {
            LiveError::NoDocuments => {
                "Please upload at least one document to start a voice conversation.".to_string()
            }
            LiveError::CaptureUnavailable(_) => {
                "Microphone access is required for voice chat.".to_string()
            }
            LiveError::Session(_) | LiveError::Transport(_) => {
                "Connection error. Please try again.".to_string()
            }
            LiveError::Connect(reason) | LiveError::Summarizer(reason) => {
                format!("Failed to start voice session: {}", reason)
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_for_capture_and_documents() {
        assert_eq!(
            LiveError::CaptureUnavailable("denied".into()).user_message(),
            "Microphone access is required for voice chat."
        );
        assert_eq!(
            LiveError::Connect("refused".into()).user_message(),
            "Failed to start voice session: refused"
        );
    }

    #[test]
    fn test_user_message_for_session_fault() {
        let err = LiveError::Session("internal".into());
        assert_eq!(err.user_message(), "Connection error. Please try again.");
    }
}
