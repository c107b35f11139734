use super::state::AppState;
use crate::context::DocumentPart;
use crate::error::LiveError;
use crate::history::HistoryRecord;
use crate::live::TranscriptTurn;
use crate::session::{ConversationEvent, ConversationStats, LiveConversation};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentUpload {
    pub name: String,
    pub mime_type: String,
    /// Base64-encoded file bytes
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartConversationRequest {
    #[serde(default)]
    pub documents: Vec<DocumentUpload>,
}

#[derive(Debug, Serialize)]
pub struct StartConversationResponse {
    pub conversation_id: String,
    pub session_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct StopConversationResponse {
    pub conversation_id: String,
    pub status: String,
    pub saved_to_history: bool,
    pub stats: ConversationStats,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

fn not_found(conversation_id: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        format!("Conversation {} not found", conversation_id),
    )
}

fn start_error_status(e: &LiveError) -> StatusCode {
    match e {
        LiveError::NoDocuments | LiveError::MalformedAudio(_) => StatusCode::BAD_REQUEST,
        LiveError::CaptureUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        LiveError::Connect(_) | LiveError::Summarizer(_) | LiveError::Transport(_) => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /conversations
/// Summarize the uploaded documents and start a voice conversation
pub async fn start_conversation(
    State(state): State<AppState>,
    Json(req): Json<StartConversationRequest>,
) -> impl IntoResponse {
    let mut documents = Vec::with_capacity(req.documents.len());
    for doc in req.documents {
        match base64::engine::general_purpose::STANDARD.decode(&doc.data) {
            Ok(data) => documents.push(DocumentPart {
                name: doc.name,
                mime_type: doc.mime_type,
                data,
            }),
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Document {} is not valid base64: {}", doc.name, e),
                )
            }
        }
    }

    info!("Starting conversation over {} documents", documents.len());

    let conversation =
        match LiveConversation::start(&state.deps, state.config.clone(), &documents).await {
            Ok(c) => Arc::new(c),
            Err(e) => {
                error!("Failed to start conversation: {}", e);
                return error_response(start_error_status(&e), e.user_message());
            }
        };

    let conversation_id = conversation.id().to_string();
    let session_id = conversation.session_id().to_string();
    let events = conversation.subscribe();

    {
        let mut conversations = state.conversations.write().await;
        conversations.insert(conversation_id.clone(), conversation);
    }

    tokio::spawn(reap_when_closed(state.clone(), conversation_id.clone(), events));

    info!("Conversation {} started", conversation_id);

    (
        StatusCode::OK,
        Json(StartConversationResponse {
            conversation_id,
            session_id,
            status: "active".to_string(),
        }),
    )
        .into_response()
}

/// POST /conversations/:conversation_id/stop
/// Stop a conversation and save its transcript to history
pub async fn stop_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> impl IntoResponse {
    info!("Stopping conversation: {}", conversation_id);

    let conversation = {
        let mut conversations = state.conversations.write().await;
        conversations.remove(&conversation_id)
    };

    let Some(conversation) = conversation else {
        error!("Conversation {} not found", conversation_id);
        return not_found(&conversation_id);
    };

    let stats = match conversation.stop().await {
        Ok(stats) => stats,
        Err(e) => {
            error!("Failed to stop conversation: {}", e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to stop conversation: {}", e),
            );
        }
    };

    let saved_to_history = save_to_history(&state, &conversation).await;

    (
        StatusCode::OK,
        Json(StopConversationResponse {
            conversation_id,
            status: "stopped".to_string(),
            saved_to_history,
            stats,
        }),
    )
        .into_response()
}

/// Save the transcript if the conversation produced any turns
async fn save_to_history(state: &AppState, conversation: &LiveConversation) -> bool {
    let turns = conversation.get_transcript().await;
    if turns.is_empty() {
        return false;
    }

    let record = HistoryRecord::from_turns(conversation.id(), turns);
    match state.history.append(record).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to save {} to history: {}", conversation.id(), e);
            false
        }
    }
}

/// Drop a conversation that ended on its own (server error, remote close)
///
/// A stop request removes the entry before closing, so this finds nothing
/// for conversations the client stopped.
async fn reap_when_closed(
    state: AppState,
    conversation_id: String,
    mut events: broadcast::Receiver<ConversationEvent>,
) {
    loop {
        match events.recv().await {
            Ok(ConversationEvent::Closed) => break,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }

    let conversation = state.conversations.write().await.remove(&conversation_id);
    let Some(conversation) = conversation else {
        debug!("Conversation {} already removed", conversation_id);
        return;
    };

    info!("Conversation {} ended, removing it", conversation_id);
    if let Err(e) = conversation.stop().await {
        warn!("Failed to finish conversation {}: {}", conversation_id, e);
    }
    save_to_history(&state, &conversation).await;
}

/// GET /conversations/:conversation_id/status
pub async fn get_conversation_status(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> impl IntoResponse {
    let conversations = state.conversations.read().await;

    match conversations.get(&conversation_id) {
        Some(conversation) => (StatusCode::OK, Json(conversation.get_stats().await)).into_response(),
        None => not_found(&conversation_id),
    }
}

/// GET /conversations/:conversation_id/transcript
/// Finalized turns accumulated so far
pub async fn get_conversation_transcript(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> impl IntoResponse {
    let conversations = state.conversations.read().await;

    match conversations.get(&conversation_id) {
        Some(conversation) => {
            let transcript: Vec<TranscriptTurn> = conversation.get_transcript().await;
            (StatusCode::OK, Json(transcript)).into_response()
        }
        None => not_found(&conversation_id),
    }
}

/// GET /history
pub async fn list_history(State(state): State<AppState>) -> impl IntoResponse {
    match state.history.list().await {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(e) => {
            error!("Failed to read history: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to read history: {}", e))
        }
    }
}

/// DELETE /history
pub async fn clear_history(State(state): State<AppState>) -> impl IntoResponse {
    match state.history.clear().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!("Failed to clear history: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to clear history: {}", e))
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
