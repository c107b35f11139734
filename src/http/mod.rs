//! HTTP API server for the UI shell
//!
//! This module provides a REST API for controlling voice conversations:
//! - POST /conversations - Summarize documents and start a conversation
//! - POST /conversations/:id/stop - Stop a conversation (saves it to history)
//! - GET /conversations/:id/status - Query conversation stats
//! - GET /conversations/:id/transcript - Get finalized turns so far
//! - GET /history, DELETE /history - List or clear saved conversations
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{DocumentUpload, StartConversationRequest};
pub use routes::create_router;
pub use state::AppState;
