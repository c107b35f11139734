use crate::history::HistoryStore;
use crate::session::{ConversationConfig, ConversationDeps, LiveConversation};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Running conversations (conversation_id → conversation)
    pub conversations: Arc<RwLock<HashMap<String, Arc<LiveConversation>>>>,

    /// Transport, devices and summarizer every new conversation starts with
    pub deps: ConversationDeps,

    pub config: ConversationConfig,

    pub history: Arc<dyn HistoryStore>,
}

impl AppState {
    pub fn new(deps: ConversationDeps, config: ConversationConfig, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
            deps,
            config,
            history,
        }
    }
}
