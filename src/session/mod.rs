//! Voice conversation management
//!
//! This module provides the `LiveConversation` abstraction that manages:
//! - Document summary and session setup
//! - Microphone capture into the live session
//! - Scheduled playback of the remote voice
//! - Transcript collection
//! - Ordered, exactly-once resource teardown (`lifecycle`)

mod config;
mod conversation;
pub mod lifecycle;
mod stats;

pub use config::ConversationConfig;
pub use conversation::{ConversationDeps, ConversationEvent, LiveConversation};
pub use lifecycle::{ReleaseLedger, ResourceKind, ResourceLifecycle, TeardownReport};
pub use stats::ConversationStats;
