//! Session grounding context
//!
//! The uploaded documents are summarized once, before the session connects.
//! The summary is embedded in the system instruction and never changes for
//! the lifetime of the session.

use async_nats::Client;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{LiveError, LiveResult};

/// Maximum summary length handed to the live session
pub const SUMMARY_WORD_LIMIT: usize = 500;

pub const DEFAULT_INSTRUCTION_TEMPLATE: &str = "You are a helpful voice assistant. \
Use the following summary of the user's documents as context for this conversation:\n\n{summary}";

/// One uploaded document
#[derive(Debug, Clone)]
pub struct DocumentPart {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Immutable document summary attached at connect time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    summary: Arc<str>,
}

impl SessionContext {
    pub fn new(summary: impl Into<Arc<str>>) -> Self {
        Self {
            summary: summary.into(),
        }
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Fill `{summary}` in the instruction template
    pub fn system_instruction(&self, template: &str) -> String {
        if template.contains("{summary}") {
            template.replace("{summary}", &self.summary)
        } else {
            format!("{}\n\n{}", template, self.summary)
        }
    }
}

/// External document summarizer
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, documents: &[DocumentPart]) -> LiveResult<String>;
}

/// Summarize `documents` into a context capped at `word_limit` words
pub async fn build_context(
    summarizer: &dyn Summarizer,
    documents: &[DocumentPart],
    word_limit: usize,
) -> LiveResult<SessionContext> {
    if documents.is_empty() {
        return Err(LiveError::NoDocuments);
    }

    info!("Summarizing {} documents for session context", documents.len());
    let summary = summarizer.summarize(documents).await?;
    let summary = cap_words(&summary, word_limit);

    info!("Session context ready ({} words)", summary.split_whitespace().count());
    Ok(SessionContext::new(summary))
}

/// Keep at most `limit` whitespace-separated words
pub fn cap_words(text: &str, limit: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= limit {
        return text.trim().to_string();
    }
    words[..limit].join(" ")
}

/// Fixed summary, for tests and offline runs
#[derive(Debug, Clone)]
pub struct StaticSummarizer(pub String);

#[async_trait]
impl Summarizer for StaticSummarizer {
    async fn summarize(&self, _documents: &[DocumentPart]) -> LiveResult<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SummarizeRequest {
    pub documents: Vec<EncodedDocument>,
    pub max_words: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EncodedDocument {
    pub name: String,
    pub mime_type: String,
    pub data: String, // Base64-encoded file bytes
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SummarizeReply {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Summarizer reached over NATS request/reply
pub struct NatsSummarizer {
    client: Client,
    subject: String,
    timeout: Duration,
    word_limit: usize,
}

impl NatsSummarizer {
    pub fn new(client: Client, subject: impl Into<String>, timeout: Duration, word_limit: usize) -> Self {
        Self {
            client,
            subject: subject.into(),
            timeout,
            word_limit,
        }
    }
}

#[async_trait]
impl Summarizer for NatsSummarizer {
    async fn summarize(&self, documents: &[DocumentPart]) -> LiveResult<String> {
        let request = SummarizeRequest {
            documents: documents
                .iter()
                .map(|doc| EncodedDocument {
                    name: doc.name.clone(),
                    mime_type: doc.mime_type.clone(),
                    data: base64::engine::general_purpose::STANDARD.encode(&doc.data),
                })
                .collect(),
            max_words: self.word_limit,
        };
        let payload = serde_json::to_vec(&request)?;

        let reply = tokio::time::timeout(
            self.timeout,
            self.client.request(self.subject.clone(), payload.into()),
        )
        .await
        .map_err(|_| LiveError::Summarizer("summarizer timed out".to_string()))?
        .map_err(|e| LiveError::Summarizer(e.to_string()))?;

        let reply: SummarizeReply = serde_json::from_slice(&reply.payload)
            .map_err(|e| LiveError::Summarizer(format!("invalid reply: {}", e)))?;

        match (reply.summary, reply.error) {
            (_, Some(error)) => Err(LiveError::Summarizer(error)),
            (Some(summary), None) => Ok(summary),
            (None, None) => Err(LiveError::Summarizer("empty reply".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> DocumentPart {
        DocumentPart {
            name: "lease.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            data: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_instruction_embeds_summary() {
        let context = SessionContext::new("Lease runs until May.");
        let instruction = context.system_instruction(DEFAULT_INSTRUCTION_TEMPLATE);
        assert!(instruction.ends_with("context for this conversation:\n\nLease runs until May."));
    }

    #[test]
    fn test_instruction_without_placeholder_appends() {
        let context = SessionContext::new("Summary.");
        assert_eq!(context.system_instruction("Be brief."), "Be brief.\n\nSummary.");
    }

    #[test]
    fn test_cap_words() {
        assert_eq!(cap_words("one two three", 5), "one two three");
        assert_eq!(cap_words("one  two\nthree four", 2), "one two");
    }

    #[tokio::test]
    async fn test_build_context_requires_documents() {
        let summarizer = StaticSummarizer("unused".to_string());
        let err = build_context(&summarizer, &[], SUMMARY_WORD_LIMIT).await.unwrap_err();
        assert!(matches!(err, LiveError::NoDocuments));
    }

    #[tokio::test]
    async fn test_build_context_caps_summary() {
        let summarizer = StaticSummarizer("word ".repeat(600));
        let context = build_context(&summarizer, &[doc()], SUMMARY_WORD_LIMIT).await.unwrap();
        assert_eq!(context.summary().split_whitespace().count(), SUMMARY_WORD_LIMIT);
    }
}
