use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Participant in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Assistant => "assistant",
        }
    }
}

/// One finalized utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptTurn {
    /// e.g. `user-<uuid>`
    pub id: String,
    pub speaker: Speaker,
    pub text: String,
    /// When the turn-complete signal arrived
    pub completed_at: DateTime<Utc>,
}

/// Assembles transcription deltas into turns
///
/// Both participants accumulate independently between turn boundaries.
/// Text is only emitted on `complete_turn`; an empty turn is never emitted.
#[derive(Debug, Default)]
pub struct TranscriptAccumulator {
    user: String,
    assistant: String,
}

impl TranscriptAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, speaker: Speaker, delta: &str) {
        match speaker {
            Speaker::User => self.user.push_str(delta),
            Speaker::Assistant => self.assistant.push_str(delta),
        }
    }

    /// In-progress text for one participant
    pub fn pending(&self, speaker: Speaker) -> &str {
        match speaker {
            Speaker::User => &self.user,
            Speaker::Assistant => &self.assistant,
        }
    }

    /// Finalize both turns (user first) and start fresh ones
    pub fn complete_turn(&mut self) -> Vec<TranscriptTurn> {
        let completed_at = Utc::now();
        let mut turns = Vec::with_capacity(2);

        for (speaker, text) in [
            (Speaker::User, std::mem::take(&mut self.user)),
            (Speaker::Assistant, std::mem::take(&mut self.assistant)),
        ] {
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            turns.push(TranscriptTurn {
                id: format!("{}-{}", speaker.as_str(), uuid::Uuid::new_v4()),
                speaker,
                text: text.to_string(),
                completed_at,
            });
        }

        turns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deltas_join_into_one_turn() {
        let mut acc = TranscriptAccumulator::new();
        acc.append(Speaker::Assistant, "Hel");
        acc.append(Speaker::Assistant, "lo");

        let turns = acc.complete_turn();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].speaker, Speaker::Assistant);
        assert_eq!(turns[0].text, "Hello");
        assert!(turns[0].id.starts_with("assistant-"));
    }

    #[test]
    fn test_empty_turn_emits_nothing() {
        let mut acc = TranscriptAccumulator::new();
        assert!(acc.complete_turn().is_empty());

        acc.append(Speaker::User, "   ");
        assert!(acc.complete_turn().is_empty());
    }

    #[test]
    fn test_user_turn_comes_first() {
        let mut acc = TranscriptAccumulator::new();
        acc.append(Speaker::Assistant, "It is due in May.");
        acc.append(Speaker::User, " When is it due? ");

        let turns = acc.complete_turn();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].speaker, Speaker::User);
        assert_eq!(turns[0].text, "When is it due?");
        assert_eq!(turns[1].speaker, Speaker::Assistant);
    }

    #[test]
    fn test_accumulators_reset_after_turn() {
        let mut acc = TranscriptAccumulator::new();
        acc.append(Speaker::User, "first");
        acc.complete_turn();

        assert_eq!(acc.pending(Speaker::User), "");
        acc.append(Speaker::User, "second");
        assert_eq!(acc.complete_turn()[0].text, "second");
    }
}
