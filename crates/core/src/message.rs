//! Conversation messages and the bounded history that holds them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Default number of messages kept before the oldest ones are dropped.
pub const DEFAULT_MAX_MESSAGES: usize = 100;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Where the content of a message came from.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageSource {
    User,
    Ai,
    Mock,
    System,
}

impl fmt::Display for MessageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageSource::User => write!(f, "user"),
            MessageSource::Ai => write!(f, "ai"),
            MessageSource::Mock => write!(f, "mock"),
            MessageSource::System => write!(f, "system"),
        }
    }
}

/// A single entry of the conversation. Never mutated once appended.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub source: MessageSource,
    /// The line is spoken by Thomas, the simulated colleague.
    #[serde(default)]
    pub is_thomas: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coach_feedback: Option<String>,
    #[serde(default)]
    pub is_off_topic: bool,
    #[serde(default)]
    pub is_language_warning: bool,
}

impl Message {
    fn new(role: MessageRole, source: MessageSource, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            source,
            is_thomas: false,
            coach_feedback: None,
            is_off_topic: false,
            is_language_warning: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, MessageSource::User, content)
    }

    /// An assistant message produced by the model.
    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, MessageSource::Ai, content)
    }

    /// A scripted assistant message that never went through the model.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, MessageSource::System, content)
    }

    pub fn from_thomas(mut self) -> Self {
        self.is_thomas = true;
        self
    }

    pub fn with_coach_feedback(mut self, feedback: Option<String>) -> Self {
        self.coach_feedback = feedback.filter(|f| !f.trim().is_empty());
        self
    }

    pub fn off_topic(mut self) -> Self {
        self.is_off_topic = true;
        self
    }

    pub fn language_warning(mut self) -> Self {
        self.is_language_warning = true;
        self
    }
}

/// Append-only conversation history, trimmed from the front once it grows
/// past `max_messages`.
#[derive(Debug, Clone)]
pub struct MessageLog {
    messages: Vec<Message>,
    max_messages: usize,
}

impl MessageLog {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_messages: max_messages.max(1),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        if self.messages.len() > self.max_messages {
            let overflow = self.messages.len() - self.max_messages;
            self.messages.drain(..overflow);
        }
    }

    /// Drops the whole history and starts over from a single message.
    pub fn replace_with(&mut self, message: Message) {
        self.messages.clear();
        self.messages.push(message);
    }

    /// The last `count` messages, oldest first.
    pub fn recent(&self, count: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(count);
        &self.messages[start..]
    }

    pub fn find(&self, id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_drops_oldest_past_capacity() {
        let mut log = MessageLog::new(3);
        for i in 0..5 {
            log.push(Message::user(format!("message {}", i)));
        }

        assert_eq!(log.len(), 3);
        let contents: Vec<_> = log.as_slice().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["message 2", "message 3", "message 4"]);
    }

    #[test]
    fn test_recent_window() {
        let mut log = MessageLog::default();
        log.push(Message::system("hello"));
        log.push(Message::user("one"));
        log.push(Message::ai("two"));

        assert_eq!(log.recent(2).len(), 2);
        assert_eq!(log.recent(2)[0].content, "one");
        assert_eq!(log.recent(10).len(), 3);
        assert!(log.recent(0).is_empty());
    }

    #[test]
    fn test_replace_with_leaves_single_message() {
        let mut log = MessageLog::default();
        log.push(Message::user("a"));
        log.push(Message::ai("b"));
        log.replace_with(Message::system("fresh"));

        assert_eq!(log.len(), 1);
        assert_eq!(log.as_slice()[0].content, "fresh");
    }

    #[test]
    fn test_builders_set_flags() {
        let msg = Message::ai("Salut")
            .from_thomas()
            .with_coach_feedback(Some("Bien décrit.".to_string()));
        assert!(msg.is_thomas);
        assert_eq!(msg.role, MessageRole::Assistant);
        assert_eq!(msg.source, MessageSource::Ai);
        assert_eq!(msg.coach_feedback.as_deref(), Some("Bien décrit."));

        let blank = Message::ai("x").with_coach_feedback(Some("   ".to_string()));
        assert!(blank.coach_feedback.is_none());
    }

    #[test]
    fn test_message_serialization_uses_lowercase_tags() {
        let msg = Message::user("Bonjour");
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["role"], "user");
        assert_eq!(json["source"], "user");
        assert!(json.get("coach_feedback").is_none());
    }

    #[test]
    fn test_message_role_display() {
        assert_eq!(format!("{}", MessageRole::User), "user");
        assert_eq!(format!("{}", MessageRole::Assistant), "assistant");
    }

    #[test]
    fn test_message_source_display_matches_serialized_tag() {
        for source in [
            MessageSource::User,
            MessageSource::Ai,
            MessageSource::Mock,
            MessageSource::System,
        ] {
            assert_eq!(serde_json::to_value(source).unwrap(), source.to_string());
        }
    }
}
