//! Conversation types shared by transports and the engine

use serde::{Deserialize, Serialize};
use std::fmt;

/// Inbound message delivered by a transport adapter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundMessage {
    /// Transport-specific sender id (phone JID, Telegram user id, ...)
    pub sender_id: String,

    /// Raw message text
    pub text: String,

    /// Whether the message carried media
    #[serde(default)]
    pub has_attachment: bool,

    /// Text of the message being replied to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_text: Option<String>,
}

impl InboundMessage {
    /// Create a plain text message
    pub fn text(sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            text: text.into(),
            has_attachment: false,
            quoted_text: None,
        }
    }

    /// Attach quoted reply context
    pub fn with_quote(mut self, quoted: impl Into<String>) -> Self {
        self.quoted_text = Some(quoted.into());
        self
    }
}

/// Author of a chat turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human on the other side of the transport
    User,

    /// The assistant
    Model,
}

impl Role {
    /// Label used in summarization transcripts
    pub fn transcript_label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Model => "Bot",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Model => write!(f, "model"),
        }
    }
}

/// One immutable chat turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
        }
    }
}
