//! UI-agnostic conversation types
//!
//! These are shared by the store, the session and whatever front-end renders
//! the conversation, and don't depend on any specific UI framework.

use serde::{Deserialize, Serialize};

/// One message in the conversation, tagged with its speaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    /// Avatar shown next to the role's messages
    pub fn avatar(&self) -> &'static str {
        match self {
            ChatRole::User => "👤",
            ChatRole::Assistant => "🤖",
        }
    }
}
