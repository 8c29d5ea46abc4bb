use super::User;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Reply,
    System,
    Other(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Text => "text",
            MessageType::Reply => "reply",
            MessageType::System => "system",
            MessageType::Other(s) => s,
        }
    }
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Text
    }
}

/// A chat message flowing through the processor pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub author: User,
    pub channel_id: String,
    pub server_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub message_type: MessageType,
}

impl Message {
    pub fn new(channel_id: impl Into<String>, author: User, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            author,
            channel_id: channel_id.into(),
            server_id: None,
            timestamp: Utc::now(),
            edited: false,
            message_type: MessageType::Text,
        }
    }

    pub fn with_server(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }

    pub fn with_message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    /// Copy of this message carrying new content, marked as edited
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        let mut msg = self.clone();
        msg.content = content.into();
        msg.edited = true;
        msg
    }
}
