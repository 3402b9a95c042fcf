use serde::{Deserialize, Serialize};

use crate::domain::{ChatId, MessageId, UserId};

/// The dispatcher's input alphabet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum TransformEvent {
    Start,
    PhotoUpload { file_id: String },
    Command { label: String },
    Reset,
    Unknown { text: Option<String> },
}

impl TransformEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TransformEvent::Start => "start",
            TransformEvent::PhotoUpload { .. } => "photo_upload",
            TransformEvent::Command { .. } => "command",
            TransformEvent::Reset => "reset",
            TransformEvent::Unknown { .. } => "unknown",
        }
    }
}

/// One inbound chat message, already classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inbound {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub event: TransformEvent,
}
