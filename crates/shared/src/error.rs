use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const BUSY_TEXT: &str = "Please wait, the command is currently running";
pub const NO_PRIOR_COMMAND_TEXT: &str = "First you need to execute the commands";
pub const MISSING_ORIGINAL_TEXT: &str = "Send me a picture first";
pub const UNKNOWN_COMMAND_TEXT: &str = "Unknown command";
pub const DEFAULT_ERROR_TEXT: &str = "An error occurred, please try again later";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    MissingOriginal,
    NoPriorCommand,
    RenderFailed,
    Transport,
    Internal,
}

#[derive(Debug, Error)]
pub enum BotError {
    #[error("unknown transform command {label:?}")]
    NotFound { label: String },
    #[error("no photo has been uploaded yet")]
    MissingOriginal,
    #[error("retry requested before any transform was applied")]
    NoPriorCommand,
    #[error("render failed: {0}")]
    RenderFailed(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl BotError {
    pub fn code(&self) -> ErrorCode {
        match self {
            BotError::NotFound { .. } => ErrorCode::NotFound,
            BotError::MissingOriginal => ErrorCode::MissingOriginal,
            BotError::NoPriorCommand => ErrorCode::NoPriorCommand,
            BotError::RenderFailed(_) => ErrorCode::RenderFailed,
            BotError::Transport(_) => ErrorCode::Transport,
            BotError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Text shown to the user; `None` means the generic error text applies.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            BotError::NotFound { .. } => Some(UNKNOWN_COMMAND_TEXT),
            BotError::MissingOriginal => Some(MISSING_ORIGINAL_TEXT),
            BotError::NoPriorCommand => Some(NO_PRIOR_COMMAND_TEXT),
            BotError::RenderFailed(_) | BotError::Transport(_) | BotError::Internal(_) => None,
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        BotError::Internal(format!("{err:#}"))
    }
}
