//! Payload codec for broker messages.
//!
//! Commands travel as plain UTF-8 payloads; announcements as JSON.

use thiserror::Error;

use crate::messages::{
    Announcement, ParamCommand, UpdateCommand, UPDATE_BEGIN_TOPIC, UPDATE_FINISH_TOPIC,
    UPDATE_WRITE_TOPIC,
};

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization failed.
    #[error("failed to (de)serialize message: {0}")]
    Json(#[from] serde_json::Error),

    /// Command payloads must be UTF-8 text.
    #[error("payload on '{topic}' is not valid UTF-8")]
    NonUtf8Payload { topic: String },

    /// The topic is not part of the command namespace.
    #[error("unknown command topic '{0}'")]
    UnknownTopic(String),

    /// The payload does not fit the command.
    #[error("invalid payload on '{topic}': {message}")]
    InvalidPayload { topic: String, message: String },
}

pub fn encode_announcement(announcement: &Announcement) -> Result<String, CodecError> {
    serde_json::to_string(announcement).map_err(CodecError::from)
}

pub fn decode_announcement(text: &str) -> Result<Announcement, CodecError> {
    serde_json::from_str(text).map_err(CodecError::from)
}

/// Decode a command from a local topic and its raw payload.
pub fn decode_command(topic: &str, payload: &[u8]) -> Result<ParamCommand, CodecError> {
    let text = std::str::from_utf8(payload).map_err(|_| CodecError::NonUtf8Payload {
        topic: topic.to_string(),
    })?;
    ParamCommand::parse(topic, text).ok_or_else(|| CodecError::UnknownTopic(topic.to_string()))
}

/// Decode a firmware update step. `begin` carries the image size as
/// decimal text, `write` carries raw image bytes.
pub fn decode_update(topic: &str, payload: &[u8]) -> Result<UpdateCommand, CodecError> {
    match topic {
        UPDATE_BEGIN_TOPIC => {
            let invalid = |message: String| CodecError::InvalidPayload {
                topic: topic.to_string(),
                message,
            };
            let text = std::str::from_utf8(payload).map_err(|_| CodecError::NonUtf8Payload {
                topic: topic.to_string(),
            })?;
            let size = text
                .trim()
                .parse::<usize>()
                .map_err(|e| invalid(format!("image size '{}': {e}", text.trim())))?;
            if size == 0 {
                return Err(invalid("image size must be positive".to_string()));
            }
            Ok(UpdateCommand::Begin(size))
        }
        UPDATE_WRITE_TOPIC => Ok(UpdateCommand::Write(payload.to_vec())),
        UPDATE_FINISH_TOPIC => Ok(UpdateCommand::Finish),
        _ => Err(CodecError::UnknownTopic(topic.to_string())),
    }
}
