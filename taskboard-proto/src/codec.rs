//! Serialization and deserialization for the `Taskboard` wire protocol.
//!
//! Every WebSocket binary frame carries exactly one postcard-encoded
//! [`ClientFrame`](crate::sync::ClientFrame) or
//! [`ServerMessage`](crate::sync::ServerMessage). WebSocket preserves message
//! boundaries, so no length prefix is added.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::sync::{ClientFrame, ServerMessage};

/// Default maximum size of a single encoded frame (64 KB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Frame exceeds the configured size limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Configured limit.
        max: usize,
    },
}

/// Encodes a protocol value into a byte vector using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the value cannot be serialized.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(value).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a protocol value from a byte slice using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes cannot be deserialized.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`ClientFrame`], rejecting frames larger than `max_size`
/// before touching the payload.
///
/// # Errors
///
/// Returns `CodecError::FrameTooLarge` or `CodecError::Serialization`.
pub fn decode_client_frame(bytes: &[u8], max_size: usize) -> Result<ClientFrame, CodecError> {
    if bytes.len() > max_size {
        return Err(CodecError::FrameTooLarge {
            size: bytes.len(),
            max: max_size,
        });
    }
    decode(bytes)
}

/// Decodes a [`ServerMessage`].
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes cannot be deserialized.
pub fn decode_server_message(bytes: &[u8]) -> Result<ServerMessage, CodecError> {
    decode(bytes)
}
