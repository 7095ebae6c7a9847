//! Codec for encoding and decoding Parley frames.
//!
//! Frames travel as one JSON document per transport message, so there is no
//! length prefix; the transport preserves message boundaries.

use thiserror::Error;

use crate::frames::{InboundFrame, OutboundFrame};

/// Default maximum inbound frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Zero-length payload.
    #[error("Empty frame")]
    Empty,

    /// Frame exceeds the configured maximum size.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode a client frame, rejecting payloads larger than `max_len`.
///
/// # Errors
///
/// Returns an error if the payload is empty, too large, or not a valid
/// inbound frame.
pub fn decode_inbound(data: &[u8], max_len: usize) -> Result<InboundFrame, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::Empty);
    }
    if data.len() > max_len {
        return Err(ProtocolError::FrameTooLarge {
            size: data.len(),
            max: max_len,
        });
    }

    Ok(serde_json::from_slice(data)?)
}

/// Encode a server frame as JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(frame: &OutboundFrame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode a server frame. Used by clients and tests.
///
/// # Errors
///
/// Returns an error if the text is not a valid outbound frame.
pub fn decode_outbound(text: &str) -> Result<OutboundFrame, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}
