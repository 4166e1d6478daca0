//! Length-prefixed JSON codec for relay frames
//!
//! Frame format: [4 bytes length (big endian)] [JSON payload]. The payload is
//! a tagged JSON document whose `channel` field carries the wire channel name.

use crate::error::{CoreError, Result};
use crate::types::RelayMessage;
use crate::MAX_FRAME_SIZE;

/// Frame codec for serialization/deserialization
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a message as a length-prefixed frame
    pub fn encode(msg: &RelayMessage) -> Result<Vec<u8>> {
        let payload = serde_json::to_vec(msg).map_err(CoreError::from)?;

        if payload.len() > MAX_FRAME_SIZE {
            return Err(CoreError::MessageTooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let len = payload.len() as u32;
        let mut buf = Vec::with_capacity(4 + payload.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&payload);

        Ok(buf)
    }

    /// Decode one message from a length-prefixed buffer
    pub fn decode(buf: &[u8]) -> Result<RelayMessage> {
        if buf.len() < 4 {
            return Err(CoreError::InvalidMessageFormat(
                "Buffer too small for length prefix".into(),
            ));
        }

        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

        if len > MAX_FRAME_SIZE {
            return Err(CoreError::MessageTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }

        if buf.len() < 4 + len {
            return Err(CoreError::InvalidMessageFormat(
                "Buffer too small for payload".into(),
            ));
        }

        Self::decode_payload(&buf[4..4 + len])
    }

    /// Decode a bare JSON payload (no length prefix)
    pub fn decode_payload(payload: &[u8]) -> Result<RelayMessage> {
        serde_json::from_slice(payload).map_err(CoreError::from)
    }
}
