//! Framed message I/O over QUIC streams
//!
//! Frame format: [4-byte big-endian length][JSON payload], see
//! [`crate::protocol::FrameCodec`].

use quinn::{RecvStream, SendStream};

use crate::protocol::FrameCodec;
use crate::types::RelayMessage;
use crate::{CoreError, Result, MAX_FRAME_SIZE};

/// Encode and write one frame to a QUIC send stream
pub async fn send_message(send: &mut SendStream, msg: &RelayMessage) -> Result<()> {
    let encoded = FrameCodec::encode(msg)?;
    send.write_all(&encoded).await?;
    Ok(())
}

/// Reader for length-prefixed frames from a QUIC receive stream
pub struct MessageReader {
    recv: RecvStream,
}

impl MessageReader {
    pub fn new(recv: RecvStream) -> Self {
        Self { recv }
    }

    /// Read the next complete frame, waiting until it has fully arrived
    pub async fn read_message(&mut self) -> Result<RelayMessage> {
        let mut len_buf = [0u8; 4];
        self.recv
            .read_exact(&mut len_buf)
            .await
            .map_err(|_| CoreError::Connection("Stream closed while reading length".into()))?;

        let len = u32::from_be_bytes(len_buf) as usize;

        if len > MAX_FRAME_SIZE {
            return Err(CoreError::MessageTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut payload = vec![0u8; len];
        self.recv
            .read_exact(&mut payload)
            .await
            .map_err(|_| CoreError::Connection("Stream closed while reading payload".into()))?;

        FrameCodec::decode_payload(&payload)
    }
}
