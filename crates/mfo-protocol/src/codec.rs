//! Length-framed JSON codec for the launcher pipes.
//!
//! Each frame is a 4-byte big-endian payload length followed by a JSON
//! body. The decoder is purely incremental - feed it whatever a
//! non-blocking read produced and pop complete frames - so it never
//! forces its caller to block on a partial frame.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ProtocolError;

/// Frames larger than this are rejected outright; a well-formed peer
/// never comes close, so an oversized length prefix means a desynced or
/// hostile stream.
pub const MAX_FRAME_SIZE: usize = 1_048_576;

const LENGTH_PREFIX: usize = 4;

/// Encodes one message into a ready-to-write frame.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { size: body.len() });
    }
    let mut frame = Vec::with_capacity(LENGTH_PREFIX + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decodes one frame body into a message.
pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(body)?)
}

/// Incremental frame decoder.
///
/// Buffers bytes across reads and yields complete frame bodies in input
/// order. A frame split across arbitrarily many reads decodes the same
/// as one delivered whole.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly read bytes to the internal buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pops the next complete frame body, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        if self.buffer.len() < LENGTH_PREFIX {
            return Ok(None);
        }
        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&self.buffer[..LENGTH_PREFIX]);
        let length = u32::from_be_bytes(prefix) as usize;
        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge { size: length });
        }
        if self.buffer.len() < LENGTH_PREFIX + length {
            return Ok(None);
        }
        let body = self.buffer[LENGTH_PREFIX..LENGTH_PREFIX + length].to_vec();
        self.buffer.drain(..LENGTH_PREFIX + length);
        Ok(Some(body))
    }

    /// Pops and deserializes the next complete message, if one is buffered.
    pub fn next_message<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ProtocolError> {
        match self.next_frame()? {
            Some(body) => Ok(Some(decode_body(&body)?)),
            None => Ok(None),
        }
    }

    /// Bytes buffered but not yet consumed as a frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{LaunchReply, LaunchRequest};

    #[test]
    fn test_back_to_back_frames_decode_in_order() {
        let mut decoder = FrameDecoder::new();
        let mut wire = Vec::new();
        for i in 0..3 {
            wire.extend(encode_frame(&LaunchRequest::new(format!("filter-{i}"))).unwrap());
        }
        decoder.feed(&wire);

        for i in 0..3 {
            let request: LaunchRequest = decoder.next_message().unwrap().unwrap();
            assert_eq!(request.command_line, format!("filter-{i}"));
        }
        assert!(decoder.next_frame().unwrap().is_none());
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_frame_split_across_feeds() {
        let mut decoder = FrameDecoder::new();
        let frame = encode_frame(&LaunchReply::Launched { pid: 7 }).unwrap();

        let (last, head) = frame.split_last().unwrap();
        for chunk in head.chunks(3) {
            decoder.feed(chunk);
            assert!(decoder.next_frame().unwrap().is_none());
        }
        decoder.feed(&[*last]);
        let reply: LaunchReply = decoder.next_message().unwrap().unwrap();
        assert_eq!(reply, LaunchReply::Launched { pid: 7 });
    }

    #[test]
    fn test_oversized_length_prefix_rejected() {
        let mut decoder = FrameDecoder::new();
        let mut wire = ((MAX_FRAME_SIZE + 1) as u32).to_be_bytes().to_vec();
        wire.extend_from_slice(b"garbage");
        decoder.feed(&wire);
        assert!(matches!(
            decoder.next_frame(),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_truncated_prefix_yields_nothing() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&[0, 0]);
        assert!(decoder.next_frame().unwrap().is_none());
        assert_eq!(decoder.pending(), 2);
    }

    #[test]
    fn test_encode_rejects_oversized_body() {
        let request = LaunchRequest::new("x".repeat(MAX_FRAME_SIZE + 64));
        assert!(matches!(
            encode_frame(&request),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }
}
