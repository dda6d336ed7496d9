//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding or decoding launcher frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A frame body failed to serialize or deserialize.
    #[error("malformed launcher message: {0}")]
    Json(#[from] serde_json::Error),

    /// A length prefix or body exceeded [`crate::codec::MAX_FRAME_SIZE`].
    #[error("launcher frame of {size} bytes exceeds the frame limit")]
    FrameTooLarge { size: usize },
}
