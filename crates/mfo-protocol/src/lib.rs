//! mfo-protocol - Wire protocol for the privilege-separated launcher
//!
//! The mfo manager drops its elevated privileges shortly after startup;
//! spawning filter processes afterwards goes through a privileged helper
//! forked beforehand. This crate defines the byte protocol between the
//! two processes:
//! - `message` - spawn-request and spawn-reply types
//! - `codec` - length-framed JSON encoding and an incremental decoder
//!
//! Replies are strictly FIFO with respect to requests; the codec itself
//! does no I/O so both blocking and reactor-driven endpoints share it.

pub mod codec;
pub mod error;
pub mod message;

// Re-exports for convenience
pub use codec::{decode_body, encode_frame, FrameDecoder, MAX_FRAME_SIZE};
pub use error::ProtocolError;
pub use message::{LaunchReply, LaunchRequest};
