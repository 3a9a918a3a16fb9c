//! MessagePack-RPC Transport Layer
//!
//! Framing on the wire is MessagePack itself: each frame is one serialized
//! 4-element array with no length prefix. Reads are fed to a
//! [`StreamDecoder`] that buffers partial frames until they complete.
//!
//! # Components
//!
//! - **[`MsgpackCodec`]**: Encode/decode whole frames
//! - **[`StreamDecoder`]**: Incremental decoder for socket reads
//! - **[`tcp`]**: Connect with timeout, frame writes, buffer limits

pub mod codec;
pub mod decoder;
pub mod tcp;

pub use codec::MsgpackCodec;
pub use decoder::StreamDecoder;
pub use tcp::{connect, write_frame, MAX_BUFFER_SIZE, SOCKET_RECV_SIZE};

#[cfg(test)]
mod tests;
