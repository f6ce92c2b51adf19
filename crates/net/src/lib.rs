#![warn(missing_docs)]
//! Wire protocol shared by the master and its peers.
//!
//! Frames are length-prefixed and big-endian. [`codec`] moves fields in and
//! out of frames, [`protocol`] defines the messages, [`PeerConnection`] is the
//! master's handle on one peer and [`PeerClient`] is the peer side.

mod client;
pub mod codec;
mod connection;
mod error;
pub mod protocol;

pub use client::PeerClient;
pub use codec::{decode_frame, read_frame, Frame, FrameReader, FrameWriter, DEFAULT_MAX_FRAME_BYTES};
pub use connection::{ConnectionState, PeerConnection, ResponseSender};
pub use error::ProtocolError;
pub use protocol::{
    error_codes, ops, ChunkData, ChunkLock, ChunkUnlock, ChunkWritten, ErrorReply, Hello,
    HelloAck, LockChunk, Ping, Pong, ReadChunk, UnlockChunk, WireMessage, WriteChunk,
    WriteTickTime, DEFAULT_PORT, PROTOCOL_VERSION,
};
