//! Message definitions for master/peer communication.
//!
//! Each message knows its operation name and how to move its fields through a
//! [`FrameWriter`] / [`FrameReader`]. The frame header (length, request id,
//! op name) is handled by the codec.

use crate::codec::{FrameReader, FrameWriter};
use crate::error::ProtocolError;

/// Protocol version announced in `hello` and `helloAck`.
pub const PROTOCOL_VERSION: i32 = 1;

/// Default TCP port of the master.
pub const DEFAULT_PORT: u16 = 35353;

/// Operation names as they appear on the wire.
pub mod ops {
    /// Handshake request.
    pub const HELLO: &str = "hello";
    /// Handshake response.
    pub const HELLO_ACK: &str = "helloAck";
    /// Liveness probe.
    pub const PING: &str = "ping";
    /// Liveness reply.
    pub const PONG: &str = "pong";
    /// Chunk payload read.
    pub const READ_CHUNK: &str = "readChunk";
    /// Chunk payload read response.
    pub const CHUNK_DATA: &str = "chunkData";
    /// Chunk payload write.
    pub const WRITE_CHUNK: &str = "writeChunk";
    /// Chunk payload write response.
    pub const CHUNK_WRITTEN: &str = "chunkWritten";
    /// Ownership claim.
    pub const LOCK_CHUNK: &str = "lockChunk";
    /// Ownership claim response.
    pub const CHUNK_LOCK: &str = "chunkLock";
    /// Ownership release.
    pub const UNLOCK_CHUNK: &str = "unlockChunk";
    /// Ownership release response.
    pub const CHUNK_UNLOCK: &str = "chunkUnlock";
    /// Tick time report. Never answered.
    pub const WRITE_TICK_TIME: &str = "writeTickTime";
    /// Failure response to any request.
    pub const ERROR: &str = "error";
}

/// A message that can be carried in one frame.
pub trait WireMessage: Sized {
    /// Operation name written in the frame header.
    const OP: &'static str;

    /// Append the message fields.
    fn encode(&self, out: &mut FrameWriter) -> Result<(), ProtocolError>;

    /// Read the message fields.
    fn decode(input: &mut FrameReader) -> Result<Self, ProtocolError>;

    /// Encode a complete frame tagged with `request_id`.
    fn to_frame(&self, request_id: i32) -> Result<Vec<u8>, ProtocolError> {
        let mut out = FrameWriter::new(request_id, Self::OP)?;
        self.encode(&mut out)?;
        Ok(out.finish())
    }

    /// Decode the fields and require the frame to be fully consumed.
    fn decode_exact(input: &mut FrameReader) -> Result<Self, ProtocolError> {
        let message = Self::decode(input)?;
        input.finish()?;
        Ok(message)
    }
}

/// Handshake sent as the first frame of every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// Protocol version the peer speaks.
    pub version: i32,
    /// Network name other peers are redirected to.
    pub name: String,
}

impl WireMessage for Hello {
    const OP: &'static str = ops::HELLO;

    fn encode(&self, out: &mut FrameWriter) -> Result<(), ProtocolError> {
        out.write_i32(self.version).write_utf(&self.name)?;
        Ok(())
    }

    fn decode(input: &mut FrameReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            version: input.read_i32()?,
            name: input.read_utf()?,
        })
    }
}

/// Handshake acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloAck {
    /// Protocol version of the master.
    pub version: i32,
}

impl WireMessage for HelloAck {
    const OP: &'static str = ops::HELLO_ACK;

    fn encode(&self, out: &mut FrameWriter) -> Result<(), ProtocolError> {
        out.write_i32(self.version);
        Ok(())
    }

    fn decode(input: &mut FrameReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            version: input.read_i32()?,
        })
    }
}

macro_rules! empty_message {
    ($(#[$meta:meta])* $name:ident, $op:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name;

        impl WireMessage for $name {
            const OP: &'static str = $op;

            fn encode(&self, _out: &mut FrameWriter) -> Result<(), ProtocolError> {
                Ok(())
            }

            fn decode(_input: &mut FrameReader) -> Result<Self, ProtocolError> {
                Ok(Self)
            }
        }
    };
}

empty_message!(
    /// Liveness probe; any frame refreshes the idle timer.
    Ping,
    ops::PING
);
empty_message!(
    /// Reply to [`Ping`].
    Pong,
    ops::PONG
);

/// Request for the stored payload of one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadChunk {
    /// World name.
    pub world: String,
    /// Category name (`region`, `entities`, ...).
    pub category: String,
    /// Chunk x.
    pub x: i32,
    /// Chunk z.
    pub z: i32,
}

impl WireMessage for ReadChunk {
    const OP: &'static str = ops::READ_CHUNK;

    fn encode(&self, out: &mut FrameWriter) -> Result<(), ProtocolError> {
        out.write_utf(&self.world)?
            .write_utf(&self.category)?
            .write_i32(self.x)
            .write_i32(self.z);
        Ok(())
    }

    fn decode(input: &mut FrameReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            world: input.read_utf()?,
            category: input.read_utf()?,
            x: input.read_i32()?,
            z: input.read_i32()?,
        })
    }
}

/// Response to [`ReadChunk`].
///
/// An empty `redirect` means the payload is authoritative (empty when the
/// chunk was never written). A non-empty `redirect` names the owning peer and
/// carries no payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkData {
    /// Name of the owning peer, or empty.
    pub redirect: String,
    /// Stored payload bytes.
    pub payload: Vec<u8>,
}

impl ChunkData {
    /// Authoritative payload.
    pub fn data(payload: Vec<u8>) -> Self {
        Self {
            redirect: String::new(),
            payload,
        }
    }

    /// Redirect to `owner` with no payload.
    pub fn redirect(owner: impl Into<String>) -> Self {
        Self {
            redirect: owner.into(),
            payload: Vec::new(),
        }
    }

    /// True when the reply points at another peer.
    pub fn is_redirect(&self) -> bool {
        !self.redirect.is_empty()
    }
}

impl WireMessage for ChunkData {
    const OP: &'static str = ops::CHUNK_DATA;

    fn encode(&self, out: &mut FrameWriter) -> Result<(), ProtocolError> {
        out.write_utf(&self.redirect)?
            .write_length_prefixed(&self.payload)?;
        Ok(())
    }

    fn decode(input: &mut FrameReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            redirect: input.read_utf()?,
            payload: input.read_length_prefixed()?,
        })
    }
}

/// Request to store the payload of one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteChunk {
    /// World name.
    pub world: String,
    /// Category name.
    pub category: String,
    /// Chunk x.
    pub x: i32,
    /// Chunk z.
    pub z: i32,
    /// Compressed payload as the peer produced it.
    pub payload: Vec<u8>,
}

impl WireMessage for WriteChunk {
    const OP: &'static str = ops::WRITE_CHUNK;

    fn encode(&self, out: &mut FrameWriter) -> Result<(), ProtocolError> {
        out.write_utf(&self.world)?
            .write_utf(&self.category)?
            .write_i32(self.x)
            .write_i32(self.z)
            .write_length_prefixed(&self.payload)?;
        Ok(())
    }

    fn decode(input: &mut FrameReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            world: input.read_utf()?,
            category: input.read_utf()?,
            x: input.read_i32()?,
            z: input.read_i32()?,
            payload: input.read_length_prefixed()?,
        })
    }
}

/// Response to [`WriteChunk`]. A non-empty `redirect` means nothing was stored.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkWritten {
    /// Name of the owning peer, or empty.
    pub redirect: String,
}

impl WireMessage for ChunkWritten {
    const OP: &'static str = ops::CHUNK_WRITTEN;

    fn encode(&self, out: &mut FrameWriter) -> Result<(), ProtocolError> {
        out.write_utf(&self.redirect)?;
        Ok(())
    }

    fn decode(input: &mut FrameReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            redirect: input.read_utf()?,
        })
    }
}

/// Ownership claim for one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockChunk {
    /// World name.
    pub world: String,
    /// Chunk x.
    pub x: i32,
    /// Chunk z.
    pub z: i32,
}

impl WireMessage for LockChunk {
    const OP: &'static str = ops::LOCK_CHUNK;

    fn encode(&self, out: &mut FrameWriter) -> Result<(), ProtocolError> {
        out.write_utf(&self.world)?.write_i32(self.x).write_i32(self.z);
        Ok(())
    }

    fn decode(input: &mut FrameReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            world: input.read_utf()?,
            x: input.read_i32()?,
            z: input.read_i32()?,
        })
    }
}

/// Response to [`LockChunk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkLock {
    /// Whether the requester owns the chunk now.
    pub granted: bool,
    /// Name of the owner after the attempt.
    pub owner: String,
}

impl WireMessage for ChunkLock {
    const OP: &'static str = ops::CHUNK_LOCK;

    fn encode(&self, out: &mut FrameWriter) -> Result<(), ProtocolError> {
        out.write_bool(self.granted).write_utf(&self.owner)?;
        Ok(())
    }

    fn decode(input: &mut FrameReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            granted: input.read_bool()?,
            owner: input.read_utf()?,
        })
    }
}

/// Ownership release for one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockChunk {
    /// World name.
    pub world: String,
    /// Chunk x.
    pub x: i32,
    /// Chunk z.
    pub z: i32,
}

impl WireMessage for UnlockChunk {
    const OP: &'static str = ops::UNLOCK_CHUNK;

    fn encode(&self, out: &mut FrameWriter) -> Result<(), ProtocolError> {
        out.write_utf(&self.world)?.write_i32(self.x).write_i32(self.z);
        Ok(())
    }

    fn decode(input: &mut FrameReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            world: input.read_utf()?,
            x: input.read_i32()?,
            z: input.read_i32()?,
        })
    }
}

/// Response to [`UnlockChunk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkUnlock {
    /// False when the requester was not the owner.
    pub released: bool,
}

impl WireMessage for ChunkUnlock {
    const OP: &'static str = ops::CHUNK_UNLOCK;

    fn encode(&self, out: &mut FrameWriter) -> Result<(), ProtocolError> {
        out.write_bool(self.released);
        Ok(())
    }

    fn decode(input: &mut FrameReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            released: input.read_bool()?,
        })
    }
}

/// Milliseconds per tick reported by a peer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteTickTime {
    /// Average tick duration in milliseconds.
    pub mspt: f64,
}

impl WireMessage for WriteTickTime {
    const OP: &'static str = ops::WRITE_TICK_TIME;

    fn encode(&self, out: &mut FrameWriter) -> Result<(), ProtocolError> {
        out.write_f64(self.mspt);
        Ok(())
    }

    fn decode(input: &mut FrameReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            mspt: input.read_f64()?,
        })
    }
}

/// Typed failure response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReply {
    /// Machine readable code, see [`error_codes`].
    pub code: String,
    /// Human readable message.
    pub message: String,
}

/// Codes carried by [`ErrorReply`].
pub mod error_codes {
    /// The container holding the chunk is damaged.
    pub const CORRUPT: &str = "corrupt";
    /// Any other storage failure.
    pub const STORAGE: &str = "storage";
    /// The handshake version is not supported.
    pub const VERSION: &str = "version";
    /// The master failed for reasons unrelated to the request.
    pub const INTERNAL: &str = "internal";
}

impl ErrorReply {
    /// Build a reply from a code and message.
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl WireMessage for ErrorReply {
    const OP: &'static str = ops::ERROR;

    fn encode(&self, out: &mut FrameWriter) -> Result<(), ProtocolError> {
        out.write_utf(&self.code)?.write_utf(&self.message)?;
        Ok(())
    }

    fn decode(input: &mut FrameReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            code: input.read_utf()?,
            message: input.read_utf()?,
        })
    }
}
