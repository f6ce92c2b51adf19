use std::io;
use thiserror::Error;

/// Violations of the peer protocol.
///
/// Every variant except [`ProtocolError::Rejected`] is fatal to the connection
/// it occurred on.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A field extends past the end of its frame.
    #[error("frame truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes the field required.
        needed: usize,
        /// Bytes left in the frame.
        remaining: usize,
    },

    /// A string field is not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// A string is too long for its u16 length prefix.
    #[error("string of {0} bytes exceeds the 65535 byte limit")]
    StringTooLong(usize),

    /// A length field is negative.
    #[error("negative length {0}")]
    NegativeLength(i32),

    /// A frame exceeds the configured size limit.
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Declared frame length.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    /// Bytes were left over after every field of a message was decoded.
    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),

    /// No handler is registered for the operation.
    #[error("unknown operation `{0}`")]
    UnknownOperation(String),

    /// A request arrived before the `hello` handshake.
    #[error("`{0}` received before handshake")]
    HandshakeRequired(String),

    /// A second `hello` arrived on an established connection.
    #[error("handshake already completed")]
    UnexpectedHandshake,

    /// The peer speaks another protocol version.
    #[error("protocol version mismatch: peer {peer}, expected {expected}")]
    VersionMismatch {
        /// Version the peer announced.
        peer: i32,
        /// Version this build speaks.
        expected: i32,
    },

    /// A field decoded but holds an unusable value.
    #[error("invalid `{field}`: {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A response carried an operation other than the one expected.
    #[error("expected `{expected}` response, got `{actual}`")]
    UnexpectedResponse {
        /// Operation the caller waited for.
        expected: &'static str,
        /// Operation received.
        actual: String,
    },

    /// The remote side answered with an `error` reply.
    #[error("request rejected ({code}): {message}")]
    Rejected {
        /// Machine readable code.
        code: String,
        /// Human readable message.
        message: String,
    },

    /// The connection is closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
