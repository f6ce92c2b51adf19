//! Field encoding and frame I/O.
//!
//! Frame format: [length: u32][request_id: i32][op: string][fields...]
//!
//! `length` counts every byte after the length field. Integers and floats are
//! big-endian; strings are a u16 byte length followed by UTF-8.

use crate::error::ProtocolError;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// Default upper bound on an inbound frame.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Longest string a u16 prefix can describe.
pub const MAX_STRING_BYTES: usize = u16::MAX as usize;

/// Smallest possible frame body: request id + empty op name.
const MIN_FRAME_BODY: usize = 4 + 2;

/// Cursor over the fields of one frame.
#[derive(Debug, Clone)]
pub struct FrameReader {
    buf: Vec<u8>,
    pos: usize,
}

impl FrameReader {
    /// Read fields from `buf`, starting at its first byte.
    pub fn new(buf: Vec<u8>) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not consumed yet.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, needed: usize) -> Result<&[u8], ProtocolError> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(ProtocolError::Truncated { needed, remaining });
        }
        let start = self.pos;
        self.pos += needed;
        Ok(&self.buf[start..self.pos])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take_array::<1>()?[0])
    }

    /// Read a boolean encoded as one byte; any non-zero value is true.
    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a big-endian i32.
    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    /// Read a big-endian f64.
    pub fn read_f64(&mut self) -> Result<f64, ProtocolError> {
        Ok(f64::from_be_bytes(self.take_array()?))
    }

    /// Read a u16-prefixed UTF-8 string.
    pub fn read_utf(&mut self) -> Result<String, ProtocolError> {
        let len = u16::from_be_bytes(self.take_array()?) as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Read exactly `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, ProtocolError> {
        Ok(self.take(len)?.to_vec())
    }

    /// Read an i32 length followed by that many bytes.
    pub fn read_length_prefixed(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(ProtocolError::NegativeLength(len));
        }
        self.read_bytes(len as usize)
    }

    /// Fail if any bytes are left unread.
    pub fn finish(&self) -> Result<(), ProtocolError> {
        match self.remaining() {
            0 => Ok(()),
            extra => Err(ProtocolError::TrailingBytes(extra)),
        }
    }
}

/// Buffer that accumulates one complete frame.
///
/// Nothing reaches the transport until [`FrameWriter::finish`] hands the
/// finished bytes to a single write.
#[derive(Debug, Clone)]
pub struct FrameWriter {
    buf: Vec<u8>,
}

impl FrameWriter {
    /// Start a frame for `op`, tagged with `request_id`.
    pub fn new(request_id: i32, op: &str) -> Result<Self, ProtocolError> {
        let mut writer = Self {
            buf: Vec::with_capacity(64),
        };
        // Length placeholder, patched in finish().
        writer.buf.extend_from_slice(&[0; 4]);
        writer.write_i32(request_id);
        writer.write_utf(op)?;
        Ok(writer)
    }

    /// Append one byte.
    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    /// Append a boolean as one byte.
    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_u8(u8::from(value))
    }

    /// Append a big-endian i32.
    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Append a big-endian f64.
    pub fn write_f64(&mut self, value: f64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Append a u16-prefixed UTF-8 string.
    pub fn write_utf(&mut self, value: &str) -> Result<&mut Self, ProtocolError> {
        let len = u16::try_from(value.len())
            .map_err(|_| ProtocolError::StringTooLong(value.len()))?;
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        Ok(self)
    }

    /// Append raw bytes without a length.
    pub fn write_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(value);
        self
    }

    /// Append an i32 length followed by the bytes.
    pub fn write_length_prefixed(&mut self, value: &[u8]) -> Result<&mut Self, ProtocolError> {
        let len = i32::try_from(value.len()).map_err(|_| ProtocolError::FrameTooLarge {
            len: value.len(),
            max: i32::MAX as usize,
        })?;
        self.write_i32(len);
        Ok(self.write_bytes(value))
    }

    /// Size of the frame so far, length prefix included.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Always false: a frame carries at least its header.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Patch the length prefix and return the encoded frame.
    pub fn finish(mut self) -> Vec<u8> {
        let body_len = (self.buf.len() - 4) as u32;
        self.buf[..4].copy_from_slice(&body_len.to_be_bytes());
        self.buf
    }
}

/// One decoded frame: header fields plus a cursor over the remaining fields.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Id echoed by the matching response.
    pub request_id: i32,
    /// Operation name.
    pub op: String,
    /// Cursor positioned at the first operation field.
    pub body: FrameReader,
}

impl Frame {
    fn from_body(body: Vec<u8>) -> Result<Self, ProtocolError> {
        let mut body = FrameReader::new(body);
        let request_id = body.read_i32()?;
        let op = body.read_utf()?;
        Ok(Self {
            request_id,
            op,
            body,
        })
    }
}

/// Decode a complete frame, length prefix included.
pub fn decode_frame(data: &[u8]) -> Result<Frame, ProtocolError> {
    if data.len() < 4 {
        return Err(ProtocolError::Truncated {
            needed: 4,
            remaining: data.len(),
        });
    }
    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let body = &data[4..];
    if body.len() < length {
        return Err(ProtocolError::Truncated {
            needed: length,
            remaining: body.len(),
        });
    }
    if body.len() > length {
        return Err(ProtocolError::TrailingBytes(body.len() - length));
    }
    Frame::from_body(body.to_vec())
}

/// Read the next frame from a stream.
///
/// Returns `Ok(None)` when the stream ends cleanly between frames.
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: usize) -> Result<Option<Frame>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    if reader.read(&mut len_buf[..1]).await? == 0 {
        return Ok(None);
    }
    read_exact_or_truncated(reader, &mut len_buf[1..]).await?;

    let length = u32::from_be_bytes(len_buf) as usize;
    if length > max_frame_bytes {
        return Err(ProtocolError::FrameTooLarge {
            len: length,
            max: max_frame_bytes,
        });
    }
    if length < MIN_FRAME_BODY {
        return Err(ProtocolError::Truncated {
            needed: MIN_FRAME_BODY,
            remaining: length,
        });
    }

    let mut body = vec![0u8; length];
    read_exact_or_truncated(reader, &mut body).await?;
    trace!(bytes = length, "Read frame");
    Frame::from_body(body).map(Some)
}

async fn read_exact_or_truncated<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ProtocolError::Truncated {
                needed: buf.len(),
                remaining: 0,
            })
        }
        Err(err) => Err(err.into()),
    }
}
