//! Minimal peer-side client used by tools and tests.
//!
//! Requests are issued one at a time; each call waits for the frame carrying
//! its request id.

use crate::codec::{read_frame, Frame, DEFAULT_MAX_FRAME_BYTES};
use crate::error::ProtocolError;
use crate::protocol::{ops, ErrorReply, Hello, HelloAck, WireMessage, PROTOCOL_VERSION};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info};

/// Client end of a peer link.
pub struct PeerClient<S> {
    stream: S,
    next_request_id: i32,
    max_frame_bytes: usize,
}

impl PeerClient<TcpStream> {
    /// Connect to a master over TCP.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ProtocolError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S> PeerClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            next_request_id: 1,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    fn allocate_id(&mut self) -> i32 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    /// Send `message` without waiting for a response. Returns its request id.
    pub async fn send<M: WireMessage>(&mut self, message: &M) -> Result<i32, ProtocolError> {
        let id = self.allocate_id();
        let frame = message.to_frame(id)?;
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(id)
    }

    /// Read the next frame, failing on end of stream.
    pub async fn recv(&mut self) -> Result<Frame, ProtocolError> {
        read_frame(&mut self.stream, self.max_frame_bytes)
            .await?
            .ok_or(ProtocolError::ConnectionClosed)
    }

    /// Send `request` and decode the matching response.
    ///
    /// An `error` reply becomes [`ProtocolError::Rejected`].
    pub async fn request<Req, Resp>(&mut self, request: &Req) -> Result<Resp, ProtocolError>
    where
        Req: WireMessage,
        Resp: WireMessage,
    {
        let id = self.send(request).await?;
        let mut frame = loop {
            let frame = self.recv().await?;
            if frame.request_id == id {
                break frame;
            }
            debug!(
                request_id = frame.request_id,
                op = %frame.op,
                "Skipping frame for another request"
            );
        };

        if frame.op == ops::ERROR {
            let reply = ErrorReply::decode_exact(&mut frame.body)?;
            return Err(ProtocolError::Rejected {
                code: reply.code,
                message: reply.message,
            });
        }
        if frame.op != Resp::OP {
            return Err(ProtocolError::UnexpectedResponse {
                expected: Resp::OP,
                actual: frame.op,
            });
        }
        Resp::decode_exact(&mut frame.body)
    }

    /// Perform the handshake under `name`.
    pub async fn hello(&mut self, name: &str) -> Result<HelloAck, ProtocolError> {
        let ack: HelloAck = self
            .request(&Hello {
                version: PROTOCOL_VERSION,
                name: name.to_string(),
            })
            .await?;
        info!(name, version = ack.version, "Handshake accepted");
        Ok(ack)
    }

    /// Unwrap the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Ping, Pong};

    #[tokio::test]
    async fn request_matches_response_by_id() {
        let (client_end, mut server_end) = tokio::io::duplex(1024);
        let mut client = PeerClient::new(client_end);

        let server = tokio::spawn(async move {
            let frame = read_frame(&mut server_end, 1024).await.unwrap().unwrap();
            assert_eq!(frame.op, ops::PING);
            // An unrelated frame first, then the real answer.
            server_end
                .write_all(&Pong.to_frame(frame.request_id + 100).unwrap())
                .await
                .unwrap();
            server_end
                .write_all(&Pong.to_frame(frame.request_id).unwrap())
                .await
                .unwrap();
            server_end
        });

        let pong: Pong = client.request(&Ping).await.expect("pong");
        assert_eq!(pong, Pong);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn error_reply_becomes_rejected() {
        let (client_end, mut server_end) = tokio::io::duplex(1024);
        let mut client = PeerClient::new(client_end);

        let server = tokio::spawn(async move {
            let frame = read_frame(&mut server_end, 1024).await.unwrap().unwrap();
            let reply = ErrorReply::new("storage", "disk on fire");
            server_end
                .write_all(&reply.to_frame(frame.request_id).unwrap())
                .await
                .unwrap();
            server_end
        });

        let result: Result<Pong, _> = client.request(&Ping).await;
        match result {
            Err(ProtocolError::Rejected { code, message }) => {
                assert_eq!(code, "storage");
                assert_eq!(message, "disk on fire");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        server.await.unwrap();
    }
}
