//! Server-side view of one peer link.
//!
//! A [`PeerConnection`] owns the write half of the transport and the peer's
//! identity. Reading is driven by the dispatch loop; every response goes
//! through [`PeerConnection::send_frame`], which holds the send lock for one
//! complete frame so concurrent handlers never interleave bytes.

use crate::error::ProtocolError;
use crate::protocol::WireMessage;
use mpmaster_core::ConnectionId;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;
use tracing::trace;

/// Lifecycle of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, waiting for `hello`.
    Connecting,
    /// Handshake done, requests are served.
    Established,
    /// Teardown started; no new requests are dispatched.
    Closing,
    /// Locks released and transport shut down.
    Closed,
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One connected peer.
pub struct PeerConnection {
    id: ConnectionId,
    remote: String,
    name: RwLock<Option<String>>,
    state: Mutex<ConnectionState>,
    writer: AsyncMutex<BoxedWriter>,
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

impl PeerConnection {
    /// Wrap the write half of a freshly accepted transport.
    pub fn new<W>(id: ConnectionId, remote: impl Into<String>, writer: W) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Arc::new(Self {
            id,
            remote: remote.into(),
            name: RwLock::new(None),
            state: Mutex::new(ConnectionState::Connecting),
            writer: AsyncMutex::new(Box::new(writer)),
        })
    }

    /// Process-unique identity used as the lock owner.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address as reported by the transport.
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Network name announced in `hello`, once established.
    pub fn name(&self) -> Option<String> {
        self.name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Name for log lines: the announced name, or the connection id.
    pub fn display_name(&self) -> String {
        self.name().unwrap_or_else(|| self.id.to_string())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the handshake and move to [`ConnectionState::Established`].
    pub fn establish(&self, name: impl Into<String>) -> Result<(), ProtocolError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            ConnectionState::Connecting => {
                *self.name.write().unwrap_or_else(PoisonError::into_inner) = Some(name.into());
                *state = ConnectionState::Established;
                Ok(())
            }
            ConnectionState::Established => Err(ProtocolError::UnexpectedHandshake),
            ConnectionState::Closing | ConnectionState::Closed => {
                Err(ProtocolError::ConnectionClosed)
            }
        }
    }

    /// Move to [`ConnectionState::Closing`].
    ///
    /// Returns true only for the caller that performed the transition, so
    /// teardown work guarded by it runs once.
    pub fn begin_close(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            ConnectionState::Connecting | ConnectionState::Established => {
                *state = ConnectionState::Closing;
                true
            }
            ConnectionState::Closing | ConnectionState::Closed => false,
        }
    }

    /// Mark teardown as finished.
    pub fn mark_closed(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = ConnectionState::Closed;
    }

    /// Whether teardown has started.
    pub fn is_closing(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Closing | ConnectionState::Closed
        )
    }

    /// Write one complete frame and flush it while holding the send lock.
    pub async fn send_frame(&self, frame: &[u8]) -> Result<(), ProtocolError> {
        if self.state() == ConnectionState::Closed {
            return Err(ProtocolError::ConnectionClosed);
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await?;
        writer.flush().await?;
        trace!(conn = %self.id, bytes = frame.len(), "Sent frame");
        Ok(())
    }

    /// Encode `message` and send it as one frame.
    pub async fn send<M: WireMessage>(&self, request_id: i32, message: &M) -> Result<(), ProtocolError> {
        let frame = message.to_frame(request_id)?;
        self.send_frame(&frame).await
    }

    /// Shut down the write half. Errors are ignored; the peer may be gone.
    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.shutdown().await {
            trace!(conn = %self.id, %err, "Shutdown of write half failed");
        }
    }
}

/// Buffered response sink handed to a handler.
///
/// The response is encoded into memory first and reaches the transport in a
/// single guarded write, so a handler either sends a complete frame or
/// nothing. Consumed on send: a request gets at most one response.
#[derive(Debug)]
pub struct ResponseSender {
    connection: Arc<PeerConnection>,
    request_id: i32,
}

impl ResponseSender {
    /// Sink for the response to `request_id` on `connection`.
    pub fn new(connection: Arc<PeerConnection>, request_id: i32) -> Self {
        Self {
            connection,
            request_id,
        }
    }

    /// Encode and send `message`.
    pub async fn send<M: WireMessage>(self, message: &M) -> Result<(), ProtocolError> {
        self.connection.send(self.request_id, message).await
    }
}
