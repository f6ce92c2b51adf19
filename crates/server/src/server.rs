//! TCP accept loop and per-connection dispatch.
//!
//! Each connection runs one dispatch loop. A dedicated reader task decodes
//! frames (with the idle timeout applied) and hands them to the loop, which
//! spawns handlers into a bounded [`JoinSet`]. Every way a connection can end
//! funnels into [`teardown`], which releases the peer's chunk locks once.

use crate::context::MasterContext;
use crate::handlers::{HandlerError, HandlerRegistry};
use mpmaster_core::ConnectionId;
use mpmaster_net::{
    error_codes, ops, read_frame, ConnectionState, ErrorReply, Frame, FrameReader, Hello,
    HelloAck, PeerConnection, ProtocolError, ResponseSender, WireMessage, PROTOCOL_VERSION,
};
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, info, info_span, trace, warn, Instrument};

/// Why a connection ended.
#[derive(Debug)]
pub enum CloseReason {
    /// The peer closed the stream between frames.
    PeerClosed,
    /// No frame arrived within the idle timeout.
    IdleTimeout(Duration),
    /// The server is shutting down.
    Shutdown,
    /// The peer broke the protocol or the transport failed.
    Protocol(ProtocolError),
    /// A handler task panicked.
    HandlerPanicked,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed the connection"),
            Self::IdleTimeout(after) => write!(f, "idle for {}s", after.as_secs()),
            Self::Shutdown => f.write_str("server shutdown"),
            Self::Protocol(err) => write!(f, "{err}"),
            Self::HandlerPanicked => f.write_str("handler panicked"),
        }
    }
}

enum ReadEvent {
    Frame(Frame),
    Eof,
    Idle,
    Failed(ProtocolError),
}

/// Accepts peers and serves them until shut down.
pub struct MasterServer {
    listener: TcpListener,
    ctx: Arc<MasterContext>,
    handlers: Arc<HandlerRegistry>,
    next_id: AtomicU64,
}

impl MasterServer {
    /// Bind to the configured address with the default handlers.
    pub async fn bind(ctx: Arc<MasterContext>) -> io::Result<Self> {
        let listener = TcpListener::bind(ctx.settings().bind_address).await?;
        info!(addr = %listener.local_addr()?, "Master listening");
        Ok(Self {
            listener,
            ctx,
            handlers: Arc::new(HandlerRegistry::with_defaults()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared services.
    pub fn context(&self) -> &Arc<MasterContext> {
        &self.ctx
    }

    /// Accept connections until `shutdown` resolves, then close every
    /// connection and wait for their teardown.
    pub async fn run<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
                        if let Err(err) = stream.set_nodelay(true) {
                            debug!(conn = %id, %err, "Failed to set TCP_NODELAY");
                        }
                        info!(conn = %id, remote = %addr, "Accepted connection");
                        let (reader, writer) = stream.into_split();
                        connections.spawn(serve_connection(
                            Arc::clone(&self.ctx),
                            Arc::clone(&self.handlers),
                            id,
                            addr.to_string(),
                            reader,
                            writer,
                            stop_rx.clone(),
                        ));
                    }
                    Err(err) => {
                        warn!(%err, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        info!(open = connections.len(), "Shutting down");
        stop_tx.send_replace(true);
        while connections.join_next().await.is_some() {}
        Ok(())
    }
}

/// Serve one peer over an already split transport until the connection ends.
///
/// Returns why it ended. By the time this returns the peer's locks are
/// released and it is gone from the peer directory.
pub async fn serve_connection<R, W>(
    ctx: Arc<MasterContext>,
    handlers: Arc<HandlerRegistry>,
    id: ConnectionId,
    remote: String,
    reader: R,
    writer: W,
    shutdown: watch::Receiver<bool>,
) -> CloseReason
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let peer = PeerConnection::new(id, remote, writer);
    let span = info_span!("peer", conn = %id, remote = %peer.remote());

    async move {
        let (frames_tx, frames_rx) = mpsc::channel(1);
        let reader_task = tokio::spawn(
            read_frames(
                reader,
                frames_tx,
                ctx.settings().max_frame_bytes,
                ctx.settings().idle_timeout,
            )
            .in_current_span(),
        );

        let mut in_flight = JoinSet::new();
        let reason = dispatch(&ctx, &handlers, &peer, frames_rx, shutdown, &mut in_flight).await;
        teardown(&ctx, &peer, reader_task, in_flight, &reason).await;
        reason
    }
    .instrument(span)
    .await
}

async fn read_frames<R>(
    mut reader: R,
    frames: mpsc::Sender<ReadEvent>,
    max_frame_bytes: usize,
    idle_timeout: Duration,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let event = match tokio::time::timeout(idle_timeout, read_frame(&mut reader, max_frame_bytes)).await {
            Err(_) => ReadEvent::Idle,
            Ok(Ok(Some(frame))) => ReadEvent::Frame(frame),
            Ok(Ok(None)) => ReadEvent::Eof,
            Ok(Err(err)) => ReadEvent::Failed(err),
        };
        let last = !matches!(event, ReadEvent::Frame(_));
        if frames.send(event).await.is_err() || last {
            return;
        }
    }
}

async fn dispatch(
    ctx: &Arc<MasterContext>,
    handlers: &HandlerRegistry,
    peer: &Arc<PeerConnection>,
    mut frames: mpsc::Receiver<ReadEvent>,
    mut shutdown: watch::Receiver<bool>,
    in_flight: &mut JoinSet<Result<(), ProtocolError>>,
) -> CloseReason {
    let max_in_flight = ctx.settings().max_in_flight_per_peer.max(1);

    loop {
        if *shutdown.borrow() {
            return CloseReason::Shutdown;
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return CloseReason::Shutdown;
                }
            }
            Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Some(reason) = handler_finished(result) {
                    return reason;
                }
            }
            event = frames.recv(), if in_flight.len() < max_in_flight => match event {
                Some(ReadEvent::Frame(frame)) => {
                    if let Err(err) = route(ctx, handlers, peer, frame, in_flight).await {
                        return CloseReason::Protocol(err);
                    }
                }
                Some(ReadEvent::Idle) => {
                    return CloseReason::IdleTimeout(ctx.settings().idle_timeout);
                }
                Some(ReadEvent::Failed(err)) => return CloseReason::Protocol(err),
                Some(ReadEvent::Eof) | None => return CloseReason::PeerClosed,
            },
        }
    }
}

fn handler_finished(result: Result<Result<(), ProtocolError>, JoinError>) -> Option<CloseReason> {
    match result {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(CloseReason::Protocol(err)),
        Err(err) if err.is_panic() => Some(CloseReason::HandlerPanicked),
        Err(_) => None,
    }
}

/// Route one frame: handshake inline, everything else to a handler task.
async fn route(
    ctx: &Arc<MasterContext>,
    handlers: &HandlerRegistry,
    peer: &Arc<PeerConnection>,
    frame: Frame,
    in_flight: &mut JoinSet<Result<(), ProtocolError>>,
) -> Result<(), ProtocolError> {
    let Frame {
        request_id,
        op,
        mut body,
    } = frame;
    trace!(%op, request_id, bytes = body.remaining(), "Request");

    match peer.state() {
        ConnectionState::Connecting if op == ops::HELLO => {
            handshake(ctx, peer, request_id, &mut body).await
        }
        ConnectionState::Connecting => Err(ProtocolError::HandshakeRequired(op)),
        ConnectionState::Established if op == ops::HELLO => Err(ProtocolError::UnexpectedHandshake),
        ConnectionState::Established => {
            let handler = handlers
                .get(&op)
                .ok_or_else(|| ProtocolError::UnknownOperation(op.clone()))?;
            let ctx = Arc::clone(ctx);
            let peer = Arc::clone(peer);
            in_flight.spawn(
                async move {
                    let response = ResponseSender::new(Arc::clone(&peer), request_id);
                    match handler.handle(&ctx, &peer, &mut body, response).await {
                        Ok(()) => Ok(()),
                        Err(HandlerError::Protocol(err)) => Err(err),
                        Err(err) => {
                            warn!(%op, %err, "Request failed");
                            match err.to_reply() {
                                Some(reply) => peer.send(request_id, &reply).await,
                                None => Ok(()),
                            }
                        }
                    }
                }
                .in_current_span(),
            );
            Ok(())
        }
        ConnectionState::Closing | ConnectionState::Closed => Err(ProtocolError::ConnectionClosed),
    }
}

async fn handshake(
    ctx: &MasterContext,
    peer: &Arc<PeerConnection>,
    request_id: i32,
    body: &mut FrameReader,
) -> Result<(), ProtocolError> {
    let Hello { version, name } = Hello::decode_exact(body)?;

    if version != PROTOCOL_VERSION {
        let reply = ErrorReply::new(
            error_codes::VERSION,
            format!("expected protocol version {PROTOCOL_VERSION}, got {version}"),
        );
        peer.send(request_id, &reply).await?;
        return Err(ProtocolError::VersionMismatch {
            peer: version,
            expected: PROTOCOL_VERSION,
        });
    }
    // An empty name would read as "no redirect" in replies naming this peer.
    if name.is_empty() {
        return Err(ProtocolError::InvalidField {
            field: "name",
            reason: "peer name is empty".to_string(),
        });
    }

    peer.establish(name.as_str())?;
    ctx.peers().register(peer);
    info!(peer = %name, "Peer established");
    peer.send(request_id, &HelloAck {
        version: PROTOCOL_VERSION,
    })
    .await
}

async fn teardown(
    ctx: &MasterContext,
    peer: &PeerConnection,
    reader_task: JoinHandle<()>,
    mut in_flight: JoinSet<Result<(), ProtocolError>>,
    reason: &CloseReason,
) {
    if !peer.begin_close() {
        return;
    }
    reader_task.abort();
    in_flight.shutdown().await;

    let released = ctx.locks().release_all(peer.id());
    ctx.peers().unregister(peer.id());
    peer.mark_closed();
    peer.shutdown().await;

    match reason {
        CloseReason::PeerClosed | CloseReason::Shutdown => {
            info!(peer = %peer.display_name(), released, %reason, "Connection closed");
        }
        CloseReason::IdleTimeout(_) | CloseReason::Protocol(_) | CloseReason::HandlerPanicked => {
            warn!(peer = %peer.display_name(), released, %reason, "Connection dropped");
        }
    }
}
