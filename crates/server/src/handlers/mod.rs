//! Request handlers and the table that routes operation names to them.

mod chunk;
mod lock;
mod peer;

pub use chunk::{ReadChunkHandler, WriteChunkHandler};
pub use lock::{LockChunkHandler, UnlockChunkHandler};
pub use peer::{PingHandler, WriteTickTimeHandler};

use crate::context::MasterContext;
use async_trait::async_trait;
use mpmaster_core::{ChunkCategory, CoreError};
use mpmaster_net::{error_codes, ops, ErrorReply, FrameReader, PeerConnection, ProtocolError, ResponseSender};
use mpmaster_world::StorageError;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Failure of a single request.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The peer broke the protocol; the connection is closed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Region storage failed; the request gets an `error` reply.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The master failed internally; the request gets an `error` reply.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Reply sent for non-fatal errors; `None` means the connection closes.
    pub fn to_reply(&self) -> Option<ErrorReply> {
        match self {
            Self::Protocol(_) => None,
            Self::Storage(err) if err.is_corruption() => {
                Some(ErrorReply::new(error_codes::CORRUPT, err.to_string()))
            }
            Self::Storage(err) => Some(ErrorReply::new(error_codes::STORAGE, err.to_string())),
            Self::Internal(message) => Some(ErrorReply::new(error_codes::INTERNAL, message.clone())),
        }
    }
}

/// Processes one decoded request.
///
/// `request` is positioned at the first operation field. A handler sends at
/// most one response through `response`; dropping it sends nothing.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle the request.
    async fn handle(
        &self,
        ctx: &MasterContext,
        peer: &Arc<PeerConnection>,
        request: &mut FrameReader,
        response: ResponseSender,
    ) -> Result<(), HandlerError>;
}

/// Operation name to handler table.
///
/// `hello` is not routed through the table: the dispatch loop handles it
/// because it changes connection state.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every built-in operation.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ops::PING, PingHandler);
        registry.register(ops::WRITE_TICK_TIME, WriteTickTimeHandler);
        registry.register(ops::READ_CHUNK, ReadChunkHandler);
        registry.register(ops::WRITE_CHUNK, WriteChunkHandler);
        registry.register(ops::LOCK_CHUNK, LockChunkHandler);
        registry.register(ops::UNLOCK_CHUNK, UnlockChunkHandler);
        registry
    }

    /// Route `op` to `handler`, replacing any previous entry.
    pub fn register(&mut self, op: &'static str, handler: impl Handler + 'static) {
        self.handlers.insert(op, Arc::new(handler));
    }

    /// Handler for `op`.
    pub fn get(&self, op: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(op).cloned()
    }

    /// Registered operation names, sorted.
    pub fn operations(&self) -> Vec<&'static str> {
        let mut ops: Vec<_> = self.handlers.keys().copied().collect();
        ops.sort_unstable();
        ops
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("operations", &self.operations())
            .finish()
    }
}

fn invalid_field(field: &'static str, err: CoreError) -> ProtocolError {
    ProtocolError::InvalidField {
        field,
        reason: err.to_string(),
    }
}

fn parse_category(name: &str) -> Result<ChunkCategory, ProtocolError> {
    ChunkCategory::parse(name).map_err(|err| invalid_field("category", err))
}
