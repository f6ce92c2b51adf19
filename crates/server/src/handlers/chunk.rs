//! Chunk payload reads and writes.
//!
//! Payloads are opaque: they are stored and returned exactly as the peer
//! compressed them.

use super::{invalid_field, parse_category, Handler, HandlerError};
use crate::context::MasterContext;
use crate::locks::{ChunkLockRegistry, ChunkOwnership};
use crate::peers::PeerDirectory;
use async_trait::async_trait;
use mpmaster_core::{dimension_directory, ChunkCategory, ChunkCoordinate, ConnectionId};
use mpmaster_net::{
    ChunkData, ChunkWritten, FrameReader, PeerConnection, ReadChunk, ResponseSender, WireMessage,
    WriteChunk,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// A validated chunk address plus its on-disk base directory.
struct ChunkTarget {
    coord: ChunkCoordinate,
    category: ChunkCategory,
    base: PathBuf,
}

impl ChunkTarget {
    fn resolve(
        ctx: &MasterContext,
        world: String,
        category: &str,
        x: i32,
        z: i32,
    ) -> Result<Self, HandlerError> {
        let category = parse_category(category)?;
        let base = dimension_directory(ctx.world_root(), &world)
            .map_err(|err| invalid_field("world", err))?;
        Ok(Self {
            coord: ChunkCoordinate::new(world, x, z),
            category,
            base,
        })
    }
}

/// Name of the peer the requester must be redirected to, if any.
///
/// Only ownership-scoped categories redirect. An owner that already left the
/// peer directory is being torn down, so the request is served locally.
fn redirect_target(
    ctx: &MasterContext,
    peer: &PeerConnection,
    target: &ChunkTarget,
) -> Option<String> {
    if !target.category.is_ownership_scoped() {
        return None;
    }
    owner_elsewhere(ctx.locks(), ctx.peers(), peer.id(), &target.coord)
}

fn owner_elsewhere(
    locks: &ChunkLockRegistry,
    peers: &PeerDirectory,
    requester: ConnectionId,
    coord: &ChunkCoordinate,
) -> Option<String> {
    match locks.get_owner(coord) {
        ChunkOwnership::Owned(owner) if owner != requester => {
            let name = peers.name_of(owner);
            if name.is_none() {
                warn!(chunk = %coord, owner = %owner, "Lock owner has no directory entry");
            }
            name
        }
        _ => None,
    }
}

/// Why a write that passed the first ownership check was not stored.
#[derive(Debug, PartialEq)]
enum WriteVeto {
    /// The writer's connection is being torn down; its locks may already be free.
    Closing,
    /// Another peer claimed the chunk in the meantime.
    OwnedBy(String),
}

/// Ownership check repeated under the container lock, right before the write.
fn write_veto(
    locks: &ChunkLockRegistry,
    peers: &PeerDirectory,
    writer: &PeerConnection,
    category: &ChunkCategory,
    coord: &ChunkCoordinate,
) -> Option<WriteVeto> {
    if writer.is_closing() {
        return Some(WriteVeto::Closing);
    }
    if !category.is_ownership_scoped() {
        return None;
    }
    owner_elsewhere(locks, peers, writer.id(), coord).map(WriteVeto::OwnedBy)
}

/// Serves `readChunk`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadChunkHandler;

#[async_trait]
impl Handler for ReadChunkHandler {
    async fn handle(
        &self,
        ctx: &MasterContext,
        peer: &Arc<PeerConnection>,
        request: &mut FrameReader,
        response: ResponseSender,
    ) -> Result<(), HandlerError> {
        let ReadChunk {
            world,
            category,
            x,
            z,
        } = ReadChunk::decode_exact(request)?;
        let target = ChunkTarget::resolve(ctx, world, &category, x, z)?;

        if let Some(owner) = redirect_target(ctx, peer, &target) {
            debug!(chunk = %target.coord, category = %target.category, %owner, "Redirecting read");
            return Ok(response.send(&ChunkData::redirect(owner)).await?);
        }

        let regions = Arc::clone(ctx.regions());
        let ChunkTarget {
            coord,
            category,
            base,
        } = target;
        let label = coord.to_string();
        let payload = tokio::task::spawn_blocking(move || {
            regions.read_chunk_payload(&base, &category, coord.x, coord.z)
        })
        .await
        .map_err(|err| HandlerError::Internal(err.to_string()))??;

        debug!(
            chunk = %label,
            bytes = payload.as_ref().map_or(0, Vec::len),
            "Serving read"
        );
        response
            .send(&ChunkData::data(payload.unwrap_or_default()))
            .await?;
        Ok(())
    }
}

/// Serves `writeChunk`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteChunkHandler;

#[async_trait]
impl Handler for WriteChunkHandler {
    async fn handle(
        &self,
        ctx: &MasterContext,
        peer: &Arc<PeerConnection>,
        request: &mut FrameReader,
        response: ResponseSender,
    ) -> Result<(), HandlerError> {
        let WriteChunk {
            world,
            category,
            x,
            z,
            payload,
        } = WriteChunk::decode_exact(request)?;
        let target = ChunkTarget::resolve(ctx, world, &category, x, z)?;

        if let Some(owner) = redirect_target(ctx, peer, &target) {
            debug!(chunk = %target.coord, category = %target.category, %owner, "Rejecting write from non-owner");
            return Ok(response.send(&ChunkWritten { redirect: owner }).await?);
        }

        let regions = Arc::clone(ctx.regions());
        let locks = Arc::clone(ctx.locks());
        let peers = Arc::clone(ctx.peers());
        let writer = Arc::clone(peer);
        let len = payload.len();
        let ChunkTarget {
            coord,
            category,
            base,
        } = target;
        let label = coord.to_string();
        // The blocking write outlives an aborted handler, so ownership is
        // checked again once the container is locked.
        let veto = tokio::task::spawn_blocking(move || {
            regions.write_chunk_payload_unless(&base, &category, coord.x, coord.z, &payload, || {
                write_veto(&locks, &peers, &writer, &category, &coord)
            })
        })
        .await
        .map_err(|err| HandlerError::Internal(err.to_string()))??;

        match veto {
            None => {
                debug!(chunk = %label, bytes = len, "Stored chunk");
                response.send(&ChunkWritten::default()).await?;
            }
            Some(WriteVeto::Closing) => {
                debug!(chunk = %label, "Dropped write from closing connection");
            }
            Some(WriteVeto::OwnedBy(owner)) => {
                debug!(chunk = %label, %owner, "Chunk changed owner before the write");
                response.send(&ChunkWritten { redirect: owner }).await?;
            }
        }
        Ok(())
    }
}
