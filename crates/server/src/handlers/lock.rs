use super::{invalid_field, Handler, HandlerError};
use crate::context::MasterContext;
use crate::locks::{ClaimOutcome, ReleaseOutcome};
use async_trait::async_trait;
use mpmaster_core::{validate_path_component, ChunkCoordinate};
use mpmaster_net::{
    ChunkLock, ChunkUnlock, FrameReader, LockChunk, PeerConnection, ResponseSender, UnlockChunk,
    WireMessage,
};
use std::sync::Arc;
use tracing::debug;

fn coordinate(world: String, x: i32, z: i32) -> Result<ChunkCoordinate, HandlerError> {
    validate_path_component(&world).map_err(|err| invalid_field("world", err))?;
    Ok(ChunkCoordinate::new(world, x, z))
}

/// Serves `lockChunk`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockChunkHandler;

#[async_trait]
impl Handler for LockChunkHandler {
    async fn handle(
        &self,
        ctx: &MasterContext,
        peer: &Arc<PeerConnection>,
        request: &mut FrameReader,
        response: ResponseSender,
    ) -> Result<(), HandlerError> {
        let LockChunk { world, x, z } = LockChunk::decode_exact(request)?;
        let coord = coordinate(world, x, z)?;

        let outcome = ctx.locks().claim(&coord, peer.id());
        let reply = match outcome {
            ClaimOutcome::Claimed | ClaimOutcome::AlreadyHeld => ChunkLock {
                granted: true,
                owner: peer.display_name(),
            },
            ClaimOutcome::OwnedByOther(owner) => ChunkLock {
                granted: false,
                owner: ctx
                    .peers()
                    .name_of(owner)
                    .unwrap_or_else(|| owner.to_string()),
            },
        };
        debug!(chunk = %coord, ?outcome, "Lock request");
        response.send(&reply).await?;
        Ok(())
    }
}

/// Serves `unlockChunk`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnlockChunkHandler;

#[async_trait]
impl Handler for UnlockChunkHandler {
    async fn handle(
        &self,
        ctx: &MasterContext,
        peer: &Arc<PeerConnection>,
        request: &mut FrameReader,
        response: ResponseSender,
    ) -> Result<(), HandlerError> {
        let UnlockChunk { world, x, z } = UnlockChunk::decode_exact(request)?;
        let coord = coordinate(world, x, z)?;

        let outcome = ctx.locks().release(&coord, peer.id());
        debug!(chunk = %coord, ?outcome, "Unlock request");
        response
            .send(&ChunkUnlock {
                released: outcome == ReleaseOutcome::Released,
            })
            .await?;
        Ok(())
    }
}
