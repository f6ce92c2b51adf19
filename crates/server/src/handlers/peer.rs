use super::{Handler, HandlerError};
use crate::context::MasterContext;
use async_trait::async_trait;
use mpmaster_net::{FrameReader, PeerConnection, Ping, Pong, ResponseSender, WireMessage, WriteTickTime};
use std::sync::Arc;
use tracing::{debug, trace};

/// Serves `ping`. Receiving the frame already refreshed the idle timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingHandler;

#[async_trait]
impl Handler for PingHandler {
    async fn handle(
        &self,
        _ctx: &MasterContext,
        _peer: &Arc<PeerConnection>,
        request: &mut FrameReader,
        response: ResponseSender,
    ) -> Result<(), HandlerError> {
        Ping::decode_exact(request)?;
        response.send(&Pong).await?;
        Ok(())
    }
}

/// Serves `writeTickTime`. Sends no response.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteTickTimeHandler;

#[async_trait]
impl Handler for WriteTickTimeHandler {
    async fn handle(
        &self,
        ctx: &MasterContext,
        peer: &Arc<PeerConnection>,
        request: &mut FrameReader,
        _response: ResponseSender,
    ) -> Result<(), HandlerError> {
        let WriteTickTime { mspt } = WriteTickTime::decode_exact(request)?;
        if ctx.peers().record_tick_time(peer.id(), mspt) {
            trace!(peer = %peer.display_name(), mspt, "Tick time");
        } else {
            debug!(peer = %peer.display_name(), mspt, "Ignored tick time sample");
        }
        Ok(())
    }
}
