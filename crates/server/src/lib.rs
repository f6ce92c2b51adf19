#![warn(missing_docs)]
//! Coordination master: chunk ownership, region storage access and the peer
//! request dispatcher.
//!
//! At most one peer holds authoritative state for a chunk at any time. Peers
//! ask the master who that is; the master either serves the stored payload or
//! redirects them to the owner.

mod context;
pub mod handlers;
pub mod locks;
pub mod peers;
mod server;
pub mod telemetry;

pub use context::{MasterContext, ServerSettings};
pub use handlers::{Handler, HandlerError, HandlerRegistry};
pub use locks::{ChunkLockRegistry, ChunkOwnership, ClaimOutcome, ReleaseOutcome};
pub use peers::{PeerDirectory, PeerStatus};
pub use server::{serve_connection, CloseReason, MasterServer};
pub use telemetry::TickTimer;
