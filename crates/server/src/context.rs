//! Shared services handed to every handler.

use crate::locks::ChunkLockRegistry;
use crate::peers::PeerDirectory;
use crate::telemetry::DEFAULT_TICK_TIME_WINDOW;
use mpmaster_net::{DEFAULT_MAX_FRAME_BYTES, DEFAULT_PORT};
use mpmaster_world::{RegionCache, DEFAULT_REGION_CACHE_CAPACITY};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Runtime settings of the master.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    /// TCP listen address.
    pub bind_address: SocketAddr,
    /// Directory containing the world directories.
    pub world_root: PathBuf,
    /// Maximum cached region containers.
    pub region_cache_capacity: usize,
    /// Largest accepted inbound frame.
    pub max_frame_bytes: usize,
    /// Concurrent handler tasks per connection.
    pub max_in_flight_per_peer: usize,
    /// A peer silent for this long is disconnected.
    pub idle_timeout: Duration,
    /// Samples in each peer's rolling tick-time average.
    pub tick_time_window: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            world_root: PathBuf::from("."),
            region_cache_capacity: DEFAULT_REGION_CACHE_CAPACITY,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            max_in_flight_per_peer: 64,
            idle_timeout: Duration::from_secs(30),
            tick_time_window: DEFAULT_TICK_TIME_WINDOW,
        }
    }
}

/// Services shared by all connections.
///
/// The registry and cache are constructed once and injected here; nothing in
/// the server reaches for a global.
pub struct MasterContext {
    settings: ServerSettings,
    locks: Arc<ChunkLockRegistry>,
    regions: Arc<RegionCache>,
    peers: Arc<PeerDirectory>,
}

impl MasterContext {
    /// Build fresh services from `settings`.
    pub fn new(settings: ServerSettings) -> Arc<Self> {
        let locks = Arc::new(ChunkLockRegistry::new());
        let regions = Arc::new(RegionCache::new(settings.region_cache_capacity));
        let peers = Arc::new(PeerDirectory::new(settings.tick_time_window));
        Self::with_services(settings, locks, regions, peers)
    }

    /// Assemble a context around existing services.
    pub fn with_services(
        settings: ServerSettings,
        locks: Arc<ChunkLockRegistry>,
        regions: Arc<RegionCache>,
        peers: Arc<PeerDirectory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            locks,
            regions,
            peers,
        })
    }

    /// Runtime settings.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Directory containing the world directories.
    pub fn world_root(&self) -> &Path {
        &self.settings.world_root
    }

    /// Chunk ownership registry.
    pub fn locks(&self) -> &Arc<ChunkLockRegistry> {
        &self.locks
    }

    /// Region container cache.
    pub fn regions(&self) -> &Arc<RegionCache> {
        &self.regions
    }

    /// Established peers.
    pub fn peers(&self) -> &Arc<PeerDirectory> {
        &self.peers
    }
}
