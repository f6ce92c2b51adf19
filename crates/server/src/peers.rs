//! Directory of established peers.

use crate::telemetry::TickTimer;
use mpmaster_core::ConnectionId;
use mpmaster_net::PeerConnection;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::warn;

struct PeerRecord {
    connection: Arc<PeerConnection>,
    name: String,
    timer: TickTimer,
}

/// Point-in-time view of one peer, for status reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerStatus {
    /// Connection id.
    pub id: ConnectionId,
    /// Announced network name.
    pub name: String,
    /// Remote address.
    pub remote: String,
    /// Rolling average of reported tick times.
    pub average_mspt: Option<f64>,
    /// Number of samples behind the average.
    pub samples: usize,
}

/// Established peers keyed by connection id.
///
/// Redirect replies resolve lock owners to names through this directory.
pub struct PeerDirectory {
    peers: RwLock<HashMap<ConnectionId, PeerRecord>>,
    tick_time_window: usize,
}

impl PeerDirectory {
    /// Empty directory; each peer keeps `tick_time_window` tick samples.
    pub fn new(tick_time_window: usize) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            tick_time_window,
        }
    }

    /// Add an established connection. Returns false if it has no name yet.
    pub fn register(&self, connection: &Arc<PeerConnection>) -> bool {
        let Some(name) = connection.name() else {
            return false;
        };
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        if peers.values().any(|peer| peer.name == name) {
            warn!(peer = %name, conn = %connection.id(), "Another peer already uses this name");
        }
        peers.insert(
            connection.id(),
            PeerRecord {
                connection: Arc::clone(connection),
                name,
                timer: TickTimer::new(self.tick_time_window),
            },
        );
        true
    }

    /// Remove a connection. Returns whether it was present.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Network name of an established connection.
    pub fn name_of(&self, id: ConnectionId) -> Option<String> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(|peer| peer.name.clone())
    }

    /// Feed a tick-time sample. Returns false for unknown peers or rejected samples.
    pub fn record_tick_time(&self, id: ConnectionId, mspt: f64) -> bool {
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&id)
            .is_some_and(|peer| peer.timer.record(mspt))
    }

    /// Status of every peer, ordered by connection id.
    pub fn snapshot(&self) -> Vec<PeerStatus> {
        let peers = self.peers.read().unwrap_or_else(PoisonError::into_inner);
        let mut statuses: Vec<_> = peers
            .iter()
            .map(|(id, peer)| PeerStatus {
                id: *id,
                name: peer.name.clone(),
                remote: peer.connection.remote().to_string(),
                average_mspt: peer.timer.average(),
                samples: peer.timer.len(),
            })
            .collect();
        statuses.sort_by_key(|status| status.id);
        statuses
    }

    /// Number of established peers.
    pub fn len(&self) -> usize {
        self.peers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True when no peer is connected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
