//! Chunk ownership registry.
//!
//! Maps every claimed [`ChunkCoordinate`] to the connection that owns it.
//! Entries live only in memory and never expire on their own; they go away on
//! explicit release or when the owning connection is torn down.

use mpmaster_core::{ChunkCoordinate, ConnectionId};
use std::collections::hash_map::{Entry, RandomState};
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Default number of independently locked shards.
pub const DEFAULT_LOCK_SHARDS: usize = 64;

/// Ownership of one coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOwnership {
    /// Nobody holds the chunk.
    Free,
    /// The connection holds the chunk.
    Owned(ConnectionId),
}

impl ChunkOwnership {
    /// Owning connection, if any.
    pub fn owner(self) -> Option<ConnectionId> {
        match self {
            Self::Free => None,
            Self::Owned(owner) => Some(owner),
        }
    }
}

/// Result of [`ChunkLockRegistry::claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The chunk was free and now belongs to the caller.
    Claimed,
    /// The caller already owned the chunk.
    AlreadyHeld,
    /// Another connection owns the chunk; nothing changed.
    OwnedByOther(ConnectionId),
}

impl ClaimOutcome {
    /// True when the caller owns the chunk after the call.
    pub fn is_granted(self) -> bool {
        matches!(self, Self::Claimed | Self::AlreadyHeld)
    }
}

/// Result of [`ChunkLockRegistry::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The caller's entry was removed.
    Released,
    /// The caller did not own the chunk; nothing changed.
    NotOwner,
}

type Shard = HashMap<ChunkCoordinate, ConnectionId>;

/// Sharded, process-wide table of chunk owners.
///
/// Every operation on one coordinate runs under that coordinate's shard lock,
/// so concurrent claims have exactly one winner. Critical sections never block
/// on I/O.
#[derive(Debug)]
pub struct ChunkLockRegistry {
    shards: Vec<Mutex<Shard>>,
    hasher: RandomState,
}

impl ChunkLockRegistry {
    /// Registry with [`DEFAULT_LOCK_SHARDS`] shards.
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_LOCK_SHARDS)
    }

    /// Registry with `count` shards (at least one).
    pub fn with_shards(count: usize) -> Self {
        Self {
            shards: (0..count.max(1)).map(|_| Mutex::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, coord: &ChunkCoordinate) -> MutexGuard<'_, Shard> {
        let index = (self.hasher.hash_one(coord) as usize) % self.shards.len();
        // Every critical section leaves the map consistent.
        self.shards[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current owner of `coord`.
    pub fn get_owner(&self, coord: &ChunkCoordinate) -> ChunkOwnership {
        match self.shard(coord).get(coord) {
            Some(owner) => ChunkOwnership::Owned(*owner),
            None => ChunkOwnership::Free,
        }
    }

    /// Claim `coord` for `connection` unless someone else holds it.
    pub fn claim(&self, coord: &ChunkCoordinate, connection: ConnectionId) -> ClaimOutcome {
        let mut shard = self.shard(coord);
        match shard.entry(coord.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(connection);
                ClaimOutcome::Claimed
            }
            Entry::Occupied(slot) if *slot.get() == connection => ClaimOutcome::AlreadyHeld,
            Entry::Occupied(slot) => ClaimOutcome::OwnedByOther(*slot.get()),
        }
    }

    /// Release `coord` if `connection` owns it. Ownership is never transferred.
    pub fn release(&self, coord: &ChunkCoordinate, connection: ConnectionId) -> ReleaseOutcome {
        let mut shard = self.shard(coord);
        match shard.get(coord) {
            Some(owner) if *owner == connection => {
                shard.remove(coord);
                ReleaseOutcome::Released
            }
            _ => ReleaseOutcome::NotOwner,
        }
    }

    /// Release every coordinate owned by `connection`. Returns how many were freed.
    ///
    /// Idempotent: a second call for the same connection frees nothing.
    pub fn release_all(&self, connection: ConnectionId) -> usize {
        let mut released = 0;
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap_or_else(PoisonError::into_inner);
            let before = shard.len();
            shard.retain(|_, owner| *owner != connection);
            released += before - shard.len();
        }
        debug!(conn = %connection, released, "Released all chunk locks");
        released
    }

    /// Coordinates owned by `connection`, in no particular order.
    pub fn owned_by(&self, connection: ConnectionId) -> Vec<ChunkCoordinate> {
        self.shards
            .iter()
            .flat_map(|shard| {
                shard
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .filter(|(_, owner)| **owner == connection)
                    .map(|(coord, _)| coord.clone())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Number of owned coordinates.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    /// True when no coordinate is owned.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ChunkLockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(x: i32, z: i32) -> ChunkCoordinate {
        ChunkCoordinate::new("world", x, z)
    }

    #[test]
    fn claim_is_exclusive() {
        let registry = ChunkLockRegistry::new();
        let (a, b) = (ConnectionId(1), ConnectionId(2));

        assert_eq!(registry.get_owner(&coord(3, 4)), ChunkOwnership::Free);
        assert_eq!(registry.claim(&coord(3, 4), a), ClaimOutcome::Claimed);
        assert_eq!(registry.claim(&coord(3, 4), a), ClaimOutcome::AlreadyHeld);
        assert_eq!(
            registry.claim(&coord(3, 4), b),
            ClaimOutcome::OwnedByOther(a)
        );
        assert_eq!(registry.get_owner(&coord(3, 4)), ChunkOwnership::Owned(a));
    }

    #[test]
    fn worlds_are_distinct_keys() {
        let registry = ChunkLockRegistry::new();
        registry.claim(&ChunkCoordinate::new("world", 0, 0), ConnectionId(1));
        assert_eq!(
            registry.claim(&ChunkCoordinate::new("world_nether", 0, 0), ConnectionId(2)),
            ClaimOutcome::Claimed
        );
    }

    #[test]
    fn release_only_by_owner() {
        let registry = ChunkLockRegistry::new();
        let (a, b) = (ConnectionId(1), ConnectionId(2));
        registry.claim(&coord(0, 0), a);

        assert_eq!(registry.release(&coord(0, 0), b), ReleaseOutcome::NotOwner);
        assert_eq!(registry.get_owner(&coord(0, 0)).owner(), Some(a));
        assert_eq!(registry.release(&coord(0, 0), a), ReleaseOutcome::Released);
        assert_eq!(registry.get_owner(&coord(0, 0)), ChunkOwnership::Free);
        assert_eq!(registry.release(&coord(0, 0), a), ReleaseOutcome::NotOwner);
    }

    #[test]
    fn release_all_frees_only_that_connection() {
        let registry = ChunkLockRegistry::with_shards(4);
        let (a, b) = (ConnectionId(1), ConnectionId(2));
        for x in 0..50 {
            registry.claim(&coord(x, -x), a);
        }
        registry.claim(&coord(100, 100), b);

        assert_eq!(registry.owned_by(a).len(), 50);
        assert_eq!(registry.release_all(a), 50);
        assert_eq!(registry.release_all(a), 0);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_owner(&coord(100, 100)).owner(), Some(b));
        for x in 0..50 {
            assert!(registry.claim(&coord(x, -x), b).is_granted());
        }
    }

    #[test]
    fn single_shard_still_works() {
        let registry = ChunkLockRegistry::with_shards(0);
        assert!(registry.claim(&coord(1, 1), ConnectionId(9)).is_granted());
        assert!(!registry.is_empty());
    }
}
