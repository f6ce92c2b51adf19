//! Concurrency tests for the chunk lock registry.
//!
//! Critical properties:
//! - Concurrent claims on one coordinate have exactly one winner
//! - Ownership never changes hands except through release
//! - release_all racing with claims leaves no entry for the released connection

use mpmaster_core::{ChunkCoordinate, ConnectionId};
use mpmaster_server::{ChunkLockRegistry, ClaimOutcome};
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: u64 = 8;
const CHUNKS: i32 = 200;

#[test]
fn concurrent_claims_have_one_winner() {
    let registry = Arc::new(ChunkLockRegistry::with_shards(8));
    let barrier = Arc::new(Barrier::new(THREADS as usize));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let me = ConnectionId(t);
                barrier.wait();
                (0..CHUNKS)
                    .filter(|x| {
                        registry.claim(&ChunkCoordinate::new("world", *x, 0), me)
                            == ClaimOutcome::Claimed
                    })
                    .count()
            })
        })
        .collect();

    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, CHUNKS as usize);
    assert_eq!(registry.len(), CHUNKS as usize);

    // Every coordinate has exactly one owner and it sticks.
    for x in 0..CHUNKS {
        let coord = ChunkCoordinate::new("world", x, 0);
        let owner = registry.get_owner(&coord).owner().expect("claimed");
        for t in 0..THREADS {
            let outcome = registry.claim(&coord, ConnectionId(t));
            if ConnectionId(t) == owner {
                assert_eq!(outcome, ClaimOutcome::AlreadyHeld);
            } else {
                assert_eq!(outcome, ClaimOutcome::OwnedByOther(owner));
            }
        }
    }
}

#[test]
fn release_all_races_with_claims_of_others() {
    let registry = Arc::new(ChunkLockRegistry::new());
    let leaving = ConnectionId(1);
    for x in 0..CHUNKS {
        registry.claim(&ChunkCoordinate::new("world", x, x), leaving);
    }

    let barrier = Arc::new(Barrier::new(2));
    let claimer = {
        let registry = Arc::clone(&registry);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            // Keep trying until everything released has been taken over.
            let mut taken = 0;
            while taken < CHUNKS {
                taken = (0..CHUNKS)
                    .filter(|x| {
                        registry
                            .claim(&ChunkCoordinate::new("world", *x, *x), ConnectionId(2))
                            .is_granted()
                    })
                    .count() as i32;
                thread::yield_now();
            }
        })
    };

    barrier.wait();
    let released = registry.release_all(leaving);
    claimer.join().unwrap();

    assert_eq!(released, CHUNKS as usize);
    assert!(registry.owned_by(leaving).is_empty());
    assert_eq!(registry.owned_by(ConnectionId(2)).len(), CHUNKS as usize);
}
