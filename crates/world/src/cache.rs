use std::convert::Infallible;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use mpmaster_core::{chunk_to_local, chunk_to_region, ChunkCategory};
use tracing::debug;

use crate::error::StorageError;
use crate::region::{region_file_name, RegionFile};

/// Default number of region containers kept open.
pub const DEFAULT_REGION_CACHE_CAPACITY: usize = 256;

/// Cache slot bound to one container path.
///
/// `file` is `None` until the container has been opened, and stays `None`
/// while the file does not exist on disk.
struct RegionSlot {
    path: PathBuf,
    region: (i32, i32),
    file: Option<RegionFile>,
}

impl RegionSlot {
    fn existing(&mut self) -> Result<Option<&mut RegionFile>, StorageError> {
        if self.file.is_none() {
            self.file = RegionFile::open(&self.path, self.region.0, self.region.1)?;
        }
        Ok(self.file.as_mut())
    }

    fn existing_or_create(&mut self) -> Result<&mut RegionFile, StorageError> {
        let file = match self.file.take() {
            Some(file) => file,
            None => RegionFile::create(&self.path, self.region.0, self.region.1)?,
        };
        Ok(self.file.insert(file))
    }
}

/// Region container cache keyed by container path, with LRU eviction.
///
/// Access to one container is serialized by that container's own lock; the
/// table lock is only held to look up or insert entries, so different
/// containers never wait on each other's I/O.
pub struct RegionCache {
    entries: Mutex<LruCache<PathBuf, Arc<Mutex<RegionSlot>>>>,
    capacity: usize,
}

impl RegionCache {
    /// Create a cache holding at most `capacity` idle containers.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
            capacity: NonZeroUsize::new(capacity).map_or(1, NonZeroUsize::get),
        }
    }

    /// Number of cached containers.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    /// Returns true when no containers are cached.
    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    /// Whether the container at `path` currently has a cache entry.
    pub fn is_cached(&self, path: &Path) -> bool {
        self.table().contains(path)
    }

    /// Path of the container holding chunk `(x, z)` inside `dir`.
    pub fn region_path(dir: &Path, x: i32, z: i32) -> PathBuf {
        let (region_x, region_z) = chunk_to_region(x, z);
        dir.join(region_file_name(region_x, region_z))
    }

    /// Read the payload of chunk `(x, z)` from `base/<category>`.
    ///
    /// Returns `Ok(None)` when the chunk (or its container) was never written.
    pub fn read_chunk_payload(
        &self,
        base: &Path,
        category: &ChunkCategory,
        x: i32,
        z: i32,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        self.read_chunk(&base.join(category.as_str()), x, z)
    }

    /// Store the payload of chunk `(x, z)` in `base/<category>`.
    pub fn write_chunk_payload(
        &self,
        base: &Path,
        category: &ChunkCategory,
        x: i32,
        z: i32,
        payload: &[u8],
    ) -> Result<(), StorageError> {
        self.write_chunk(&base.join(category.as_str()), x, z, payload)
    }

    /// Store the payload of chunk `(x, z)` in `base/<category>` unless `veto`
    /// objects.
    ///
    /// `veto` runs while the container lock is held, so no other request
    /// touches the container between the check and the write. Returns the
    /// veto, if there was one; a vetoed write creates nothing on disk.
    pub fn write_chunk_payload_unless<V>(
        &self,
        base: &Path,
        category: &ChunkCategory,
        x: i32,
        z: i32,
        payload: &[u8],
        veto: impl FnOnce() -> Option<V>,
    ) -> Result<Option<V>, StorageError> {
        self.write_chunk_unless(&base.join(category.as_str()), x, z, payload, veto)
    }

    /// Read chunk `(x, z)` from the containers in `dir`.
    pub fn read_chunk(&self, dir: &Path, x: i32, z: i32) -> Result<Option<Vec<u8>>, StorageError> {
        let entry = self.entry(dir, x, z);
        let mut slot = lock_slot(&entry);
        let (local_x, local_z) = chunk_to_local(x, z);
        match slot.existing()? {
            Some(region) => region.read_chunk(local_x, local_z),
            None => Ok(None),
        }
    }

    /// Write chunk `(x, z)` into the containers in `dir`, creating them as needed.
    pub fn write_chunk(
        &self,
        dir: &Path,
        x: i32,
        z: i32,
        payload: &[u8],
    ) -> Result<(), StorageError> {
        self.write_chunk_unless(dir, x, z, payload, || None::<Infallible>)
            .map(|_| ())
    }

    fn write_chunk_unless<V>(
        &self,
        dir: &Path,
        x: i32,
        z: i32,
        payload: &[u8],
        veto: impl FnOnce() -> Option<V>,
    ) -> Result<Option<V>, StorageError> {
        let entry = self.entry(dir, x, z);
        let mut slot = lock_slot(&entry);
        if let Some(reason) = veto() {
            return Ok(Some(reason));
        }
        let (local_x, local_z) = chunk_to_local(x, z);
        slot.existing_or_create()?.write_chunk(local_x, local_z, payload)?;
        Ok(None)
    }

    /// Drop every idle entry, closing its file.
    pub fn clear(&self) {
        let mut entries = self.table();
        let idle: Vec<PathBuf> = entries
            .iter()
            .filter(|(_, slot)| Arc::strong_count(slot) == 1)
            .map(|(path, _)| path.clone())
            .collect();
        for path in idle {
            entries.pop(&path);
        }
    }

    fn entry(&self, dir: &Path, x: i32, z: i32) -> Arc<Mutex<RegionSlot>> {
        let path = Self::region_path(dir, x, z);
        let mut entries = self.table();
        if let Some(slot) = entries.get(&path) {
            return Arc::clone(slot);
        }

        self.evict_if_needed(&mut entries);
        let slot = Arc::new(Mutex::new(RegionSlot {
            path: path.clone(),
            region: chunk_to_region(x, z),
            file: None,
        }));
        entries.put(path, Arc::clone(&slot));
        slot
    }

    /// Evict least recently used entries that no request is holding.
    ///
    /// Entries in use stay resident (a second handle to the same file would
    /// break the per-container serialization), so the table may briefly exceed
    /// its capacity.
    fn evict_if_needed(&self, entries: &mut LruCache<PathBuf, Arc<Mutex<RegionSlot>>>) {
        while entries.len() >= self.capacity {
            let victim = entries
                .iter()
                .rev()
                .find(|(_, slot)| Arc::strong_count(slot) == 1)
                .map(|(path, _)| path.clone());
            match victim {
                Some(path) => {
                    entries.pop(&path);
                    debug!(path = %path.display(), "Evicted region file");
                }
                None => break,
            }
        }
    }

    fn table(&self) -> MutexGuard<'_, LruCache<PathBuf, Arc<Mutex<RegionSlot>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RegionCache {
    fn default() -> Self {
        Self::new(DEFAULT_REGION_CACHE_CAPACITY)
    }
}

/// Lock a slot; a poisoned slot drops its handle so the next access reloads from disk.
fn lock_slot(entry: &Mutex<RegionSlot>) -> MutexGuard<'_, RegionSlot> {
    entry.lock().unwrap_or_else(|poisoned| {
        let mut slot = poisoned.into_inner();
        slot.file = None;
        slot
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn cache_evicts_least_recently_used() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = RegionCache::new(2);

        cache.write_chunk(dir.path(), 0, 0, b"a").expect("write a");
        cache.write_chunk(dir.path(), 32, 0, b"b").expect("write b");
        assert_eq!(cache.len(), 2);

        // Touch region (0,0) so (1,0) becomes the eviction candidate.
        cache.read_chunk(dir.path(), 0, 0).expect("read a");
        cache.write_chunk(dir.path(), 64, 0, b"c").expect("write c");

        assert_eq!(cache.len(), 2);
        assert!(cache.is_cached(&RegionCache::region_path(dir.path(), 0, 0)));
        assert!(!cache.is_cached(&RegionCache::region_path(dir.path(), 32, 0)));
        assert!(cache.is_cached(&RegionCache::region_path(dir.path(), 64, 0)));
    }

    #[test]
    fn evicted_region_reopens_transparently() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = RegionCache::new(1);

        cache.write_chunk(dir.path(), 5, 7, b"first").expect("write");
        cache.write_chunk(dir.path(), 100, 100, b"other").expect("evict");
        assert!(!cache.is_cached(&RegionCache::region_path(dir.path(), 5, 7)));

        assert_eq!(
            cache.read_chunk(dir.path(), 5, 7).expect("read"),
            Some(b"first".to_vec())
        );
    }

    #[test]
    fn reads_do_not_create_containers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = RegionCache::new(4);

        assert_eq!(cache.read_chunk(dir.path(), 0, 0).expect("read"), None);
        assert!(!RegionCache::region_path(dir.path(), 0, 0).exists());

        cache.write_chunk(dir.path(), 0, 0, b"now").expect("write");
        assert!(RegionCache::region_path(dir.path(), 0, 0).exists());
    }

    #[test]
    fn container_created_after_absent_read_is_seen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = RegionCache::new(4);
        let other = RegionCache::new(4);

        assert_eq!(cache.read_chunk(dir.path(), 1, 1).expect("read"), None);
        other.write_chunk(dir.path(), 1, 1, b"late").expect("write");
        other.clear();

        assert_eq!(
            cache.read_chunk(dir.path(), 1, 1).expect("read"),
            Some(b"late".to_vec())
        );
    }

    #[test]
    fn busy_entries_are_not_evicted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = RegionCache::new(1);

        let held = cache.entry(dir.path(), 0, 0);
        cache.write_chunk(dir.path(), 40, 40, b"x").expect("write");

        assert_eq!(cache.len(), 2);
        assert!(cache.is_cached(&RegionCache::region_path(dir.path(), 0, 0)));
        drop(held);

        cache.write_chunk(dir.path(), 80, 80, b"y").expect("write");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn category_selects_subdirectory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = RegionCache::default();

        cache
            .write_chunk_payload(dir.path(), &ChunkCategory::Entities, 3, 4, b"mobs")
            .expect("write");

        assert!(dir.path().join("entities").join("r.0.0.mca").exists());
        assert_eq!(
            cache
                .read_chunk_payload(dir.path(), &ChunkCategory::Region, 3, 4)
                .expect("read"),
            None
        );
        assert_eq!(
            cache
                .read_chunk_payload(dir.path(), &ChunkCategory::Entities, 3, 4)
                .expect("read"),
            Some(b"mobs".to_vec())
        );
    }

    #[test]
    fn vetoed_write_leaves_container_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = RegionCache::new(4);
        let path = dir.path().join("region").join("r.0.0.mca");

        let veto = cache
            .write_chunk_payload_unless(dir.path(), &ChunkCategory::Region, 0, 0, b"stale", || {
                Some("no longer owner")
            })
            .expect("write");
        assert_eq!(veto, Some("no longer owner"));
        assert!(!path.exists());

        cache
            .write_chunk_payload(dir.path(), &ChunkCategory::Region, 0, 0, b"kept")
            .expect("write");
        let veto = cache
            .write_chunk_payload_unless(dir.path(), &ChunkCategory::Region, 0, 0, b"stale", || {
                Some(())
            })
            .expect("write");
        assert_eq!(veto, Some(()));
        assert_eq!(
            cache
                .read_chunk_payload(dir.path(), &ChunkCategory::Region, 0, 0)
                .expect("read"),
            Some(b"kept".to_vec())
        );
    }

    #[test]
    fn veto_runs_while_the_container_is_locked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = RegionCache::new(4);
        let path = RegionCache::region_path(&dir.path().join("region"), 0, 0);

        let veto = cache
            .write_chunk_payload_unless(dir.path(), &ChunkCategory::Region, 0, 0, b"x", || {
                let entry = cache.entry(&dir.path().join("region"), 0, 0);
                let busy = entry.try_lock().is_err();
                (!busy).then_some("container was not locked")
            })
            .expect("write");
        assert_eq!(veto, None);
        assert!(path.exists());
    }

    #[test]
    fn corrupt_container_fails_only_its_own_requests() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = RegionCache::new(4);

        fs::write(RegionCache::region_path(dir.path(), 0, 0), [1u8; 10]).expect("stub");
        cache.write_chunk(dir.path(), 32, 0, b"ok").expect("write");

        let err = cache.read_chunk(dir.path(), 0, 0).expect_err("corrupt");
        assert!(err.is_corruption());
        assert!(cache
            .write_chunk(dir.path(), 0, 0, b"x")
            .expect_err("corrupt")
            .is_corruption());
        assert_eq!(
            cache.read_chunk(dir.path(), 32, 0).expect("read"),
            Some(b"ok".to_vec())
        );
    }

    #[test]
    fn concurrent_writers_to_one_region_do_not_corrupt_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = Arc::new(RegionCache::new(2));

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let cache = Arc::clone(&cache);
                let dir = dir.path().to_path_buf();
                std::thread::spawn(move || {
                    for round in 0..8 {
                        let x = worker * 4 + round % 4;
                        let payload = vec![worker as u8; 3000 + round as usize * 1500];
                        cache.write_chunk(&dir, x, 0, &payload).expect("write");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread");
        }

        cache.clear();
        for worker in 0..8 {
            for column in 0..4 {
                let data = cache
                    .read_chunk(dir.path(), worker * 4 + column, 0)
                    .expect("read")
                    .expect("present");
                assert!(data.iter().all(|b| *b == worker as u8));
            }
        }
    }
}
