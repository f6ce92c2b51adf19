//! Sector-allocated region containers (`r.<x>.<z>.mca`).
//!
//! A container groups a 32x32 grid of chunk slots. The first two 4 KiB
//! sectors hold the header: 1024 location entries (3-byte sector offset plus
//! 1-byte sector count) followed by 1024 timestamps, all big-endian. Every
//! stored chunk starts at a sector boundary with a 4-byte length (counting the
//! tag byte) and a 1-byte compression tag, then the compressed bytes.
//!
//! Payloads are opaque to this module; they are stored and returned verbatim.

use crate::error::StorageError;
use mpmaster_core::REGION_SIZE;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace, warn};

/// Bytes per sector.
pub const SECTOR_BYTES: usize = 4096;

/// Header size (location table + timestamp table).
pub const HEADER_BYTES: usize = 2 * SECTOR_BYTES;

/// Compression tag written with every payload (zlib, what peers deflate with).
pub const COMPRESSION_ZLIB: u8 = 2;

/// Largest payload accepted by a single write.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024 * 1024;

const SLOT_COUNT: usize = (REGION_SIZE * REGION_SIZE) as usize;
const CHUNK_HEADER_BYTES: usize = 5;
const MAX_SECTORS_PER_CHUNK: usize = 255;
const MAX_SECTOR_OFFSET: usize = (1 << 24) - 1;
const EXTERNAL_FLAG: u8 = 0x80;

/// File name of the container for a region.
pub fn region_file_name(region_x: i32, region_z: i32) -> String {
    format!("r.{}.{}.mca", region_x, region_z)
}

/// File name of the overflow file for a chunk too large for its container.
pub fn external_file_name(chunk_x: i32, chunk_z: i32) -> String {
    format!("c.{}.{}.mcc", chunk_x, chunk_z)
}

fn slot_index(local_x: usize, local_z: usize) -> usize {
    (local_x & 31) + (local_z & 31) * 32
}

fn sectors_for(bytes: usize) -> usize {
    bytes.div_ceil(SECTOR_BYTES)
}

fn now_seconds() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as u32)
        .unwrap_or(0)
}

/// Decoded location table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotLocation {
    offset: usize,
    sectors: usize,
}

impl SlotLocation {
    fn decode(raw: u32) -> Option<Self> {
        if raw == 0 {
            return None;
        }
        Some(Self {
            offset: (raw >> 8) as usize,
            sectors: (raw & 0xFF) as usize,
        })
    }

    fn encode(self) -> u32 {
        ((self.offset as u32) << 8) | (self.sectors as u32 & 0xFF)
    }

    fn end(self) -> usize {
        self.offset + self.sectors
    }

    /// True when the entry addresses data sectors that exist in a file of `file_sectors`.
    fn fits(self, file_sectors: usize) -> bool {
        self.offset >= 2 && self.sectors > 0 && self.end() <= file_sectors
    }
}

/// One open region container.
pub struct RegionFile {
    path: PathBuf,
    region_x: i32,
    region_z: i32,
    file: File,
    locations: Vec<u32>,
    /// Slots whose sectors collide with an earlier slot; they read as corrupt.
    overlapping: Vec<bool>,
    /// Sector occupancy; its length is the file length in sectors.
    used: Vec<bool>,
}

impl RegionFile {
    /// Open an existing container, returning `Ok(None)` when the file does not exist.
    pub fn open(path: &Path, region_x: i32, region_z: i32) -> Result<Option<Self>, StorageError> {
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StorageError::io(path, err)),
        };
        Self::load(path, region_x, region_z, file).map(Some)
    }

    /// Open a container, creating it (and its parent directories) if missing.
    pub fn create(path: &Path, region_x: i32, region_z: i32) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| StorageError::io(parent, err))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|err| StorageError::io(path, err))?;
        Self::load(path, region_x, region_z, file)
    }

    fn load(path: &Path, region_x: i32, region_z: i32, mut file: File) -> Result<Self, StorageError> {
        let io_err = |err| StorageError::io(path, err);

        let len = file.metadata().map_err(io_err)?.len() as usize;
        if len == 0 {
            file.write_all(&[0u8; HEADER_BYTES]).map_err(io_err)?;
            file.flush().map_err(io_err)?;
            debug!(path = %path.display(), "Created region file");
        } else if len < HEADER_BYTES {
            return Err(StorageError::corrupt(
                path,
                format!("truncated header: {len} bytes, expected at least {HEADER_BYTES}"),
            ));
        }

        let mut table = vec![0u8; SECTOR_BYTES];
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        file.read_exact(&mut table).map_err(io_err)?;
        let locations: Vec<u32> = table
            .chunks_exact(4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        let file_sectors = sectors_for(len.max(HEADER_BYTES));
        let mut used = vec![false; file_sectors];
        used[0] = true;
        used[1] = true;
        let mut overlapping = vec![false; SLOT_COUNT];
        for (index, raw) in locations.iter().enumerate() {
            let Some(location) = SlotLocation::decode(*raw) else {
                continue;
            };
            if !location.fits(file_sectors) {
                // Left unmarked; reading the slot reports corruption, writing it relocates.
                warn!(
                    path = %path.display(),
                    slot = index,
                    offset = location.offset,
                    sectors = location.sectors,
                    "Region slot points outside the file"
                );
                continue;
            }
            let sectors = &mut used[location.offset..location.end()];
            if sectors.iter().any(|taken| *taken) {
                // First claimant keeps the sectors; this slot reads as corrupt until rewritten.
                warn!(
                    path = %path.display(),
                    slot = index,
                    offset = location.offset,
                    sectors = location.sectors,
                    "Region slot overlaps another slot"
                );
                overlapping[index] = true;
                continue;
            }
            sectors.fill(true);
        }

        Ok(Self {
            path: path.to_path_buf(),
            region_x,
            region_z,
            file,
            locations,
            overlapping,
            used,
        })
    }

    /// Read the stored payload of a slot.
    ///
    /// Returns `Ok(None)` for a slot that was never written.
    pub fn read_chunk(
        &mut self,
        local_x: usize,
        local_z: usize,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let index = slot_index(local_x, local_z);
        let Some(location) = SlotLocation::decode(self.locations[index]) else {
            return Ok(None);
        };
        if !location.fits(self.used.len()) {
            return Err(self.corrupt(format!(
                "slot {index} points to sectors {}..{} of a {} sector file",
                location.offset,
                location.end(),
                self.used.len()
            )));
        }
        if self.overlapping[index] {
            return Err(self.corrupt(format!("slot {index} shares sectors with another slot")));
        }

        let mut chunk_header = [0u8; CHUNK_HEADER_BYTES];
        self.seek_sector(location.offset)?;
        self.read_exact(&mut chunk_header, index)?;

        let length = u32::from_be_bytes([
            chunk_header[0],
            chunk_header[1],
            chunk_header[2],
            chunk_header[3],
        ]) as usize;
        let compression = chunk_header[4];

        if length == 0 {
            warn!(path = %self.path.display(), slot = index, "Region slot has zero length");
            return Ok(None);
        }

        if compression & EXTERNAL_FLAG != 0 {
            let (chunk_x, chunk_z) = self.chunk_coords(index);
            let external = self.external_path(chunk_x, chunk_z);
            return match fs::read(&external) {
                Ok(data) => Ok(Some(data)),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Err(StorageError::corrupt(
                    &self.path,
                    format!("slot {index} references missing {}", external.display()),
                )),
                Err(err) => Err(StorageError::io(external, err)),
            };
        }

        let capacity = location.sectors * SECTOR_BYTES - 4;
        if length > capacity {
            return Err(self.corrupt(format!(
                "slot {index} declares {length} bytes but only {} sectors are allocated",
                location.sectors
            )));
        }
        if compression != COMPRESSION_ZLIB {
            trace!(slot = index, compression, "Chunk stored with non-default compression");
        }

        let mut data = vec![0u8; length - 1];
        self.read_exact(&mut data, index)?;
        Ok(Some(data))
    }

    /// Store a payload in a slot, replacing any previous one.
    pub fn write_chunk(
        &mut self,
        local_x: usize,
        local_z: usize,
        payload: &[u8],
    ) -> Result<(), StorageError> {
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(StorageError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_BYTES,
            });
        }

        let index = slot_index(local_x, local_z);
        let (chunk_x, chunk_z) = self.chunk_coords(index);
        let external = self.external_path(chunk_x, chunk_z);

        let inline_sectors = sectors_for(CHUNK_HEADER_BYTES + payload.len());
        let is_external = inline_sectors > MAX_SECTORS_PER_CHUNK;

        let mut record = if is_external {
            fs::write(&external, payload).map_err(|err| StorageError::io(&external, err))?;
            debug!(
                path = %external.display(),
                bytes = payload.len(),
                "Stored oversized chunk externally"
            );
            chunk_record(COMPRESSION_ZLIB | EXTERNAL_FLAG, &[])
        } else {
            chunk_record(COMPRESSION_ZLIB, payload)
        };

        let old = SlotLocation::decode(self.locations[index])
            .filter(|old| old.fits(self.used.len()) && !self.overlapping[index]);
        let sectors = sectors_for(record.len());
        let location = SlotLocation {
            offset: self.allocate(old, sectors)?,
            sectors,
        };
        record.resize(sectors * SECTOR_BYTES, 0);

        // Occupancy changes only once the record and its header entry are on disk.
        self.seek_sector(location.offset)?;
        self.file
            .write_all(&record)
            .map_err(|err| StorageError::io(&self.path, err))?;
        self.set_location(index, location)?;
        self.commit_sectors(index, old, location);
        self.file
            .flush()
            .map_err(|err| StorageError::io(&self.path, err))?;

        if !is_external {
            match fs::remove_file(&external) {
                Ok(()) => debug!(path = %external.display(), "Removed stale external chunk"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(StorageError::io(external, err)),
            }
        }

        trace!(slot = index, offset = location.offset, sectors, "Wrote chunk");
        Ok(())
    }

    /// Pick sectors for a slot without claiming them.
    ///
    /// The slot's current run is reused when the size is unchanged. Otherwise
    /// the new run never overlaps it, so a failed write leaves the old record intact.
    fn allocate(&self, old: Option<SlotLocation>, sectors: usize) -> Result<usize, StorageError> {
        if let Some(old) = old {
            if old.sectors == sectors {
                return Ok(old.offset);
            }
        }

        // First fit; a free run touching the end of the file may be extended.
        let mut run_start = 0;
        let mut run_len = 0;
        for (sector, used) in self.used.iter().enumerate() {
            if *used {
                run_len = 0;
                continue;
            }
            if run_len == 0 {
                run_start = sector;
            }
            run_len += 1;
            if run_len == sectors {
                break;
            }
        }
        let start = if run_len > 0 { run_start } else { self.used.len() };

        if start > MAX_SECTOR_OFFSET {
            return Err(StorageError::RegionFull {
                path: self.path.clone(),
            });
        }
        Ok(start)
    }

    /// Move a slot's occupancy from `old` to `new`.
    fn commit_sectors(&mut self, index: usize, old: Option<SlotLocation>, new: SlotLocation) {
        if let Some(old) = old {
            self.used[old.offset..old.end()].fill(false);
        }
        if new.end() > self.used.len() {
            self.used.resize(new.end(), false);
        }
        self.used[new.offset..new.end()].fill(true);
        self.overlapping[index] = false;
    }

    /// Write the header entries of a slot; the location entry goes last and
    /// the in-memory table follows only on success.
    fn set_location(&mut self, index: usize, location: SlotLocation) -> Result<(), StorageError> {
        let raw = location.encode();
        let io_err = |err| StorageError::io(&self.path, err);
        self.file
            .seek(SeekFrom::Start((SECTOR_BYTES + index * 4) as u64))
            .map_err(io_err)?;
        self.file
            .write_all(&now_seconds().to_be_bytes())
            .map_err(io_err)?;
        self.file
            .seek(SeekFrom::Start((index * 4) as u64))
            .map_err(io_err)?;
        self.file.write_all(&raw.to_be_bytes()).map_err(io_err)?;
        self.locations[index] = raw;
        Ok(())
    }

    fn seek_sector(&mut self, sector: usize) -> Result<(), StorageError> {
        self.file
            .seek(SeekFrom::Start((sector * SECTOR_BYTES) as u64))
            .map(|_| ())
            .map_err(|err| StorageError::io(&self.path, err))
    }

    fn read_exact(&mut self, buf: &mut [u8], index: usize) -> Result<(), StorageError> {
        match self.file.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                Err(self.corrupt(format!("slot {index} is cut off by the end of the file")))
            }
            Err(err) => Err(StorageError::io(&self.path, err)),
        }
    }

    fn chunk_coords(&self, index: usize) -> (i32, i32) {
        let local_x = (index % 32) as i32;
        let local_z = (index / 32) as i32;
        (
            self.region_x * REGION_SIZE + local_x,
            self.region_z * REGION_SIZE + local_z,
        )
    }

    fn external_path(&self, chunk_x: i32, chunk_z: i32) -> PathBuf {
        self.path.with_file_name(external_file_name(chunk_x, chunk_z))
    }

    fn corrupt(&self, reason: String) -> StorageError {
        StorageError::corrupt(&self.path, reason)
    }
}

fn chunk_record(compression: u8, payload: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(CHUNK_HEADER_BYTES + payload.len());
    record.extend_from_slice(&((payload.len() + 1) as u32).to_be_bytes());
    record.push(compression);
    record.extend_from_slice(payload);
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    fn file_len(path: &Path) -> u64 {
        fs::metadata(path).expect("metadata").len()
    }

    #[test]
    fn slot_index_layout() {
        assert_eq!(slot_index(0, 0), 0);
        assert_eq!(slot_index(31, 0), 31);
        assert_eq!(slot_index(0, 1), 32);
        assert_eq!(slot_index(31, 31), SLOT_COUNT - 1);
    }

    #[test]
    fn location_entry_roundtrip() {
        let location = SlotLocation {
            offset: 0x01_02_03,
            sectors: 7,
        };
        assert_eq!(location.encode(), 0x01_02_03_07);
        assert_eq!(SlotLocation::decode(location.encode()), Some(location));
        assert_eq!(SlotLocation::decode(0), None);
    }

    #[test]
    fn open_missing_file_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(region_file_name(0, 0));
        assert!(RegionFile::open(&path, 0, 0).expect("open").is_none());
        assert!(!path.exists());
    }

    #[test]
    fn create_writes_empty_header() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("region").join(region_file_name(0, 0));
        let mut region = RegionFile::create(&path, 0, 0).expect("create");

        assert_eq!(file_len(&path), HEADER_BYTES as u64);
        assert_eq!(region.locations[slot_index(3, 4)], 0);
        assert_eq!(region.read_chunk(3, 4).expect("read"), None);
    }

    #[test]
    fn write_then_read_same_slot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(region_file_name(0, 0));
        let mut region = RegionFile::create(&path, 0, 0).expect("create");

        let data = payload(5000, 1);
        region.write_chunk(3, 4, &data).expect("write");

        assert_ne!(region.locations[slot_index(3, 4)], 0);
        assert_eq!(region.read_chunk(3, 4).expect("read"), Some(data));
        let bytes = fs::read(&path).expect("read file");
        let stamp = SECTOR_BYTES + slot_index(3, 4) * 4;
        assert_ne!(&bytes[stamp..stamp + 4], &[0, 0, 0, 0]);
        assert_eq!(region.read_chunk(4, 3).expect("read"), None);
        // Header + two sectors for 5005 bytes.
        assert_eq!(file_len(&path), (4 * SECTOR_BYTES) as u64);
    }

    #[test]
    fn on_disk_layout_matches_anvil() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(region_file_name(0, 0));
        let mut region = RegionFile::create(&path, 0, 0).expect("create");
        region.write_chunk(1, 0, b"abc").expect("write");
        drop(region);

        let bytes = fs::read(&path).expect("read file");
        // Slot 1 location: sector 2, one sector.
        assert_eq!(&bytes[4..8], &[0, 0, 2, 1]);
        let record = &bytes[2 * SECTOR_BYTES..2 * SECTOR_BYTES + 8];
        assert_eq!(record, &[0, 0, 0, 4, COMPRESSION_ZLIB, b'a', b'b', b'c']);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(region_file_name(-1, 2));
        let a = payload(100, 2);
        let b = payload(9000, 3);
        {
            let mut region = RegionFile::create(&path, -1, 2).expect("create");
            region.write_chunk(0, 0, &a).expect("write a");
            region.write_chunk(31, 31, &b).expect("write b");
        }

        let mut region = RegionFile::open(&path, -1, 2)
            .expect("open")
            .expect("file exists");
        assert_eq!(region.read_chunk(0, 0).expect("read a"), Some(a));
        assert_eq!(region.read_chunk(31, 31).expect("read b"), Some(b));
    }

    #[test]
    fn growing_payload_relocates_without_touching_neighbours() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(region_file_name(0, 0));
        let mut region = RegionFile::create(&path, 0, 0).expect("create");

        let small = payload(100, 4);
        let neighbour = payload(200, 5);
        let large = payload(20_000, 6);

        region.write_chunk(0, 0, &small).expect("write small");
        region.write_chunk(1, 0, &neighbour).expect("write neighbour");
        region.write_chunk(0, 0, &large).expect("write large");

        assert_eq!(region.read_chunk(0, 0).expect("read"), Some(large));
        assert_eq!(region.read_chunk(1, 0).expect("read"), Some(neighbour));

        let shrunk = payload(10, 7);
        region.write_chunk(0, 0, &shrunk).expect("write shrunk");
        assert_eq!(region.read_chunk(0, 0).expect("read"), Some(shrunk));
    }

    #[test]
    fn freed_sectors_are_reused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(region_file_name(0, 0));
        let mut region = RegionFile::create(&path, 0, 0).expect("create");

        // Sectors 2..5, then 5..6.
        region.write_chunk(0, 0, &payload(10_000, 1)).expect("write 0");
        region.write_chunk(1, 0, &payload(100, 2)).expect("write 1");
        // Grows to 5 sectors: moves to 6..11 and frees 2..5.
        region.write_chunk(0, 0, &payload(20_000, 3)).expect("rewrite 0");
        let len_after_move = file_len(&path);
        assert_eq!(len_after_move, (11 * SECTOR_BYTES) as u64);

        // Two sectors fit into the freed gap.
        let gap_filler = payload(5000, 4);
        region.write_chunk(2, 0, &gap_filler).expect("write 2");
        assert_eq!(file_len(&path), len_after_move);
        assert_eq!(region.read_chunk(2, 0).expect("read 2"), Some(gap_filler));
    }

    #[test]
    fn truncated_header_is_corruption() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(region_file_name(0, 0));
        fs::write(&path, vec![0u8; 100]).expect("write stub");

        let err = RegionFile::open(&path, 0, 0).err().expect("open must fail");
        assert!(err.is_corruption(), "unexpected error: {err}");
        let err = RegionFile::create(&path, 0, 0).err().expect("create must fail");
        assert!(err.is_corruption(), "unexpected error: {err}");
    }

    #[test]
    fn slot_past_end_of_file_is_corruption_for_that_slot_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(region_file_name(0, 0));
        {
            let mut region = RegionFile::create(&path, 0, 0).expect("create");
            region.write_chunk(5, 5, b"fine").expect("write");
        }

        // Point slot 0 at sector 100 of a four-sector file.
        let mut file = OpenOptions::new().write(true).open(&path).expect("open");
        file.write_all(&[0, 0, 100, 1]).expect("patch header");
        drop(file);

        let mut region = RegionFile::open(&path, 0, 0).expect("open").expect("exists");
        assert!(region.read_chunk(0, 0).expect_err("corrupt slot").is_corruption());
        assert_eq!(region.read_chunk(5, 5).expect("read"), Some(b"fine".to_vec()));

        // Rewriting the damaged slot allocates fresh sectors.
        region.write_chunk(0, 0, b"repaired").expect("rewrite");
        assert_eq!(
            region.read_chunk(0, 0).expect("read"),
            Some(b"repaired".to_vec())
        );
    }

    #[test]
    fn failed_relocation_keeps_sector_map() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(region_file_name(0, 0));
        let original = payload(10_000, 1);
        {
            let mut region = RegionFile::create(&path, 0, 0).expect("create");
            region.write_chunk(0, 0, &original).expect("write 0");
            region.write_chunk(1, 0, &payload(100, 2)).expect("write 1");
        }

        // A read-only handle makes every write fail.
        let file = File::open(&path).expect("open read-only");
        let mut region = RegionFile::load(&path, 0, 0, file).expect("load");
        let used_before = region.used.clone();
        let locations_before = region.locations.clone();

        let err = region
            .write_chunk(0, 0, &payload(20_000, 3))
            .expect_err("read-only file");
        assert!(matches!(err, StorageError::Io { .. }), "unexpected error: {err}");
        assert_eq!(region.used, used_before);
        assert_eq!(region.locations, locations_before);
        assert_eq!(region.read_chunk(0, 0).expect("read"), Some(original));
    }

    #[test]
    fn overlapping_slots_are_corruption_for_the_later_slot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(region_file_name(0, 0));
        {
            let mut region = RegionFile::create(&path, 0, 0).expect("create");
            region.write_chunk(0, 0, b"first").expect("write 0");
            region.write_chunk(1, 0, b"second").expect("write 1");
        }

        // Point slot 1 at slot 0's sector.
        let mut file = OpenOptions::new().write(true).open(&path).expect("open");
        file.seek(SeekFrom::Start(4)).expect("seek");
        file.write_all(&[0, 0, 2, 1]).expect("patch header");
        drop(file);

        let mut region = RegionFile::open(&path, 0, 0).expect("open").expect("exists");
        assert_eq!(region.read_chunk(0, 0).expect("read"), Some(b"first".to_vec()));
        assert!(region.read_chunk(1, 0).expect_err("overlap").is_corruption());

        // Rewriting the later slot moves it without touching the first.
        region.write_chunk(1, 0, b"rewritten").expect("rewrite");
        assert_eq!(region.read_chunk(0, 0).expect("read"), Some(b"first".to_vec()));
        assert_eq!(
            region.read_chunk(1, 0).expect("read"),
            Some(b"rewritten".to_vec())
        );
    }

    #[test]
    fn declared_length_beyond_allocation_is_corruption() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(region_file_name(0, 0));
        {
            let mut region = RegionFile::create(&path, 0, 0).expect("create");
            region.write_chunk(0, 0, b"data").expect("write");
        }

        let mut file = OpenOptions::new().write(true).open(&path).expect("open");
        file.seek(SeekFrom::Start(HEADER_BYTES as u64)).expect("seek");
        file.write_all(&[0, 1, 0, 0]).expect("patch length");
        drop(file);

        let mut region = RegionFile::open(&path, 0, 0).expect("open").expect("exists");
        assert!(region.read_chunk(0, 0).expect_err("corrupt").is_corruption());
    }

    #[test]
    fn oversized_payload_goes_to_external_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(region_file_name(1, -1));
        let mut region = RegionFile::create(&path, 1, -1).expect("create");

        let huge = payload(1_100_000, 8);
        region.write_chunk(2, 3, &huge).expect("write huge");

        let external = dir.path().join(external_file_name(34, -29));
        assert!(external.exists(), "external file missing");
        assert_eq!(file_len(&path), (3 * SECTOR_BYTES) as u64);
        assert_eq!(region.read_chunk(2, 3).expect("read"), Some(huge));

        // Shrinking back inline removes the overflow file.
        region.write_chunk(2, 3, b"small").expect("write small");
        assert!(!external.exists());
        assert_eq!(region.read_chunk(2, 3).expect("read"), Some(b"small".to_vec()));
    }

    #[test]
    fn missing_external_file_is_corruption() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(region_file_name(0, 0));
        let mut region = RegionFile::create(&path, 0, 0).expect("create");
        region
            .write_chunk(0, 0, &payload(1_100_000, 9))
            .expect("write huge");
        fs::remove_file(dir.path().join(external_file_name(0, 0))).expect("remove");

        assert!(region.read_chunk(0, 0).expect_err("corrupt").is_corruption());
    }

    #[test]
    fn payload_limit_is_enforced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(region_file_name(0, 0));
        let mut region = RegionFile::create(&path, 0, 0).expect("create");
        let err = region
            .write_chunk(0, 0, &vec![0u8; MAX_PAYLOAD_BYTES + 1])
            .expect_err("too large");
        assert!(matches!(err, StorageError::PayloadTooLarge { .. }));
    }
}
