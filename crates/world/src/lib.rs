#![warn(missing_docs)]
//! Region file storage: the on-disk container format and the cache of open containers.

mod cache;
mod error;
mod region;

pub use cache::{RegionCache, DEFAULT_REGION_CACHE_CAPACITY};
pub use error::StorageError;
pub use region::{
    external_file_name, region_file_name, RegionFile, COMPRESSION_ZLIB, HEADER_BYTES,
    MAX_PAYLOAD_BYTES, SECTOR_BYTES,
};
