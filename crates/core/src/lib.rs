#![warn(missing_docs)]
//! Core primitives shared across the workspace.

pub mod dimension;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use dimension::{dimension_directory, DimensionId};

/// Region size in chunks (32x32 chunks per region).
pub const REGION_SIZE: i32 = 32;

/// Errors raised while validating values that become part of a filesystem path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A world or category name cannot be used as a single path component.
    #[error("invalid path component {0:?}")]
    InvalidPathComponent(String),
}

/// Identifier assigned to every accepted peer connection.
///
/// Ids are never reused within one process, so a stale id can never alias a
/// newer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Chunk column address inside a named world.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoordinate {
    /// World name, also the world's directory name.
    pub world: String,
    /// Chunk X.
    pub x: i32,
    /// Chunk Z.
    pub z: i32,
}

impl ChunkCoordinate {
    /// Create a coordinate.
    pub fn new(world: impl Into<String>, x: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            z,
        }
    }

    /// Region containing this chunk.
    pub fn region(&self) -> (i32, i32) {
        chunk_to_region(self.x, self.z)
    }

    /// Slot of this chunk inside its region (0..32 on each axis).
    pub fn local(&self) -> (usize, usize) {
        chunk_to_local(self.x, self.z)
    }
}

impl fmt::Display for ChunkCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}, {}]", self.world, self.x, self.z)
    }
}

/// Converts chunk coordinates to region coordinates.
pub fn chunk_to_region(x: i32, z: i32) -> (i32, i32) {
    (x >> 5, z >> 5)
}

/// Converts chunk coordinates to the slot inside their region.
pub fn chunk_to_local(x: i32, z: i32) -> (usize, usize) {
    ((x & 31) as usize, (z & 31) as usize)
}

/// What kind of data is stored per chunk coordinate.
///
/// The category only selects a subdirectory; unknown categories are carried
/// through as [`ChunkCategory::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChunkCategory {
    /// Block/terrain data.
    Region,
    /// Entity data.
    Entities,
    /// Points of interest.
    Poi,
    /// Any other subdirectory.
    Other(String),
}

impl ChunkCategory {
    /// Parse a category name received from a peer.
    pub fn parse(name: &str) -> Result<Self, CoreError> {
        validate_path_component(name)?;
        Ok(match name {
            "region" => Self::Region,
            "entities" => Self::Entities,
            "poi" => Self::Poi,
            other => Self::Other(other.to_string()),
        })
    }

    /// Subdirectory name for this category.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Region => "region",
            Self::Entities => "entities",
            Self::Poi => "poi",
            Self::Other(name) => name,
        }
    }

    /// Whether reads and writes of this category are gated on chunk ownership.
    pub fn is_ownership_scoped(&self) -> bool {
        matches!(self, Self::Region | Self::Entities)
    }
}

impl fmt::Display for ChunkCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reject names that would escape or nest inside the directory they are joined onto.
pub fn validate_path_component(name: &str) -> Result<(), CoreError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(CoreError::InvalidPathComponent(name.to_string()));
    }
    Ok(())
}
