//! Dimension identifiers.
//!
//! Worlds for the Nether and the End keep their region data one directory
//! deeper than the Overworld (`DIM-1` and `DIM1`). The dimension is derived
//! from the world name suffix, the same convention the game servers use.

use crate::{validate_path_component, CoreError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Stable identifier for a world dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum DimensionId {
    /// The Overworld dimension.
    Overworld = 0,
    /// The Nether dimension.
    Nether = 1,
    /// The End dimension.
    End = 2,
}

impl DimensionId {
    /// Default (Overworld) dimension.
    pub const DEFAULT: Self = Self::Overworld;

    /// Dimension implied by a world name.
    pub fn from_world_name(world: &str) -> Self {
        if world.ends_with("_nether") {
            Self::Nether
        } else if world.ends_with("_the_end") {
            Self::End
        } else {
            Self::Overworld
        }
    }

    /// Subdirectory of the world directory holding this dimension's data.
    pub const fn subdirectory(self) -> Option<&'static str> {
        match self {
            Self::Overworld => None,
            Self::Nether => Some("DIM-1"),
            Self::End => Some("DIM1"),
        }
    }

    /// Canonical string key used in configs/logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Overworld => "overworld",
            Self::Nether => "nether",
            Self::End => "end",
        }
    }
}

impl Default for DimensionId {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Directory holding all of `world`'s data for its dimension, relative to `root`.
pub fn dimension_directory(root: &Path, world: &str) -> Result<PathBuf, CoreError> {
    validate_path_component(world)?;

    let mut dir = root.join(world);
    if let Some(sub) = DimensionId::from_world_name(world).subdirectory() {
        dir.push(sub);
    }
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_follows_world_suffix() {
        assert_eq!(DimensionId::from_world_name("world"), DimensionId::Overworld);
        assert_eq!(
            DimensionId::from_world_name("world_nether"),
            DimensionId::Nether
        );
        assert_eq!(
            DimensionId::from_world_name("world_the_end"),
            DimensionId::End
        );
        assert_eq!(
            DimensionId::from_world_name("nether_world"),
            DimensionId::Overworld
        );
    }

    #[test]
    fn special_dimensions_use_dim_subdirectories() {
        let root = Path::new("/srv");
        assert_eq!(
            dimension_directory(root, "world_nether").unwrap(),
            Path::new("/srv/world_nether/DIM-1")
        );
        assert_eq!(
            dimension_directory(root, "world_the_end").unwrap(),
            Path::new("/srv/world_the_end/DIM1")
        );
        assert_eq!(
            dimension_directory(root, "lobby").unwrap(),
            Path::new("/srv/lobby")
        );
    }

    #[test]
    fn world_names_cannot_escape_root() {
        let root = Path::new("/srv");
        assert!(dimension_directory(root, "..").is_err());
        assert!(dimension_directory(root, "a/b").is_err());
        assert!(dimension_directory(root, "").is_err());
    }
}
